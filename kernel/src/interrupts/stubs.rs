//! The 256 per-vector entry thunks.
//!
//! Generated once, at link time, by the assembler's own `.rept` repeat
//! directive rather than by 256 individual Rust functions — a
//! linker-produced table, per `spec.md` §9's "implementation vehicle is
//! free". Each thunk pushes a dummy error code (for vectors the CPU doesn't
//! supply one for) and its own vector number, then falls into the one
//! shared `common_stub`, which saves every general-purpose register, calls
//! into Rust with a pointer to the assembled `InterruptContext`, restores
//! registers, and `iretq`s back out.
//!
//! `isr_stub_table` is a 256-entry array of thunk addresses, built in the
//! same assembly block, so Rust can populate the IDT without declaring 256
//! `extern "C"` names by hand.

core::arch::global_asm!(
    r#"
.altmacro

.macro isr_err_stub i
isr_stub_\i:
    push \i
    jmp isr_common_stub
.endm

.macro isr_noerr_stub i
isr_stub_\i:
    push 0
    push \i
    jmp isr_common_stub
.endm

.set i, 0
.rept 32
    .if i == 8 || i == 10 || i == 11 || i == 12 || i == 13 || i == 14 || i == 17 || i == 21 || i == 29 || i == 30
        isr_err_stub %i
    .else
        isr_noerr_stub %i
    .endif
    .set i, i+1
.endr

.set i, 32
.rept 224
    isr_noerr_stub %i
    .set i, i+1
.endr

isr_common_stub:
    push rax
    push rbx
    push rcx
    push rdx
    push rsi
    push rdi
    push rbp
    push r8
    push r9
    push r10
    push r11
    push r12
    push r13
    push r14
    push r15

    mov rdi, rsp
    call {dispatch}

    pop r15
    pop r14
    pop r13
    pop r12
    pop r11
    pop r10
    pop r9
    pop r8
    pop rbp
    pop rdi
    pop rsi
    pop rdx
    pop rcx
    pop rbx
    pop rax
    add rsp, 16
    iretq

.section .rodata
.global isr_stub_table
isr_stub_table:
.set i, 0
.rept 256
    .quad isr_stub_%i
    .set i, i+1
.endr
.text
"#,
    dispatch = sym super::dispatch,
);

extern "C" {
    /// 256 consecutive 8-byte thunk addresses, indexed by vector number.
    pub static isr_stub_table: [u64; 256];
}
