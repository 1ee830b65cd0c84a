//! System-call bootstrap. Collaborator named in `spec.md`'s component table:
//! verify CPU support, program the SYSCALL/SYSRET control registers, install
//! an entry trampoline. Out of scope per the Non-goals: a syscall table, any
//! process or scheduler to return control to, argument marshaling beyond the
//! raw register convention. `syscall_entry` below has nothing real to
//! dispatch to yet, so it answers every call with "not implemented."
//!
//! Grounded in the CPU instructions rather than in anything this kernel's
//! own boot path exercises: nothing calls `SYSCALL` in this tree, so this
//! module's only job is to leave the machine in a state where one *could*.

use x86_64::registers::model_specific::{Efer, EferFlags, LStar, SFMask, Star};
use x86_64::registers::rflags::RFlags;
use x86_64::VirtAddr;

/// CPUID leaf 0x8000_0001, EDX bit 11: SYSCALL/SYSRET available in long mode.
const SYSCALL_SYSRET_EDX_BIT: u32 = 1 << 11;

fn cpu_supports_syscall() -> bool {
    let (_, _, _, edx) = crate::arch::cpuid(0x8000_0001);
    edx & SYSCALL_SYSRET_EDX_BIT != 0
}

/// Checks CPU support, then programs EFER.SCE and the STAR/LSTAR/SFMASK
/// MSRs so `SYSCALL` vectors to `syscall_entry`. Does nothing (and logs why)
/// on a CPU that lacks the feature, since nothing in this kernel's boot path
/// depends on it being present.
pub fn init() {
    if !cpu_supports_syscall() {
        log::warn!("CPU does not advertise SYSCALL/SYSRET; skipping syscall bootstrap");
        return;
    }

    Efer::update(|flags| *flags |= EferFlags::SYSTEM_CALL_EXTENSIONS);

    // the kernel and user segment selectors were just installed by
    // `gdt::init` and obey STAR's ordering requirement (user data directly
    // below user code).
    if let Err(msg) = Star::write(
        crate::gdt::user_code_selector(),
        crate::gdt::user_data_selector(),
        crate::gdt::kernel_code_selector(),
        crate::gdt::kernel_data_selector(),
    ) {
        log::warn!("STAR selector layout invalid, skipping syscall bootstrap: {msg}");
        Efer::update(|flags| flags.remove(EferFlags::SYSTEM_CALL_EXTENSIONS));
        return;
    }

    LStar::write(VirtAddr::new(syscall_entry as u64));

    // Cleared from RFLAGS on entry so the handler runs with interrupts off,
    // no single-step trap, and a sane direction/alignment-check state.
    SFMask::write(
        RFlags::INTERRUPT_FLAG
            | RFlags::TRAP_FLAG
            | RFlags::ALIGNMENT_CHECK
            | RFlags::DIRECTION_FLAG,
    );

    log::info!("syscall bootstrap complete: EFER.SCE set, entry trampoline installed");
}

core::arch::global_asm!(
    r#"
.global syscall_entry
syscall_entry:
    push rcx
    push r11
    mov rdi, rax
    call {dispatch}
    pop r11
    pop rcx
    sysretq
"#,
    dispatch = sym dispatch,
);

extern "C" {
    fn syscall_entry();
}

/// Stand-in dispatcher: every call number comes back `-ENOSYS`. Nothing in
/// this kernel reaches ring 3 to call `SYSCALL` in the first place; this
/// only exists so `LSTAR` points at a trampoline that returns cleanly
/// instead of running off into whatever follows it in `.text`.
extern "C" fn dispatch(call_number: u64) -> i64 {
    log::warn!("syscall {call_number} received, no syscall table installed");
    -38 // ENOSYS
}
