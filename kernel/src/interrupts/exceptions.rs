//! Default handlers for the 21 CPU-defined fault/trap vectors (0x00-0x14).
//!
//! Breakpoint is the one recoverable case: log and fall back through
//! `iretq`. Everything else — divide-by-zero, an unhandled page fault,
//! double-fault, machine-check, general-protection — has no demand-paging
//! or recovery story in this kernel, so it dumps the captured context and
//! routes through [`crate::fatal`].

use super::InterruptContext;

const EXCEPTION_NAMES: [&str; 21] = [
    "divide-by-zero",
    "debug",
    "non-maskable-interrupt",
    "breakpoint",
    "overflow",
    "bound-range-exceeded",
    "invalid-opcode",
    "device-not-available",
    "double-fault",
    "coprocessor-segment-overrun",
    "invalid-tss",
    "segment-not-present",
    "stack-segment-fault",
    "general-protection-fault",
    "page-fault",
    "reserved",
    "x87-floating-point",
    "alignment-check",
    "machine-check",
    "simd-floating-point",
    "virtualization",
];

const BREAKPOINT_VECTOR: u8 = 3;
const PAGE_FAULT_VECTOR: u8 = 14;

pub fn install_defaults() {
    for vector in 0u8..=20 {
        let handler: super::Handler = if vector == BREAKPOINT_VECTOR {
            breakpoint
        } else {
            fatal_exception
        };
        super::install_handler(vector, Some(handler));
    }
}

fn breakpoint(ctx: &InterruptContext) {
    log::warn!("breakpoint at rip={:#x}", ctx.rip);
}

fn fatal_exception(ctx: &InterruptContext) {
    let name = EXCEPTION_NAMES[ctx.vector as usize];
    let cr2 = if ctx.vector == PAGE_FAULT_VECTOR as u64 {
        x86_64::registers::control::Cr2::read_raw()
    } else {
        0
    };
    crate::fatal::fatal_with(format_args!(
        "{} (vector {:#x}, error_code {:#x}, rip {:#x}, cr2 {:#x}, rax {:#x}, rbx {:#x}, rcx {:#x}, rdx {:#x}, rsi {:#x}, rdi {:#x}, rbp {:#x}, rsp {:#x}, r8 {:#x}, r9 {:#x}, r10 {:#x}, r11 {:#x}, r12 {:#x}, r13 {:#x}, r14 {:#x}, r15 {:#x})",
        name,
        ctx.vector,
        ctx.error_code,
        ctx.rip,
        cr2,
        ctx.rax,
        ctx.rbx,
        ctx.rcx,
        ctx.rdx,
        ctx.rsi,
        ctx.rdi,
        ctx.rbp,
        ctx.rsp,
        ctx.r8,
        ctx.r9,
        ctx.r10,
        ctx.r11,
        ctx.r12,
        ctx.r13,
        ctx.r14,
        ctx.r15,
    ));
}
