//! Interrupt dispatcher: IDT installation, PIC mediation, and the one common
//! path every thunk in [`stubs`] funnels through.
//!
//! The 21 CPU-defined exceptions get their default handlers installed by
//! [`exceptions::install_defaults`]; everything else (hardware IRQs, the
//! software-interrupt self-test vector) starts out unhandled and is wired up
//! by [`install_handler`].

mod stubs;
pub mod exceptions;

use core::sync::atomic::{AtomicUsize, Ordering};
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::structures::idt::InterruptDescriptorTable;
use x86_64::VirtAddr;

pub const PIC_1_OFFSET: u8 = 0x20;
pub const PIC_2_OFFSET: u8 = 0x28;

static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

static IDT: conquer_once::spin::OnceCell<InterruptDescriptorTable> = conquer_once::spin::OnceCell::uninit();

/// One slot per vector, holding the handler as an untyped pointer-sized
/// word. Zero means unhandled. Matches the "pointer-sized write" contract:
/// `install_handler` stores the whole word in one atomic op.
static HANDLERS: [AtomicUsize; 256] = {
    const ZERO: AtomicUsize = AtomicUsize::new(0);
    [ZERO; 256]
};

pub type Handler = fn(&InterruptContext);

/// Registers captured by the entry thunk before a handler runs.
///
/// Field order mirrors the push order in [`stubs`]'s `isr_common_stub`: the
/// last register pushed sits at the lowest address, i.e. first in this
/// struct, and the CPU-supplied trap frame follows the software-pushed
/// vector and error code.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct InterruptContext {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Entry point called by every thunk in [`stubs`]. Looks up the handler
/// slot for the captured vector and, if one is registered, invokes it.
/// Vectors with no registered handler fall straight through.
extern "C" fn dispatch(ctx: *mut InterruptContext) {
    let ctx = unsafe { &*ctx };
    let slot = HANDLERS[ctx.vector as usize].load(Ordering::Acquire);
    if slot != 0 {
        let handler: Handler = unsafe { core::mem::transmute(slot) };
        handler(ctx);
    }
}

/// Registers or clears the handler for `vector`. Callers must disable
/// interrupts around this call; the store itself is a single pointer-sized
/// write.
pub fn install_handler(vector: u8, handler: Option<Handler>) {
    let word = match handler {
        Some(f) => f as usize,
        None => 0,
    };
    HANDLERS[vector as usize].store(word, Ordering::Release);
}

/// Unmasks hardware IRQ `irq` (0..16) on the appropriate controller.
/// Unmasking IRQ 8..16 implicitly unmasks the master's cascade line (IRQ 2).
pub fn irq_unmask(irq: u8) {
    set_mask_bit(irq, false);
    if irq >= 8 {
        set_mask_bit(2, false);
    }
}

/// Masks hardware IRQ `irq` (0..16).
pub fn irq_mask(irq: u8) {
    set_mask_bit(irq, true);
}

fn set_mask_bit(irq: u8, masked: bool) {
    let mut pics = PICS.lock();
    let [mut master, mut slave] = unsafe { pics.read_masks() };
    let (word, bit) = if irq < 8 {
        (&mut master, irq)
    } else {
        (&mut slave, irq - 8)
    };
    if masked {
        *word |= 1 << bit;
    } else {
        *word &= !(1 << bit);
    }
    unsafe {
        pics.write_masks(master, slave);
    }
}

/// Signals end-of-interrupt for hardware vector `vector` (0x20..0x30).
pub fn notify_end_of_interrupt(vector: u8) {
    unsafe {
        PICS.lock().notify_end_of_interrupt(vector);
    }
}

/// Remaps the PIC pair, masks every IRQ, installs the 256-entry descriptor
/// table pointing at the assembler-emitted thunks, then installs the
/// default exception handlers.
pub fn init() {
    unsafe {
        PICS.lock().initialize();
        PICS.lock().write_masks(0xFF, 0xFF);
    }

    IDT.init_once(build_idt);
    IDT.get().unwrap().load();

    exceptions::install_defaults();

    log::info!("IDT installed; PIC remapped to 0x20/0x28 and fully masked");
}

fn build_idt() -> InterruptDescriptorTable {
    let mut idt = InterruptDescriptorTable::new();
    for vector in 0..256usize {
        let addr = unsafe { stubs::isr_stub_table[vector] };
        let entry = &mut idt[vector];
        unsafe {
            entry.set_handler_addr(VirtAddr::new(addr));
        }
        if vector == 8 {
            unsafe {
                entry.set_stack_index(crate::gdt::DOUBLE_FAULT_IST_INDEX);
            }
        }
        if vector == 14 {
            unsafe {
                entry.set_stack_index(crate::gdt::PAGE_FAULT_IST_INDEX);
            }
        }
    }
    idt
}

