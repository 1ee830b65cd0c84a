//! GDT and TSS. Collaborator named in `spec.md` §6: a kernel code/data
//! segment pair plus a TSS carrying two IST entries, so double-fault and
//! page-fault handlers always run on a known-good stack even if the
//! currently active stack is the thing that's broken.

use conquer_once::spin::OnceCell;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector};
use x86_64::structures::tss::TaskStateSegment;
use x86_64::VirtAddr;

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
pub const PAGE_FAULT_IST_INDEX: u16 = 1;

const IST_STACK_SIZE: usize = 4096 * 5;

static mut DOUBLE_FAULT_STACK: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];
static mut PAGE_FAULT_STACK: [u8; IST_STACK_SIZE] = [0; IST_STACK_SIZE];

struct Selectors {
    code_selector: SegmentSelector,
    data_selector: SegmentSelector,
    user_data_selector: SegmentSelector,
    user_code_selector: SegmentSelector,
    tss_selector: SegmentSelector,
}

static TSS: OnceCell<TaskStateSegment> = OnceCell::uninit();
static GDT: OnceCell<(GlobalDescriptorTable, Selectors)> = OnceCell::uninit();

pub fn init() {
    use x86_64::instructions::segmentation::{Segment, CS, DS};
    use x86_64::instructions::tables::load_tss;

    TSS.init_once(|| {
        let mut tss = TaskStateSegment::new();
        // SAFETY: these statics are only ever referenced here, once, before
        // any fault can occur.
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            let stack_start = VirtAddr::from_ptr(unsafe { core::ptr::addr_of!(DOUBLE_FAULT_STACK) });
            stack_start + IST_STACK_SIZE as u64
        };
        tss.interrupt_stack_table[PAGE_FAULT_IST_INDEX as usize] = {
            let stack_start = VirtAddr::from_ptr(unsafe { core::ptr::addr_of!(PAGE_FAULT_STACK) });
            stack_start + IST_STACK_SIZE as u64
        };
        tss
    });

    GDT.init_once(|| {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        // User data must precede user code: the STAR MSR derives both the
        // SYSRET code selector and its paired stack selector from a single
        // base index, and requires this order.
        let user_data_selector = gdt.append(Descriptor::user_data_segment());
        let user_code_selector = gdt.append(Descriptor::user_code_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(TSS.get().unwrap()));
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                user_data_selector,
                user_code_selector,
                tss_selector,
            },
        )
    });

    let (gdt, selectors) = GDT.get().unwrap();
    gdt.load();
    unsafe {
        CS::set_reg(selectors.code_selector);
        DS::set_reg(selectors.data_selector);
        load_tss(selectors.tss_selector);
    }

    log::info!("GDT loaded; TSS installed with double-fault and page-fault IST stacks");
}

/// Kernel code segment selector, for MSR programming done after `init`.
pub fn kernel_code_selector() -> SegmentSelector {
    GDT.get().unwrap().1.code_selector
}

/// Kernel data segment selector, for MSR programming done after `init`.
pub fn kernel_data_selector() -> SegmentSelector {
    GDT.get().unwrap().1.data_selector
}

/// User data segment selector. No ring-3 code ever loads it; it exists so
/// the STAR MSR's selector arithmetic has a valid base to work from.
pub fn user_data_selector() -> SegmentSelector {
    GDT.get().unwrap().1.user_data_selector
}

/// User code segment selector. See `user_data_selector`.
pub fn user_code_selector() -> SegmentSelector {
    GDT.get().unwrap().1.user_code_selector
}
