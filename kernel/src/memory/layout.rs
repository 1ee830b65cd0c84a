//! Canonical kernel virtual-memory layout constants.

use x86_64::VirtAddr;

/// Upper-half kernel base; matches the linker script's load address.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Start of the kernel heap's virtual region.
pub const HEAP_START: u64 = 0xffff_ffff_4000_0000;

/// 4 KiB pages the heap may grow to at most (1 GiB).
pub const HEAP_MAX_PAGES: usize = 262_144;

/// 4 KiB pages the heap is created with.
pub const HEAP_INITIAL_PAGES: usize = 16;

/// Virtual window each address space reserves for its own intermediate
/// page-table allocations, starting just past the heap's maximum extent.
pub const ADDRESS_SPACE_WINDOW_BASE: u64 = HEAP_START + (HEAP_MAX_PAGES as u64) * 4096;
pub const ADDRESS_SPACE_WINDOW_SIZE: u64 = 0x0000_0010_0000_0000; // 64 GiB

pub fn heap_start() -> VirtAddr {
    VirtAddr::new(HEAP_START)
}

pub fn address_space_window_base() -> VirtAddr {
    VirtAddr::new(ADDRESS_SPACE_WINDOW_BASE)
}
