//! Memory subsystem entry point: wires the normalized memory map, the
//! page-frame database, the page-table engine, and the kernel heap together
//! into one boot-time `init` sequence.

pub mod frame_db;
pub mod heap;
pub mod layout;
pub mod memmap;
pub mod paging;

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use memmap::{MemoryMap, RegionKind};
use x86_64::VirtAddr;

/// Physical base of the 80x25 VGA text buffer, one page, marked `Uncached`
/// so it is never pulled into a cached mapping.
const VGA_BUFFER_BASE: u64 = 0xB8000;
const VGA_BUFFER_SIZE: u64 = 0x1000;

fn region_kind(kind: MemoryRegionKind) -> RegionKind {
    match kind {
        MemoryRegionKind::Usable => RegionKind::Usable,
        _ => RegionKind::Reserved,
    }
}

fn build_memory_map(regions: &MemoryRegions) -> MemoryMap {
    let mut map = MemoryMap::new();
    map.add(0, 0x1000, RegionKind::Unmapped);
    map.add(VGA_BUFFER_BASE, VGA_BUFFER_SIZE, RegionKind::Uncached);
    for region in regions.iter() {
        let size = region.end - region.start;
        if size == 0 {
            continue;
        }
        map.add(region.start, size, region_kind(region.kind));
    }
    map.normalize();
    map
}

/// Runs the full memory bring-up sequence: normalize the boot loader's
/// region list, build the kernel identity map, activate it, bring up the
/// frame database against the now-addressable physical memory, wrap the
/// kernel root as an `AddressSpace`, and create the kernel heap.
pub fn init(physical_memory_offset: VirtAddr, memory_regions: &'static MemoryRegions) {
    paging::set_phys_offset(physical_memory_offset.as_u64());

    let map = build_memory_map(memory_regions);
    log::info!(
        "memory map normalized: {} regions, last usable {:#x}",
        map.regions().len(),
        map.last_usable()
    );

    let mut frames = paging::BootstrapFrames::new(&map);
    let pml4_phys = paging::build_kernel_identity_map(&map, &mut frames);
    paging::activate(pml4_phys);
    log::info!("kernel identity map active, pml4 at {:#x}", pml4_phys.as_u64());

    let array_bytes = frame_db::array_bytes_for(map.last_usable());
    let array_phys = frames.alloc();
    let pages_needed = (array_bytes / 4096).saturating_sub(1);
    for i in 0..pages_needed {
        let frame = frames.alloc();
        debug_assert_eq!(
            frame.as_u64(),
            array_phys.as_u64() + 4096 * (i + 1),
            "frame database array must be contiguous"
        );
    }
    frames.reserve(array_phys.as_u64(), array_bytes);

    frame_db::init(&map, array_phys, paging::phys_to_virt, &frames.consumed);

    paging::init_kernel_address_space(
        layout::address_space_window_base(),
        layout::ADDRESS_SPACE_WINDOW_SIZE,
    );

    heap::init();

    log::info!(
        "memory subsystem ready: {} frames available",
        frame_db::with_frame_db(|db| db.available())
    );
}
