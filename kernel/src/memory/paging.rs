//! Page-table engine: kernel identity map construction, address-space
//! creation/destruction, and virtual-range mapping.
//!
//! Deliberately does not use the `x86_64` crate's `Mapper`/`OffsetPageTable`
//! traits: those hide the raw entry, leaving no room for the
//! kernel-inherited "system" bit below, so every level here is walked by
//! hand.

use super::frame_db::with_frame_db;
use super::memmap::{MemoryMap, RegionKind};
use conquer_once::spin::OnceCell;
use x86_64::structures::paging::{PageTable, PageTableFlags, PageTableIndex};
use x86_64::{PhysAddr, VirtAddr};

/// Marks a top-level entry as inherited from the kernel's canonical identity
/// map. Such entries are copied into every new address space and must never
/// be modified or freed by that address space's own map/unmap/destroy calls.
pub const SYSTEM: PageTableFlags = PageTableFlags::BIT_9;

const PAGE_4K: u64 = 1 << 12;
const PAGE_2M: u64 = 1 << 21;
const PAGE_1G: u64 = 1 << 30;

static KERNEL_PROOT: OnceCell<PhysAddr> = OnceCell::uninit();

/// Physical-memory offset at which all of physical memory is linearly
/// mapped (the bootloader's HHDM mapping). Set once, early, by
/// `memory::init`.
static PHYS_OFFSET: OnceCell<u64> = OnceCell::uninit();

pub fn set_phys_offset(offset: u64) {
    PHYS_OFFSET
        .try_init_once(|| offset)
        .unwrap_or_else(|_| panic!("physical memory offset already set"));
}

pub fn phys_to_virt(addr: PhysAddr) -> VirtAddr {
    let offset = *PHYS_OFFSET.try_get().expect("physical memory offset not set");
    VirtAddr::new(offset + addr.as_u64())
}

fn table_at(phys: PhysAddr) -> &'static mut PageTable {
    let virt = phys_to_virt(phys);
    unsafe { &mut *virt.as_mut_ptr::<PageTable>() }
}

fn region_flags(kind: RegionKind) -> Option<PageTableFlags> {
    use PageTableFlags as F;
    match kind {
        RegionKind::Bad | RegionKind::Unmapped => None,
        RegionKind::Uncached | RegionKind::AcpiNvs => {
            Some(F::PRESENT | F::WRITABLE | F::WRITE_THROUGH | F::NO_CACHE)
        }
        RegionKind::Usable | RegionKind::Reserved | RegionKind::AcpiReclaim => {
            Some(F::PRESENT | F::WRITABLE)
        }
    }
}

fn aligned_page_size(base: u64, len_remaining: u64) -> u64 {
    if base % PAGE_1G == 0 && len_remaining >= PAGE_1G {
        PAGE_1G
    } else if base % PAGE_2M == 0 && len_remaining >= PAGE_2M {
        PAGE_2M
    } else {
        PAGE_4K
    }
}

/// Hands out fresh physical frames during the bootstrap window before the
/// frame database exists. The kernel identity map is built *before*
/// `frame_db::init` populates the real free list (construction step 4
/// precedes step 5), so table pages needed to build it are drawn from a
/// temporary bump cursor over known-Usable memory instead.
pub struct BootstrapFrames<'a> {
    map: &'a MemoryMap,
    region_index: usize,
    cursor: u64,
    pub consumed: alloc::vec::Vec<(u64, u64)>,
}

impl<'a> BootstrapFrames<'a> {
    pub fn new(map: &'a MemoryMap) -> Self {
        BootstrapFrames { map, region_index: 0, cursor: 0, consumed: alloc::vec::Vec::new() }
    }

    /// Hand out one zeroed 4 KiB frame from the next Usable region.
    pub fn alloc(&mut self) -> PhysAddr {
        loop {
            let region = self
                .map
                .regions()
                .get(self.region_index)
                .expect("bootstrap frame source exhausted");
            if region.kind != RegionKind::Usable {
                self.region_index += 1;
                self.cursor = 0;
                continue;
            }
            if self.cursor == 0 {
                self.cursor = region.addr;
            }
            if self.cursor + PAGE_4K > region.end() {
                self.region_index += 1;
                self.cursor = 0;
                continue;
            }
            let addr = self.cursor;
            self.cursor += PAGE_4K;
            self.consumed.push((addr, addr + PAGE_4K));
            let virt = phys_to_virt(PhysAddr::new(addr));
            unsafe { core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, PAGE_4K as usize) };
            return PhysAddr::new(addr);
        }
    }

    /// Reserve (without zeroing) an already-known range, e.g. the frame
    /// database's own backing array, so a later `frame_db::init` doesn't
    /// re-donate it to the free list.
    pub fn reserve(&mut self, addr: u64, size: u64) {
        self.consumed.push((addr, addr + size));
    }
}

fn indices(vaddr: VirtAddr) -> [PageTableIndex; 4] {
    [vaddr.p4_index(), vaddr.p3_index(), vaddr.p2_index(), vaddr.p1_index()]
}

/// Build the kernel's canonical identity map over every normalized region
/// outside {Unmapped, Bad}, choosing the largest naturally-aligned page size
/// at each step. Returns the physical address of the new PML4; does not
/// activate it.
pub fn build_kernel_identity_map(map: &MemoryMap, frames: &mut BootstrapFrames) -> PhysAddr {
    let pml4_phys = frames.alloc();
    let pml4 = table_at(pml4_phys);
    for entry in pml4.iter_mut() {
        entry.set_unused();
    }

    for region in map.regions() {
        let flags = match region_flags(region.kind) {
            Some(f) => f,
            None => continue,
        };
        let mut addr = region.addr;
        let end = region.end();
        while addr < end {
            let size = aligned_page_size(addr, end - addr);
            map_one(pml4_phys, VirtAddr::new(addr), PhysAddr::new(addr), size, flags, frames);
            addr += size;
        }
    }

    KERNEL_PROOT
        .try_init_once(|| pml4_phys)
        .unwrap_or_else(|_| panic!("kernel identity map already built"));
    pml4_phys
}

pub fn kernel_proot() -> PhysAddr {
    *KERNEL_PROOT.try_get().expect("kernel identity map not built")
}

pub fn activate(proot: PhysAddr) {
    crate::arch::cpu::set_pagetable(proot);
}

static KERNEL_ADDRESS_SPACE: OnceCell<spin::Mutex<AddressSpace>> = OnceCell::uninit();

/// Wrap the already-built, already-activated kernel identity map as an
/// `AddressSpace` with its own self-mapping window, so ordinary kernel
/// consumers (the heap, in particular) can call `map`/`map_large` against
/// it like any other address space.
pub fn init_kernel_address_space(window_base: VirtAddr, window_size: u64) {
    let space = AddressSpace {
        proot: kernel_proot(),
        vroot: window_base,
        vnext: window_base,
        vterm: window_base + window_size,
    };
    KERNEL_ADDRESS_SPACE
        .try_init_once(|| spin::Mutex::new(space))
        .unwrap_or_else(|_| panic!("kernel address space already initialized"));
}

pub fn kernel_address_space() -> &'static spin::Mutex<AddressSpace> {
    KERNEL_ADDRESS_SPACE
        .try_get()
        .expect("kernel address space not initialized")
}

fn ensure_child(
    parent_table: &mut PageTable,
    index: PageTableIndex,
    frames: &mut BootstrapFrames,
    entry_flags: PageTableFlags,
) -> PhysAddr {
    let entry = &mut parent_table[index];
    if entry.flags().contains(PageTableFlags::PRESENT) {
        entry.addr()
    } else {
        let child_phys = frames.alloc();
        let child = table_at(child_phys);
        for e in child.iter_mut() {
            e.set_unused();
        }
        entry.set_addr(child_phys, entry_flags);
        child_phys
    }
}

/// Install a single mapping of `size` bytes (4 KiB, 2 MiB, or 1 GiB) during
/// bootstrap identity-map construction. `size` must already be naturally
/// aligned in both `vaddr` and `paddr` (they're equal here).
fn map_one(
    pml4_phys: PhysAddr,
    vaddr: VirtAddr,
    paddr: PhysAddr,
    size: u64,
    leaf_flags: PageTableFlags,
    frames: &mut BootstrapFrames,
) {
    let [i4, i3, i2, i1] = indices(vaddr);
    let pml4 = table_at(pml4_phys);
    let pdpt_phys =
        ensure_child(pml4, i4, frames, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);

    if size == PAGE_1G {
        let pdpt = table_at(pdpt_phys);
        pdpt[i3].set_addr(paddr, leaf_flags | PageTableFlags::HUGE_PAGE);
        return;
    }

    let pdpt = table_at(pdpt_phys);
    let pd_phys =
        ensure_child(pdpt, i3, frames, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);

    if size == PAGE_2M {
        let pd = table_at(pd_phys);
        pd[i2].set_addr(paddr, leaf_flags | PageTableFlags::HUGE_PAGE);
        return;
    }

    let pd = table_at(pd_phys);
    let pt_phys =
        ensure_child(pd, i2, frames, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
    let pt = table_at(pt_phys);
    pt[i1].set_addr(paddr, leaf_flags);
}

/// A per-address-space page-table root plus its private self-mapping
/// window for intermediate table allocations.
pub struct AddressSpace {
    pub proot: PhysAddr,
    pub vroot: VirtAddr,
    pub vnext: VirtAddr,
    pub vterm: VirtAddr,
}

impl AddressSpace {
    /// Allocate a fresh top-level table, inherit the kernel's 512 top-level
    /// entries (marked `SYSTEM`, so this address space can never tear them
    /// down), and reserve `[window_base, window_base + window_size)` for
    /// self-mapped intermediate tables.
    pub fn create(window_base: VirtAddr, window_size: u64) -> Self {
        let proot = with_frame_db(|db| db.alloc_frame(phys_to_virt))
            .expect("frame exhaustion creating address space");
        let kernel = table_at(kernel_proot());
        let new_root = table_at(proot);
        for i in 0..512usize {
            let entry = &kernel[i];
            if entry.flags().contains(PageTableFlags::PRESENT) {
                new_root[i].set_addr(entry.addr(), entry.flags() | SYSTEM);
            }
        }
        AddressSpace {
            proot,
            vroot: window_base,
            vnext: window_base,
            vterm: window_base + window_size,
        }
    }

    fn next_window_slot(&mut self) -> VirtAddr {
        let slot = self.vnext;
        self.vnext += PAGE_4K;
        if self.vnext > self.vterm {
            crate::fatal::fatal("address space self-mapping window exhausted");
        }
        slot
    }

    /// Returns the physical address of the table one level below `parent`
    /// at `index`, allocating and linking a fresh one if none exists yet.
    /// A present entry is only ever read here, never overwritten, so a
    /// `SYSTEM`-marked entry inherited from the kernel root is just
    /// descended through like any other. It only ever blocks a write, and
    /// this function never writes to a present entry.
    fn ensure_child_owned(&mut self, parent: PhysAddr, index: PageTableIndex) -> PhysAddr {
        {
            let parent_table = table_at(parent);
            let entry = &parent_table[index];
            if entry.flags().contains(PageTableFlags::PRESENT) {
                return entry.addr();
            }
        }
        let child = with_frame_db(|db| db.alloc_frame(phys_to_virt))
            .expect("frame exhaustion walking page tables");
        let _ = self.next_window_slot();
        let parent_table = table_at(parent);
        parent_table[index].set_addr(child, PageTableFlags::PRESENT | PageTableFlags::WRITABLE);
        child
    }

    /// Map a single 4 KiB page, allocating any missing intermediate tables
    /// along the way.
    pub fn map(&mut self, vaddr: VirtAddr, paddr: PhysAddr, flags: PageTableFlags) {
        let [i4, i3, i2, i1] = indices(vaddr);
        let pdpt = self.ensure_child_owned(self.proot, i4);
        let pd = self.ensure_child_owned(pdpt, i3);
        let pt = self.ensure_child_owned(pd, i2);
        let table = table_at(pt);
        table[i1].set_addr(paddr, flags | PageTableFlags::PRESENT);
    }

    /// Map a naturally-aligned 2 MiB page. Fatal if `paddr`/`vaddr` aren't
    /// 2 MiB-aligned.
    pub fn map_large(&mut self, vaddr: VirtAddr, paddr: PhysAddr, flags: PageTableFlags) {
        if vaddr.as_u64() % PAGE_2M != 0 || paddr.as_u64() % PAGE_2M != 0 {
            crate::fatal::fatal("map_large called with a misaligned address");
        }
        let [i4, i3, i2, _] = indices(vaddr);
        let pdpt = self.ensure_child_owned(self.proot, i4);
        let pd = self.ensure_child_owned(pdpt, i3);
        let table = table_at(pd);
        table[i2].set_addr(paddr, flags | PageTableFlags::PRESENT | PageTableFlags::HUGE_PAGE);
    }

    /// Map a naturally-aligned 1 GiB page. Fatal if misaligned.
    pub fn map_huge(&mut self, vaddr: VirtAddr, paddr: PhysAddr, flags: PageTableFlags) {
        if vaddr.as_u64() % PAGE_1G != 0 || paddr.as_u64() % PAGE_1G != 0 {
            crate::fatal::fatal("map_huge called with a misaligned address");
        }
        let [i4, i3, _, _] = indices(vaddr);
        let pdpt = self.ensure_child_owned(self.proot, i4);
        let table = table_at(pdpt);
        table[i3].set_addr(paddr, flags | PageTableFlags::PRESENT | PageTableFlags::HUGE_PAGE);
    }

    /// Clear the leaf entry for `vaddr` and return its previous physical
    /// address. Intermediate tables are left in place.
    pub fn unmap(&mut self, vaddr: VirtAddr) -> PhysAddr {
        let [i4, i3, i2, i1] = indices(vaddr);
        let pml4 = table_at(self.proot);
        let pdpt_phys = pml4[i4].addr();
        let pdpt = table_at(pdpt_phys);
        let pd_phys = pdpt[i3].addr();
        let pd = table_at(pd_phys);
        let pt_phys = pd[i2].addr();
        let pt = table_at(pt_phys);
        let old = pt[i1].addr();
        pt[i1].set_unused();
        old
    }

    /// Recursively tear down every table this address space owns (any
    /// subtree not rooted at a `SYSTEM`-marked entry), freeing leaf frames
    /// and intermediate table frames back to the frame database.
    pub fn destroy(self) {
        destroy_level(self.proot, 4);
        with_frame_db(|db| db.free_frame(self.proot));
    }
}

fn destroy_level(table_phys: PhysAddr, level: u8) {
    let table = table_at(table_phys);
    for i in 0..512usize {
        let entry = &table[i];
        if !entry.flags().contains(PageTableFlags::PRESENT) {
            continue;
        }
        if entry.flags().contains(SYSTEM) {
            continue;
        }
        let child = entry.addr();
        let is_leaf = level == 1 || entry.flags().contains(PageTableFlags::HUGE_PAGE);
        if !is_leaf {
            destroy_level(child, level - 1);
        }
        with_frame_db(|db| db.free_frame(child));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_page_size_prefers_largest_natural_size() {
        assert_eq!(aligned_page_size(0, PAGE_1G * 2), PAGE_1G);
        assert_eq!(aligned_page_size(PAGE_1G, PAGE_2M), PAGE_2M);
        assert_eq!(aligned_page_size(PAGE_2M, PAGE_2M), PAGE_2M);
        assert_eq!(aligned_page_size(PAGE_4K, PAGE_2M), PAGE_4K);
    }

    #[test]
    fn bad_and_unmapped_regions_produce_no_mapping() {
        assert!(region_flags(RegionKind::Bad).is_none());
        assert!(region_flags(RegionKind::Unmapped).is_none());
    }

    #[test]
    fn uncached_and_acpi_nvs_get_write_through_and_no_cache() {
        let f = region_flags(RegionKind::Uncached).unwrap();
        assert!(f.contains(PageTableFlags::WRITE_THROUGH));
        assert!(f.contains(PageTableFlags::NO_CACHE));
        let f = region_flags(RegionKind::AcpiNvs).unwrap();
        assert!(f.contains(PageTableFlags::WRITE_THROUGH));
        assert!(f.contains(PageTableFlags::NO_CACHE));
    }

    #[test]
    fn usable_regions_are_writable_present() {
        let f = region_flags(RegionKind::Usable).unwrap();
        assert!(f.contains(PageTableFlags::PRESENT));
        assert!(f.contains(PageTableFlags::WRITABLE));
        assert!(!f.contains(PageTableFlags::NO_CACHE));
    }
}
