//! Page-frame database.
//!
//! Indexes every physical 4 KiB frame up to `last_usable` with a fixed-size
//! record, and threads a doubly-linked free list through those records by
//! index rather than by pointer (the array itself may move conceptually
//! between a bootstrap mapping and the final kernel identity map, but
//! indices stay valid either way).

use super::memmap::{MemoryMap, RegionKind};
use conquer_once::spin::OnceCell;
use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

const FRAME_SIZE: u64 = 4096;
const RECORD_SIZE: u64 = 32;
const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Reserved = 0,
    Available = 1,
    Allocated = 2,
}

/// 32-byte per-frame record.
#[repr(C)]
pub struct FrameRecord {
    prev: u32,
    next: u32,
    refcount: u16,
    sharecount: u16,
    flags: u16,
    kind: FrameKind,
    _reserved: [u8; 17],
}

const _: () = assert!(core::mem::size_of::<FrameRecord>() == 32);

impl FrameRecord {
    const fn empty() -> Self {
        FrameRecord {
            prev: NONE,
            next: NONE,
            refcount: 0,
            sharecount: 0,
            flags: 0,
            kind: FrameKind::Reserved,
            _reserved: [0; 17],
        }
    }
}

struct FreeList {
    head: u32,
    tail: u32,
    available: usize,
}

pub struct FrameDb {
    records: &'static mut [FrameRecord],
    base: PhysAddr,
    free: Mutex<FreeList>,
}

static FRAME_DB: OnceCell<FrameDb> = OnceCell::uninit();

fn frame_index(addr: PhysAddr, base: PhysAddr) -> usize {
    ((addr.as_u64() - base.as_u64()) / FRAME_SIZE) as usize
}

fn frame_addr(base: PhysAddr, index: usize) -> PhysAddr {
    base + (index as u64) * FRAME_SIZE
}

impl FrameDb {
    /// Number of 4 KiB frames the database covers.
    pub fn frame_count(&self) -> usize {
        self.records.len()
    }

    /// Pop the free-list head, zero its backing page, mark it Allocated with
    /// refcount 1, and return its physical address. `None` when the free
    /// list is empty; callers treat this as fatal unless they have their own
    /// exhaustion policy.
    pub fn alloc_frame(&self, phys_to_virt: impl Fn(PhysAddr) -> VirtAddr) -> Option<PhysAddr> {
        let mut free = self.free.lock();
        if free.head == NONE {
            return None;
        }
        let index = free.head as usize;
        // SAFETY: index came from the free list, which only ever holds
        // indices within `records`.
        let records = unsafe {
            core::slice::from_raw_parts_mut(
                self.records.as_ptr() as *mut FrameRecord,
                self.records.len(),
            )
        };
        let next = records[index].next;
        free.head = next;
        if next == NONE {
            free.tail = NONE;
        } else {
            records[next as usize].prev = NONE;
        }
        free.available -= 1;
        drop(free);

        let addr = frame_addr(self.base, index);
        let virt = phys_to_virt(addr);
        unsafe {
            core::ptr::write_bytes(virt.as_mut_ptr::<u8>(), 0, FRAME_SIZE as usize);
        }
        records[index].kind = FrameKind::Allocated;
        records[index].refcount = 1;
        records[index].sharecount = 0;
        records[index].prev = NONE;
        records[index].next = NONE;
        Some(addr)
    }

    /// Decrement refcount; at zero, mark Available and prepend to the free
    /// list.
    pub fn free_frame(&self, addr: PhysAddr) {
        let index = frame_index(addr, self.base);
        let records = unsafe {
            core::slice::from_raw_parts_mut(
                self.records.as_ptr() as *mut FrameRecord,
                self.records.len(),
            )
        };
        debug_assert_eq!(records[index].kind, FrameKind::Allocated);
        records[index].refcount -= 1;
        if records[index].refcount != 0 {
            return;
        }

        let mut free = self.free.lock();
        records[index].kind = FrameKind::Available;
        records[index].prev = NONE;
        records[index].next = free.head;
        if free.head != NONE {
            records[free.head as usize].prev = index as u32;
        } else {
            free.tail = index as u32;
        }
        free.head = index as u32;
        free.available += 1;
    }

    pub fn available(&self) -> usize {
        self.free.lock().available
    }
}

// `FrameRecord` is accessed only through the `FrameDb` API, which serializes
// mutation via `free`.
unsafe impl Sync for FrameDb {}
unsafe impl Send for FrameDb {}

/// Byte size (2 MiB-aligned) the record array needs to cover `last_usable`.
pub fn array_bytes_for(last_usable: u64) -> u64 {
    let frame_count = last_usable / FRAME_SIZE;
    let bytes = frame_count * RECORD_SIZE;
    const ALIGN: u64 = 2 * 1024 * 1024;
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Build the frame database over `map`, using the physical range
/// `[array_phys, array_phys + array_bytes_for(map.last_usable()))` as the
/// record array's backing storage (already identity-mapped or reachable via
/// `phys_to_virt`), and excluding `reserved_extra` ranges (frames consumed by
/// the bootstrap identity-map construction and by the array itself) from the
/// free list even when they fall inside a Usable region.
pub fn init(
    map: &MemoryMap,
    array_phys: PhysAddr,
    phys_to_virt: impl Fn(PhysAddr) -> VirtAddr,
    reserved_extra: &[(u64, u64)],
) {
    let frame_count = (map.last_usable() / FRAME_SIZE) as usize;
    let virt = phys_to_virt(array_phys);
    let records: &'static mut [FrameRecord] = unsafe {
        let ptr = virt.as_mut_ptr::<FrameRecord>();
        for i in 0..frame_count {
            ptr.add(i).write(FrameRecord::empty());
        }
        core::slice::from_raw_parts_mut(ptr, frame_count)
    };

    let mut db = FrameDb {
        records,
        base: PhysAddr::new(0),
        free: Mutex::new(FreeList {
            head: NONE,
            tail: NONE,
            available: 0,
        }),
    };

    let is_reserved_extra = |addr: u64| reserved_extra.iter().any(|&(s, e)| addr >= s && addr < e);

    let mut prev_index: Option<u32> = None;
    let mut head: u32 = NONE;
    let mut available = 0usize;

    for region in map.regions() {
        if region.kind != RegionKind::Usable {
            continue;
        }
        let start_frame = region.addr / FRAME_SIZE;
        let end_frame = region.end() / FRAME_SIZE;
        for frame in start_frame..end_frame {
            let index = frame as usize;
            if index >= db.records.len() {
                break;
            }
            let addr = frame * FRAME_SIZE;
            if is_reserved_extra(addr) {
                continue;
            }
            db.records[index].kind = FrameKind::Available;
            db.records[index].prev = prev_index.unwrap_or(NONE);
            if let Some(p) = prev_index {
                db.records[p as usize].next = index as u32;
            } else {
                head = index as u32;
            }
            prev_index = Some(index as u32);
            available += 1;
        }
    }
    if let Some(p) = prev_index {
        db.records[p as usize].next = NONE;
    }

    {
        let mut free = db.free.lock();
        free.head = head;
        free.tail = prev_index.unwrap_or(NONE);
        free.available = available;
    }

    FRAME_DB
        .try_init_once(|| db)
        .unwrap_or_else(|_| panic!("frame database already initialized"));

    log::info!(
        "frame database: {} frames tracked, {} available",
        frame_count,
        available
    );
}

pub fn with_frame_db<R>(f: impl FnOnce(&FrameDb) -> R) -> R {
    f(FRAME_DB.try_get().expect("frame database not initialized"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::memmap::MemoryMap;

    fn host_backed_db(frame_count: usize) -> (Vec<u8>, FrameDb) {
        let bytes = frame_count * RECORD_SIZE as usize;
        let mut storage = vec![0u8; bytes];
        let records = unsafe {
            core::slice::from_raw_parts_mut(storage.as_mut_ptr() as *mut FrameRecord, frame_count)
        };
        for r in records.iter_mut() {
            *r = FrameRecord::empty();
        }
        let db = FrameDb {
            records,
            base: PhysAddr::new(0),
            free: Mutex::new(FreeList { head: NONE, tail: NONE, available: 0 }),
        };
        (storage, db)
    }

    fn link_all_available(db: &FrameDb, count: usize) {
        for i in 0..count {
            db.records_mut()[i].kind = FrameKind::Available;
            db.records_mut()[i].prev = if i == 0 { NONE } else { (i - 1) as u32 };
            db.records_mut()[i].next = if i + 1 == count { NONE } else { (i + 1) as u32 };
        }
        let mut free = db.free.lock();
        free.head = 0;
        free.tail = (count - 1) as u32;
        free.available = count;
    }

    impl FrameDb {
        fn records_mut(&self) -> &mut [FrameRecord] {
            unsafe {
                core::slice::from_raw_parts_mut(
                    self.records.as_ptr() as *mut FrameRecord,
                    self.records.len(),
                )
            }
        }
    }

    fn identity_phys_to_virt(storage_base: usize) -> impl Fn(PhysAddr) -> VirtAddr {
        move |addr| VirtAddr::new(storage_base as u64 + addr.as_u64())
    }

    #[test]
    fn alloc_then_free_returns_to_free_list_head() {
        let (storage, db) = host_backed_db(4);
        link_all_available(&db, 4);
        let base = storage.as_ptr() as usize;
        let p2v = identity_phys_to_virt(base);

        assert_eq!(db.available(), 4);
        let a = db.alloc_frame(&p2v).unwrap();
        assert_eq!(db.available(), 3);
        db.free_frame(a);
        assert_eq!(db.available(), 4);
    }

    #[test]
    fn exhaustion_returns_none() {
        let (storage, db) = host_backed_db(1);
        link_all_available(&db, 1);
        let base = storage.as_ptr() as usize;
        let p2v = identity_phys_to_virt(base);

        assert!(db.alloc_frame(&p2v).is_some());
        assert!(db.alloc_frame(&p2v).is_none());
    }

    #[test]
    fn array_bytes_rounds_up_to_2mib() {
        assert_eq!(array_bytes_for(0), 0);
        assert_eq!(array_bytes_for(4096), 2 * 1024 * 1024);
    }

    #[test]
    fn frame_conservation_across_alloc_free_cycles() {
        let (storage, db) = host_backed_db(8);
        link_all_available(&db, 8);
        let base = storage.as_ptr() as usize;
        let p2v = identity_phys_to_virt(base);

        let mut held = alloc::vec::Vec::new();
        for _ in 0..8 {
            held.push(db.alloc_frame(&p2v).unwrap());
        }
        assert_eq!(db.available(), 0);
        for addr in held {
            db.free_frame(addr);
        }
        assert_eq!(db.available(), 8);
    }
}
