//! Physical memory map normalizer.
//!
//! Takes the raw, overlapping, unsorted region list handed to us by the boot
//! loader (plus synthetic regions the kernel adds itself) and reduces it to a
//! sorted, non-overlapping, gap-free sequence.

use alloc::vec::Vec;

/// Region type. Declaration order is significance order: when two regions
/// overlap, the higher discriminant wins (`RegionKind::Unmapped` beats
/// everything, `RegionKind::Usable` loses to everything).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RegionKind {
    Usable = 0,
    Reserved = 1,
    AcpiReclaim = 2,
    AcpiNvs = 3,
    Bad = 4,
    Uncached = 5,
    /// Deliberately unmapped — e.g. the null page, so a null dereference
    /// faults rather than silently reading valid memory.
    Unmapped = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub addr: u64,
    pub size: u64,
    pub kind: RegionKind,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.addr + self.size
    }
}

pub struct MemoryMap {
    regions: Vec<Region>,
    last_usable: u64,
    normalized: bool,
}

impl MemoryMap {
    pub fn new() -> Self {
        MemoryMap {
            regions: Vec::new(),
            last_usable: 0,
            normalized: false,
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn last_usable(&self) -> u64 {
        self.last_usable
    }

    /// Append a region. Re-normalizes immediately if the map has already
    /// been normalized once.
    pub fn add(&mut self, addr: u64, size: u64, kind: RegionKind) {
        self.regions.push(Region { addr, size, kind });
        if self.normalized {
            self.normalize();
        }
    }

    /// Reduce the region list to a sorted, non-overlapping, gap-free
    /// sequence. Worst case O(n^2) in the number of regions; n is bounded by
    /// what a BIOS/UEFI memory map can hold (low hundreds), so this is fine.
    pub fn normalize(&mut self) {
        self.regions.sort_by(|a, b| (a.addr, a.size).cmp(&(b.addr, b.size)));
        self.resolve_overlaps();
        self.fill_gaps();
        self.coalesce();
        self.recompute_last_usable();
        self.normalized = true;
    }

    fn resolve_overlaps(&mut self) {
        let mut i = 0;
        while i + 1 < self.regions.len() {
            let left = self.regions[i];
            let right = self.regions[i + 1];

            if right.addr >= left.end() {
                // No overlap.
                i += 1;
                continue;
            }

            let weak_is_left = left.kind < right.kind;
            let (weak, strong) = if weak_is_left { (left, right) } else { (right, left) };

            if weak.addr >= strong.addr && weak.end() <= strong.end() {
                // weak is fully contained in strong: drop it.
                self.regions.remove(if weak_is_left { i } else { i + 1 });
                continue;
            }

            // Partial overlap: truncate or split the weaker region so only
            // the non-overlapping remainder survives.
            self.regions.remove(i);
            self.regions.remove(i);
            let mut replacement = Vec::new();
            if weak.addr < strong.addr {
                replacement.push(Region {
                    addr: weak.addr,
                    size: strong.addr - weak.addr,
                    kind: weak.kind,
                });
            }
            replacement.push(strong);
            if weak.end() > strong.end() {
                replacement.push(Region {
                    addr: strong.end(),
                    size: weak.end() - strong.end(),
                    kind: weak.kind,
                });
            }
            for (offset, region) in replacement.into_iter().enumerate() {
                self.regions.insert(i + offset, region);
            }
            self.regions[i..].sort_by(|a, b| (a.addr, a.size).cmp(&(b.addr, b.size)));
            // Re-examine from the start of the local change; a split can
            // introduce a new overlap with what follows.
        }
    }

    fn fill_gaps(&mut self) {
        let mut filled = Vec::with_capacity(self.regions.len());
        let mut prev_end: Option<u64> = None;
        for region in self.regions.drain(..) {
            if let Some(end) = prev_end {
                if region.addr > end {
                    if let Some(last) = filled.last_mut() {
                        let last: &mut Region = last;
                        if last.kind == RegionKind::Reserved {
                            last.size += region.addr - end;
                            filled.push(region);
                            prev_end = Some(region.end());
                            continue;
                        }
                    }
                    filled.push(Region {
                        addr: end,
                        size: region.addr - end,
                        kind: RegionKind::Reserved,
                    });
                }
            }
            prev_end = Some(region.end());
            filled.push(region);
        }
        self.regions = filled;
    }

    fn coalesce(&mut self) {
        let mut coalesced: Vec<Region> = Vec::with_capacity(self.regions.len());
        for region in self.regions.drain(..) {
            if let Some(last) = coalesced.last_mut() {
                if last.kind == region.kind && last.end() == region.addr {
                    last.size += region.size;
                    continue;
                }
            }
            coalesced.push(region);
        }
        self.regions = coalesced;
    }

    fn recompute_last_usable(&mut self) {
        self.last_usable = self
            .regions
            .iter()
            .filter(|r| r.kind == RegionKind::Usable)
            .map(Region::end)
            .max()
            .unwrap_or(0);
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u64, u64, RegionKind)]) -> MemoryMap {
        let mut m = MemoryMap::new();
        for &(addr, size, kind) in entries {
            m.add(addr, size, kind);
        }
        m.normalize();
        m
    }

    #[test]
    fn gap_is_filled_with_reserved() {
        let m = map(&[
            (0, 0x1000, RegionKind::Usable),
            (0x3000, 0x1000, RegionKind::Usable),
        ]);
        assert_eq!(
            m.regions(),
            &[
                Region { addr: 0, size: 0x1000, kind: RegionKind::Usable },
                Region { addr: 0x1000, size: 0x2000, kind: RegionKind::Reserved },
                Region { addr: 0x3000, size: 0x1000, kind: RegionKind::Usable },
            ]
        );
    }

    #[test]
    fn higher_type_wins_on_overlap() {
        let m = map(&[
            (0, 0x2000, RegionKind::Usable),
            (0x1000, 0x1000, RegionKind::Reserved),
        ]);
        assert_eq!(
            m.regions(),
            &[
                Region { addr: 0, size: 0x1000, kind: RegionKind::Usable },
                Region { addr: 0x1000, size: 0x1000, kind: RegionKind::Reserved },
            ]
        );
    }

    #[test]
    fn fully_contained_weak_region_is_dropped() {
        let m = map(&[
            (0, 0x4000, RegionKind::Reserved),
            (0x1000, 0x1000, RegionKind::Usable),
        ]);
        assert_eq!(
            m.regions(),
            &[Region { addr: 0, size: 0x4000, kind: RegionKind::Reserved }]
        );
    }

    #[test]
    fn same_type_neighbours_coalesce() {
        let m = map(&[
            (0, 0x1000, RegionKind::Usable),
            (0x1000, 0x1000, RegionKind::Usable),
        ]);
        assert_eq!(
            m.regions(),
            &[Region { addr: 0, size: 0x2000, kind: RegionKind::Usable }]
        );
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut m = map(&[
            (0x2000, 0x1000, RegionKind::Usable),
            (0, 0x1000, RegionKind::Reserved),
            (0x1000, 0x1000, RegionKind::Uncached),
        ]);
        let once = m.regions().to_vec();
        m.normalize();
        assert_eq!(m.regions(), once.as_slice());
    }

    #[test]
    fn uncached_outranks_reserved_on_overlap() {
        let m = map(&[
            (0, 0x2000, RegionKind::Reserved),
            (0x1000, 0x1000, RegionKind::Uncached),
        ]);
        assert_eq!(
            m.regions(),
            &[
                Region { addr: 0, size: 0x1000, kind: RegionKind::Reserved },
                Region { addr: 0x1000, size: 0x1000, kind: RegionKind::Uncached },
            ]
        );
    }

    #[test]
    fn type_is_monotone_non_decreasing_is_not_required_but_no_overlaps_remain() {
        let m = map(&[
            (0, 0x3000, RegionKind::Usable),
            (0x1000, 0x1000, RegionKind::Unmapped),
        ]);
        for pair in m.regions().windows(2) {
            assert!(pair[0].end() <= pair[1].addr);
        }
    }

    #[test]
    fn last_usable_tracks_highest_usable_end() {
        let m = map(&[
            (0, 0x1000, RegionKind::Usable),
            (0x1000, 0x1000, RegionKind::Reserved),
            (0x2000, 0x1000, RegionKind::Usable),
        ]);
        assert_eq!(m.last_usable(), 0x3000);
    }
}
