//! Component C — Block Index (free side).
//!
//! Two balanced-tree indices over free blocks: one keyed by size (for
//! best-fit search) and one keyed by address (for coalescing with a
//! neighbour). Both store only [`ArenaIndex`] handles; the `Arena` owns
//! the actual `Block` data, following the handle-indirection style set by
//! `crate::arena`.

use std::collections::BTreeMap;

use crate::arena::ArenaIndex;

/// Size- and address-ordered indices over blocks currently in the
/// [`crate::block::BlockState::Free`] state.
#[derive(Default)]
pub struct FreeIndex {
    /// size -> (region base, handle) of free blocks of exactly that region
    /// size, ordered by size for best-fit search and kept sorted by region
    /// base within each bucket so ties break to the lowest address.
    by_size: BTreeMap<usize, Vec<(usize, ArenaIndex)>>,
    /// region base address -> handle, for neighbour lookup during
    /// coalescing.
    by_address: BTreeMap<usize, ArenaIndex>,
}

impl FreeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region_base: usize, region_size: usize, handle: ArenaIndex) {
        let bucket = self.by_size.entry(region_size).or_default();
        let pos = bucket.partition_point(|&(base, _)| base < region_base);
        bucket.insert(pos, (region_base, handle));
        self.by_address.insert(region_base, handle);
    }

    /// Remove a known free block by its current region base/size.
    pub fn remove(&mut self, region_base: usize, region_size: usize, handle: ArenaIndex) {
        if let Some(bucket) = self.by_size.get_mut(&region_size) {
            bucket.retain(|&(_, h)| h != handle);
            if bucket.is_empty() {
                self.by_size.remove(&region_size);
            }
        }
        self.by_address.remove(&region_base);
    }

    /// Best-fit search: the smallest free block whose region size is at
    /// least `min_size`, breaking ties among same-size blocks by lowest
    /// address.
    #[must_use]
    pub fn best_fit(&self, min_size: usize) -> Option<ArenaIndex> {
        self.by_size
            .range(min_size..)
            .next()
            .and_then(|(_, bucket)| bucket.first().copied())
            .map(|(_, h)| h)
    }

    /// The free block immediately preceding `addr` by address, if any.
    #[must_use]
    pub fn predecessor(&self, addr: usize) -> Option<(usize, ArenaIndex)> {
        self.by_address
            .range(..addr)
            .next_back()
            .map(|(&base, &h)| (base, h))
    }

    /// The free block immediately following `addr` by address, if any.
    #[must_use]
    pub fn successor(&self, addr: usize) -> Option<(usize, ArenaIndex)> {
        self.by_address
            .range(addr..)
            .next()
            .map(|(&base, &h)| (base, h))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(slot: u32) -> ArenaIndex {
        ArenaIndex::for_test(slot, 0)
    }

    #[test]
    fn best_fit_finds_smallest_adequate_block() {
        let mut idx = FreeIndex::new();
        idx.insert(0x1000, 32, handle(0));
        idx.insert(0x2000, 64, handle(1));
        idx.insert(0x3000, 128, handle(2));
        let found = idx.best_fit(48).unwrap();
        assert_eq!(idx.by_size.get(&64).unwrap()[0].1, found);
    }

    #[test]
    fn best_fit_ties_break_to_lowest_address() {
        let mut idx = FreeIndex::new();
        idx.insert(0x3000, 64, handle(2));
        idx.insert(0x1000, 64, handle(0));
        idx.insert(0x2000, 64, handle(1));
        assert_eq!(idx.best_fit(64), Some(handle(0)));
    }

    #[test]
    fn best_fit_returns_none_when_nothing_fits() {
        let mut idx = FreeIndex::new();
        idx.insert(0x1000, 32, handle(0));
        assert!(idx.best_fit(64).is_none());
    }

    #[test]
    fn predecessor_and_successor_by_address() {
        let mut idx = FreeIndex::new();
        let h1 = handle(0);
        let h2 = handle(1);
        idx.insert(0x1000, 16, h1);
        idx.insert(0x2000, 16, h2);
        assert_eq!(idx.predecessor(0x2000), Some((0x1000, h1)));
        assert_eq!(idx.successor(0x1500), Some((0x2000, h2)));
        assert_eq!(idx.predecessor(0x1000), None);
    }

    #[test]
    fn remove_drains_empty_size_buckets() {
        let mut idx = FreeIndex::new();
        let h = handle(0);
        idx.insert(0x1000, 32, h);
        idx.remove(0x1000, 32, h);
        assert!(idx.is_empty());
        assert!(idx.best_fit(1).is_none());
    }
}
