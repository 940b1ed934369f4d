//! Component C — Block Index (live side).
//!
//! An address-ordered index over blocks in the
//! [`crate::block::BlockState::Live`] state, answering "which block (if
//! any) contains this address?" in O(log n) via a predecessor lookup —
//! the same semantics the teacher's `frankenlibc-membrane::page_oracle`
//! two-level bitmap provides for "is this page ours?", adapted here to a
//! single `BTreeMap` since the core runs under one global mutex and needs
//! exact block boundaries rather than page-granular ownership.

use std::collections::BTreeMap;

use crate::arena::ArenaIndex;

#[derive(Default)]
pub struct LiveIndex {
    /// region base address -> handle.
    by_address: BTreeMap<usize, ArenaIndex>,
}

impl LiveIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region_base: usize, handle: ArenaIndex) {
        self.by_address.insert(region_base, handle);
    }

    pub fn remove(&mut self, region_base: usize) -> Option<ArenaIndex> {
        self.by_address.remove(&region_base)
    }

    /// The handle of a live block whose region starts exactly at
    /// `region_base`, if any.
    #[must_use]
    pub fn get_at(&self, region_base: usize) -> Option<ArenaIndex> {
        self.by_address.get(&region_base).copied()
    }

    /// The live block with the greatest region base not exceeding `addr`:
    /// the sole candidate whose region could contain `addr`. Caller must
    /// still verify `addr` falls within that block's region, since this
    /// only narrows to a candidate in O(log n).
    #[must_use]
    pub fn candidate_containing(&self, addr: usize) -> Option<ArenaIndex> {
        self.by_address.range(..=addr).next_back().map(|(_, &h)| h)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, ArenaIndex)> + '_ {
        self.by_address.iter().map(|(&base, &h)| (base, h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaIndex;

    fn handle(slot: u32) -> ArenaIndex {
        ArenaIndex::for_test(slot, 0)
    }

    #[test]
    fn candidate_containing_picks_nearest_preceding_base() {
        let mut idx = LiveIndex::new();
        idx.insert(0x1000, handle(0));
        idx.insert(0x2000, handle(1));
        assert_eq!(idx.candidate_containing(0x1500), Some(handle(0)));
        assert_eq!(idx.candidate_containing(0x2500), Some(handle(1)));
        assert_eq!(idx.candidate_containing(0x0fff), None);
    }

    #[test]
    fn get_at_requires_exact_base() {
        let mut idx = LiveIndex::new();
        idx.insert(0x1000, handle(0));
        assert_eq!(idx.get_at(0x1000), Some(handle(0)));
        assert_eq!(idx.get_at(0x1001), None);
    }

    #[test]
    fn remove_drops_entry() {
        let mut idx = LiveIndex::new();
        idx.insert(0x1000, handle(0));
        assert!(idx.remove(0x1000).is_some());
        assert!(idx.is_empty());
    }
}
