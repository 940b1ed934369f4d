//! Component I — Introspection API.
//!
//! Read-only queries over the live heap: per-block info, the caller-set
//! mark/tag, iteration over every tracked block, a point-in-time snapshot
//! for comparison, and the aggregate statistics summary. None of these
//! mutate allocator state except `set_user`/`set_mark`, which only touch
//! the caller-owned annotation fields of a block's metadata.

use crate::allocator::{AllocatorCore, LiveStats};
use crate::block::BlockState;
use crate::metadata::AllocKind;
use crate::stack_trace::StackTrace;

/// Everything introspection exposes about one tracked block.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub user_base: usize,
    pub user_size: usize,
    pub state: BlockState,
    pub kind: AllocKind,
    pub alloc_index: u64,
    pub realloc_index: u64,
    pub alloc_trace: StackTrace,
    pub free_trace: Option<StackTrace>,
    pub user_tag: u64,
    pub mark: u64,
}

impl BlockInfo {
    fn from_block(block: &crate::block::Block) -> Self {
        Self {
            user_base: block.user_base,
            user_size: block.user_size,
            state: block.state,
            kind: block.metadata.kind,
            alloc_index: block.metadata.alloc_index,
            realloc_index: block.metadata.realloc_index,
            alloc_trace: block.metadata.alloc_trace.clone(),
            free_trace: block.metadata.free_trace.clone(),
            user_tag: block.metadata.user_tag,
            mark: block.metadata.mark,
        }
    }
}

/// Look up info for the live block whose user range contains `address`
/// (not necessarily its exact base — any byte within the allocation
/// resolves to the same block).
#[must_use]
pub fn info(core: &AllocatorCore, address: usize) -> Option<BlockInfo> {
    core.find_live_containing(address).map(BlockInfo::from_block)
}

/// Iterate over every live block, in address order.
pub fn iterate_live(core: &AllocatorCore) -> impl Iterator<Item = BlockInfo> + '_ {
    core.live_blocks().map(|(_, b)| BlockInfo::from_block(b))
}

/// Iterate over every quarantined (freed-but-held-back) block.
pub fn iterate_quarantined(core: &AllocatorCore) -> impl Iterator<Item = BlockInfo> + '_ {
    core.quarantined_blocks().map(|(_, b)| BlockInfo::from_block(b))
}

/// A point-in-time snapshot of every live block's identity, for comparing
/// against a later snapshot to find leaks introduced between the two
/// (the pattern the front-end's leak-delta reporting relies on).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub alloc_indices: Vec<u64>,
}

#[must_use]
pub fn snapshot(core: &AllocatorCore) -> Snapshot {
    Snapshot {
        alloc_indices: core.live_blocks().map(|(_, b)| b.metadata.alloc_index).collect(),
    }
}

/// Blocks present in `current` that were not present in `baseline`,
/// i.e. allocations made since the baseline snapshot was taken that are
/// still live.
#[must_use]
pub fn snapshot_diff(core: &AllocatorCore, baseline: &Snapshot) -> Vec<BlockInfo> {
    let baseline_set: std::collections::HashSet<u64> = baseline.alloc_indices.iter().copied().collect();
    core.live_blocks()
        .filter(|(_, b)| !baseline_set.contains(&b.metadata.alloc_index))
        .map(|(_, b)| BlockInfo::from_block(b))
        .collect()
}

/// Set the caller-opaque tag on the live block at `user_base`. Returns
/// `false` if no such live block exists.
pub fn set_user(core: &mut AllocatorCore, user_base: usize, tag: u64) -> bool {
    set_field(core, user_base, |m| m.user_tag = tag)
}

/// Set the caller-opaque mark on the live block at `user_base`. Returns
/// `false` if no such live block exists.
pub fn set_mark(core: &mut AllocatorCore, user_base: usize, mark: u64) -> bool {
    set_field(core, user_base, |m| m.mark = mark)
}

fn set_field(core: &mut AllocatorCore, user_base: usize, f: impl FnOnce(&mut crate::metadata::Metadata)) -> bool {
    let Some((handle, _)) = core.live_blocks().find(|(_, b)| b.user_base == user_base) else {
        return false;
    };
    // Re-borrow mutably through the arena directly; `live_blocks` only
    // hands out shared references.
    if let Some(block) = core.arena_mut().get_mut(handle) {
        f(&mut block.metadata);
        true
    } else {
        false
    }
}

/// Aggregate counters: live/quarantined block and byte counts, and
/// lifetime allocation/free totals.
#[must_use]
pub fn summary(core: &AllocatorCore) -> LiveStats {
    core.stats()
}
