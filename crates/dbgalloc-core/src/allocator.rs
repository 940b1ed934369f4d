//! Component E — Allocator Core.
//!
//! Ties the page source, arena, indices, and guard/fill stamping together
//! into `allocate`/`resize`/`free` operations, plus the quarantine FIFO
//! that holds freed blocks back from reuse to catch use-after-free.
//!
//! Structured per-call lifecycle logging follows the shape of the
//! teacher's `frankenlibc-core::malloc::allocator::AllocatorLogRecord`,
//! emitted by the caller (`crate::heap`) from the [`CallOutcome`] this
//! module returns rather than from inside the core itself, keeping the
//! core's hot path free of formatting work.

use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write as _;

use crate::arena::{Arena, ArenaIndex};
use crate::block::{Block, BlockState};
use crate::config::{Config, PageAllocMode};
use crate::error::ErrorKind;
use crate::failure_policy::{FailurePolicy, FailureTrigger};
use crate::free_index::FreeIndex;
use crate::guard::{self, VerifyResult};
use crate::live_index::LiveIndex;
use crate::metadata::{AllocKind, Metadata};
use crate::page_source::{PageSource, Region};
use crate::stack_trace::StackUnwinder;

pub(crate) const MIN_ALIGN: usize = std::mem::size_of::<usize>();

fn round_up(n: usize, to: usize) -> usize {
    let to = to.max(1);
    let mask = to - 1;
    if to & mask == 0 {
        // power of two
        (n + mask) & !mask
    } else {
        n.div_ceil(to) * to
    }
}

fn current_thread_tag() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// Result of a successful or deliberately-failed allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocResult {
    Ok(usize),
    Failed(ErrorKind),
}

/// Result of a `free` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeResult {
    Freed,
    /// The pointer was already quarantined or released: a double free.
    AlreadyReleased,
    /// The pointer is not tracked as a live allocation at all.
    Unknown,
    /// The pointer is live but was allocated by an incompatible family
    /// (e.g. `new[]` released with `free`).
    WrongKind,
}

/// Result of a `resize` (realloc) attempt. Callers wanting `realloc(p,0)`
/// semantics decide that policy before calling `resize` (see
/// `crate::config::ReallocZeroPolicy`); this layer always treats
/// `new_size` as a real size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeResult {
    Ok(usize),
    Unknown,
    WrongKind,
    Failed(ErrorKind),
}

/// Number of distinct [`ErrorKind`] values, fixing the width of
/// [`LiveStats::error_counts`].
const ERROR_KIND_COUNT: usize = 17;

/// Running counters surfaced through the introspection API.
#[derive(Debug, Clone, Copy)]
pub struct LiveStats {
    pub live_count: u64,
    pub live_bytes: u64,
    pub quarantine_count: u64,
    pub quarantine_bytes: u64,
    pub total_allocations: u64,
    pub total_frees: u64,
    /// Indexed by `ErrorKind::id()`: how many times each misuse/failure
    /// kind has been observed.
    pub error_counts: [u64; ERROR_KIND_COUNT],
}

impl Default for LiveStats {
    fn default() -> Self {
        Self {
            live_count: 0,
            live_bytes: 0,
            quarantine_count: 0,
            quarantine_bytes: 0,
            total_allocations: 0,
            total_frees: 0,
            error_counts: [0; ERROR_KIND_COUNT],
        }
    }
}

impl LiveStats {
    #[must_use]
    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.error_counts[kind.id() as usize]
    }
}

pub struct AllocatorCore {
    arena: Arena,
    free_index: FreeIndex,
    live_index: LiveIndex,
    quarantine: VecDeque<ArenaIndex>,
    page_source: Box<dyn PageSource>,
    unwinder: Box<dyn StackUnwinder>,
    config: Config,
    failure_policy: FailurePolicy,
    next_alloc_index: u64,
    next_realloc_index: u64,
    owned_regions: Vec<Region>,
    stats: LiveStats,
    call_count: u64,
    log: Option<crate::log::TextLog<std::fs::File>>,
    profile: Option<crate::log::ProfileHeader>,
    profile_path: Option<String>,
    trace: Option<crate::log::TraceLog<std::fs::File>>,
}

impl AllocatorCore {
    #[must_use]
    pub fn new(page_source: Box<dyn PageSource>, unwinder: Box<dyn StackUnwinder>, config: Config) -> Self {
        let pid = std::process::id();
        let log = config
            .log_path
            .as_deref()
            .and_then(|tmpl| std::fs::File::create(crate::log::expand_path_template(tmpl, pid)).ok())
            .map(|f| {
                let mut writer = crate::log::TextLog::new(f);
                let _ = writer.write_banner(env!("CARGO_PKG_VERSION"), pid);
                writer
            });
        let profile = config.profile_path.is_some().then(crate::log::ProfileHeader::default);
        let profile_path = config.profile_path.clone();
        let trace = config
            .trace_path
            .as_deref()
            .and_then(|tmpl| std::fs::File::create(crate::log::expand_path_template(tmpl, pid)).ok())
            .map(crate::log::TraceLog::new);

        Self {
            arena: Arena::new(),
            free_index: FreeIndex::new(),
            live_index: LiveIndex::new(),
            quarantine: VecDeque::new(),
            page_source,
            unwinder,
            failure_policy: config.failure_policy(),
            config,
            next_alloc_index: 0,
            next_realloc_index: 0,
            owned_regions: Vec::new(),
            stats: LiveStats::default(),
            call_count: 0,
            log,
            profile,
            profile_path,
            trace,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn failure_policy_mut(&mut self) -> &mut FailurePolicy {
        &mut self.failure_policy
    }

    #[must_use]
    pub fn stats(&self) -> LiveStats {
        self.stats
    }

    pub fn record_error(&mut self, kind: ErrorKind) {
        self.stats.error_counts[kind.id() as usize] += 1;
    }

    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub fn live_blocks(&self) -> impl Iterator<Item = (ArenaIndex, &Block)> {
        self.live_index.iter().filter_map(move |(_, h)| self.arena.get(h).map(|b| (h, b)))
    }

    pub fn quarantined_blocks(&self) -> impl Iterator<Item = (ArenaIndex, &Block)> {
        self.quarantine.iter().filter_map(move |&h| self.arena.get(h).map(|b| (h, b)))
    }

    /// Find the live block, if any, whose carved region (user bytes or
    /// either guard) contains `addr`.
    #[must_use]
    pub fn find_live_containing(&self, addr: usize) -> Option<&Block> {
        let handle = self.live_index.candidate_containing(addr)?;
        let block = self.arena.get(handle)?;
        block.contains_region(addr).then_some(block)
    }

    /// Find the live block whose user pointer is exactly `user_base`, the
    /// lookup external callers (`free`/`resize`) need: they always pass
    /// back the exact address `allocate` returned, never an arbitrary
    /// in-region address.
    fn find_live_handle_by_user_base(&self, user_base: usize) -> Option<ArenaIndex> {
        let handle = self.live_index.candidate_containing(user_base)?;
        let block = self.arena.get(handle)?;
        (block.user_base == user_base).then_some(handle)
    }

    /// Verify a block's guards before a free/resize completes, recording
    /// (and logging) an overflow event on corruption without blocking the
    /// operation — per the propagation policy, overflow is recorded and
    /// the operation continues with best-effort semantics.
    fn verify_guards_on_operation(&mut self, handle: ArenaIndex) {
        if self.config.no_protect {
            return;
        }
        let Some((addr, VerifyResult::Corrupted { expected, found, .. })) = self.check_block_guards(handle) else {
            return;
        };
        let user_base = self.arena.get(handle).map(|b| b.user_base).unwrap_or(addr);
        let kind = if addr < user_base { ErrorKind::OverflowBefore } else { ErrorKind::OverflowAfter };
        self.record_error(kind);
        self.log_integrity_error(kind, addr, format!("expected {expected:#x}, found {found:#x}"));
    }

    /// Allocate `size` bytes aligned to `align` (must be a power of two,
    /// or 0/1 for default alignment), attributed to `kind`.
    pub fn allocate(&mut self, size: usize, align: usize, kind: AllocKind) -> AllocResult {
        if let Some(trigger) = self.failure_policy.check(size) {
            let kind = match trigger {
                FailureTrigger::ByteLimit => ErrorKind::LimitExceeded,
                FailureTrigger::StopIndex => ErrorKind::StopReached,
                FailureTrigger::Random => ErrorKind::RandomFailure,
            };
            self.record_error(kind);
            return AllocResult::Failed(kind);
        }
        let align = if align <= 1 { self.config.default_align.max(1) } else { align };
        let user_size = size.max(1);
        let guard_before = round_up(self.config.guard_before.max(MIN_ALIGN), align);

        let handle = match self.find_or_reserve(guard_before, user_size) {
            Some(h) => h,
            None => {
                self.record_error(ErrorKind::OutOfMemory);
                return AllocResult::Failed(ErrorKind::OutOfMemory);
            }
        };

        let alloc_index = self.next_alloc_index;
        self.next_alloc_index += 1;
        self.stats.total_allocations += 1;

        let trace = if self.config.capture_stack {
            self.unwinder.capture(1, self.config.max_frames)
        } else {
            Default::default()
        };

        let (user_base, region_base) = {
            let block = self.arena.get_mut(handle).expect("just-inserted handle");
            block.state = BlockState::Live;
            block.metadata = Metadata {
                alloc_index,
                realloc_index: 0,
                kind,
                alloc_trace: trace,
                free_trace: None,
                owner_thread: current_thread_tag(),
                user_tag: 0,
                mark: 0,
            };
            (block.user_base, block.region_base)
        };

        self.stamp_block(handle, false);
        self.live_index.insert(region_base, handle);
        self.stats.live_count += 1;
        self.stats.live_bytes += user_size as u64;
        self.log_allocation(alloc_index, kind, user_size, user_base);

        AllocResult::Ok(user_base)
    }

    /// Split a carved region's non-user capacity into leading/trailing
    /// guard sizes according to `page_alloc_mode`.
    fn split_guards(&self, region_size: usize, user_size: usize, guard_before_min: usize) -> (usize, usize) {
        match self.config.page_alloc_mode {
            PageAllocMode::Lower => (guard_before_min, region_size - guard_before_min - user_size),
            PageAllocMode::Upper => {
                let guard_after = self.config.guard_after;
                (region_size - guard_after - user_size, guard_after)
            }
        }
    }

    /// Find a free block with enough room, or reserve fresh pages.
    fn find_or_reserve(&mut self, guard_before: usize, user_size: usize) -> Option<ArenaIndex> {
        let needed = round_up(guard_before + user_size + self.config.guard_after, MIN_ALIGN);

        if let Some(handle) = self.free_index.best_fit(needed) {
            let (region_base, region_size) = {
                let block = self.arena.get(handle).expect("free index handle is valid");
                (block.region_base, block.region_size)
            };
            self.free_index.remove(region_base, region_size, handle);
            let (guard_before, guard_after) = self.split_guards(region_size, user_size, guard_before);
            let block = self.arena.get_mut(handle).expect("handle just validated");
            block.user_base = region_base + guard_before;
            block.user_size = user_size;
            block.guard_before = guard_before;
            block.guard_after = guard_after;
            return Some(handle);
        }

        let region = self.page_source.reserve(needed).ok()?;
        self.owned_regions.push(region);
        let (guard_before, guard_after) = self.split_guards(region.len, user_size, guard_before);
        let block = Block {
            user_base: region.base + guard_before,
            user_size,
            region_base: region.base,
            region_size: region.len,
            guard_before,
            guard_after,
            state: BlockState::Free,
            generation: 0,
            metadata: Metadata::default(),
        };
        Some(self.arena.insert(block))
    }

    /// Stamp guard regions (always) and the allocation- or free-fill
    /// pattern over the user bytes, depending on `freeing`.
    fn stamp_block(&mut self, handle: ArenaIndex, freeing: bool) {
        if freeing && self.config.preserve_contents {
            return;
        }
        let guard_pattern = self.config.guard_pattern.clone();
        let fill_pattern = if freeing {
            self.config.fill_pattern_free.clone()
        } else {
            self.config.fill_pattern_alloc.clone()
        };
        let block = self.arena.get(handle).expect("valid handle").clone();
        let (before_start, before_end) = block.guard_before_range();
        let (after_start, after_end) = block.guard_after_range();
        // SAFETY: these ranges were carved from a region this arena owns
        // (either freshly reserved from the page source or a former free
        // block of the same provenance); no other code holds references
        // into them while the allocator lock is held.
        unsafe {
            stamp_range(before_start, before_end, &guard_pattern);
            stamp_range(after_start, after_end, &guard_pattern);
            stamp_range(block.user_base, block.user_end(), &fill_pattern);
        }
    }

    /// Free a previously allocated block, enqueueing it into quarantine
    /// rather than making it immediately available for reuse.
    pub fn free(&mut self, user_base: usize, kind: AllocKind) -> FreeResult {
        let Some(handle) = self.find_live_handle_by_user_base(user_base) else {
            if self.quarantine.iter().any(|&h| {
                self.arena
                    .get(h)
                    .is_some_and(|b| b.user_base == user_base && b.state == BlockState::Quarantined)
            }) {
                self.record_error(ErrorKind::FreeTwice);
                return FreeResult::AlreadyReleased;
            }
            self.record_error(ErrorKind::FreeUnknown);
            return FreeResult::Unknown;
        };

        self.verify_guards_on_operation(handle);
        if self.failure_policy.note_free() {
            self.record_error(ErrorKind::StopReached);
        }

        let (existing_kind, alloc_index, region_base) = {
            let b = self.arena.get(handle).expect("live handle is valid");
            (b.metadata.kind, b.metadata.alloc_index, b.region_base)
        };
        if !existing_kind.compatible_free(kind) {
            self.record_error(ErrorKind::FreeWrongKind);
            return FreeResult::WrongKind;
        }

        self.live_index.remove(region_base);
        let user_size = {
            let block = self.arena.get_mut(handle).expect("live handle is valid");
            block.state = BlockState::Quarantined;
            block.metadata.free_trace = if self.config.capture_stack {
                Some(self.unwinder.capture(1, self.config.max_frames))
            } else {
                None
            };
            block.user_size
        };
        self.stamp_block(handle, true);

        self.stats.live_count -= 1;
        self.stats.live_bytes -= user_size as u64;
        self.stats.quarantine_count += 1;
        self.stats.quarantine_bytes += user_size as u64;
        self.stats.total_frees += 1;
        self.log_free(alloc_index, user_base, user_size);

        self.quarantine.push_back(handle);
        self.evict_quarantine_overflow();
        FreeResult::Freed
    }

    /// Evict the oldest quarantined blocks once the FIFO exceeds its
    /// configured depth, returning their storage to the free indices
    /// (coalescing with address-adjacent free neighbours).
    fn evict_quarantine_overflow(&mut self) {
        if self.config.no_free {
            return;
        }
        while self.quarantine.len() > self.config.quarantine_depth {
            let Some(handle) = self.quarantine.pop_front() else { break };
            let user_size = self.arena.get(handle).map(|b| b.user_size).unwrap_or(0);
            self.stats.quarantine_count -= 1;
            self.stats.quarantine_bytes -= user_size as u64;
            self.release_to_free_pool(handle);
        }
    }

    /// Immediately drain and release the whole quarantine, bypassing the
    /// depth threshold. Used by introspection/teardown paths that need
    /// every freed block actually returned before reporting leaks.
    pub fn drain_quarantine(&mut self) {
        while let Some(handle) = self.quarantine.pop_front() {
            let user_size = self.arena.get(handle).map(|b| b.user_size).unwrap_or(0);
            self.stats.quarantine_count -= 1;
            self.stats.quarantine_bytes -= user_size as u64;
            self.release_to_free_pool(handle);
        }
    }

    fn release_to_free_pool(&mut self, handle: ArenaIndex) {
        let (mut region_base, mut region_size) = {
            let block = self.arena.get(handle).expect("quarantined handle is valid");
            (block.region_base, block.region_size)
        };

        if let Some((pred_base, pred_handle)) = self.free_index.predecessor(region_base) {
            let pred_size = self.arena.get(pred_handle).map(|b| b.region_size).unwrap_or(0);
            if pred_base + pred_size == region_base {
                self.free_index.remove(pred_base, pred_size, pred_handle);
                self.arena.remove(pred_handle);
                region_size += pred_size;
                region_base = pred_base;
            }
        }
        if let Some((succ_base, succ_handle)) = self.free_index.successor(region_base + region_size) {
            let succ_size = self.arena.get(succ_handle).map(|b| b.region_size).unwrap_or(0);
            if region_base + region_size == succ_base {
                self.free_index.remove(succ_base, succ_size, succ_handle);
                self.arena.remove(succ_handle);
                region_size += succ_size;
            }
        }

        let block = self.arena.get_mut(handle).expect("quarantined handle is valid");
        block.region_base = region_base;
        block.region_size = region_size;
        block.user_base = region_base;
        block.user_size = 0;
        block.guard_before = 0;
        block.guard_after = region_size;
        block.state = BlockState::Free;
        self.free_index.insert(region_base, region_size, handle);
    }

    /// Resize a live allocation, matching `realloc` semantics. Grows or
    /// shrinks in place when the existing block's carved region can hold
    /// `new_size` without disturbing its guards; otherwise allocates fresh,
    /// copies, and frees the old block. `new_size` must already be
    /// nonzero; callers apply `ReallocZeroPolicy` before calling this.
    pub fn resize(&mut self, user_base: usize, new_size: usize, kind: AllocKind) -> ResizeResult {
        if let Some(trigger) = self.failure_policy.check_realloc(new_size) {
            let kind = match trigger {
                FailureTrigger::ByteLimit => ErrorKind::LimitExceeded,
                FailureTrigger::StopIndex => ErrorKind::StopReached,
                FailureTrigger::Random => ErrorKind::RandomFailure,
            };
            self.record_error(kind);
            return ResizeResult::Failed(kind);
        }

        let Some(handle) = self.find_live_handle_by_user_base(user_base) else {
            self.record_error(ErrorKind::ResizeUnknown);
            return ResizeResult::Unknown;
        };

        self.verify_guards_on_operation(handle);

        let (old_kind, old_size, region_base, region_size, guard_before) = {
            let block = self.arena.get(handle).expect("live handle is valid");
            (block.metadata.kind, block.user_size, block.region_base, block.region_size, block.guard_before)
        };
        if !old_kind.resizable() {
            self.record_error(ErrorKind::ResizeWrongKind);
            return ResizeResult::WrongKind;
        }

        let min_guard_after = self.config.guard_after;
        let capacity = region_size.saturating_sub(guard_before).saturating_sub(min_guard_after);
        if new_size <= capacity {
            return self.resize_in_place(handle, region_base, guard_before, region_size, old_size, new_size, kind);
        }

        match self.allocate(new_size, MIN_ALIGN, kind) {
            AllocResult::Failed(k) => ResizeResult::Failed(k),
            AllocResult::Ok(new_base) => {
                let copy_len = old_size.min(new_size);
                // SAFETY: `user_base` is the live block just looked up above
                // and `new_base` is a freshly allocated, non-overlapping
                // block returned by `allocate`; both cover at least
                // `copy_len` bytes.
                unsafe {
                    std::ptr::copy_nonoverlapping(user_base as *const u8, new_base as *mut u8, copy_len);
                }
                let alloc_index = self.arena.get(handle).expect("live handle is valid").metadata.alloc_index;
                let realloc_index = self.next_realloc_index;
                self.next_realloc_index += 1;
                if let Some(new_handle) = self.find_live_handle_by_user_base(new_base) {
                    if let Some(b) = self.arena.get_mut(new_handle) {
                        b.metadata.alloc_index = alloc_index;
                        b.metadata.realloc_index = realloc_index;
                    }
                }
                self.free(user_base, old_kind);
                self.log_resize(alloc_index, realloc_index, user_base, new_base, new_size);
                ResizeResult::Ok(new_base)
            }
        }
    }

    /// Grow or shrink a block in place: the carved region is already known
    /// to hold `new_size` without dropping below the configured trailing
    /// guard size, so only the user/guard boundary moves.
    #[allow(clippy::too_many_arguments)]
    fn resize_in_place(
        &mut self,
        handle: ArenaIndex,
        region_base: usize,
        guard_before: usize,
        region_size: usize,
        old_size: usize,
        new_size: usize,
        kind: AllocKind,
    ) -> ResizeResult {
        let old_user_end = region_base + guard_before + old_size;
        let new_user_end = region_base + guard_before + new_size;
        let new_guard_after = region_size - guard_before - new_size;

        if new_size > old_size {
            let fill_pattern = self.config.fill_pattern_alloc.clone();
            // SAFETY: [old_user_end, new_user_end) lies within the region
            // this block already owns, previously stamped as guard bytes
            // and now exposed as user bytes.
            unsafe { stamp_range(old_user_end, new_user_end, &fill_pattern) };
        }
        let guard_pattern = self.config.guard_pattern.clone();
        // SAFETY: the trailing guard range shrank or grew within the same
        // owned region; restamp it at its new position.
        unsafe { stamp_range(new_user_end, region_base + region_size, &guard_pattern) };

        let user_base = region_base + guard_before;
        let alloc_index = self.arena.get(handle).expect("live handle is valid").metadata.alloc_index;
        let realloc_index = self.next_realloc_index;
        self.next_realloc_index += 1;
        {
            let block = self.arena.get_mut(handle).expect("live handle is valid");
            block.user_size = new_size;
            block.guard_after = new_guard_after;
            block.metadata.kind = kind;
            block.metadata.realloc_index = realloc_index;
        }

        self.stats.live_bytes = self.stats.live_bytes - old_size as u64 + new_size as u64;
        self.log_resize(alloc_index, realloc_index, user_base, user_base, new_size);
        ResizeResult::Ok(user_base)
    }

    /// Release every OS-backed region this allocator ever reserved. Used
    /// at finalization; must not be called while any block is still
    /// considered live by the caller.
    pub fn release_all_regions(&mut self) {
        for region in self.owned_regions.drain(..) {
            self.page_source.release(region);
        }
    }

    /// Verify every guard region of every live and quarantined block,
    /// returning the first corruption found. Delegated to from
    /// [`crate::integrity`].
    pub fn check_block_guards(&self, handle: ArenaIndex) -> Option<(usize, VerifyResult)> {
        let block = self.arena.get(handle)?;
        let (before_start, before_end) = block.guard_before_range();
        let (after_start, after_end) = block.guard_after_range();
        // SAFETY: read-only view of memory this arena owns.
        let before = unsafe { read_range(before_start, before_end) };
        if let VerifyResult::Corrupted { offset, expected, found } = guard::verify(before, &self.config.guard_pattern) {
            return Some((
                before_start + offset,
                VerifyResult::Corrupted { offset, expected, found },
            ));
        }
        // SAFETY: read-only view of memory this arena owns.
        let after = unsafe { read_range(after_start, after_end) };
        if let VerifyResult::Corrupted { offset, expected, found } = guard::verify(after, &self.config.guard_pattern) {
            return Some((
                after_start + offset,
                VerifyResult::Corrupted { offset, expected, found },
            ));
        }
        None
    }

    /// Record one pass through `Heap`'s guarded dispatch, for
    /// `check_frequency`/`overflow_watch` scheduling.
    pub fn bump_call_count(&mut self) {
        self.call_count += 1;
    }

    /// Whether a periodic integrity sweep is due on this call.
    #[must_use]
    pub fn should_run_periodic_check(&self) -> bool {
        if self.config.overflow_watch {
            return true;
        }
        match self.config.check_frequency {
            Some(freq) if freq > 0 => self.call_count % freq == 0,
            _ => false,
        }
    }

    fn log_allocation(&mut self, alloc_index: u64, kind: AllocKind, size: usize, address: usize) {
        if let Some(log) = &mut self.log {
            let _ = log.write_allocation(alloc_index, kind, size, address);
        }
        if let Some(profile) = &mut self.profile {
            profile.record_alloc(size);
        }
        if let Some(trace) = &mut self.trace {
            let _ = trace.write_record(crate::log::TraceRecord {
                kind: crate::log::TraceEventKind::Alloc,
                alloc_index,
                address: address as u64,
                size: size as u64,
            });
        }
    }

    fn log_free(&mut self, alloc_index: u64, address: usize, size: usize) {
        if let Some(log) = &mut self.log {
            let _ = log.write_free(alloc_index, address);
        }
        if let Some(profile) = &mut self.profile {
            profile.record_dealloc(size);
        }
        if let Some(trace) = &mut self.trace {
            let _ = trace.write_record(crate::log::TraceRecord {
                kind: crate::log::TraceEventKind::Free,
                alloc_index,
                address: address as u64,
                size: size as u64,
            });
        }
    }

    fn log_resize(&mut self, alloc_index: u64, realloc_index: u64, old_address: usize, new_address: usize, new_size: usize) {
        if let Some(log) = &mut self.log {
            let _ = log.write_resize(alloc_index, realloc_index, old_address, new_address, new_size);
        }
        if let Some(trace) = &mut self.trace {
            let _ = trace.write_record(crate::log::TraceRecord {
                kind: crate::log::TraceEventKind::Resize,
                alloc_index,
                address: new_address as u64,
                size: new_size as u64,
            });
        }
    }

    /// Append one line to the text log for an integrity violation found
    /// either eagerly (on free/resize) or during a sweep.
    pub fn log_integrity_error(&mut self, kind: ErrorKind, address: usize, detail: String) {
        if let Some(log) = &mut self.log {
            let _ = log.write_integrity_error(kind, address, detail);
        }
    }

    /// Write the final summary line and the profile file, if configured.
    /// Called once at finalization; the trace file has already received
    /// every record incrementally.
    pub fn flush_artifacts(&mut self) {
        let stats = self.stats;
        if let Some(log) = &mut self.log {
            let _ = log.write_summary(stats.live_count, stats.live_bytes, stats.total_allocations, stats.total_frees);
        }
        if let (Some(profile), Some(path)) = (&self.profile, &self.profile_path) {
            if let Ok(mut f) = std::fs::File::create(path) {
                let _ = f.write_all(&profile.to_bytes());
            }
        }
    }
}

/// # Safety
/// `start..end` must be a byte range this allocator currently owns and no
/// other code may concurrently write to it.
unsafe fn stamp_range(start: usize, end: usize, pattern: &[u8]) {
    if start >= end {
        return;
    }
    let slice = unsafe { std::slice::from_raw_parts_mut(start as *mut u8, end - start) };
    guard::stamp(slice, pattern);
}

/// # Safety
/// `start..end` must be a byte range this allocator currently owns.
unsafe fn read_range<'a>(start: usize, end: usize) -> &'a [u8] {
    if start >= end {
        return &[];
    }
    unsafe { std::slice::from_raw_parts(start as *const u8, end - start) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_source::HeapPageSource;
    use crate::stack_trace::NullUnwinder;

    fn core() -> AllocatorCore {
        AllocatorCore::new(Box::new(HeapPageSource::new(4096)), Box::new(NullUnwinder), Config::default())
    }

    #[test]
    fn allocate_then_free_roundtrip() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(64, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        assert_eq!(a.stats().live_count, 1);
        assert_eq!(a.free(p, AllocKind::Malloc), FreeResult::Freed);
        assert_eq!(a.stats().live_count, 0);
        assert_eq!(a.stats().quarantine_count, 1);
    }

    #[test]
    fn double_free_is_detected() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        assert_eq!(a.free(p, AllocKind::Malloc), FreeResult::Freed);
        assert_eq!(a.free(p, AllocKind::Malloc), FreeResult::AlreadyReleased);
    }

    #[test]
    fn free_of_unknown_pointer_is_reported() {
        let mut a = core();
        assert_eq!(a.free(0xdead_beef, AllocKind::Malloc), FreeResult::Unknown);
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(16, 8, AllocKind::New) else {
            panic!("allocation should succeed")
        };
        assert_eq!(a.free(p, AllocKind::Malloc), FreeResult::WrongKind);
    }

    #[test]
    fn guards_are_intact_after_allocation() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(32, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        let handle = a.find_live_handle_by_user_base(p).unwrap();
        assert!(a.check_block_guards(handle).is_none());
    }

    #[test]
    fn overrun_is_detected_by_guard_check() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(32, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        // SAFETY: writing one byte past the end of a 32-byte allocation
        // into its own trailing guard region, a test-only corruption.
        unsafe {
            *((p + 32) as *mut u8) = 0x41;
        }
        let handle = a.find_live_handle_by_user_base(p).unwrap();
        assert!(a.check_block_guards(handle).is_some());
    }

    #[test]
    fn resize_preserves_contents() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        // SAFETY: p is a fresh 16-byte live allocation.
        unsafe {
            std::ptr::write_bytes(p as *mut u8, 0x7A, 16);
        }
        let ResizeResult::Ok(p2) = a.resize(p, 64, AllocKind::Realloc) else {
            panic!("resize should succeed")
        };
        // SAFETY: p2 is the freshly resized live allocation.
        let copied = unsafe { std::slice::from_raw_parts(p2 as *const u8, 16) };
        assert!(copied.iter().all(|&b| b == 0x7A));
    }

    #[test]
    fn resize_to_smaller_size_within_region_stays_at_the_same_address() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(256, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        let ResizeResult::Ok(p2) = a.resize(p, 64, AllocKind::Realloc) else {
            panic!("resize should succeed")
        };
        assert_eq!(p, p2, "shrinking within the same carved region must not move the block");
        let handle = a.find_live_handle_by_user_base(p2).unwrap();
        assert!(a.check_block_guards(handle).is_none());
    }

    #[test]
    fn resize_past_region_capacity_moves_the_block() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        let ResizeResult::Ok(p2) = a.resize(p, 4096, AllocKind::Realloc) else {
            panic!("resize should succeed")
        };
        assert_ne!(p, p2, "growing past the carved region's capacity must move the block");
    }

    #[test]
    fn quarantine_overflow_returns_block_to_free_pool() {
        let mut a = core();
        a.config_mut().quarantine_depth = 1;
        let AllocResult::Ok(p1) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        let AllocResult::Ok(p2) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        a.free(p1, AllocKind::Malloc);
        a.free(p2, AllocKind::Malloc);
        assert_eq!(a.stats().quarantine_count, 1);
        assert!(!a.free_index.is_empty());
    }
}
