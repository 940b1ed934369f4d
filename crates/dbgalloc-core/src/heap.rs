//! Top-level orchestrator tying components A–I together into the
//! process-wide heap, plus the global singleton the ABI trampolines
//! dispatch into.
//!
//! Grounded on `frankenlibc-abi::malloc_abi`'s
//! `crate::membrane_state::try_global_pipeline()` singleton-lookup
//! pattern: a `OnceLock`-backed handle that is lazily brought up on first
//! use and thereafter just locked.

use std::sync::OnceLock;

use crate::allocator::{AllocatorCore, AllocResult, FreeResult, ResizeResult};
use crate::config::{Config, ReallocZeroPolicy};
use crate::error::ErrorKind;
use crate::lifecycle::{AllocatorLock, LifecycleState, SignalMask, enter_reentry_guard};
use crate::metadata::AllocKind;
use crate::page_source::MmapPageSource;
use crate::stack_trace::NullUnwinder;

/// The process-wide heap. Constructing one does not yet reserve any
/// memory; that happens lazily on first allocation.
pub struct Heap {
    lock: AllocatorLock<AllocatorCore>,
}

impl Heap {
    /// Construct a standalone heap with its own lock and arena, for tests
    /// and embedders that want an isolated instance rather than the
    /// process-wide singleton in [`global`].
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let core = AllocatorCore::new(Box::new(MmapPageSource::new()), Box::new(NullUnwinder), config);
        let lock = AllocatorLock::new(core);
        lock.set_state(LifecycleState::Ready);
        Self { lock }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lock.state()
    }

    /// Run `f` with the core locked, under a blocked signal mask and the
    /// per-thread reentrancy guard. Returns `None` if this thread is
    /// already inside a guarded call (the caller must fall back to a
    /// native/bypass path rather than recurse).
    ///
    /// Also drives the periodic integrity sweep: every guarded call bumps
    /// the core's call counter, and a sweep runs whenever `check_frequency`
    /// or `overflow_watch` says one is due, with any violation found
    /// logged the same way an eager free/resize guard failure is.
    fn with_core<R>(&self, f: impl FnOnce(&mut AllocatorCore) -> R) -> Option<R> {
        let _reentry = enter_reentry_guard()?;
        let mask = SignalMask::block_all();
        let mut guard = self.lock.lock();
        let result = f(&mut guard);
        guard.bump_call_count();
        if guard.should_run_periodic_check() {
            for violation in crate::integrity::sweep(&mut guard) {
                let detail = format!("expected {:#x}, found {:#x}", violation.expected, violation.found);
                guard.log_integrity_error(violation.kind, violation.address, detail);
            }
        }
        drop(guard);
        drop(mask);
        Some(result)
    }

    pub fn allocate(&self, size: usize, align: usize, kind: AllocKind) -> Option<AllocResult> {
        self.with_core(|core| core.allocate(size, align, kind))
    }

    pub fn free(&self, user_base: usize, kind: AllocKind) -> Option<FreeResult> {
        self.with_core(|core| core.free(user_base, kind))
    }

    /// `realloc`, applying the configured zero-size policy before
    /// dispatching to the core.
    pub fn resize(&self, user_base: usize, new_size: usize, kind: AllocKind) -> Option<ResizeResult> {
        if new_size == 0 {
            return self.with_core(|core| {
                match core.config().realloc_zero {
                    ReallocZeroPolicy::TreatAsFree => match core.free(user_base, kind) {
                        FreeResult::Freed => ResizeResult::Ok(0),
                        FreeResult::Unknown => ResizeResult::Unknown,
                        FreeResult::WrongKind => ResizeResult::WrongKind,
                        FreeResult::AlreadyReleased => ResizeResult::Failed(ErrorKind::FreeTwice),
                    },
                    ReallocZeroPolicy::TreatAsSizeOne => core.resize(user_base, 1, kind),
                    ReallocZeroPolicy::Fail => ResizeResult::Failed(ErrorKind::BadRange),
                }
            });
        }
        self.with_core(|core| core.resize(user_base, new_size, kind))
    }

    pub fn with_stats<R>(&self, f: impl FnOnce(&AllocatorCore) -> R) -> Option<R> {
        self.with_core(|core| f(core))
    }

    /// Run an arbitrary operation (introspection queries, an integrity
    /// sweep) against the core under the same guard `allocate`/`free`
    /// take, rather than re-exposing every such operation as its own
    /// `Heap` method.
    pub fn with_core_mut<R>(&self, f: impl FnOnce(&mut AllocatorCore) -> R) -> Option<R> {
        self.with_core(f)
    }

    /// Release all OS-backed memory this heap ever reserved. Called once
    /// at finalization.
    pub fn finalize(&self) -> Option<()> {
        self.with_core(|core| {
            core.drain_quarantine();
            core.release_all_regions();
            core.flush_artifacts();
        })?;
        self.lock.set_state(LifecycleState::Finalized);
        Some(())
    }
}

static GLOBAL: OnceLock<Heap> = OnceLock::new();

/// Access the process-wide heap, initializing it from the environment on
/// first call. Returns `None` only if this thread is already inside a
/// guarded call (reentrant first-touch, e.g. the page source's own
/// startup path happening to call back into an interposed entry point).
pub fn global() -> &'static Heap {
    GLOBAL.get_or_init(|| Heap::with_config(crate::config::resolve_from_env()))
}
