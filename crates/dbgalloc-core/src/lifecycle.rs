//! Component H — Lifecycle & concurrency.
//!
//! The allocator's process-wide state machine
//! (`Uninitialized -> Initializing -> Ready -> Finalizing -> Finalized`)
//! plus the single global mutex and the reentrancy guard protecting it,
//! grounded on `frankenlibc-abi::malloc_abi`'s `ALLOCATOR_REENTRY_DEPTH`
//! thread-local and `AllocatorReentryGuard` `Drop` impl: a call made while
//! the current thread already holds the allocator lock (e.g. the page
//! source's own allocation path reentering through an interposed `malloc`)
//! must bypass tracking rather than deadlock.

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Finalizing = 3,
    Finalized = 4,
}

impl LifecycleState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Finalizing,
            _ => Self::Finalized,
        }
    }
}

/// Atomically tracked lifecycle state, readable without taking the main
/// allocator lock (entry points check this before deciding whether to
/// dispatch into the core or fall back to a native path).
pub struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Uninitialized as u8))
    }

    #[must_use]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Transition from `Uninitialized` to `Initializing`, returning
    /// `true` if this caller won the race to perform initialization.
    pub fn begin_init(&self) -> bool {
        self.0
            .compare_exchange(
                LifecycleState::Uninitialized as u8,
                LifecycleState::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Held while the current thread is inside a guarded allocator call.
/// Dropping it decrements the thread-local recursion counter; the
/// counter (not the mutex) is what detects reentrancy, since a recursive
/// call from the *same* thread would otherwise deadlock on a plain
/// non-reentrant mutex.
pub struct ReentryGuard {
    _private: (),
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        REENTRY_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Enter the guarded region for this thread. Returns `None` if this
/// thread is already inside a guarded call (reentrant invocation); the
/// caller must then take a native/bypass path instead of recursing into
/// the tracked allocator.
#[must_use]
pub fn enter_reentry_guard() -> Option<ReentryGuard> {
    REENTRY_DEPTH.with(|d| {
        if d.get() > 0 {
            return None;
        }
        d.set(d.get() + 1);
        Some(ReentryGuard { _private: () })
    })
}

#[must_use]
pub fn reentry_depth() -> u32 {
    REENTRY_DEPTH.with(Cell::get)
}

/// The single global allocator lock. Generic over the guarded state `T`
/// so the core can store its live heap state directly inside the lock
/// rather than behind a separate `OnceLock`.
pub struct AllocatorLock<T> {
    inner: Mutex<T>,
    state: LifecycleCell,
}

impl<T> AllocatorLock<T> {
    #[must_use]
    pub const fn new(initial: T) -> Self {
        Self {
            inner: Mutex::new(initial),
            state: LifecycleCell::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn set_state(&self, state: LifecycleState) {
        self.state.set(state);
    }

    #[must_use]
    pub fn begin_init(&self) -> bool {
        self.state.begin_init()
    }

    /// Lock the guarded state. Re-entrant callers must check
    /// [`enter_reentry_guard`] themselves before calling this; this lock
    /// alone would otherwise deadlock a thread that already holds it.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

/// Blocks every signal on entry and restores the prior mask on drop, so a
/// handler running on this thread cannot reenter the allocator mid-update
/// and observe a torn index. Per design note (ii): the mask is restored
/// *before* the lock guard it wraps is released, matching the ordering
/// `spec.md` requires (a handler that runs the instant after unlock must
/// never see a state in which signals are still blocked but the lock
/// guard has already dropped). Callers therefore construct this before
/// taking the lock and drop it after releasing the lock, in that order.
pub struct SignalMask {
    previous: libc::sigset_t,
}

impl SignalMask {
    /// Block every signal on the current thread. Platform caveat: on
    /// targets without `pthread_sigmask` (effectively none this library
    /// targets), this degrades to a no-op rather than failing to build.
    #[must_use]
    pub fn block_all() -> Self {
        // SAFETY: `full` and `previous` are plain value types on the stack;
        // `sigfillset`/`pthread_sigmask` only read/write through the given
        // pointers, which are valid for the duration of these calls.
        unsafe {
            let mut full: libc::sigset_t = std::mem::zeroed();
            libc::sigfillset(&raw mut full);
            let mut previous: libc::sigset_t = std::mem::zeroed();
            libc::pthread_sigmask(libc::SIG_SETMASK, &raw const full, &raw mut previous);
            Self { previous }
        }
    }
}

impl Drop for SignalMask {
    fn drop(&mut self) {
        // SAFETY: `self.previous` was populated by a prior `pthread_sigmask`
        // call in `block_all` and is a valid sigset_t for the duration of
        // this call.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &raw const self.previous, std::ptr::null_mut());
        }
    }
}
