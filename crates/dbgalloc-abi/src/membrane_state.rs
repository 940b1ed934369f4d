//! Process-wide access to the core heap.
//!
//! Mirrors the teacher's `crate::membrane_state::try_global_pipeline()`:
//! a thin accessor over the core's own lazily-initialized singleton, kept
//! as a separate module so the ABI layer never reaches into
//! `dbgalloc_core::heap` directly from every trampoline file.

use dbgalloc_core::Heap;

/// The process-wide heap. Always available — [`dbgalloc_core::heap::global`]
/// initializes it on first touch rather than failing.
#[must_use]
pub(crate) fn global_heap() -> &'static Heap {
    dbgalloc_core::heap::global()
}
