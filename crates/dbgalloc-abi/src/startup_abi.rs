//! Component H's process-entry plumbing: one-shot initialization,
//! teardown-hook registration via `atexit`, and the final integrity
//! sweep/leak report run at process exit.
//!
//! Grounded on `frankenlibc-abi::startup_abi`'s CRT-bootstrap shape, but
//! scoped down to what this allocator actually needs at startup: there is
//! no `__libc_start_main` to intercept here, only the library's own
//! init/fini pair, exposed so a preloading front end (or a C program
//! linking this library directly) can call them explicitly, and wired to
//! fire automatically via `atexit` on first touch.

use std::sync::Once;

use crate::membrane_state::global_heap;

static REGISTER_TEARDOWN: Once = Once::new();

/// Idempotent initialization entry point. Touching the global heap for
/// the first time already brings it to `Ready` (see
/// `dbgalloc_core::heap::global`); this additionally registers the
/// `atexit` teardown hook exactly once.
///
/// # Safety
/// Safe to call from any thread, any number of times; only the first
/// call's `atexit` registration has effect.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dbgalloc_init() {
    let _ = global_heap();
    REGISTER_TEARDOWN.call_once(|| {
        // SAFETY: `dbgalloc_teardown` is a valid `extern "C" fn()`
        // suitable for `atexit`.
        unsafe {
            libc::atexit(dbgalloc_teardown);
        }
    });
}

/// The teardown hook: final integrity sweep, quarantine flush, leak
/// report to stderr (the structured log artefact is written by
/// `dbgalloc-core::log` when a log path is configured), then release of
/// all OS-backed regions.
extern "C" fn dbgalloc_teardown() {
    let heap = global_heap();
    heap.with_core_mut(|core| {
        for v in dbgalloc_core::integrity::sweep(core) {
            eprintln!(
                "dbgalloc: {} at {:#x} (block {:#x}): expected {:#x}, found {:#x}",
                v.kind.name(),
                v.address,
                v.block_user_base,
                v.expected,
                v.found
            );
            let detail = format!("expected {:#x}, found {:#x}", v.expected, v.found);
            core.log_integrity_error(v.kind, v.address, detail);
        }

        let show_unfreed = core.config().show_unfreed;
        let abort_threshold = core.config().unfreed_abort_threshold;
        let unfreed: Vec<(usize, usize)> = core.live_blocks().map(|(_, b)| (b.user_base, b.user_size)).collect();
        if !unfreed.is_empty() {
            core.record_error(dbgalloc_core::error::ErrorKind::UnfreedAtExit);
            if show_unfreed {
                for (addr, size) in &unfreed {
                    eprintln!("dbgalloc: unfreed block at {addr:#x}, {size} byte(s)");
                }
            } else {
                eprintln!("dbgalloc: {} block(s) still live at exit (UnfreedAtExit)", unfreed.len());
            }
        }
        if abort_threshold.is_some_and(|threshold| unfreed.len() as u64 > threshold) {
            eprintln!("dbgalloc: unfreed block count exceeds configured threshold, aborting");
            std::process::abort();
        }
    });
    heap.finalize();
}
