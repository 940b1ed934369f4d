//! The memory-checker ABI family (`set_right`, `copy_bitmap`,
//! `check_addr`, `check_str`, `check_exec`).
//!
//! `spec.md` §6 specifies this family only at the interface level ("maps
//! incoming ranges to range-validity queries on E; misuse aborts") and
//! treats the bitmap/rights bookkeeping itself as an external
//! collaborator. These trampolines therefore do the one thing the core
//! actually offers — classify an address or range against the tracked
//! block set via [`dbgalloc_core::integrity`] — and abort on a query
//! that fails, per the propagation rule for this family.

use std::ffi::{c_char, c_int, c_void};

use dbgalloc_core::integrity::{self, AddressStatus};

use crate::membrane_state::global_heap;

fn abort_on_misuse(what: &str, addr: usize) -> ! {
    eprintln!("dbgalloc: checker ABI rejected {what} at {addr:#x}");
    std::process::abort();
}

/// Classify `addr` against the tracked block set: live-user, live-guard,
/// quarantined, or unrecognized. Does not abort — callers query this
/// before deciding whether to treat the address as valid.
///
/// # Safety
/// No dereference occurs; `addr` is treated as an opaque value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn check_addr(addr: *const c_void) -> c_int {
    let Some(status) = global_heap().with_stats(|core| integrity::check_addr(core, addr as usize)) else {
        return 0;
    };
    match status {
        AddressStatus::LiveUser => 1,
        AddressStatus::LiveGuard => 2,
        AddressStatus::Quarantined => 3,
        AddressStatus::Unrecognized => 0,
    }
}

/// Validate that `s` is a NUL-terminated string entirely within the
/// bounds of the live user block that contains it. Aborts if `s` is
/// unrecognized or the NUL falls outside the block.
///
/// # Safety
/// `s` must be readable up to its terminating NUL or the end of its
/// enclosing block, whichever comes first.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn check_str(s: *const c_char) -> c_int {
    if s.is_null() {
        abort_on_misuse("check_str", 0);
    }
    let addr = s as usize;
    let Some(info) = global_heap().with_stats(|core| dbgalloc_core::introspection::info(core, addr)) else {
        abort_on_misuse("check_str", addr);
    };
    let Some(block) = info else {
        abort_on_misuse("check_str", addr);
    };
    let max_len = block.user_base + block.user_size - addr;
    // SAFETY: `s` is valid for at least `max_len` bytes, the extent of
    // its enclosing tracked block, established above.
    let slice = unsafe { std::slice::from_raw_parts(s as *const u8, max_len) };
    if slice.contains(&0) {
        1
    } else {
        abort_on_misuse("check_str (unterminated within block)", addr)
    }
}

/// Whether `addr` names executable memory. The page source this library
/// builds on (component A) only distinguishes read-write, read-only, and
/// no-access protection modes (`spec.md` §4.A); it has no concept of an
/// executable mapping, so this always reports false.
///
/// # Safety
/// No dereference occurs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn check_exec(_addr: *const c_void) -> c_int {
    0
}

/// Assert that the `len`-byte range starting at `addr` lies entirely
/// within one recognized block's user extent, standing in for the
/// external checker's per-byte access-rights bitmap (out of the core's
/// scope per `spec.md` §1). Aborts on misuse.
///
/// # Safety
/// No dereference occurs; `addr`/`len` are treated as opaque values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn set_right(addr: *const c_void, len: usize, _right: c_int) -> c_int {
    let base = addr as usize;
    let Some(Some(info)) = global_heap().with_stats(|core| dbgalloc_core::introspection::info(core, base)) else {
        abort_on_misuse("set_right", base);
    };
    if base + len <= info.user_base + info.user_size {
        1
    } else {
        abort_on_misuse("set_right (range exceeds block)", base)
    }
}

/// Propagate a `len`-byte access-rights bitmap from `src` to `dst`
/// (e.g. after a `memcpy`). Without a per-byte bitmap to actually copy,
/// this validates both ranges against the tracked block set and aborts
/// if either is unrecognized — the range-validity half of the contract
/// this interface specifies; the bitmap storage itself belongs to the
/// external checker.
///
/// # Safety
/// No dereference occurs; `dst`/`src` are treated as opaque values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn copy_bitmap(dst: *const c_void, src: *const c_void, len: usize) -> c_int {
    // SAFETY: delegates to `set_right`'s own contract for each range.
    unsafe {
        set_right(src, len, 1);
        set_right(dst, len, 1);
    }
    1
}
