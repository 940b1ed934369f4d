//! `strdup`/`strndup` and the abort-on-failure `x*` wrapper family
//! (`xmalloc`, `xrealloc`, `xstrdup`), grounded on the same
//! reentry-or-native dispatch `crate::malloc_abi` uses; `strdup` and
//! friends are a thin "measure, allocate, copy" composition over it.

use std::ffi::{CStr, c_char, c_void};

use dbgalloc_core::{AllocKind, AllocResult, ResizeResult};

use crate::membrane_state::global_heap;

unsafe fn native_strdup(s: *const c_char) -> *mut c_char {
    // SAFETY: forwards to the platform's `strdup` on the reentrant
    // bootstrap path only.
    unsafe { libc::strdup(s) }
}

/// `char* strdup(const char*)`.
///
/// # Safety
/// `s` must be a valid, NUL-terminated C string.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn strdup(s: *const c_char) -> *mut c_char {
    if s.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees `s` is a valid NUL-terminated string.
    let bytes = unsafe { CStr::from_ptr(s) }.to_bytes_with_nul();
    match global_heap().allocate(bytes.len(), 0, AllocKind::Strdup) {
        Some(AllocResult::Ok(p)) => {
            // SAFETY: `p` is freshly allocated for exactly `bytes.len()` bytes.
            unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), p as *mut u8, bytes.len()) };
            p as *mut c_char
        }
        Some(AllocResult::Failed(_)) => std::ptr::null_mut(),
        // SAFETY: reentrant bootstrap.
        None => unsafe { native_strdup(s) },
    }
}

/// `char* strndup(const char*, size_t)`: copies at most `n` bytes and
/// always NUL-terminates the result.
///
/// # Safety
/// `s` must be a valid pointer to at least `n` readable bytes or a
/// shorter NUL-terminated string.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn strndup(s: *const c_char, n: usize) -> *mut c_char {
    if s.is_null() {
        return std::ptr::null_mut();
    }
    // SAFETY: caller guarantees `s` is readable up to the first NUL or `n` bytes.
    let full = unsafe { CStr::from_ptr(s) }.to_bytes();
    let len = full.len().min(n);
    match global_heap().allocate(len + 1, 0, AllocKind::Strdup) {
        Some(AllocResult::Ok(p)) => {
            // SAFETY: `p` is freshly allocated for `len + 1` bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(full.as_ptr(), p as *mut u8, len);
                *((p + len) as *mut u8) = 0;
            }
            p as *mut c_char
        }
        Some(AllocResult::Failed(_)) => std::ptr::null_mut(),
        // SAFETY: reentrant bootstrap.
        None => unsafe { libc::strndup(s, n) },
    }
}

fn abort_on_allocation_failure(size: usize, kind: &str) -> ! {
    eprintln!("dbgalloc: {kind}({size}) failed; aborting (abort-on-failure wrapper)");
    std::process::abort();
}

/// `void* xmalloc(size_t)`: `malloc` that aborts instead of returning
/// null.
///
/// # Safety
/// Caller must eventually free the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn xmalloc(size: usize) -> *mut c_void {
    match global_heap().allocate(size, 0, AllocKind::Malloc) {
        Some(AllocResult::Ok(p)) => p as *mut c_void,
        Some(AllocResult::Failed(_)) => abort_on_allocation_failure(size, "xmalloc"),
        // SAFETY: reentrant bootstrap.
        None => {
            let p = unsafe { libc::malloc(size) };
            if p.is_null() {
                abort_on_allocation_failure(size, "xmalloc")
            }
            p
        }
    }
}

/// `void* xrealloc(void*, size_t)`: `realloc` that aborts instead of
/// returning null.
///
/// # Safety
/// `ptr` must be null or previously returned by this family.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn xrealloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        // SAFETY: delegates to `xmalloc`'s own contract.
        return unsafe { xmalloc(size) };
    }
    match global_heap().resize(ptr as usize, size, AllocKind::Realloc) {
        Some(ResizeResult::Ok(p)) => p as *mut c_void,
        Some(ResizeResult::Failed(_) | ResizeResult::Unknown | ResizeResult::WrongKind) => {
            abort_on_allocation_failure(size, "xrealloc")
        }
        // SAFETY: reentrant bootstrap.
        None => {
            let p = unsafe { libc::realloc(ptr, size) };
            if p.is_null() {
                abort_on_allocation_failure(size, "xrealloc")
            }
            p
        }
    }
}

/// `char* xstrdup(const char*)`: `strdup` that aborts instead of
/// returning null.
///
/// # Safety
/// `s` must be a valid, NUL-terminated C string.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn xstrdup(s: *const c_char) -> *mut c_char {
    // SAFETY: delegates to `strdup`'s own contract.
    let p = unsafe { strdup(s) };
    if p.is_null() {
        abort_on_allocation_failure(0, "xstrdup")
    }
    p
}
