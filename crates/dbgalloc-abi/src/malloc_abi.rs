//! ABI layer for the `malloc` family (`malloc`, `calloc`, `realloc`,
//! `free`, and the aligned-allocation variants).
//!
//! Each trampoline dispatches into the core's process-wide [`Heap`] and
//! falls back to the platform allocator when the heap reports it is
//! already entered on this thread (the reentrant-bootstrap case, e.g. the
//! page source's own `mmap` call happening to route through an
//! instrumented allocator). Grounded on
//! `frankenlibc-abi::malloc_abi`'s reentry-guard-or-native-fallback shape,
//! simplified here because [`dbgalloc_core::heap::Heap`] already performs
//! the reentry check internally and reports it by returning `None`,
//! rather than needing a second guard layer in this crate.

use std::ffi::c_void;

use dbgalloc_core::{AllocKind, AllocResult, ResizeResult};

use crate::membrane_state::global_heap;

unsafe fn native_malloc(size: usize) -> *mut c_void {
    // SAFETY: forwards to the platform allocator; used only on the
    // reentrant-bootstrap path where the core heap is not available.
    unsafe { libc::malloc(size) }
}

unsafe fn native_free(ptr: *mut c_void) {
    // SAFETY: `ptr` was obtained from a native allocation on the same
    // fallback path.
    unsafe { libc::free(ptr) }
}

unsafe fn native_calloc(nmemb: usize, size: usize) -> *mut c_void {
    // SAFETY: forwards to the platform allocator.
    unsafe { libc::calloc(nmemb, size) }
}

unsafe fn native_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: forwards to the platform allocator.
    unsafe { libc::realloc(ptr, size) }
}

unsafe fn native_aligned(align: usize, size: usize) -> *mut c_void {
    let mut out: *mut c_void = std::ptr::null_mut();
    // SAFETY: `&mut out` is a valid `*mut *mut c_void` for the duration
    // of this call.
    let rc = unsafe { libc::posix_memalign(&mut out, align.max(std::mem::size_of::<usize>()), size) };
    if rc == 0 { out } else { std::ptr::null_mut() }
}

/// `malloc(size)`.
///
/// # Safety
/// Caller must eventually pass the returned pointer to `free` exactly
/// once, or to `realloc`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    match global_heap().allocate(size, 0, AllocKind::Malloc) {
        Some(AllocResult::Ok(p)) => p as *mut c_void,
        Some(AllocResult::Failed(_)) => std::ptr::null_mut(),
        // SAFETY: reentrant bootstrap; no tracked heap is available yet.
        None => unsafe { native_malloc(size) },
    }
}

/// `calloc(nmemb, size)`. Zero-initializes the returned block.
///
/// # Safety
/// Caller must eventually free the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        return std::ptr::null_mut();
    };
    match global_heap().allocate(total, 0, AllocKind::Calloc) {
        Some(AllocResult::Ok(p)) => {
            // SAFETY: `p` is a freshly allocated, exclusively-owned
            // region of at least `total` bytes.
            unsafe { std::ptr::write_bytes(p as *mut u8, 0, total) };
            p as *mut c_void
        }
        Some(AllocResult::Failed(_)) => std::ptr::null_mut(),
        // SAFETY: reentrant bootstrap.
        None => unsafe { native_calloc(nmemb, size) },
    }
}

/// `realloc(ptr, size)`. `ptr == NULL` behaves like `malloc`; `size == 0`
/// is governed by the configured [`dbgalloc_core::config::ReallocZeroPolicy`].
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by this family.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        // SAFETY: delegates to `malloc`'s own contract.
        return unsafe { malloc(size) };
    }
    match global_heap().resize(ptr as usize, size, AllocKind::Realloc) {
        Some(ResizeResult::Ok(p)) => p as *mut c_void,
        Some(ResizeResult::Failed(_) | ResizeResult::Unknown | ResizeResult::WrongKind) => std::ptr::null_mut(),
        // SAFETY: reentrant bootstrap.
        None => unsafe { native_realloc(ptr, size) },
    }
}

/// `free(ptr)`. Null is a no-op per POSIX.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by this family,
/// not already freed.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    if global_heap().free(ptr as usize, AllocKind::Malloc).is_none() {
        // SAFETY: reentrant bootstrap; this pointer must itself have
        // come from the native fallback path.
        unsafe { native_free(ptr) };
    }
}

/// `posix_memalign(memptr, alignment, size)`.
///
/// # Safety
/// `memptr` must be a valid, writable `*mut *mut c_void`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn posix_memalign(memptr: *mut *mut c_void, alignment: usize, size: usize) -> libc::c_int {
    if alignment == 0 || !alignment.is_power_of_two() || alignment % std::mem::size_of::<usize>() != 0 {
        return libc::EINVAL;
    }
    match global_heap().allocate(size, alignment, AllocKind::AlignedAlloc) {
        Some(AllocResult::Ok(p)) => {
            // SAFETY: `memptr` is valid for writes per this function's contract.
            unsafe { *memptr = p as *mut c_void };
            0
        }
        Some(AllocResult::Failed(_)) => libc::ENOMEM,
        None => {
            // SAFETY: reentrant bootstrap.
            let p = unsafe { native_aligned(alignment, size) };
            if p.is_null() {
                libc::ENOMEM
            } else {
                // SAFETY: see above.
                unsafe { *memptr = p };
                0
            }
        }
    }
}

/// `memalign(alignment, size)`, the GNU predecessor of `posix_memalign`.
///
/// # Safety
/// Caller must eventually free the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    match global_heap().allocate(size, alignment.max(1), AllocKind::AlignedAlloc) {
        Some(AllocResult::Ok(p)) => p as *mut c_void,
        Some(AllocResult::Failed(_)) => std::ptr::null_mut(),
        // SAFETY: reentrant bootstrap.
        None => unsafe { native_aligned(alignment.max(1), size) },
    }
}

/// `aligned_alloc(alignment, size)`. `size` must be a multiple of
/// `alignment` per C11; unlike `memalign` this is enforced.
///
/// # Safety
/// Caller must eventually free the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if alignment == 0 || size % alignment != 0 {
        return std::ptr::null_mut();
    }
    // SAFETY: delegates to `memalign`'s own contract.
    unsafe { memalign(alignment, size) }
}

/// `valloc(size)`: allocate aligned to the page size.
///
/// # Safety
/// Caller must eventually free the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    let page_size = usize::try_from(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }).unwrap_or(4096);
    // SAFETY: delegates to `memalign`'s own contract.
    unsafe { memalign(page_size, size) }
}

/// `pvalloc(size)`: like `valloc`, but rounds `size` up to a page
/// multiple (a GNU extension).
///
/// # Safety
/// Caller must eventually free the returned pointer exactly once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    let page_size = usize::try_from(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }).unwrap_or(4096);
    let rounded = size.div_ceil(page_size.max(1)) * page_size.max(1);
    // SAFETY: delegates to `memalign`'s own contract.
    unsafe { memalign(page_size, rounded) }
}
