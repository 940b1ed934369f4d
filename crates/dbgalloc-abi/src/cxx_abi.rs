//! `operator new` / `operator new[]` / `operator delete` / `operator
//! delete[]`, exposed under their Itanium C++ ABI mangled names so a C++
//! binary linking against this library picks them up exactly as it would
//! glibc's own.
//!
//! Per `spec.md` §7, allocation kinds whose C++ contract forbids
//! returning null (the non-`nothrow` `operator new` family) must never
//! hand back a null pointer on failure; lacking a C++ exception
//! mechanism to unwind through from Rust, this is expressed as an abort
//! with a diagnostic, matching the "aborting wrapper" failure mode the
//! allocator core's failure policy already distinguishes for `xmalloc`.

use std::ffi::c_void;

use dbgalloc_core::{AllocKind, AllocResult, FreeResult};

use crate::membrane_state::global_heap;

fn abort_on_allocation_failure(size: usize, kind: &str) -> ! {
    eprintln!("dbgalloc: {kind}({size}) failed and this allocation kind must not return null; aborting");
    std::process::abort();
}

unsafe fn new_impl(size: usize, array: bool) -> *mut c_void {
    let kind = if array { AllocKind::NewArray } else { AllocKind::New };
    match global_heap().allocate(size, 0, kind) {
        Some(AllocResult::Ok(p)) => p as *mut c_void,
        Some(AllocResult::Failed(_)) | None => {
            abort_on_allocation_failure(size, if array { "new[]" } else { "new" })
        }
    }
}

unsafe fn delete_impl(ptr: *mut c_void, array: bool) {
    if ptr.is_null() {
        return;
    }
    let kind = if array { AllocKind::NewArray } else { AllocKind::New };
    // A mismatched new/delete family shows up as `WrongKind`/`Unknown`;
    // the allocator core has already recorded the diagnostic, nothing
    // further to do here since `delete` itself is `void`.
    let _: Option<FreeResult> = global_heap().free(ptr as usize, kind);
}

/// `void* operator new(std::size_t)` — Itanium mangling `_Znwm`.
///
/// # Safety
/// Caller must eventually pass the returned pointer to `operator delete`
/// exactly once.
#[cfg_attr(not(debug_assertions), unsafe(export_name = "_Znwm"))]
pub unsafe extern "C" fn cxx_operator_new(size: usize) -> *mut c_void {
    // SAFETY: delegates to `new_impl`'s own contract.
    unsafe { new_impl(size, false) }
}

/// `void* operator new[](std::size_t)` — Itanium mangling `_Znam`.
///
/// # Safety
/// Caller must eventually pass the returned pointer to `operator
/// delete[]` exactly once.
#[cfg_attr(not(debug_assertions), unsafe(export_name = "_Znam"))]
pub unsafe extern "C" fn cxx_operator_new_array(size: usize) -> *mut c_void {
    // SAFETY: delegates to `new_impl`'s own contract.
    unsafe { new_impl(size, true) }
}

/// `void operator delete(void*)` — Itanium mangling `_ZdlPv`.
///
/// # Safety
/// `ptr` must be null or have come from `operator new`, not already
/// deleted.
#[cfg_attr(not(debug_assertions), unsafe(export_name = "_ZdlPv"))]
pub unsafe extern "C" fn cxx_operator_delete(ptr: *mut c_void) {
    // SAFETY: delegates to `delete_impl`'s own contract.
    unsafe { delete_impl(ptr, false) }
}

/// `void operator delete[](void*)` — Itanium mangling `_ZdaPv`.
///
/// # Safety
/// `ptr` must be null or have come from `operator new[]`, not already
/// deleted.
#[cfg_attr(not(debug_assertions), unsafe(export_name = "_ZdaPv"))]
pub unsafe extern "C" fn cxx_operator_delete_array(ptr: *mut c_void) {
    // SAFETY: delegates to `delete_impl`'s own contract.
    unsafe { delete_impl(ptr, true) }
}
