//! Interposed C ABI entry points for the debugging memory allocator.
//!
//! This crate is the thin trampoline layer `spec.md` §1 calls out as an
//! external collaborator: it validates arguments, decides which
//! allocation kind a call belongs to, and dispatches into
//! `dbgalloc-core`'s process-wide [`dbgalloc_core::heap::Heap`]. None of
//! the detection logic lives here.

mod checker_abi;
mod cxx_abi;
mod malloc_abi;
mod membrane_state;
mod startup_abi;
mod string_abi;

pub use checker_abi::{check_addr, check_exec, check_str, copy_bitmap, set_right};
pub use cxx_abi::{cxx_operator_delete, cxx_operator_delete_array, cxx_operator_new, cxx_operator_new_array};
pub use malloc_abi::{aligned_alloc, calloc, free, malloc, memalign, posix_memalign, pvalloc, realloc, valloc};
pub use startup_abi::dbgalloc_init;
pub use string_abi::{strdup, strndup, xmalloc, xrealloc, xstrdup};
