//! Component F — Integrity Checker.
//!
//! On-demand and on-every-call verification of guard regions across live
//! and quarantined blocks, producing a diagnosable event per corruption
//! found rather than stopping at the first one, so a single sweep (e.g.
//! the introspection `check` operation, or an eager per-call check) can
//! report everything wrong with the heap at once.

use crate::allocator::AllocatorCore;
use crate::error::ErrorKind;
use crate::guard::VerifyResult;

/// One integrity violation found during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    pub kind: ErrorKind,
    /// Address of the first corrupted byte.
    pub address: usize,
    pub expected: u8,
    pub found: u8,
    /// Address of the user bytes of the block this guard belongs to, for
    /// attributing the violation back to an allocation.
    pub block_user_base: usize,
}

/// Sweep every live and quarantined block's guard regions, returning one
/// violation per corrupted guard found. An empty result means the heap's
/// guard regions are all intact — it says nothing about use-after-free
/// writes inside quarantined user bytes beyond what the free-fill pattern
/// happens to catch.
#[must_use]
pub fn sweep(core: &mut AllocatorCore) -> Vec<IntegrityViolation> {
    let mut violations = Vec::new();
    let live: Vec<_> = core.live_blocks().map(|(h, b)| (h, b.user_base)).collect();
    let quarantined: Vec<_> = core.quarantined_blocks().map(|(h, b)| (h, b.user_base)).collect();

    for (handle, user_base) in live {
        if let Some((addr, VerifyResult::Corrupted { expected, found, .. })) = core.check_block_guards(handle) {
            let kind = if addr < user_base {
                ErrorKind::OverflowBefore
            } else {
                ErrorKind::OverflowAfter
            };
            core.record_error(kind);
            violations.push(IntegrityViolation {
                kind,
                address: addr,
                expected,
                found,
                block_user_base: user_base,
            });
        }
    }

    for (handle, user_base) in quarantined {
        if let Some((addr, VerifyResult::Corrupted { expected, found, .. })) = core.check_block_guards(handle) {
            core.record_error(ErrorKind::OverflowAfterFree);
            violations.push(IntegrityViolation {
                kind: ErrorKind::OverflowAfterFree,
                address: addr,
                expected,
                found,
                block_user_base: user_base,
            });
        }
    }

    violations
}

/// Check a single address against every tracked block: is it inside a
/// live block's user bytes, inside a live block's guard, inside a
/// quarantined block, or unrecognized entirely? Backs the memory-checker
/// ABI family's `check_addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStatus {
    LiveUser,
    LiveGuard,
    Quarantined,
    Unrecognized,
}

#[must_use]
pub fn check_addr(core: &AllocatorCore, addr: usize) -> AddressStatus {
    if let Some(block) = core.find_live_containing(addr) {
        return if block.contains_user(addr) {
            AddressStatus::LiveUser
        } else {
            AddressStatus::LiveGuard
        };
    }
    for (_, block) in core.quarantined_blocks() {
        if block.contains_region(addr) {
            return AddressStatus::Quarantined;
        }
    }
    AddressStatus::Unrecognized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocResult;
    use crate::config::Config;
    use crate::metadata::AllocKind;
    use crate::page_source::HeapPageSource;
    use crate::stack_trace::NullUnwinder;

    fn core() -> AllocatorCore {
        AllocatorCore::new(Box::new(HeapPageSource::new(4096)), Box::new(NullUnwinder), Config::default())
    }

    #[test]
    fn sweep_is_empty_on_a_clean_heap() {
        let mut a = core();
        let AllocResult::Ok(_p) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        assert!(sweep(&mut a).is_empty());
    }

    #[test]
    fn sweep_reports_an_overrun() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        // SAFETY: test-only corruption of the trailing guard region.
        unsafe {
            *((p + 16) as *mut u8) = 0x00;
        }
        let violations = sweep(&mut a);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].kind, ErrorKind::OverflowAfter);
    }

    #[test]
    fn check_addr_classifies_user_and_guard_regions() {
        let mut a = core();
        let AllocResult::Ok(p) = a.allocate(16, 8, AllocKind::Malloc) else {
            panic!("allocation should succeed")
        };
        assert_eq!(check_addr(&a, p), AddressStatus::LiveUser);
        assert_eq!(check_addr(&a, p - 1), AddressStatus::LiveGuard);
        assert_eq!(check_addr(&a, 0xdead_beef), AddressStatus::Unrecognized);
    }
}
