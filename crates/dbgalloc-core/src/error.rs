//! Error kinds and their fixed numeric identifiers.
//!
//! Every kind below corresponds to a diagnostic event the library can
//! produce. The numeric identifier is fixed and stable: it is the value
//! written to the log file and compared against in tests/fixtures.

use thiserror::Error;

/// The diagnosable misuse/failure categories the allocator can detect.
///
/// Numeric identifiers are fixed; do not renumber existing variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorKind {
    OverflowBefore = 0,
    OverflowAfter = 1,
    OverflowAfterFree = 2,
    FreeUnknown = 3,
    FreeTwice = 4,
    FreeWrongKind = 5,
    ResizeUnknown = 6,
    ResizeWrongKind = 7,
    BadAlignment = 8,
    BadRange = 9,
    OutOfMemory = 10,
    OutOfInternalMemory = 11,
    StopReached = 12,
    LimitExceeded = 13,
    RandomFailure = 14,
    UnfreedAtExit = 15,
    InternalInvariant = 16,
}

impl ErrorKind {
    /// The fixed numeric identifier written to the log file.
    #[must_use]
    pub const fn id(self) -> u16 {
        self as u16
    }

    /// Short machine-readable name, used in log lines and test fixtures.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::OverflowBefore => "OverflowBefore",
            Self::OverflowAfter => "OverflowAfter",
            Self::OverflowAfterFree => "OverflowAfterFree",
            Self::FreeUnknown => "FreeUnknown",
            Self::FreeTwice => "FreeTwice",
            Self::FreeWrongKind => "FreeWrongKind",
            Self::ResizeUnknown => "ResizeUnknown",
            Self::ResizeWrongKind => "ResizeWrongKind",
            Self::BadAlignment => "BadAlignment",
            Self::BadRange => "BadRange",
            Self::OutOfMemory => "OutOfMemory",
            Self::OutOfInternalMemory => "OutOfInternalMemory",
            Self::StopReached => "StopReached",
            Self::LimitExceeded => "LimitExceeded",
            Self::RandomFailure => "RandomFailure",
            Self::UnfreedAtExit => "UnfreedAtExit",
            Self::InternalInvariant => "InternalInvariant",
        }
    }

    /// Whether this kind is always fatal (aborts the process per §7).
    #[must_use]
    pub const fn always_fatal(self) -> bool {
        matches!(self, Self::OutOfInternalMemory | Self::InternalInvariant)
    }
}

/// Fatal errors that unwind out of the allocator core instead of being
/// recorded and continued past. Non-fatal misuse (overflow, bad free,
/// bad resize, bad alignment/range, transient OOM) is recorded via
/// [`ErrorKind`] events and handled with best-effort semantics in place,
/// per the propagation policy in the specification.
#[derive(Debug, Error)]
pub enum AllocError {
    /// The library's own internal heap (the Arena) could not grow and no
    /// free node of the requested shape exists. Always fatal.
    #[error("out of internal memory: arena could not grow for a {size}-byte node")]
    OutOfInternalMemory { size: usize },

    /// An internal invariant was violated (accounting underflow, a
    /// corrupt index, etc.). Always fatal.
    #[error("internal invariant violated: {detail}")]
    InternalInvariant { detail: String },

    /// The page source refused a reservation request.
    #[error("out of address space: could not reserve {pages} pages")]
    OutOfAddressSpace { pages: usize },
}

impl AllocError {
    /// Maps this fatal error to its [`ErrorKind`] for logging purposes.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfInternalMemory { .. } => ErrorKind::OutOfInternalMemory,
            Self::InternalInvariant { .. } => ErrorKind::InternalInvariant,
            Self::OutOfAddressSpace { .. } => ErrorKind::OutOfMemory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_distinct() {
        let kinds = [
            ErrorKind::OverflowBefore,
            ErrorKind::OverflowAfter,
            ErrorKind::OverflowAfterFree,
            ErrorKind::FreeUnknown,
            ErrorKind::FreeTwice,
            ErrorKind::FreeWrongKind,
            ErrorKind::ResizeUnknown,
            ErrorKind::ResizeWrongKind,
            ErrorKind::BadAlignment,
            ErrorKind::BadRange,
            ErrorKind::OutOfMemory,
            ErrorKind::OutOfInternalMemory,
            ErrorKind::StopReached,
            ErrorKind::LimitExceeded,
            ErrorKind::RandomFailure,
            ErrorKind::UnfreedAtExit,
            ErrorKind::InternalInvariant,
        ];
        for (i, k) in kinds.iter().enumerate() {
            assert_eq!(k.id(), i as u16);
        }
    }

    #[test]
    fn only_internal_kinds_are_always_fatal() {
        assert!(ErrorKind::OutOfInternalMemory.always_fatal());
        assert!(ErrorKind::InternalInvariant.always_fatal());
        assert!(!ErrorKind::OutOfMemory.always_fatal());
        assert!(!ErrorKind::FreeTwice.always_fatal());
    }
}
