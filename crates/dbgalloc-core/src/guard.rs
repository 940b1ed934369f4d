//! Guard- and fill-byte stamping and verification.
//!
//! Guard regions bracket every user allocation and are stamped with a
//! configurable repeating byte pattern at allocation time; verifying them
//! later detects buffer overrun/underrun. Free-space fill similarly marks
//! freed-but-quarantined bytes so use-after-free corrupts a known pattern
//! instead of silently succeeding.
//!
//! Grounded on the teacher's `glibc-rs-membrane::fingerprint` canary
//! stamp/verify pair, but using a full-width repeating byte pattern
//! instead of an 8-byte hash, since diagnosing an overrun requires
//! reporting the first mismatching byte and its offset — a hash canary
//! can only say "corrupted", not "byte 3 was 0x41 instead of 0xAA".

/// The outcome of verifying a guard or fill region against its expected
/// pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Intact,
    /// The first byte that did not match the expected pattern.
    Corrupted { offset: usize, expected: u8, found: u8 },
}

/// Stamp `region` (a byte slice view over guard or free-fill memory) with
/// `pattern`, repeating as needed.
pub fn stamp(region: &mut [u8], pattern: &[u8]) {
    if pattern.is_empty() {
        return;
    }
    for (i, byte) in region.iter_mut().enumerate() {
        *byte = pattern[i % pattern.len()];
    }
}

/// Verify that `region` still holds `pattern`, repeated. Returns the
/// first mismatch, if any.
#[must_use]
pub fn verify(region: &[u8], pattern: &[u8]) -> VerifyResult {
    if pattern.is_empty() {
        return VerifyResult::Intact;
    }
    for (i, &byte) in region.iter().enumerate() {
        let expected = pattern[i % pattern.len()];
        if byte != expected {
            return VerifyResult::Corrupted {
                offset: i,
                expected,
                found: byte,
            };
        }
    }
    VerifyResult::Intact
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_then_verify_is_intact() {
        let mut buf = [0u8; 17];
        let pattern = [0xAA, 0xBB, 0xCC];
        stamp(&mut buf, &pattern);
        assert_eq!(verify(&buf, &pattern), VerifyResult::Intact);
    }

    #[test]
    fn corruption_reports_first_mismatch() {
        let mut buf = [0u8; 8];
        let pattern = [0xAA];
        stamp(&mut buf, &pattern);
        buf[3] = 0x41;
        buf[5] = 0x42;
        match verify(&buf, &pattern) {
            VerifyResult::Corrupted { offset, expected, found } => {
                assert_eq!(offset, 3);
                assert_eq!(expected, 0xAA);
                assert_eq!(found, 0x41);
            }
            VerifyResult::Intact => panic!("expected corruption to be detected"),
        }
    }

    #[test]
    fn empty_pattern_is_always_intact() {
        let buf = [1, 2, 3];
        assert_eq!(verify(&buf, &[]), VerifyResult::Intact);
    }
}
