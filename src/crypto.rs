//! Digest and comparison helpers shared by the token and signing code.
//!
//! ## Security Patterns
//!
//! - **Constant-Time Comparison**: secret and signature comparisons must not
//!   leak how many leading bytes matched.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Performs constant-time comparison of two byte slices.
///
/// Standard `==` returns on the first mismatching byte, which lets an attacker
/// recover a secret one byte at a time by timing responses. `subtle` compares
/// every byte regardless of where the inputs differ. Slices of different
/// lengths compare unequal.
///
/// ```rust
/// use account_guard::constant_time_eq;
///
/// assert!(constant_time_eq(b"admin-secret", b"admin-secret"));
/// assert!(!constant_time_eq(b"admin-secret", b"admin-secreT"));
/// ```
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Constant-time comparison of two strings. See [`constant_time_eq`].
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Lower-case hex SHA-1 of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_same() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(constant_time_str_eq("secret123", "secret123"));
    }

    #[test]
    fn test_constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_str_eq("secret123", "secret456"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }

    #[test]
    fn test_sha1_hex_known_vectors() {
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850786c9cd0d89d");
    }
}
