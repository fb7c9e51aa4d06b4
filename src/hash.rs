//! Deterministic 32-bit FNV-1a hashing.
//!
//! Both peers fingerprint the content they loaded with the same hash and
//! compare the results before synchronizing, so the hash must not depend on
//! the process, platform, or run. `std`'s `DefaultHasher` is randomly seeded
//! and cannot be used for this.
//!
//! # Usage
//!
//! ```
//! use netplay_lockstep::hash::{fnv1a_32, to_hex, ContentHasher};
//!
//! let mut hasher = ContentHasher::new();
//! hasher.update(b"foo");
//! hasher.update(b"bar");
//! assert_eq!(hasher.finish_u32(), fnv1a_32(b"foobar"));
//! assert_eq!(to_hex(fnv1a_32(b"foobar")), "bf9cf968");
//! ```
//!
//! FNV-1a is NOT cryptographically secure. It detects accidental mismatches
//! (a different ROM revision, a truncated file), not tampering.

use std::hash::Hasher;

/// FNV-1a 32-bit offset basis.
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a 32-bit prime.
const FNV_PRIME: u32 = 0x0100_0193;

/// An incremental 32-bit FNV-1a hasher.
///
/// Also implements [`Hasher`] so that any `Hash` value can be fingerprinted;
/// [`Hasher::finish`] widens the 32-bit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentHasher {
    state: u32,
}

impl ContentHasher {
    /// Creates a hasher at the FNV-1a offset basis.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// Feeds `bytes` into the hash.
    #[inline]
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u32::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    /// Returns the 32-bit hash of everything fed so far.
    #[inline]
    #[must_use]
    pub const fn finish_u32(&self) -> u32 {
        self.state
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for ContentHasher {
    #[inline]
    fn finish(&self) -> u64 {
        u64::from(self.state)
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }
}

/// Hashes `bytes` in one call.
#[inline]
#[must_use]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hasher = ContentHasher::new();
    hasher.update(bytes);
    hasher.finish_u32()
}

/// Renders a hash as 8 lowercase hex digits.
#[must_use]
pub fn to_hex(hash: u32) -> String {
    format!("{hash:08x}")
}

/// Parses the output of [`to_hex`]. Exactly 8 hex digits are accepted.
#[must_use]
pub fn from_hex(text: &str) -> Option<u32> {
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(text, 16).ok()
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::hash::Hash;

    #[test]
    fn known_fnv1a_32_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish_u32(), fnv1a_32(b"hello world"));
    }

    #[test]
    fn single_byte_change_changes_hash() {
        let mut data = vec![0u8; 4096];
        let before = fnv1a_32(&data);
        data[2048] = 1;
        assert_ne!(before, fnv1a_32(&data));
    }

    #[test]
    fn hex_is_zero_padded_lowercase() {
        assert_eq!(to_hex(0x0000_00ab), "000000ab");
        assert_eq!(to_hex(0xDEAD_BEEF), "deadbeef");
    }

    #[test]
    fn from_hex_accepts_only_eight_digits() {
        assert_eq!(from_hex("deadbeef"), Some(0xdead_beef));
        assert_eq!(from_hex("DEADBEEF"), Some(0xdead_beef));
        assert_eq!(from_hex("beef"), None);
        assert_eq!(from_hex("+eadbeef"), None);
        assert_eq!(from_hex("deadbeefa"), None);
    }

    #[test]
    fn hasher_trait_is_deterministic() {
        let mut a = ContentHasher::new();
        let mut b = ContentHasher::new();
        (42u32, "state").hash(&mut a);
        (42u32, "state").hash(&mut b);
        assert_eq!(a.finish(), b.finish());
    }
}
