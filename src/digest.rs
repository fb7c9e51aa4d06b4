//! Content fingerprints exchanged before synchronizing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NetplayError, ProtocolViolationKind};
use crate::hash::{fnv1a_32, from_hex, to_hex};

/// Fingerprint of the content (ROM) a side has loaded.
///
/// Computed once per load and replaced wholesale on reload. Two digests
/// [`match`](SessionDigest::matches) when both the content hash and the byte
/// size are equal; the name is informational only.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::SessionDigest;
///
/// let ours = SessionDigest::from_content("game.nes", b"\x4e\x45\x53\x1a");
/// let theirs = SessionDigest::from_content("renamed.nes", b"\x4e\x45\x53\x1a");
/// assert!(ours.matches(&theirs));
/// assert_eq!(ours.hash_hex().len(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDigest {
    name: String,
    byte_size: u64,
    content_hash: u32,
}

impl SessionDigest {
    /// Builds a digest from already known parts.
    #[must_use]
    pub fn new(name: impl Into<String>, byte_size: u64, content_hash: u32) -> Self {
        Self {
            name: name.into(),
            byte_size,
            content_hash,
        }
    }

    /// Fingerprints raw content bytes.
    #[must_use]
    pub fn from_content(name: impl Into<String>, content: &[u8]) -> Self {
        Self::new(name, content.len() as u64, fnv1a_32(content))
    }

    /// Builds a digest from the fields of a `rom_info` message.
    ///
    /// # Errors
    /// Returns [`ProtocolViolationKind::MalformedDigest`] if `hash` is not 8 hex digits.
    pub fn from_wire(name: &str, byte_size: u64, hash: &str) -> Result<Self, NetplayError> {
        let content_hash = from_hex(hash).ok_or_else(|| ProtocolViolationKind::MalformedDigest {
            hash: hash.to_owned(),
        })?;
        Ok(Self::new(name, byte_size, content_hash))
    }

    /// The content name as loaded (usually a file name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the content in bytes.
    #[must_use]
    pub const fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// 32-bit FNV-1a hash of the content.
    #[must_use]
    pub const fn content_hash(&self) -> u32 {
        self.content_hash
    }

    /// The content hash as 8 lowercase hex digits.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        to_hex(self.content_hash)
    }

    /// Returns `true` if both sides run the same content.
    #[must_use]
    pub const fn matches(&self, other: &SessionDigest) -> bool {
        self.content_hash == other.content_hash && self.byte_size == other.byte_size
    }
}

impl fmt::Display for SessionDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {})",
            self.name,
            self.byte_size,
            self.hash_hex()
        )
    }
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

    #[test]
    fn identical_content_matches_regardless_of_name() {
        let a = SessionDigest::from_content("a.nes", b"content");
        let b = SessionDigest::from_content("b.nes", b"content");
        assert!(a.matches(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn size_difference_breaks_match_even_with_equal_hash() {
        let a = SessionDigest::new("x", 10, 0x1234_5678);
        let b = SessionDigest::new("x", 11, 0x1234_5678);
        assert!(!a.matches(&b));
    }

    #[test]
    fn single_differing_byte_breaks_match() {
        let a = SessionDigest::from_content("x", b"abcdef");
        let b = SessionDigest::from_content("x", b"abcdeg");
        assert!(!a.matches(&b));
    }

    #[test]
    fn wire_round_trip() {
        let digest = SessionDigest::from_content("game.nes", b"rom bytes");
        let parsed =
            SessionDigest::from_wire(digest.name(), digest.byte_size(), &digest.hash_hex()).unwrap();
        assert_eq!(parsed, digest);
    }

    #[test]
    fn malformed_wire_hash_is_rejected() {
        let err = SessionDigest::from_wire("x", 3, "xyz").unwrap_err();
        assert_eq!(
            err,
            NetplayError::InputProtocol {
                kind: ProtocolViolationKind::MalformedDigest {
                    hash: "xyz".to_owned()
                }
            }
        );
    }

    #[test]
    fn display_shows_size_and_hex() {
        let digest = SessionDigest::new("game.nes", 40976, 0x0bad_cafe);
        assert_eq!(digest.to_string(), "game.nes (40976 bytes, 0badcafe)");
    }
}
