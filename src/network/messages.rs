//! Messages exchanged between peers and from controller clients to the host.

use serde::{Deserialize, Serialize};

use crate::buttons::{Button, ButtonVector};
use crate::digest::SessionDigest;
use crate::Frame;

/// Everything a session sends or receives.
///
/// Serialized externally tagged with snake_case names, e.g.
/// `{"input_frame":{"frame":7,"player":2,"buttons":{...}}}` or `"ready"`.
/// The same representation works for the binary and the JSON codec.
///
/// Slot numbers travel as raw `u8` and are validated on receipt, so a
/// message with a bad slot still decodes and can be reported precisely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    /// A controller client claims a player slot.
    Hello {
        /// The requested slot (1 or 2).
        player: u8,
    },
    /// A discrete button edge from a controller client.
    Input {
        /// The button.
        btn: Button,
        /// `true` for a press, `false` for a release.
        pressed: bool,
        /// The slot the client believes it holds.
        player: Option<u8>,
    },
    /// One frame of lockstep input.
    InputFrame {
        /// The frame the vector belongs to.
        frame: Frame,
        /// The slot the vector belongs to.
        player: u8,
        /// The full controller state.
        buttons: ButtonVector,
    },
    /// The sender has content loaded and is willing to start.
    Ready,
    /// The sender's content digest.
    RomInfo {
        /// Content name, informational.
        name: String,
        /// Content size in bytes.
        size: u64,
        /// FNV-1a hash as 8 lowercase hex digits.
        hash: String,
    },
}

impl Message {
    /// The wire name of this message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Input { .. } => "input",
            Self::InputFrame { .. } => "input_frame",
            Self::Ready => "ready",
            Self::RomInfo { .. } => "rom_info",
        }
    }

    /// Builds the `rom_info` message announcing `digest`.
    #[must_use]
    pub fn rom_info(digest: &SessionDigest) -> Self {
        Self::RomInfo {
            name: digest.name().to_owned(),
            size: digest.byte_size(),
            hash: digest.hash_hex(),
        }
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
    fn kinds_are_snake_case() {
        assert_eq!(Message::Ready.kind(), "ready");
        assert_eq!(
            Message::InputFrame {
                frame: Frame::ZERO,
                player: 1,
                buttons: ButtonVector::NEUTRAL
            }
            .kind(),
            "input_frame"
        );
    }

    #[test]
    fn rom_info_carries_hex_hash() {
        let digest = SessionDigest::new("game.nes", 24592, 0x00ab_cdef);
        assert_eq!(
            Message::rom_info(&digest),
            Message::RomInfo {
                name: "game.nes".to_owned(),
                size: 24592,
                hash: "00abcdef".to_owned()
            }
        );
    }

    #[test]
    fn json_shape() {
        let hello = serde_json::to_string(&Message::Hello { player: 2 }).unwrap();
        assert_eq!(hello, r#"{"hello":{"player":2}}"#);
        assert_eq!(serde_json::to_string(&Message::Ready).unwrap(), r#""ready""#);

        let input: Message =
            serde_json::from_str(r#"{"input":{"btn":"START","pressed":true,"player":1}}"#)
                .unwrap();
        assert_eq!(
            input,
            Message::Input {
                btn: Button::Start,
                pressed: true,
                player: Some(1)
            }
        );
    }
}
