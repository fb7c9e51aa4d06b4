//! Every encode and decode of a [`Message`] goes through this module so that
//! both peers use the same bincode configuration.
//!
//! # Examples
//!
//! ```
//! use netplay_lockstep::network::codec::{decode_message, encode};
//! use netplay_lockstep::Message;
//!
//! let bytes = encode(&Message::Ready).expect("encoding should succeed");
//! assert_eq!(decode_message(&bytes).expect("decoding should succeed"), Message::Ready);
//! ```

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

use crate::error::{NetplayError, ProtocolViolationKind};
use crate::network::messages::Message;

// Fixed-size integers: a frame tag has the same size on every frame.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Wire format a [`CodecError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum WireFormat {
    /// bincode, used on binary channels.
    Binary,
    /// JSON text, used on text channels.
    Json,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Json => "json",
        })
    }
}

/// A message could not be put on, or taken off, the wire.
///
/// Neither bincode nor serde_json expose structured reasons, so the reason
/// is kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// A value could not be serialized.
    Unencodable {
        /// Format being written.
        format: WireFormat,
        /// What the serializer reported.
        reason: String,
    },
    /// Received bytes are not a valid message.
    Undecodable {
        /// Format being read.
        format: WireFormat,
        /// Length of the rejected input.
        len: usize,
        /// What the deserializer reported.
        reason: String,
    },
    /// A caller-provided buffer cannot hold the encoded message.
    BufferTooSmall {
        /// Size of the buffer.
        provided: usize,
    },
    /// A message decoded but bytes were left over.
    TrailingBytes {
        /// Bytes consumed by the message.
        consumed: usize,
        /// Bytes received.
        received: usize,
    },
}

impl CodecError {
    fn unencodable(format: WireFormat, err: impl fmt::Display) -> Self {
        Self::Unencodable {
            format,
            reason: err.to_string(),
        }
    }

    fn undecodable(format: WireFormat, len: usize, err: impl fmt::Display) -> Self {
        Self::Undecodable {
            format,
            len,
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unencodable { format, reason } => {
                write!(f, "cannot encode {format} message: {reason}")
            },
            Self::Undecodable {
                format,
                len,
                reason,
            } => {
                write!(f, "{len} bytes are not a {format} message: {reason}")
            },
            Self::BufferTooSmall { provided } => {
                write!(f, "a {provided} byte buffer cannot hold the message")
            },
            Self::TrailingBytes { consumed, received } => {
                write!(
                    f,
                    "message used {consumed} of {received} bytes, the rest is garbage"
                )
            },
        }
    }
}

impl std::error::Error for CodecError {}

impl From<CodecError> for NetplayError {
    fn from(err: CodecError) -> Self {
        ProtocolViolationKind::Undecodable {
            reason: err.to_string(),
        }
        .into()
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes `value` with the binary wire configuration.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config())
        .map_err(|e| CodecError::unencodable(WireFormat::Binary, e))
}

/// Encodes a value into an existing byte slice and returns the number of
/// bytes written.
///
/// # Errors
///
/// Returns [`CodecError::BufferTooSmall`] if the buffer is not large enough.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::network::codec::encode_into;
/// use netplay_lockstep::Message;
///
/// let mut buffer = [0u8; 64];
/// let len = encode_into(&Message::Hello { player: 1 }, &mut buffer).expect("fits");
/// assert!(len > 0 && len <= buffer.len());
/// ```
pub fn encode_into<T: Serialize>(value: &T, buffer: &mut [u8]) -> CodecResult<usize> {
    bincode::serde::encode_into_slice(value, buffer, config()).map_err(|e| match e {
        bincode::error::EncodeError::UnexpectedEnd => CodecError::BufferTooSmall {
            provided: buffer.len(),
        },
        other => CodecError::unencodable(WireFormat::Binary, other),
    })
}

/// Decodes a value from the front of `bytes`, returning it with the
/// number of bytes it occupied.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::undecodable(WireFormat::Binary, bytes.len(), e))
}

/// Decodes exactly one [`Message`] from `bytes`.
///
/// A transport frame carries one message, so leftover bytes mean the frame
/// is corrupt and the whole frame is rejected.
pub fn decode_message(bytes: &[u8]) -> CodecResult<Message> {
    let (message, consumed) = bincode::serde::decode_from_slice(bytes, config())
        .map_err(|e| CodecError::undecodable(WireFormat::Binary, bytes.len(), e))?;
    if consumed != bytes.len() {
        return Err(CodecError::TrailingBytes {
            consumed,
            received: bytes.len(),
        });
    }
    Ok(message)
}

/// Encodes a [`Message`] as JSON text, for text-based transports.
#[cfg(feature = "json")]
pub fn encode_json(message: &Message) -> CodecResult<String> {
    serde_json::to_string(message)
        .map_err(|e| CodecError::unencodable(WireFormat::Json, e))
}

/// Decodes a [`Message`] from JSON text.
#[cfg(feature = "json")]
pub fn decode_json(text: &str) -> CodecResult<Message> {
    serde_json::from_str(text)
        .map_err(|e| CodecError::undecodable(WireFormat::Json, text.len(), e))
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
    use crate::buttons::{Button, ButtonVector};
    use crate::Frame;

    fn frame_message() -> Message {
        Message::InputFrame {
            frame: Frame::new(1234),
            player: 2,
            buttons: ButtonVector::NEUTRAL.with(Button::Left),
        }
    }

    #[test]
    fn message_survives_binary_codec() {
        let original = frame_message();
        let bytes = encode(&original).unwrap();
        assert_eq!(decode_message(&bytes).unwrap(), original);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(encode(&frame_message()).unwrap(), encode(&frame_message()).unwrap());
    }

    #[test]
    fn fixed_int_encoding_keeps_size_stable() {
        let small = encode(&Message::InputFrame {
            frame: Frame::new(1),
            player: 1,
            buttons: ButtonVector::NEUTRAL,
        })
        .unwrap();
        let large = encode(&Message::InputFrame {
            frame: Frame::new(i32::MAX),
            player: 1,
            buttons: ButtonVector::NEUTRAL,
        })
        .unwrap();
        assert_eq!(small.len(), large.len());
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let bytes = encode(&frame_message()).unwrap();
        let err = decode_message(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Undecodable {
                format: WireFormat::Binary,
                len,
                ..
            } if len == bytes.len() - 1
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = encode(&Message::Ready).unwrap();
        bytes.push(0);
        assert_eq!(
            decode_message(&bytes).unwrap_err(),
            CodecError::TrailingBytes {
                consumed: bytes.len() - 1,
                received: bytes.len()
            }
        );
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let bytes = encode(&99u32).unwrap();
        assert!(decode_message(&bytes).is_err());
    }

    #[test]
    fn small_buffer_is_reported() {
        let mut buffer = [0u8; 2];
        let err = encode_into(&frame_message(), &mut buffer).unwrap_err();
        assert!(matches!(
            err,
            CodecError::BufferTooSmall { provided: 2 } | CodecError::Unencodable { .. }
        ));
    }

    #[test]
    fn codec_error_becomes_protocol_violation() {
        let err: NetplayError = decode_message(&[0xff; 3]).unwrap_err().into();
        assert!(matches!(
            err,
            NetplayError::InputProtocol {
                kind: ProtocolViolationKind::Undecodable { .. }
            }
        ));
    }

    #[test]
    fn back_to_back_messages_decode_one_at_a_time() {
        let mut bytes = encode(&Message::Hello { player: 1 }).unwrap();
        let first_len = bytes.len();
        bytes.extend(encode(&Message::Ready).unwrap());

        let (first, consumed): (Message, _) = decode(&bytes).unwrap();
        assert_eq!(first, Message::Hello { player: 1 });
        assert_eq!(consumed, first_len);
        let (second, _): (Message, _) = decode(&bytes[consumed..]).unwrap();
        assert_eq!(second, Message::Ready);
    }

    #[cfg(feature = "json")]
    #[test]
    fn json_round_trip_and_rejection() {
        let text = encode_json(&frame_message()).unwrap();
        assert_eq!(decode_json(&text).unwrap(), frame_message());
        let err = decode_json(r#"{"input":{"btn":"TURBO","pressed":true,"player":1}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::Undecodable {
                format: WireFormat::Json,
                ..
            }
        ));
    }
}
