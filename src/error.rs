//! The crate error type and its structured reason enums.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::{ConnectionRole, Frame, PlayerSlot, SessionDigest, SessionMode};

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), NetplayError>`].
///
/// None of these errors is fatal to the process. Each one degrades the
/// session to "not synchronized" at worst.
///
/// [`Result<(), NetplayError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetplayError {
    /// The peer runs different content. The session stays in
    /// [`SessionState::DigestMismatch`] until matching content is loaded.
    ///
    /// [`SessionState::DigestMismatch`]: crate::SessionState::DigestMismatch
    DigestMismatch {
        /// Our digest.
        local: SessionDigest,
        /// The digest the peer announced.
        remote: SessionDigest,
    },
    /// A connection failed or closed.
    Transport {
        /// A description of the transport failure.
        context: String,
    },
    /// The frame input buffer grew past its cap. The current run is discarded.
    BufferOverflow {
        /// Frames buffered when the overflow happened.
        buffered: usize,
        /// The configured maximum.
        max: usize,
    },
    /// A message was malformed or not acceptable in the current context.
    /// Such messages are dropped and never change session state.
    InputProtocol {
        /// What was wrong with the message.
        kind: ProtocolViolationKind,
    },
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        kind: InvalidRequestKind,
    },
    /// The operation needs a running session.
    NotSynchronized,
}

impl Display for NetplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetplayError::DigestMismatch { local, remote } => {
                write!(f, "Content mismatch: local {} vs remote {}", local, remote)
            }
            NetplayError::Transport { context } => {
                write!(f, "Transport error: {}", context)
            }
            NetplayError::BufferOverflow { buffered, max } => {
                write!(
                    f,
                    "Input buffer overflow: {} frames buffered, maximum is {}",
                    buffered, max
                )
            }
            NetplayError::InputProtocol { kind } => {
                write!(f, "Input protocol error: {}", kind)
            }
            NetplayError::InvalidRequest { kind } => {
                write!(f, "Invalid Request: {}", kind)
            }
            NetplayError::NotSynchronized => {
                write!(f, "The session is not synchronized.")
            }
        }
    }
}

impl Error for NetplayError {}

impl From<InvalidRequestKind> for NetplayError {
    fn from(kind: InvalidRequestKind) -> Self {
        NetplayError::InvalidRequest { kind }
    }
}

impl From<ProtocolViolationKind> for NetplayError {
    fn from(kind: ProtocolViolationKind) -> Self {
        NetplayError::InputProtocol { kind }
    }
}

/// Why a request or configuration was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidRequestKind {
    /// A numeric configuration value is outside its allowed range.
    ConfigValueOutOfRange {
        /// The offending field.
        field: &'static str,
        /// Smallest allowed value.
        min: u64,
        /// Largest allowed value.
        max: u64,
        /// The value that was given.
        actual: u64,
    },
    /// A duration configuration value is outside its allowed range.
    DurationConfigOutOfRange {
        /// The offending field.
        field: &'static str,
        /// Smallest allowed value in milliseconds.
        min_ms: u64,
        /// Largest allowed value in milliseconds.
        max_ms: u64,
        /// The value that was given, in milliseconds.
        actual_ms: u64,
    },
    /// The input buffer cannot even hold the pre-seeded delay frames.
    BufferSmallerThanDelay {
        /// Configured buffer cap.
        max_buffered_frames: usize,
        /// Configured input delay.
        input_delay: usize,
    },
    /// The operation is only available in another mode.
    WrongMode {
        /// The mode the operation needs.
        expected: SessionMode,
        /// The current mode.
        actual: SessionMode,
    },
}

impl Display for InvalidRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigValueOutOfRange {
                field,
                min,
                max,
                actual,
            } => write!(
                f,
                "{} must be between {} and {}, got {}",
                field, min, max, actual
            ),
            Self::DurationConfigOutOfRange {
                field,
                min_ms,
                max_ms,
                actual_ms,
            } => write!(
                f,
                "{} must be between {}ms and {}ms, got {}ms",
                field, min_ms, max_ms, actual_ms
            ),
            Self::BufferSmallerThanDelay {
                max_buffered_frames,
                input_delay,
            } => write!(
                f,
                "max_buffered_frames ({}) must exceed input_delay ({})",
                max_buffered_frames, input_delay
            ),
            Self::WrongMode { expected, actual } => write!(
                f,
                "operation requires {:?} mode, session is in {:?} mode",
                expected, actual
            ),
        }
    }
}

/// What was wrong with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolViolationKind {
    /// The bytes did not decode to a message.
    Undecodable {
        /// The decoder's description of the failure.
        reason: String,
    },
    /// A message arrived on a connection the session does not know.
    UnknownConnection,
    /// The message type is not valid for the sender's role.
    UnexpectedMessage {
        /// Role of the sending connection.
        role: ConnectionRole,
        /// The message type.
        message: &'static str,
    },
    /// A player slot outside 1..=2.
    InvalidSlot {
        /// The slot number that was sent.
        slot: u8,
    },
    /// A slot other than the one the sender is allowed to speak for.
    WrongSlot {
        /// The slot the sender owns.
        expected: PlayerSlot,
        /// The slot the message claimed.
        actual: PlayerSlot,
    },
    /// A button name that is not part of the controller.
    UnknownButton {
        /// The name that was sent.
        name: String,
    },
    /// Input for a frame that was already simulated.
    StaleFrame {
        /// The frame the input was tagged with.
        frame: Frame,
        /// The next frame to be simulated.
        sim_frame: Frame,
    },
    /// Input for a frame beyond the buffer window.
    FrameTooFarAhead {
        /// The frame the input was tagged with.
        frame: Frame,
        /// The last frame the buffer may hold.
        limit: Frame,
    },
    /// A controller sent input before claiming a slot.
    NotAttached,
    /// A content digest whose hash is not 8 hex digits.
    MalformedDigest {
        /// The hash string that was sent.
        hash: String,
    },
}

impl Display for ProtocolViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undecodable { reason } => write!(f, "undecodable message: {}", reason),
            Self::UnknownConnection => write!(f, "message from an unknown connection"),
            Self::UnexpectedMessage { role, message } => {
                write!(f, "{:?} connections may not send {}", role, message)
            }
            Self::InvalidSlot { slot } => write!(f, "invalid player slot {}", slot),
            Self::WrongSlot { expected, actual } => {
                write!(f, "message for {} from the owner of {}", actual, expected)
            }
            Self::UnknownButton { name } => write!(f, "unknown button {:?}", name),
            Self::StaleFrame { frame, sim_frame } => write!(
                f,
                "input for frame {} arrived after frame {} was simulated",
                frame, sim_frame
            ),
            Self::FrameTooFarAhead { frame, limit } => {
                write!(f, "input for frame {} is beyond frame {}", frame, limit)
            }
            Self::NotAttached => write!(f, "controller input before hello"),
            Self::MalformedDigest { hash } => write!(f, "malformed content hash {:?}", hash),
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
    fn kinds_convert_into_error() {
        let err: NetplayError = ProtocolViolationKind::NotAttached.into();
        assert_eq!(
            err,
            NetplayError::InputProtocol {
                kind: ProtocolViolationKind::NotAttached
            }
        );

        let err: NetplayError = InvalidRequestKind::WrongMode {
            expected: SessionMode::Relay,
            actual: SessionMode::Paired,
        }
        .into();
        assert!(matches!(err, NetplayError::InvalidRequest { .. }));
    }

    #[test]
    fn display_mentions_details() {
        let err = NetplayError::BufferOverflow {
            buffered: 241,
            max: 240,
        };
        assert_eq!(
            err.to_string(),
            "Input buffer overflow: 241 frames buffered, maximum is 240"
        );

        let err: NetplayError = ProtocolViolationKind::StaleFrame {
            frame: Frame::new(3),
            sim_frame: Frame::new(7),
        }
        .into();
        assert!(err.to_string().contains("frame 3"));
    }

    #[test]
    fn digest_mismatch_display_names_both_sides() {
        let local = SessionDigest::from_content("a.nes", b"abc");
        let remote = SessionDigest::from_content("b.nes", b"abd");
        let err = NetplayError::DigestMismatch { local, remote };
        let text = err.to_string();
        assert!(text.contains("a.nes"));
        assert!(text.contains("b.nes"));
    }
}
