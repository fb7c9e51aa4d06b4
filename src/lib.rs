//! # netplay-lockstep
//!
//! Fixed-delay lockstep netplay for deterministic simulations.
//!
//! Two instances of the same deterministic simulation are kept in step by
//! exchanging one input vector per frame and applying every frame only once
//! both player slots are known. Nothing is ever predicted or rolled back: a
//! constant input delay (2 frames by default) hides the transport latency.
//!
//! The crate is request-driven: instead of calling into your emulator, [`NetplaySession::tick`] returns an ordered
//! list of [`NetplayRequest`]s (button edges and single-frame steps) which you
//! fulfil in order, either by hand or through [`StepFunction`] and
//! [`apply_requests`].
//!
//! Three modes share one engine:
//!
//! - [`SessionMode::Paired`]: two peers in lockstep over a [`Transport`].
//! - [`SessionMode::Solo`]: offline play, the remote slot is always neutral.
//! - [`SessionMode::Relay`]: a host fans several [`ControllerClient`]s into
//!   two player slots of one locally running simulation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
use std::{fmt::Debug, hash::Hash};

pub use buttons::{Button, ButtonVector, Edge};
pub use digest::SessionDigest;
pub use error::{InvalidRequestKind, NetplayError, ProtocolViolationKind};
pub use input::hold::HoldPolicy;
pub use input::{ButtonChanges, InputAggregator, PressSource, PressSourceSet};
pub use lockstep::clock::FrameClock;
pub use lockstep::{DrainOutcome, LockstepStepper};
pub use network::memory_transport::MemoryTransport;
pub use network::messages::Message;
#[cfg(feature = "tokio")]
pub use network::tokio_transport::TokioTransport;
pub use sessions::builder::SessionBuilder;
pub use sessions::config::{HoldConfig, LockstepConfig};
pub use sessions::controller_client::ControllerClient;
pub use sessions::event_drain::EventDrain;
pub use sessions::handshake::{Handshake, HandshakeAction, HandshakeEvent};
pub use sessions::netplay_session::{NetplaySession, SyncStatus};
pub use sessions::relay::{Attachment, ControllerRelay};

pub mod buttons;
pub mod digest;
#[doc(hidden)]
pub mod error;
pub mod hash;
pub mod input;
pub mod lockstep;
pub mod prelude;
pub mod telemetry;
pub mod sessions {
    //! Session context, handshake, relay and their configuration.
    pub mod builder;
    pub mod config;
    pub mod controller_client;
    #[doc(hidden)]
    pub mod event_drain;
    pub mod handshake;
    pub mod netplay_session;
    pub mod relay;
}
pub mod network {
    //! Wire messages, codec and in-tree transports.

    /// Binary codec for network message serialization.
    ///
    /// Encodes and decodes [`Message`](crate::Message) values with bincode,
    /// and with serde_json when the `json` feature is enabled.
    pub mod codec;
    pub mod memory_transport;
    pub mod messages;
    #[cfg(feature = "tokio")]
    pub mod tokio_transport;
}

// #############
// # CONSTANTS #
// #############

/// Internally, -1 represents no frame / invalid frame.
pub const NULL_FRAME: i32 = -1;

/// Index of one simulation step.
///
/// Frame 0 is the first frame applied after a session (re)starts. Both the
/// simulated frame counter and the local capture counter of a
/// [`LockstepStepper`] are `Frame`s, as are the frame tags carried by
/// [`Message::InputFrame`].
///
/// # Examples
///
/// ```
/// use netplay_lockstep::Frame;
///
/// let frame = Frame::new(0);
/// assert!(frame.is_valid());
/// assert!(Frame::NULL.is_null());
/// assert_eq!((frame + 2).as_i32(), 2);
/// assert_eq!(Frame::new(5) - Frame::new(3), 2);
/// ```
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Frame(i32);

impl Frame {
    /// The null frame constant, representing "no frame".
    pub const NULL: Frame = Frame(NULL_FRAME);

    /// The first frame of a run.
    pub const ZERO: Frame = Frame(0);

    /// Creates a new `Frame` from an `i32` value.
    #[inline]
    #[must_use]
    pub const fn new(frame: i32) -> Self {
        Frame(frame)
    }

    /// Returns the underlying `i32` value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns `true` if this frame is the null frame.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_FRAME
    }

    /// Returns `true` if this frame is non-negative.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_FRAME")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl std::ops::Add<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn add(self, rhs: i32) -> Self::Output {
        Frame(self.0 + rhs)
    }
}

impl std::ops::AddAssign<i32> for Frame {
    #[inline]
    fn add_assign(&mut self, rhs: i32) {
        self.0 += rhs;
    }
}

impl std::ops::Sub<i32> for Frame {
    type Output = Frame;

    #[inline]
    fn sub(self, rhs: i32) -> Self::Output {
        Frame(self.0 - rhs)
    }
}

impl std::ops::Sub<Frame> for Frame {
    type Output = i32;

    #[inline]
    fn sub(self, rhs: Frame) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<i32> for Frame {
    #[inline]
    fn from(value: i32) -> Self {
        Frame(value)
    }
}

impl From<Frame> for i32 {
    #[inline]
    fn from(frame: Frame) -> Self {
        frame.0
    }
}

impl PartialEq<i32> for Frame {
    #[inline]
    fn eq(&self, other: &i32) -> bool {
        self.0 == *other
    }
}

impl PartialOrd<i32> for Frame {
    #[inline]
    fn partial_cmp(&self, other: &i32) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

/// One of the two player positions of the simulation, numbered 1 and 2.
///
/// A `PlayerSlot` can only be built for 1 or 2, so holding one is proof
/// that the slot is valid. Raw slot numbers arriving from the network go
/// through [`PlayerSlot::try_from`].
///
/// # Examples
///
/// ```
/// use netplay_lockstep::PlayerSlot;
///
/// assert_eq!(PlayerSlot::ONE.other(), PlayerSlot::TWO);
/// assert_eq!(PlayerSlot::TWO.index(), 1);
/// assert!(PlayerSlot::try_from(3u8).is_err());
/// ```
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct PlayerSlot(u8);

impl PlayerSlot {
    /// Player 1. The host side of a paired session.
    pub const ONE: PlayerSlot = PlayerSlot(1);
    /// Player 2. The guest side of a paired session.
    pub const TWO: PlayerSlot = PlayerSlot(2);
    /// Both slots, in application order.
    pub const ALL: [PlayerSlot; 2] = [PlayerSlot::ONE, PlayerSlot::TWO];

    /// Returns the slot number (1 or 2).
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Returns the zero-based index of this slot.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// Returns the opposing slot.
    #[inline]
    #[must_use]
    pub const fn other(self) -> PlayerSlot {
        if self.0 == 1 {
            PlayerSlot::TWO
        } else {
            PlayerSlot::ONE
        }
    }
}

impl TryFrom<u8> for PlayerSlot {
    type Error = NetplayError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 | 2 => Ok(PlayerSlot(value)),
            slot => Err(ProtocolViolationKind::InvalidSlot { slot }.into()),
        }
    }
}

impl From<PlayerSlot> for u8 {
    #[inline]
    fn from(slot: PlayerSlot) -> Self {
        slot.0
    }
}

impl std::fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

// #############
// #   ENUMS   #
// #############

/// A session is always in one of these states. Query it with
/// [`NetplaySession::current_state`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing has happened yet: no content and no connection.
    Idle,
    /// A connection is open (or a mode without a peer is selected), but no
    /// content has been loaded locally.
    AwaitingLocalReady,
    /// Content is loaded locally; waiting for the peer to announce `ready`.
    AwaitingPeerReady,
    /// The peer announced content that differs from ours. Only a reload of
    /// matching content on either side leaves this state.
    DigestMismatch,
    /// Both sides are running the lockstep loop.
    Synchronized,
    /// Relay mode with content loaded: controller clients drive the local
    /// simulation directly.
    Relaying,
}

impl SessionState {
    /// Returns `true` if frames are being produced in this state.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Synchronized | Self::Relaying)
    }
}

/// How a session sources the input of the second slot.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionMode {
    /// Two peers exchange per-frame input in lockstep.
    #[default]
    Paired,
    /// Offline play. The remote slot is fed an all-released vector every frame.
    Solo,
    /// Remote controller clients press buttons on a locally running
    /// simulation; no lockstep buffering.
    Relay,
}

/// What a connection is to this session. Decided when the connection opens
/// and fixed for its lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Input produced on this device.
    LocalPlayer,
    /// The other half of a paired session.
    RemotePeer,
    /// A lightweight controller attached to a relay host.
    ControllerClient,
}

impl ConnectionRole {
    /// Returns `true` if a connection with this role may send `message`.
    #[must_use]
    pub const fn accepts(self, message: &Message) -> bool {
        match self {
            Self::LocalPlayer => false,
            Self::RemotePeer => matches!(
                message,
                Message::InputFrame { .. } | Message::Ready | Message::RomInfo { .. }
            ),
            Self::ControllerClient => {
                matches!(message, Message::Hello { .. } | Message::Input { .. })
            },
        }
    }
}

/// Notifications that you can receive from the session. Handling them is up to the user.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]`. Always include a wildcard arm when matching.
///
/// `Debug`, `Clone` and `PartialEq` only require them of `T::Address`, not of
/// the config type itself.
#[non_exhaustive]
pub enum NetplayEvent<T>
where
    T: Config,
{
    /// A remote peer connection opened.
    PeerConnected {
        /// The address of the peer.
        addr: T::Address,
    },
    /// The remote peer disconnected. Applied input was released and the
    /// session returned to waiting.
    PeerDisconnected {
        /// The address of the peer.
        addr: T::Address,
    },
    /// The peer announced it is ready to start.
    PeerReady,
    /// The peer's content digest matches ours.
    DigestVerified {
        /// The digest the peer announced.
        remote: SessionDigest,
    },
    /// The peer's content digest differs from ours. Synchronization will not
    /// start until matching content is loaded.
    DigestMismatch {
        /// Our digest.
        local: SessionDigest,
        /// The digest the peer announced.
        remote: SessionDigest,
    },
    /// The lockstep loop (re)started at frame 0.
    Synchronized,
    /// Draining stopped because input for `frame` is incomplete.
    WaitingForInput {
        /// The first frame that could not be applied.
        frame: Frame,
    },
    /// Draining resumed after a stall.
    InputResumed {
        /// The simulated frame after resuming.
        frame: Frame,
    },
    /// The input buffer overflowed. The run was discarded and the session
    /// waits for the peer to restart with us.
    Resynchronizing {
        /// Frames that were buffered when the overflow happened.
        buffered: usize,
        /// The configured maximum.
        max: usize,
    },
    /// A controller client claimed a slot.
    ControllerAttached {
        /// The address of the controller.
        addr: T::Address,
        /// The claimed slot.
        slot: PlayerSlot,
    },
    /// A controller client lost its slot to a newer claim and was disconnected.
    ControllerEvicted {
        /// The address of the evicted controller.
        addr: T::Address,
        /// The slot it held.
        slot: PlayerSlot,
    },
    /// An attached controller client disconnected; its buttons were released.
    ControllerDetached {
        /// The address of the controller.
        addr: T::Address,
        /// The slot it held.
        slot: PlayerSlot,
    },
}

impl<T: Config> Clone for NetplayEvent<T> {
    fn clone(&self) -> Self {
        match self {
            Self::PeerConnected { addr } => Self::PeerConnected { addr: addr.clone() },
            Self::PeerDisconnected { addr } => Self::PeerDisconnected { addr: addr.clone() },
            Self::PeerReady => Self::PeerReady,
            Self::DigestVerified { remote } => Self::DigestVerified {
                remote: remote.clone(),
            },
            Self::DigestMismatch { local, remote } => Self::DigestMismatch {
                local: local.clone(),
                remote: remote.clone(),
            },
            Self::Synchronized => Self::Synchronized,
            Self::WaitingForInput { frame } => Self::WaitingForInput { frame: *frame },
            Self::InputResumed { frame } => Self::InputResumed { frame: *frame },
            Self::Resynchronizing { buffered, max } => Self::Resynchronizing {
                buffered: *buffered,
                max: *max,
            },
            Self::ControllerAttached { addr, slot } => Self::ControllerAttached {
                addr: addr.clone(),
                slot: *slot,
            },
            Self::ControllerEvicted { addr, slot } => Self::ControllerEvicted {
                addr: addr.clone(),
                slot: *slot,
            },
            Self::ControllerDetached { addr, slot } => Self::ControllerDetached {
                addr: addr.clone(),
                slot: *slot,
            },
        }
    }
}

impl<T: Config> PartialEq for NetplayEvent<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::PeerConnected { addr: a }, Self::PeerConnected { addr: b })
            | (Self::PeerDisconnected { addr: a }, Self::PeerDisconnected { addr: b }) => a == b,
            (Self::PeerReady, Self::PeerReady) | (Self::Synchronized, Self::Synchronized) => true,
            (Self::DigestVerified { remote: a }, Self::DigestVerified { remote: b }) => a == b,
            (
                Self::DigestMismatch {
                    local: la,
                    remote: ra,
                },
                Self::DigestMismatch {
                    local: lb,
                    remote: rb,
                },
            ) => la == lb && ra == rb,
            (Self::WaitingForInput { frame: a }, Self::WaitingForInput { frame: b })
            | (Self::InputResumed { frame: a }, Self::InputResumed { frame: b }) => a == b,
            (
                Self::Resynchronizing {
                    buffered: ba,
                    max: ma,
                },
                Self::Resynchronizing {
                    buffered: bb,
                    max: mb,
                },
            ) => ba == bb && ma == mb,
            (
                Self::ControllerAttached { addr: a, slot: sa },
                Self::ControllerAttached { addr: b, slot: sb },
            )
            | (
                Self::ControllerEvicted { addr: a, slot: sa },
                Self::ControllerEvicted { addr: b, slot: sb },
            )
            | (
                Self::ControllerDetached { addr: a, slot: sa },
                Self::ControllerDetached { addr: b, slot: sb },
            ) => a == b && sa == sb,
            _ => false,
        }
    }
}

impl<T: Config> Eq for NetplayEvent<T> {}

impl<T: Config> std::fmt::Debug for NetplayEvent<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerConnected { addr } => {
                f.debug_struct("PeerConnected").field("addr", addr).finish()
            },
            Self::PeerDisconnected { addr } => {
                f.debug_struct("PeerDisconnected").field("addr", addr).finish()
            },
            Self::PeerReady => f.write_str("PeerReady"),
            Self::DigestVerified { remote } => f
                .debug_struct("DigestVerified")
                .field("remote", remote)
                .finish(),
            Self::DigestMismatch { local, remote } => f
                .debug_struct("DigestMismatch")
                .field("local", local)
                .field("remote", remote)
                .finish(),
            Self::Synchronized => f.write_str("Synchronized"),
            Self::WaitingForInput { frame } => f
                .debug_struct("WaitingForInput")
                .field("frame", frame)
                .finish(),
            Self::InputResumed { frame } => {
                f.debug_struct("InputResumed").field("frame", frame).finish()
            },
            Self::Resynchronizing { buffered, max } => f
                .debug_struct("Resynchronizing")
                .field("buffered", buffered)
                .field("max", max)
                .finish(),
            Self::ControllerAttached { addr, slot } => f
                .debug_struct("ControllerAttached")
                .field("addr", addr)
                .field("slot", slot)
                .finish(),
            Self::ControllerEvicted { addr, slot } => f
                .debug_struct("ControllerEvicted")
                .field("addr", addr)
                .field("slot", slot)
                .finish(),
            Self::ControllerDetached { addr, slot } => f
                .debug_struct("ControllerDetached")
                .field("addr", addr)
                .field("slot", slot)
                .finish(),
        }
    }
}

/// Requests that you receive from the session. Handling them is mandatory.
///
/// Requests MUST be fulfilled in the exact order they are returned: button
/// edges that precede a [`NetplayRequest::Step`] belong to that frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NetplayRequest {
    /// Press `button` for `slot`.
    ButtonDown {
        /// The player slot.
        slot: PlayerSlot,
        /// The pressed button.
        button: Button,
    },
    /// Release `button` for `slot`.
    ButtonUp {
        /// The player slot.
        slot: PlayerSlot,
        /// The released button.
        button: Button,
    },
    /// Advance the simulation by exactly one frame.
    Step {
        /// The frame being simulated.
        frame: Frame,
    },
}

impl NetplayRequest {
    /// Builds the request for an edge on `button`.
    #[must_use]
    pub const fn edge(slot: PlayerSlot, button: Button, edge: Edge) -> Self {
        match edge {
            Edge::Pressed => Self::ButtonDown { slot, button },
            Edge::Released => Self::ButtonUp { slot, button },
        }
    }

    /// Fulfils this request against a [`StepFunction`].
    pub fn apply_to<S: StepFunction + ?Sized>(&self, sim: &mut S) {
        match *self {
            Self::ButtonDown { slot, button } => sim.button_down(slot, button),
            Self::ButtonUp { slot, button } => sim.button_up(slot, button),
            Self::Step { frame } => sim.step(frame),
        }
    }
}

/// Fulfils every request in order.
pub fn apply_requests<S, I>(requests: I, sim: &mut S)
where
    S: StepFunction + ?Sized,
    I: IntoIterator<Item = NetplayRequest>,
{
    for request in requests {
        request.apply_to(sim);
    }
}

// #############
// #  TRAITS   #
// #############

/// The deterministic simulation driven by a session.
///
/// Two instances fed identical ordered call sequences must produce identical
/// output. The session relies on that property but cannot check it.
pub trait StepFunction {
    /// Presses `button` for `slot`.
    fn button_down(&mut self, slot: PlayerSlot, button: Button);
    /// Releases `button` for `slot`.
    fn button_up(&mut self, slot: PlayerSlot, button: Button);
    /// Advances exactly one frame.
    fn step(&mut self, frame: Frame);
}

/// Compile time parameterization for sessions.
///
/// # Example
///
/// ```
/// use netplay_lockstep::Config;
///
/// struct PeerConfig;
///
/// impl Config for PeerConfig {
///     type Address = String; // e.g. a signalling-server peer id
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait Config: 'static + Send + Sync {
    /// The address type which identifies connections.
    type Address: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Send + Sync + Debug;
}

/// Compile time parameterization for sessions.
#[cfg(not(feature = "sync-send"))]
pub trait Config: 'static {
    /// The address type which identifies connections.
    type Address: Clone + PartialEq + Eq + PartialOrd + Ord + Hash + Debug;
}

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection opened and can carry messages.
    Opened,
    /// A decoded message arrived.
    Message(Message),
    /// Bytes arrived that did not decode to a [`Message`].
    Malformed {
        /// Why decoding failed.
        reason: String,
    },
    /// The connection closed.
    Closed,
    /// The connection failed. Treated like a close.
    Error {
        /// What went wrong.
        context: String,
    },
}

/// The [`Transport`] trait connects a session to your message channel.
///
/// Unlike a datagram socket, a transport is connection-oriented: it reports
/// opens and closes, and must deliver messages of one connection reliably
/// and in order (a WebRTC data channel in reliable mode, a WebSocket, or an
/// in-process queue).
#[cfg(feature = "sync-send")]
pub trait Transport<A>: Send + Sync
where
    A: Clone + PartialEq + Eq + Hash + Send + Sync,
{
    /// Sends `msg` on the connection identified by `addr`.
    fn send_to(&mut self, msg: &Message, addr: &A);

    /// Returns everything that happened since the last call, in arrival order.
    fn receive_all_events(&mut self) -> Vec<(A, TransportEvent)>;

    /// Closes the connection identified by `addr`.
    fn close(&mut self, addr: &A);
}

/// The [`Transport`] trait connects a session to your message channel.
///
/// Unlike a datagram socket, a transport is connection-oriented: it reports
/// opens and closes, and must deliver messages of one connection reliably
/// and in order.
#[cfg(not(feature = "sync-send"))]
pub trait Transport<A>
where
    A: Clone + PartialEq + Eq + Hash,
{
    /// Sends `msg` on the connection identified by `addr`.
    fn send_to(&mut self, msg: &Message, addr: &A);

    /// Returns everything that happened since the last call, in arrival order.
    fn receive_all_events(&mut self) -> Vec<(A, TransportEvent)>;

    /// Closes the connection identified by `addr`.
    fn close(&mut self, addr: &A);
}

// ###################
// # UNIT TESTS      #
// ###################

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    // ==========================================
    // Frame
    // ==========================================

    #[test]
    fn frame_null_and_validity() {
        assert!(Frame::NULL.is_null());
        assert!(!Frame::NULL.is_valid());
        assert!(Frame::ZERO.is_valid());
        assert_eq!(Frame::default(), Frame::ZERO);
        assert_eq!(Frame::NULL.to_string(), "NULL_FRAME");
        assert_eq!(Frame::new(42).to_string(), "42");
    }

    #[test]
    fn frame_arithmetic() {
        let mut frame = Frame::new(10);
        frame += 2;
        assert_eq!(frame, 12);
        assert_eq!(frame - 2, Frame::new(10));
        assert_eq!(frame - Frame::new(2), 10);
        assert!(frame > 11);
    }

    // ==========================================
    // PlayerSlot
    // ==========================================

    #[test]
    fn player_slot_only_accepts_one_and_two() {
        assert_eq!(PlayerSlot::try_from(1u8).unwrap(), PlayerSlot::ONE);
        assert_eq!(PlayerSlot::try_from(2u8).unwrap(), PlayerSlot::TWO);
        for invalid in [0u8, 3, 255] {
            let err = PlayerSlot::try_from(invalid).unwrap_err();
            assert_eq!(
                err,
                NetplayError::InputProtocol {
                    kind: ProtocolViolationKind::InvalidSlot { slot: invalid }
                }
            );
        }
    }

    #[test]
    fn player_slot_index_and_other() {
        assert_eq!(PlayerSlot::ONE.index(), 0);
        assert_eq!(PlayerSlot::TWO.index(), 1);
        assert_eq!(PlayerSlot::ONE.other(), PlayerSlot::TWO);
        assert_eq!(PlayerSlot::TWO.other(), PlayerSlot::ONE);
        assert_eq!(PlayerSlot::TWO.to_string(), "P2");
    }

    #[test]
    fn player_slot_deserialization_rejects_out_of_range() {
        let ok: PlayerSlot = serde_json::from_str("2").unwrap();
        assert_eq!(ok, PlayerSlot::TWO);
        assert!(serde_json::from_str::<PlayerSlot>("7").is_err());
    }

    // ==========================================
    // Roles and requests
    // ==========================================

    #[test]
    fn roles_accept_only_their_messages() {
        let ready = Message::Ready;
        let hello = Message::Hello { player: 1 };
        assert!(ConnectionRole::RemotePeer.accepts(&ready));
        assert!(!ConnectionRole::RemotePeer.accepts(&hello));
        assert!(ConnectionRole::ControllerClient.accepts(&hello));
        assert!(!ConnectionRole::ControllerClient.accepts(&ready));
        assert!(!ConnectionRole::LocalPlayer.accepts(&ready));
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl StepFunction for Recorder {
        fn button_down(&mut self, slot: PlayerSlot, button: Button) {
            self.calls.push(format!("down {slot} {button}"));
        }

        fn button_up(&mut self, slot: PlayerSlot, button: Button) {
            self.calls.push(format!("up {slot} {button}"));
        }

        fn step(&mut self, frame: Frame) {
            self.calls.push(format!("step {frame}"));
        }
    }

    #[test]
    fn apply_requests_preserves_order() {
        let mut recorder = Recorder::default();
        apply_requests(
            [
                NetplayRequest::edge(PlayerSlot::ONE, Button::A, Edge::Pressed),
                NetplayRequest::Step {
                    frame: Frame::new(0),
                },
                NetplayRequest::edge(PlayerSlot::TWO, Button::Start, Edge::Released),
            ],
            &mut recorder,
        );
        assert_eq!(
            recorder.calls,
            vec!["down P1 A", "step 0", "up P2 START"]
        );
    }

    // A config that derives nothing; events only need `T::Address` bounds.
    struct BareConfig;

    impl Config for BareConfig {
        type Address = u16;
    }

    #[test]
    fn events_need_no_bounds_on_the_config_type() {
        let mismatch = NetplayEvent::<BareConfig>::DigestMismatch {
            local: SessionDigest::from_content("a", b"a"),
            remote: SessionDigest::from_content("b", b"b"),
        };
        assert_eq!(mismatch.clone(), mismatch);
        assert_ne!(mismatch, NetplayEvent::Synchronized);

        let attached = NetplayEvent::<BareConfig>::ControllerAttached {
            addr: 7,
            slot: PlayerSlot::TWO,
        };
        let evicted = NetplayEvent::<BareConfig>::ControllerEvicted {
            addr: 7,
            slot: PlayerSlot::TWO,
        };
        assert_ne!(attached, evicted);
        assert_eq!(
            format!("{attached:?}"),
            format!("ControllerAttached {{ addr: 7, slot: {:?} }}", PlayerSlot::TWO)
        );
        assert_eq!(
            format!("{:?}", NetplayEvent::<BareConfig>::PeerReady),
            "PeerReady"
        );
        assert_eq!(
            format!(
                "{:?}",
                NetplayEvent::<BareConfig>::Resynchronizing {
                    buffered: 3,
                    max: 8
                }
            ),
            "Resynchronizing { buffered: 3, max: 8 }"
        );
    }

    #[test]
    fn session_state_running() {
        assert!(SessionState::Synchronized.is_running());
        assert!(SessionState::Relaying.is_running());
        assert!(!SessionState::DigestMismatch.is_running());
        assert!(!SessionState::Idle.is_running());
    }
}
