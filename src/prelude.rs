//! Convenient re-exports for common usage.
//!
//! ```rust
//! use netplay_lockstep::prelude::*;
//!
//! struct PeerConfig;
//!
//! impl Config for PeerConfig {
//!     type Address = String;
//! }
//!
//! let session = SessionBuilder::<PeerConfig>::new()
//!     .with_local_slot(PlayerSlot::ONE)
//!     .start_session(MemoryTransport::new(String::from("host")));
//! assert!(session.is_ok());
//! ```

// Sessions
pub use crate::sessions::builder::SessionBuilder;
pub use crate::sessions::netplay_session::{NetplaySession, SyncStatus};
pub use crate::sessions::relay::ControllerRelay;
pub use crate::ControllerClient;

// Traits
pub use crate::{Config, StepFunction, Transport};

// Transports
pub use crate::MemoryTransport;
#[cfg(feature = "tokio")]
pub use crate::TokioTransport;

// Fundamental types
pub use crate::{Button, ButtonVector, Edge, Frame, PlayerSlot, PressSource, NULL_FRAME};

// Session state
pub use crate::{SessionDigest, SessionMode, SessionState};

// Requests and events
pub use crate::{apply_requests, NetplayEvent, NetplayRequest, TransportEvent};

// Errors
pub use crate::NetplayError;

// Configuration
pub use crate::sessions::config::{HoldConfig, LockstepConfig};
pub use crate::HoldPolicy;
