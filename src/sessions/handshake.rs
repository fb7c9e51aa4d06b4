//! The readiness and content-consistency handshake that gates lockstep.
//!
//! [`Handshake`] is a pure state machine: it never touches the transport or
//! the stepper. Each [`HandshakeEvent`] fed to [`Handshake::handle`] returns
//! the [`HandshakeAction`]s the owning session has to carry out, in order.
//!
//! # Start predicate
//!
//! A paired run starts once
//! `local_ready && peer_ready && channel_open && (no peer digest || digests match)`.
//! Solo and relay runs start as soon as content is loaded.
//!
//! # Announcements and replies
//!
//! A side that begins a new run (content loaded, channel opened, switched to
//! paired mode, overflow) stops, forgets the peer's readiness and
//! *announces*: `rom_info` followed by `ready`. A `ready` that follows the
//! peer's `rom_info` is therefore an announcement, and a bare `ready` is a
//! *reply*.
//!
//! - An announcement is answered with one reply when content is loaded. A
//!   side that was running treats it as the peer restarting and restarts
//!   first.
//! - A reply is never answered. Replies received while running are dropped.
//! - Replies to all but the latest of our announcements are stale and do not
//!   count as readiness.
//!
//! Every run thus starts on a `ready` the peer sent for that run, and each
//! exchange ends after one round trip. While relaying, the peer's `rom_info`
//! is still recorded so the digest check holds once paired mode resumes.

use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::digest::SessionDigest;
use crate::{SessionMode, SessionState};

/// Something that happened which may move the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Content was (re)loaded locally.
    LocalContentLoaded {
        /// Fingerprint of the loaded content.
        digest: SessionDigest,
    },
    /// The peer sent `ready`.
    PeerReady,
    /// The peer sent `rom_info`.
    PeerDigest {
        /// The announced digest.
        digest: SessionDigest,
    },
    /// The peer channel opened.
    ChannelOpened,
    /// The peer channel closed or failed.
    ConnectionClosed,
    /// The session switched modes.
    ModeChanged {
        /// The new mode.
        mode: SessionMode,
    },
    /// The input buffer overflowed.
    Overflow,
}

/// Work the session must carry out after a [`Handshake::handle`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Send `rom_info` with this digest to the peer.
    SendRomInfo(SessionDigest),
    /// Send `ready` to the peer.
    SendReady,
    /// Close the peer channel.
    ClosePeer,
    /// Stop the frame clock and reset the stepper, releasing applied buttons.
    StopSync,
    /// Reset the stepper to frame 0 and start the frame clock.
    StartSync,
    /// Stop the frame clock and release every relay-held button.
    StopRelay,
    /// Start the frame clock of the relay loop.
    StartRelay,
    /// The peer's digest matches ours.
    DigestVerified {
        /// The peer's digest.
        remote: SessionDigest,
    },
    /// The peer's digest differs from ours.
    DigestMismatch {
        /// Our digest.
        local: SessionDigest,
        /// The peer's digest.
        remote: SessionDigest,
    },
}

/// Actions produced by one event.
pub type HandshakeActions = SmallVec<[HandshakeAction; 4]>;

/// Readiness flags and digests of both sides.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{Handshake, HandshakeAction, HandshakeEvent, SessionDigest, SessionMode, SessionState};
///
/// let mut handshake = Handshake::new(SessionMode::Paired);
/// assert_eq!(handshake.state(), SessionState::Idle);
///
/// handshake.handle(HandshakeEvent::ChannelOpened);
/// let digest = SessionDigest::from_content("game.nes", b"rom");
/// let actions = handshake.handle(HandshakeEvent::LocalContentLoaded { digest: digest.clone() });
/// assert_eq!(actions.as_slice(), &[HandshakeAction::SendRomInfo(digest), HandshakeAction::SendReady]);
/// assert_eq!(handshake.state(), SessionState::AwaitingPeerReady);
///
/// let actions = handshake.handle(HandshakeEvent::PeerReady);
/// assert_eq!(actions.as_slice(), &[HandshakeAction::StartSync]);
/// assert_eq!(handshake.state(), SessionState::Synchronized);
/// ```
#[derive(Debug, Clone)]
pub struct Handshake {
    mode: SessionMode,
    local_digest: Option<SessionDigest>,
    peer_digest: Option<SessionDigest>,
    peer_ready: bool,
    /// The peer's `rom_info` arrived and its `ready` has not yet.
    peer_announcing: bool,
    /// Our announcements the peer has not replied to.
    unanswered: u32,
    channel_open: bool,
    running: bool,
    touched: bool,
}

impl Handshake {
    /// Creates a handshake in `mode` with nothing loaded and no channel.
    #[must_use]
    pub const fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            local_digest: None,
            peer_digest: None,
            peer_ready: false,
            peer_announcing: false,
            unanswered: 0,
            channel_open: false,
            running: false,
            touched: false,
        }
    }

    /// Feeds one event and returns the resulting actions.
    pub fn handle(&mut self, event: HandshakeEvent) -> HandshakeActions {
        let mut actions = HandshakeActions::new();
        self.touched = true;
        match event {
            HandshakeEvent::LocalContentLoaded { digest } => {
                self.on_local_content(digest, &mut actions);
            },
            HandshakeEvent::PeerReady => self.on_peer_ready(&mut actions),
            HandshakeEvent::PeerDigest { digest } => self.on_peer_digest(digest, &mut actions),
            HandshakeEvent::ChannelOpened => self.on_channel_opened(&mut actions),
            HandshakeEvent::ConnectionClosed => self.on_connection_closed(&mut actions),
            HandshakeEvent::ModeChanged { mode } => self.on_mode_changed(mode, &mut actions),
            HandshakeEvent::Overflow => self.on_overflow(&mut actions),
        }
        actions
    }

    fn on_local_content(&mut self, digest: SessionDigest, actions: &mut HandshakeActions) {
        self.stop(actions);
        info!(%digest, "content loaded");
        self.local_digest = Some(digest.clone());
        if self.mode != SessionMode::Paired {
            self.attempt_start(actions);
            return;
        }
        if let Some(remote) = self.peer_digest.clone() {
            actions.push(Self::digest_verdict(&digest, remote));
        }
        self.announce(actions);
        self.attempt_start(actions);
    }

    fn on_peer_ready(&mut self, actions: &mut HandshakeActions) {
        if !self.channel_open {
            warn!(mode = ?self.mode, "ignoring ready without a paired channel");
            return;
        }
        let announcement = std::mem::take(&mut self.peer_announcing);
        if announcement {
            // The peer forgot our readiness when it announced.
            self.unanswered = 0;
        }
        if self.mode != SessionMode::Paired {
            debug!(mode = ?self.mode, announcement, "peer ready noted, not paired");
            return;
        }
        if announcement {
            if self.running {
                info!("peer restarted, restarting lockstep");
                self.stop(actions);
            }
            debug!("peer announced ready");
            self.peer_ready = true;
            if self.local_digest.is_some() {
                actions.push(HandshakeAction::SendReady);
            }
            self.attempt_start(actions);
            return;
        }
        self.unanswered = self.unanswered.saturating_sub(1);
        if self.running {
            debug!("reply while running dropped");
        } else if self.unanswered > 0 {
            debug!(outstanding = self.unanswered, "stale reply dropped");
        } else {
            debug!("peer replied ready");
            self.peer_ready = true;
            self.attempt_start(actions);
        }
    }

    fn on_peer_digest(&mut self, digest: SessionDigest, actions: &mut HandshakeActions) {
        if !self.channel_open {
            warn!(mode = ?self.mode, "ignoring rom_info without a paired channel");
            return;
        }
        self.peer_announcing = true;
        self.peer_ready = false;
        self.peer_digest = Some(digest.clone());
        if self.mode != SessionMode::Paired {
            debug!(mode = ?self.mode, remote = %digest, "peer digest stored, not paired");
            return;
        }
        let Some(local) = self.local_digest.clone() else {
            debug!(remote = %digest, "peer digest stored, nothing loaded locally");
            return;
        };
        let verdict = Self::digest_verdict(&local, digest);
        if matches!(verdict, HandshakeAction::DigestMismatch { .. }) {
            self.stop(actions);
        }
        actions.push(verdict);
        self.attempt_start(actions);
    }

    fn on_channel_opened(&mut self, actions: &mut HandshakeActions) {
        if self.mode != SessionMode::Paired {
            return;
        }
        self.stop(actions);
        self.channel_open = true;
        self.forget_peer();
        self.announce(actions);
        self.attempt_start(actions);
    }

    fn on_connection_closed(&mut self, actions: &mut HandshakeActions) {
        if !self.channel_open {
            return;
        }
        // A relay loop does not depend on the peer.
        if self.mode == SessionMode::Paired {
            self.stop(actions);
        }
        self.channel_open = false;
        self.forget_peer();
    }

    fn on_mode_changed(&mut self, mode: SessionMode, actions: &mut HandshakeActions) {
        if mode == self.mode {
            return;
        }
        self.stop(actions);
        info!(from = ?self.mode, to = ?mode, "mode changed");
        if mode == SessionMode::Solo && self.channel_open {
            actions.push(HandshakeAction::ClosePeer);
            self.channel_open = false;
            self.forget_peer();
        }
        self.mode = mode;
        self.peer_ready = false;
        if mode == SessionMode::Paired && self.channel_open {
            if let (Some(local), Some(remote)) = (&self.local_digest, self.peer_digest.clone()) {
                actions.push(Self::digest_verdict(local, remote));
            }
            self.announce(actions);
        }
        self.attempt_start(actions);
    }

    fn on_overflow(&mut self, actions: &mut HandshakeActions) {
        if !self.running || self.mode == SessionMode::Relay {
            return;
        }
        self.stop(actions);
        if self.mode == SessionMode::Paired {
            self.announce(actions);
        }
        // Solo has no peer to wait for.
        self.attempt_start(actions);
    }

    /// Sends `rom_info` and `ready` over an open paired channel once content
    /// is loaded. Readiness from before the announcement no longer counts.
    fn announce(&mut self, actions: &mut HandshakeActions) {
        if !self.channel_open {
            return;
        }
        let Some(digest) = self.local_digest.clone() else {
            return;
        };
        self.peer_ready = false;
        self.unanswered = self.unanswered.saturating_add(1);
        actions.push(HandshakeAction::SendRomInfo(digest));
        actions.push(HandshakeAction::SendReady);
    }

    fn forget_peer(&mut self) {
        self.peer_ready = false;
        self.peer_digest = None;
        self.peer_announcing = false;
        self.unanswered = 0;
    }

    fn digest_verdict(local: &SessionDigest, remote: SessionDigest) -> HandshakeAction {
        if local.matches(&remote) {
            HandshakeAction::DigestVerified { remote }
        } else {
            warn!(%local, %remote, "content mismatch");
            HandshakeAction::DigestMismatch {
                local: local.clone(),
                remote,
            }
        }
    }

    fn stop(&mut self, actions: &mut HandshakeActions) {
        if !self.running {
            return;
        }
        self.running = false;
        if self.mode == SessionMode::Relay {
            actions.push(HandshakeAction::StopRelay);
        } else {
            self.peer_ready = false;
            actions.push(HandshakeAction::StopSync);
        }
    }

    fn attempt_start(&mut self, actions: &mut HandshakeActions) {
        if self.running || !self.can_start() {
            return;
        }
        self.running = true;
        if self.mode == SessionMode::Relay {
            info!("relay loop started");
            actions.push(HandshakeAction::StartRelay);
        } else {
            info!(mode = ?self.mode, "lockstep started");
            actions.push(HandshakeAction::StartSync);
        }
    }

    /// Returns `true` if a run may start now.
    #[must_use]
    pub fn can_start(&self) -> bool {
        match self.mode {
            SessionMode::Solo | SessionMode::Relay => self.local_digest.is_some(),
            SessionMode::Paired => {
                self.local_digest.is_some()
                    && self.peer_ready
                    && self.channel_open
                    && self.digests_match() != Some(false)
            },
        }
    }

    /// Whether both digests match, or `None` while one is unknown.
    #[must_use]
    pub fn digests_match(&self) -> Option<bool> {
        match (&self.local_digest, &self.peer_digest) {
            (Some(local), Some(remote)) => Some(local.matches(remote)),
            _ => None,
        }
    }

    /// The current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.running {
            return match self.mode {
                SessionMode::Relay => SessionState::Relaying,
                SessionMode::Paired | SessionMode::Solo => SessionState::Synchronized,
            };
        }
        if self.local_digest.is_none() {
            return if self.mode == SessionMode::Paired && !self.touched {
                SessionState::Idle
            } else {
                SessionState::AwaitingLocalReady
            };
        }
        if self.digests_match() == Some(false) {
            SessionState::DigestMismatch
        } else {
            SessionState::AwaitingPeerReady
        }
    }

    /// The current mode.
    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Our digest, once content is loaded.
    #[must_use]
    pub const fn local_digest(&self) -> Option<&SessionDigest> {
        self.local_digest.as_ref()
    }

    /// The digest the peer announced.
    #[must_use]
    pub const fn peer_digest(&self) -> Option<&SessionDigest> {
        self.peer_digest.as_ref()
    }

    /// Returns `true` once content is loaded locally.
    #[must_use]
    pub const fn is_local_ready(&self) -> bool {
        self.local_digest.is_some()
    }

    /// Returns `true` if the peer announced `ready` for the next run.
    #[must_use]
    pub const fn is_peer_ready(&self) -> bool {
        self.peer_ready
    }

    /// Returns `true` while a peer channel is open.
    #[must_use]
    pub const fn is_channel_open(&self) -> bool {
        self.channel_open
    }

    /// Returns `true` while frames are being produced.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(SessionMode::default())
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
    use std::collections::VecDeque;

    fn digest(content: &[u8]) -> SessionDigest {
        SessionDigest::from_content("game.nes", content)
    }

    fn loaded_and_open() -> Handshake {
        let mut handshake = Handshake::new(SessionMode::Paired);
        handshake.handle(HandshakeEvent::ChannelOpened);
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        handshake
    }

    #[test]
    fn idle_until_something_happens() {
        let mut handshake = Handshake::new(SessionMode::Paired);
        assert_eq!(handshake.state(), SessionState::Idle);
        handshake.handle(HandshakeEvent::ChannelOpened);
        assert_eq!(handshake.state(), SessionState::AwaitingLocalReady);
    }

    #[test]
    fn loading_without_channel_sends_nothing() {
        let mut handshake = Handshake::new(SessionMode::Paired);
        let actions = handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        assert!(actions.is_empty());
        assert_eq!(handshake.state(), SessionState::AwaitingPeerReady);
    }

    #[test]
    fn channel_open_announces_loaded_content() {
        let mut handshake = Handshake::new(SessionMode::Paired);
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        let actions = handshake.handle(HandshakeEvent::ChannelOpened);
        assert_eq!(
            actions.as_slice(),
            &[
                HandshakeAction::SendRomInfo(digest(b"rom")),
                HandshakeAction::SendReady
            ]
        );
    }

    #[test]
    fn start_needs_every_condition() {
        // Peer announced but nothing loaded.
        let mut handshake = Handshake::new(SessionMode::Paired);
        handshake.handle(HandshakeEvent::ChannelOpened);
        handshake.handle(HandshakeEvent::PeerDigest {
            digest: digest(b"rom"),
        });
        assert!(handshake.handle(HandshakeEvent::PeerReady).is_empty());
        assert!(handshake.is_peer_ready());
        assert!(!handshake.can_start());

        // Loading announces, which waits for a fresh reply.
        let actions = handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        assert_eq!(actions.last(), Some(&HandshakeAction::SendReady));
        assert!(!handshake.is_running());

        // Loaded, peer ready, channel open, digests match: starts.
        let actions = handshake.handle(HandshakeEvent::PeerReady);
        assert_eq!(actions.as_slice(), &[HandshakeAction::StartSync]);
        assert!(handshake.is_running());
    }

    #[test]
    fn ready_without_channel_is_ignored() {
        let mut handshake = Handshake::new(SessionMode::Paired);
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        assert!(handshake.handle(HandshakeEvent::PeerReady).is_empty());
        assert!(!handshake.is_peer_ready());
    }

    #[test]
    fn mismatch_blocks_start_until_matching_reload() {
        let mut handshake = loaded_and_open();
        let actions = handshake.handle(HandshakeEvent::PeerDigest {
            digest: digest(b"other"),
        });
        assert!(matches!(
            actions.as_slice(),
            [HandshakeAction::DigestMismatch { .. }]
        ));
        // The announcement is answered even though it cannot start a run.
        assert_eq!(
            handshake.handle(HandshakeEvent::PeerReady).as_slice(),
            &[HandshakeAction::SendReady]
        );
        assert_eq!(handshake.state(), SessionState::DigestMismatch);
        assert!(!handshake.is_running());

        let actions = handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"other"),
        });
        assert_eq!(
            actions.as_slice(),
            &[
                HandshakeAction::DigestVerified {
                    remote: digest(b"other")
                },
                HandshakeAction::SendRomInfo(digest(b"other")),
                HandshakeAction::SendReady,
            ]
        );
        assert_eq!(
            handshake.handle(HandshakeEvent::PeerReady).as_slice(),
            &[HandshakeAction::StartSync]
        );
    }

    #[test]
    fn mismatch_while_running_stops() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::PeerReady);
        assert!(handshake.is_running());
        let actions = handshake.handle(HandshakeEvent::PeerDigest {
            digest: digest(b"other"),
        });
        assert_eq!(actions[0], HandshakeAction::StopSync);
        assert_eq!(handshake.state(), SessionState::DigestMismatch);
    }

    #[test]
    fn announcement_while_running_restarts_and_answers() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::PeerReady);
        assert!(handshake.is_running());
        handshake.handle(HandshakeEvent::PeerDigest {
            digest: digest(b"rom"),
        });
        let actions = handshake.handle(HandshakeEvent::PeerReady);
        assert_eq!(
            actions.as_slice(),
            &[
                HandshakeAction::StopSync,
                HandshakeAction::SendReady,
                HandshakeAction::StartSync
            ]
        );
    }

    #[test]
    fn reply_while_running_is_dropped() {
        let mut handshake = loaded_and_open();
        assert_eq!(
            handshake.handle(HandshakeEvent::PeerReady).as_slice(),
            &[HandshakeAction::StartSync]
        );
        assert!(handshake.handle(HandshakeEvent::PeerReady).is_empty());
        assert!(handshake.is_running());
    }

    #[test]
    fn only_the_reply_to_the_latest_announcement_counts() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        // Answers the first announcement.
        assert!(handshake.handle(HandshakeEvent::PeerReady).is_empty());
        assert!(!handshake.is_peer_ready());
        assert_eq!(
            handshake.handle(HandshakeEvent::PeerReady).as_slice(),
            &[HandshakeAction::StartSync]
        );
    }

    #[test]
    fn peer_announcement_supersedes_unanswered_ones() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        handshake.handle(HandshakeEvent::PeerDigest {
            digest: digest(b"rom"),
        });
        let actions = handshake.handle(HandshakeEvent::PeerReady);
        assert_eq!(
            actions.as_slice(),
            &[HandshakeAction::SendReady, HandshakeAction::StartSync]
        );
    }

    #[test]
    fn reload_while_running_stops_and_reannounces() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::PeerReady);
        let actions = handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        assert_eq!(
            actions.as_slice(),
            &[
                HandshakeAction::StopSync,
                HandshakeAction::SendRomInfo(digest(b"rom")),
                HandshakeAction::SendReady,
            ]
        );
        assert_eq!(handshake.state(), SessionState::AwaitingPeerReady);
    }

    #[test]
    fn disconnect_returns_to_waiting() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::PeerReady);
        let actions = handshake.handle(HandshakeEvent::ConnectionClosed);
        assert_eq!(actions.as_slice(), &[HandshakeAction::StopSync]);
        assert_eq!(handshake.state(), SessionState::AwaitingPeerReady);
        assert!(!handshake.is_peer_ready());
        assert!(handshake.peer_digest().is_none());

        let mut empty = Handshake::new(SessionMode::Paired);
        empty.handle(HandshakeEvent::ChannelOpened);
        empty.handle(HandshakeEvent::ConnectionClosed);
        assert_eq!(empty.state(), SessionState::AwaitingLocalReady);
    }

    #[test]
    fn overflow_resends_ready_and_waits() {
        let mut handshake = loaded_and_open();
        handshake.handle(HandshakeEvent::PeerReady);
        let actions = handshake.handle(HandshakeEvent::Overflow);
        assert_eq!(
            actions.as_slice(),
            &[
                HandshakeAction::StopSync,
                HandshakeAction::SendRomInfo(digest(b"rom")),
                HandshakeAction::SendReady
            ]
        );
        assert_eq!(handshake.state(), SessionState::AwaitingPeerReady);
    }

    #[test]
    fn solo_starts_on_load_and_closes_peer() {
        let mut handshake = loaded_and_open();
        let actions = handshake.handle(HandshakeEvent::ModeChanged {
            mode: SessionMode::Solo,
        });
        assert_eq!(
            actions.as_slice(),
            &[HandshakeAction::ClosePeer, HandshakeAction::StartSync]
        );
        assert_eq!(handshake.state(), SessionState::Synchronized);
        // Peer messages no longer count.
        assert!(handshake.handle(HandshakeEvent::PeerReady).is_empty());
    }

    #[test]
    fn solo_overflow_restarts_immediately() {
        let mut handshake = Handshake::new(SessionMode::Solo);
        assert_eq!(handshake.state(), SessionState::AwaitingLocalReady);
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        let actions = handshake.handle(HandshakeEvent::Overflow);
        assert_eq!(
            actions.as_slice(),
            &[HandshakeAction::StopSync, HandshakeAction::StartSync]
        );
    }

    #[test]
    fn relay_mode_runs_relay_loop() {
        let mut handshake = Handshake::new(SessionMode::Relay);
        let actions = handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        assert_eq!(actions.as_slice(), &[HandshakeAction::StartRelay]);
        assert_eq!(handshake.state(), SessionState::Relaying);

        let actions = handshake.handle(HandshakeEvent::ModeChanged {
            mode: SessionMode::Paired,
        });
        assert_eq!(actions.as_slice(), &[HandshakeAction::StopRelay]);
        assert_eq!(handshake.state(), SessionState::AwaitingPeerReady);
    }

    #[test]
    fn announcement_received_while_relaying_counts_once_paired() {
        let mut handshake = Handshake::new(SessionMode::Paired);
        handshake.handle(HandshakeEvent::ChannelOpened);
        handshake.handle(HandshakeEvent::ModeChanged {
            mode: SessionMode::Relay,
        });
        handshake.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        assert_eq!(handshake.state(), SessionState::Relaying);

        let peer = handshake.handle(HandshakeEvent::PeerDigest {
            digest: digest(b"rom"),
        });
        assert!(peer.is_empty());
        assert!(handshake.handle(HandshakeEvent::PeerReady).is_empty());
        assert_eq!(handshake.peer_digest(), Some(&digest(b"rom")));
        assert_eq!(handshake.state(), SessionState::Relaying);

        let actions = handshake.handle(HandshakeEvent::ModeChanged {
            mode: SessionMode::Paired,
        });
        assert_eq!(
            actions.as_slice(),
            &[
                HandshakeAction::StopRelay,
                HandshakeAction::DigestVerified {
                    remote: digest(b"rom")
                },
                HandshakeAction::SendRomInfo(digest(b"rom")),
                HandshakeAction::SendReady,
            ]
        );
        assert_eq!(
            handshake.handle(HandshakeEvent::PeerReady).as_slice(),
            &[HandshakeAction::StartSync]
        );
    }

    /// Delivers announcements between two handshakes until both are quiet.
    fn exchange(
        a: &mut Handshake,
        b: &mut Handshake,
        a_out: HandshakeActions,
        b_out: HandshakeActions,
    ) -> usize {
        let mut to_b: VecDeque<HandshakeEvent> = VecDeque::new();
        let mut to_a: VecDeque<HandshakeEvent> = VecDeque::new();
        let route = |actions: HandshakeActions, queue: &mut VecDeque<HandshakeEvent>| {
            for action in actions {
                match action {
                    HandshakeAction::SendRomInfo(digest) => {
                        queue.push_back(HandshakeEvent::PeerDigest { digest });
                    },
                    HandshakeAction::SendReady => queue.push_back(HandshakeEvent::PeerReady),
                    _ => {},
                }
            }
        };
        route(a_out, &mut to_b);
        route(b_out, &mut to_a);
        let mut delivered = 0;
        while !(to_a.is_empty() && to_b.is_empty()) {
            delivered += 1;
            assert!(delivered < 100, "handshake never settled");
            if let Some(event) = to_a.pop_front() {
                let out = a.handle(event);
                route(out, &mut to_b);
            }
            if let Some(event) = to_b.pop_front() {
                let out = b.handle(event);
                route(out, &mut to_a);
            }
        }
        delivered
    }

    #[test]
    fn both_sides_start_and_settle() {
        let mut a = Handshake::new(SessionMode::Paired);
        let mut b = Handshake::new(SessionMode::Paired);
        a.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        b.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        let a_out = a.handle(HandshakeEvent::ChannelOpened);
        let b_out = b.handle(HandshakeEvent::ChannelOpened);
        exchange(&mut a, &mut b, a_out, b_out);
        assert!(a.is_running() && b.is_running());

        let a_out = a.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        exchange(&mut a, &mut b, a_out, HandshakeActions::new());
        assert!(a.is_running() && b.is_running());
    }

    #[test]
    fn late_loader_and_mismatch_recovery_settle() {
        let mut a = Handshake::new(SessionMode::Paired);
        let mut b = Handshake::new(SessionMode::Paired);
        a.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        b.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"other"),
        });
        let a_out = a.handle(HandshakeEvent::ChannelOpened);
        let b_out = b.handle(HandshakeEvent::ChannelOpened);
        exchange(&mut a, &mut b, a_out, b_out);
        assert_eq!(a.state(), SessionState::DigestMismatch);
        assert_eq!(b.state(), SessionState::DigestMismatch);

        let b_out = b.handle(HandshakeEvent::LocalContentLoaded {
            digest: digest(b"rom"),
        });
        exchange(&mut a, &mut b, HandshakeActions::new(), b_out);
        assert!(a.is_running() && b.is_running());
    }
}
