//! The netplay session: connection routing, the content handshake, and the
//! lockstep frame loop driven by [`NetplaySession::tick`].

use crate::buttons::{Button, ButtonVector, Edge};
use crate::digest::SessionDigest;
use crate::error::{InvalidRequestKind, NetplayError, ProtocolViolationKind};
use crate::input::{ButtonChanges, InputAggregator, PressSource};
use crate::lockstep::clock::FrameClock;
use crate::lockstep::{DrainOutcome, LockstepStepper};
use crate::network::messages::Message;
use crate::report_violation_to;
use crate::sessions::config::{HoldConfig, LockstepConfig};
use crate::sessions::event_drain::EventDrain;
use crate::sessions::handshake::{Handshake, HandshakeAction, HandshakeActions, HandshakeEvent};
use crate::sessions::relay::ControllerRelay;
use crate::telemetry::{
    report_to_observer, InvariantChecker, InvariantViolation, Violation, ViolationKind,
    ViolationObserver, ViolationSeverity,
};
use crate::{
    Config, ConnectionRole, Frame, NetplayEvent, NetplayRequest, PlayerSlot, SessionMode,
    SessionState, Transport, TransportEvent,
};
use tracing::{debug, info, trace, warn};

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use web_time::{Duration, Instant};

/// A snapshot of where a session stands, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    /// The session state.
    pub state: SessionState,
    /// The session mode.
    pub mode: SessionMode,
    /// The next frame to be simulated.
    pub sim_frame: Frame,
    /// The next local capture frame.
    pub input_frame: Frame,
    /// Frames currently buffered.
    pub buffered_frames: usize,
    /// Set while draining is stalled on incomplete input for this frame.
    pub waiting_on: Option<Frame>,
    /// Returns `true` while a peer channel is open.
    pub peer_connected: bool,
    /// Number of player slots held by controller clients.
    pub attached_controllers: usize,
}

/// A [`NetplaySession`] keeps a deterministic simulation in lockstep with a
/// peer, runs it offline, or lets controller clients drive it.
///
/// The session never calls into the simulation. [`NetplaySession::tick`]
/// returns the [`NetplayRequest`]s to fulfil, in order; everything the
/// session wants to tell you otherwise is queued as a [`NetplayEvent`] and
/// read through [`NetplaySession::events`].
///
/// Build one with [`SessionBuilder`](crate::SessionBuilder).
pub struct NetplaySession<T>
where
    T: Config,
{
    config: LockstepConfig,
    hold_config: HoldConfig,
    handshake: Handshake,
    stepper: LockstepStepper,
    clock: FrameClock,
    /// Input produced on this device. Consumed by lockstep capture only.
    local_input: InputAggregator,
    relay: ControllerRelay<T::Address>,

    transport: Box<dyn Transport<T::Address>>,
    /// The open paired connection, if any.
    peer: Option<T::Address>,
    /// Role of every open connection, decided when it opened.
    connections: BTreeMap<T::Address, ConnectionRole>,

    /// Requests produced outside of `tick`, returned at the front of the next one.
    pending_requests: Vec<NetplayRequest>,
    event_queue: VecDeque<NetplayEvent<T>>,
    max_event_queue_size: usize,
    /// Events dropped from a full queue since the last drain.
    discarded_events: usize,
    /// The frame draining is stalled on, once reported.
    waiting_on: Option<Frame>,
    violation_observer: Option<Arc<dyn ViolationObserver>>,
}

impl<T: Config> NetplaySession<T> {
    pub(crate) fn new(
        config: LockstepConfig,
        hold_config: HoldConfig,
        local_slot: PlayerSlot,
        mode: SessionMode,
        transport: Box<dyn Transport<T::Address>>,
        max_event_queue_size: usize,
        violation_observer: Option<Arc<dyn ViolationObserver>>,
    ) -> Self {
        Self {
            config,
            hold_config,
            handshake: Handshake::new(mode),
            stepper: LockstepStepper::new(&config, local_slot),
            clock: FrameClock::new(config.frame_interval, config.max_tick_elapsed),
            local_input: InputAggregator::new(hold_config.local),
            relay: ControllerRelay::new(hold_config.relay_min_frames),
            transport,
            peer: None,
            connections: BTreeMap::new(),
            pending_requests: Vec::new(),
            event_queue: VecDeque::new(),
            max_event_queue_size,
            discarded_events: 0,
            waiting_on: None,
            violation_observer,
        }
    }

    // ==========================================
    // Local input
    // ==========================================

    /// Records that `source` pressed or released `button` on this device.
    ///
    /// The aggregated vector is sampled once per frame by the lockstep loop.
    /// Returns the edge of the aggregated output, if any.
    pub fn set_source(
        &mut self,
        button: Button,
        source: PressSource,
        pressed: bool,
    ) -> Option<Edge> {
        self.local_input
            .set_source(button, source, pressed, Instant::now())
    }

    /// Applies the same change to several buttons, for combo controls.
    pub fn set_sources(
        &mut self,
        buttons: &[Button],
        source: PressSource,
        pressed: bool,
    ) -> ButtonChanges {
        self.local_input
            .set_sources(buttons, source, pressed, Instant::now())
    }

    /// Drops `source` from every button, e.g. when a device disconnects.
    pub fn release_source(&mut self, source: PressSource) -> ButtonChanges {
        self.local_input.release_source(source, Instant::now())
    }

    /// Releases every local button at once, ignoring the minimum hold.
    pub fn release_all_local(&mut self) -> ButtonChanges {
        self.local_input.release_all()
    }

    /// The aggregated local vector the next capture will sample.
    #[must_use]
    pub const fn local_buttons(&self) -> ButtonVector {
        self.local_input.buttons()
    }

    // ==========================================
    // Lifecycle
    // ==========================================

    /// Announces freshly loaded content.
    ///
    /// Starts a run once the peer agrees, or at once in solo and relay mode.
    /// Loading during a run discards it; the simulation is expected to have
    /// been reset by the caller.
    pub fn load_content(&mut self, digest: SessionDigest) {
        let actions = self
            .handshake
            .handle(HandshakeEvent::LocalContentLoaded { digest });
        self.apply_actions(actions);
    }

    /// Switches the session mode. Does nothing if `mode` is the current mode.
    ///
    /// Entering solo closes the peer connection. Leaving relay releases every
    /// button controllers hold; their attachments remain.
    pub fn set_mode(&mut self, mode: SessionMode) {
        let actions = self.handshake.handle(HandshakeEvent::ModeChanged { mode });
        self.apply_actions(actions);
    }

    /// Closes the connection to `addr` and handles it as closed.
    ///
    /// # Errors
    /// Returns [`ProtocolViolationKind::UnknownConnection`] if no connection
    /// to `addr` is open.
    pub fn disconnect(&mut self, addr: &T::Address) -> Result<(), NetplayError> {
        if !self.connections.contains_key(addr) {
            return Err(ProtocolViolationKind::UnknownConnection.into());
        }
        self.transport.close(addr);
        self.on_closed(addr);
        Ok(())
    }

    /// Disconnects the controller holding `slot` and releases its buttons.
    ///
    /// Returns the address that was disconnected, or `None` if the slot was free.
    ///
    /// # Errors
    /// Returns [`InvalidRequestKind::WrongMode`] outside of relay mode.
    ///
    /// [`InvalidRequestKind::WrongMode`]: crate::InvalidRequestKind::WrongMode
    pub fn kick_controller(
        &mut self,
        slot: PlayerSlot,
    ) -> Result<Option<T::Address>, NetplayError> {
        let mode = self.handshake.mode();
        if mode != SessionMode::Relay {
            return Err(InvalidRequestKind::WrongMode {
                expected: SessionMode::Relay,
                actual: mode,
            }
            .into());
        }
        let Some(addr) = self.relay.holder(slot).cloned() else {
            return Ok(None);
        };
        info!(?addr, %slot, "kicking controller");
        self.disconnect(&addr)?;
        Ok(Some(addr))
    }

    /// Discards the running lockstep run and starts a fresh one from frame 0.
    ///
    /// In paired mode the new run starts once the peer answers the `ready`
    /// this sends. The simulation must be reset when the next
    /// `Step { frame: 0 }` arrives.
    ///
    /// # Errors
    /// Returns [`NetplayError::NotSynchronized`] if no lockstep run is active.
    pub fn resynchronize(&mut self) -> Result<(), NetplayError> {
        if self.handshake.state() != SessionState::Synchronized {
            return Err(NetplayError::NotSynchronized);
        }
        info!(sim_frame = %self.stepper.sim_frame(), "resynchronizing on request");
        let actions = self.handshake.handle(HandshakeEvent::Overflow);
        self.apply_actions(actions);
        Ok(())
    }

    /// Compares the content announced by the peer with ours.
    ///
    /// Succeeds while either digest is still unknown.
    ///
    /// # Errors
    /// Returns [`NetplayError::DigestMismatch`] if both sides announced
    /// different content.
    pub fn verify_content(&self) -> Result<(), NetplayError> {
        match (self.handshake.local_digest(), self.handshake.peer_digest()) {
            (Some(local), Some(remote)) if !local.matches(remote) => {
                Err(NetplayError::DigestMismatch {
                    local: local.clone(),
                    remote: remote.clone(),
                })
            },
            _ => Ok(()),
        }
    }

    // ==========================================
    // Driving the session
    // ==========================================

    /// Handles everything the transport received since the last call.
    ///
    /// Requests produced here (releases on disconnect, relay input) are kept
    /// and returned at the front of the next [`NetplaySession::tick`].
    pub fn poll_remote_clients(&mut self) {
        for (addr, event) in self.transport.receive_all_events() {
            self.handle_transport_event(addr, event);
        }
    }

    /// Polls the transport, then runs as many frames as `elapsed` pays for.
    ///
    /// In a synchronized run each frame captures local input, sends it to the
    /// peer and drains every complete frame, at most
    /// [`LockstepConfig::max_steps_per_tick`] steps for the whole call. In
    /// relay mode each frame is one [`ControllerRelay::advance_frame`].
    ///
    /// The returned requests MUST be fulfilled in order.
    #[must_use = "requests must be fulfilled for the simulation to advance"]
    pub fn tick(&mut self, elapsed: Duration) -> Vec<NetplayRequest> {
        self.poll_remote_clients();
        let mut requests = std::mem::take(&mut self.pending_requests);

        let advances = self.clock.tick(elapsed);
        match self.handshake.state() {
            SessionState::Synchronized => {
                self.stepper.begin_tick();
                for _ in 0..advances {
                    if !self.advance_lockstep(&mut requests) {
                        break;
                    }
                }
            },
            SessionState::Relaying => {
                for _ in 0..advances {
                    self.relay.advance_frame(&mut requests);
                }
            },
            _ => {},
        }

        // Requests produced while advancing (overflow releases) belong to this tick.
        requests.append(&mut self.pending_requests);
        crate::debug_check_invariants!(self, "after tick", &self.violation_observer);
        requests
    }

    /// One logical frame of the lockstep loop. Returns `false` if the run ended.
    fn advance_lockstep(&mut self, out: &mut Vec<NetplayRequest>) -> bool {
        let _ = self.local_input.poll(Instant::now());
        let local = self.local_input.buttons();
        let frame = match self.stepper.capture_local(local) {
            Ok(frame) => frame,
            Err(err) => {
                self.handle_overflow(&err, out);
                return false;
            },
        };

        let local_slot = self.stepper.local_slot();
        match self.handshake.mode() {
            SessionMode::Paired => {
                self.send_to_peer(&Message::InputFrame {
                    frame,
                    player: local_slot.as_u8(),
                    buttons: local,
                });
            },
            SessionMode::Solo => {
                if let Err(err) =
                    self.stepper
                        .store_remote(frame, local_slot.other(), ButtonVector::NEUTRAL)
                {
                    self.handle_overflow(&err, out);
                    return false;
                }
            },
            SessionMode::Relay => {},
        }
        let _ = self.local_input.advance_frame();

        let outcome = self.stepper.drain(out);
        self.track_stall(outcome);
        true
    }

    fn track_stall(&mut self, outcome: DrainOutcome) {
        if outcome.steps > 0 {
            if self.waiting_on.take().is_some() {
                let frame = self.stepper.sim_frame();
                debug!(%frame, "input resumed");
                self.push_event(NetplayEvent::InputResumed { frame });
            }
        } else if let Some(frame) = outcome.stalled_on {
            if self.waiting_on.is_none() {
                debug!(%frame, "waiting for input");
                self.waiting_on = Some(frame);
                self.push_event(NetplayEvent::WaitingForInput { frame });
            }
        }
    }

    fn handle_overflow(&mut self, err: &NetplayError, out: &mut Vec<NetplayRequest>) {
        let NetplayError::BufferOverflow { buffered, max } = *err else {
            report_violation_to!(
                &self.violation_observer,
                ViolationSeverity::Error,
                ViolationKind::InternalError,
                "unexpected lockstep error: {}",
                err
            );
            return;
        };
        let sim_frame = self.stepper.sim_frame();
        warn!(buffered, max, %sim_frame, "input buffer overflow, resynchronizing");
        self.report(
            crate::violation!(
                ViolationSeverity::Error,
                ViolationKind::Overflow,
                "input buffer overflow: {} frames buffered, maximum is {}",
                buffered,
                max
            )
            .with_frame(sim_frame),
        );
        self.push_event(NetplayEvent::Resynchronizing { buffered, max });
        let actions = self.handshake.handle(HandshakeEvent::Overflow);
        self.apply_actions(actions);
        out.append(&mut self.pending_requests);
    }

    // ==========================================
    // Transport events
    // ==========================================

    fn handle_transport_event(&mut self, addr: T::Address, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_opened(addr),
            TransportEvent::Message(msg) => {
                if let Err(err) = self.handle_message(&addr, msg) {
                    self.drop_message(&addr, &err);
                }
            },
            TransportEvent::Malformed { reason } => {
                let err = ProtocolViolationKind::Undecodable { reason }.into();
                self.drop_message(&addr, &err);
            },
            TransportEvent::Error { context } => {
                let err = NetplayError::Transport { context };
                warn!(?addr, %err, "connection failed");
                self.report(
                    crate::violation!(ViolationSeverity::Error, ViolationKind::Transport, "{}", err)
                        .with_connection(&addr),
                );
                self.on_closed(&addr);
            },
            TransportEvent::Closed => self.on_closed(&addr),
        }
    }

    fn on_opened(&mut self, addr: T::Address) {
        match self.handshake.mode() {
            SessionMode::Paired => {
                if let Some(previous) = self.peer.clone().filter(|peer| *peer != addr) {
                    info!(?previous, "replacing peer connection");
                    self.transport.close(&previous);
                    self.on_closed(&previous);
                }
                info!(?addr, "peer connected");
                self.peer = Some(addr.clone());
                self.connections.insert(addr.clone(), ConnectionRole::RemotePeer);
                self.push_event(NetplayEvent::PeerConnected { addr });
                let actions = self.handshake.handle(HandshakeEvent::ChannelOpened);
                self.apply_actions(actions);
            },
            SessionMode::Relay => {
                debug!(?addr, "controller connected");
                self.connections
                    .insert(addr, ConnectionRole::ControllerClient);
            },
            SessionMode::Solo => {
                warn!(?addr, "rejecting connection in solo mode");
                self.transport.close(&addr);
            },
        }
    }

    fn on_closed(&mut self, addr: &T::Address) {
        match self.connections.remove(addr) {
            Some(ConnectionRole::RemotePeer) => {
                if self.peer.as_ref() == Some(addr) {
                    self.peer = None;
                }
                info!(?addr, "peer disconnected");
                let actions = self.handshake.handle(HandshakeEvent::ConnectionClosed);
                self.apply_actions(actions);
                self.push_event(NetplayEvent::PeerDisconnected { addr: addr.clone() });
            },
            Some(ConnectionRole::ControllerClient) => {
                if let Some(slot) = self.relay.detach(addr, &mut self.pending_requests) {
                    self.push_event(NetplayEvent::ControllerDetached {
                        addr: addr.clone(),
                        slot,
                    });
                }
            },
            Some(ConnectionRole::LocalPlayer) | None => {
                trace!(?addr, "close of an unknown connection");
            },
        }
    }

    fn handle_message(&mut self, addr: &T::Address, msg: Message) -> Result<(), NetplayError> {
        let role = *self
            .connections
            .get(addr)
            .ok_or(ProtocolViolationKind::UnknownConnection)?;
        if !role.accepts(&msg) {
            return Err(ProtocolViolationKind::UnexpectedMessage {
                role,
                message: msg.kind(),
            }
            .into());
        }

        match msg {
            Message::InputFrame {
                frame,
                player,
                buttons,
            } => self.on_input_frame(frame, player, buttons),
            Message::Ready => {
                self.push_event(NetplayEvent::PeerReady);
                let actions = self.handshake.handle(HandshakeEvent::PeerReady);
                self.apply_actions(actions);
                Ok(())
            },
            Message::RomInfo { name, size, hash } => {
                let digest = SessionDigest::from_wire(&name, size, &hash)?;
                let actions = self.handshake.handle(HandshakeEvent::PeerDigest { digest });
                self.apply_actions(actions);
                Ok(())
            },
            Message::Hello { player } => self.on_hello(addr, player),
            Message::Input {
                btn,
                pressed,
                player,
            } => {
                if self.handshake.state() != SessionState::Relaying {
                    trace!(?addr, %btn, "controller input while not relaying");
                    return Ok(());
                }
                let claimed = player.map(PlayerSlot::try_from).transpose()?;
                self.relay
                    .apply_input(addr, btn, pressed, claimed, &mut self.pending_requests)?;
                Ok(())
            },
        }
    }

    fn on_input_frame(
        &mut self,
        frame: Frame,
        player: u8,
        buttons: ButtonVector,
    ) -> Result<(), NetplayError> {
        if self.handshake.state() != SessionState::Synchronized {
            // Left over from a previous run; the peer's ready precedes the next one.
            trace!(%frame, "framed input while not synchronized");
            return Ok(());
        }
        let slot = PlayerSlot::try_from(player)?;
        let remote = self.stepper.local_slot().other();
        if slot != remote {
            return Err(ProtocolViolationKind::WrongSlot {
                expected: remote,
                actual: slot,
            }
            .into());
        }
        match self.stepper.store_remote(frame, slot, buttons) {
            Err(err @ NetplayError::BufferOverflow { .. }) => {
                let mut out = std::mem::take(&mut self.pending_requests);
                self.handle_overflow(&err, &mut out);
                self.pending_requests = out;
                Ok(())
            },
            other => other,
        }
    }

    fn on_hello(&mut self, addr: &T::Address, player: u8) -> Result<(), NetplayError> {
        let slot = PlayerSlot::try_from(player)?;
        let attachment = self
            .relay
            .attach(addr.clone(), slot, &mut self.pending_requests);
        if let Some(evicted) = attachment.evicted {
            self.transport.close(&evicted);
            self.connections.remove(&evicted);
            self.push_event(NetplayEvent::ControllerEvicted {
                addr: evicted,
                slot,
            });
        }
        if attachment.changed {
            self.push_event(NetplayEvent::ControllerAttached {
                addr: addr.clone(),
                slot,
            });
        }
        Ok(())
    }

    fn drop_message(&self, addr: &T::Address, err: &NetplayError) {
        debug!(?addr, %err, "dropping message");
        self.report(
            crate::violation!(
                ViolationSeverity::Warning,
                ViolationKind::InputProtocol,
                "dropped message: {}",
                err
            )
            .with_connection(addr),
        );
    }

    fn report(&self, violation: Violation) {
        report_to_observer(self.violation_observer.as_ref(), &violation);
    }

    // ==========================================
    // Handshake actions
    // ==========================================

    fn apply_actions(&mut self, actions: HandshakeActions) {
        for action in actions {
            match action {
                HandshakeAction::SendRomInfo(digest) => {
                    self.send_to_peer(&Message::rom_info(&digest));
                },
                HandshakeAction::SendReady => self.send_to_peer(&Message::Ready),
                HandshakeAction::ClosePeer => {
                    if let Some(peer) = self.peer.take() {
                        self.transport.close(&peer);
                        self.connections.remove(&peer);
                        self.push_event(NetplayEvent::PeerDisconnected { addr: peer });
                    }
                },
                HandshakeAction::StopSync => {
                    self.clock.stop();
                    self.stepper.reset(&mut self.pending_requests);
                    self.waiting_on = None;
                },
                HandshakeAction::StartSync => {
                    self.stepper.reset(&mut self.pending_requests);
                    self.waiting_on = None;
                    self.clock.start();
                    self.push_event(NetplayEvent::Synchronized);
                },
                HandshakeAction::StopRelay => {
                    self.clock.stop();
                    self.relay.release_all(&mut self.pending_requests);
                },
                HandshakeAction::StartRelay => {
                    self.relay.reset(&mut self.pending_requests);
                    self.clock.start();
                },
                HandshakeAction::DigestVerified { remote } => {
                    self.push_event(NetplayEvent::DigestVerified { remote });
                },
                HandshakeAction::DigestMismatch { local, remote } => {
                    let mut violation = crate::violation!(
                        ViolationSeverity::Warning,
                        ViolationKind::Handshake,
                        "content mismatch: local {} vs remote {}",
                        local,
                        remote
                    );
                    if let Some(peer) = &self.peer {
                        violation = violation.with_connection(peer);
                    }
                    self.report(violation);
                    self.push_event(NetplayEvent::DigestMismatch { local, remote });
                },
            }
        }
    }

    fn send_to_peer(&mut self, msg: &Message) {
        match &self.peer {
            Some(peer) => self.transport.send_to(msg, peer),
            None => trace!(kind = msg.kind(), "no peer to send to"),
        }
    }

    fn push_event(&mut self, event: NetplayEvent<T>) {
        self.event_queue.push_back(event);
        while self.event_queue.len() > self.max_event_queue_size {
            if let Some(dropped) = self.event_queue.pop_front() {
                trace!(?dropped, "event queue full");
                self.discarded_events += 1;
            }
        }
    }

    // ==========================================
    // Queries
    // ==========================================

    /// Returns all events that happened since last queried. If more than the
    /// configured queue size accumulate, the oldest are discarded and counted
    /// in [`EventDrain::discarded`].
    pub fn events(&mut self) -> EventDrain<'_, T> {
        let discarded = std::mem::take(&mut self.discarded_events);
        EventDrain::new(self.event_queue.drain(..), discarded)
    }

    /// Returns the current [`SessionState`] of the session.
    #[must_use]
    pub fn current_state(&self) -> SessionState {
        self.handshake.state()
    }

    /// A snapshot of the session for status displays.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus {
            state: self.handshake.state(),
            mode: self.handshake.mode(),
            sim_frame: self.stepper.sim_frame(),
            input_frame: self.stepper.input_frame(),
            buffered_frames: self.stepper.buffered_frames(),
            waiting_on: self.waiting_on,
            peer_connected: self.handshake.is_channel_open(),
            attached_controllers: PlayerSlot::ALL
                .into_iter()
                .filter(|slot| self.relay.holder(*slot).is_some())
                .count(),
        }
    }

    /// The session mode.
    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.handshake.mode()
    }

    /// The slot local input is captured for.
    #[must_use]
    pub const fn local_slot(&self) -> PlayerSlot {
        self.stepper.local_slot()
    }

    /// The next frame to be simulated in lockstep.
    #[must_use]
    pub const fn sim_frame(&self) -> Frame {
        self.stepper.sim_frame()
    }

    /// The address of the paired peer, if connected.
    #[must_use]
    pub const fn peer(&self) -> Option<&T::Address> {
        self.peer.as_ref()
    }

    /// The role of the connection to `addr`.
    #[must_use]
    pub fn connection_role(&self, addr: &T::Address) -> Option<ConnectionRole> {
        self.connections.get(addr).copied()
    }

    /// The readiness handshake.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// The lockstep engine.
    #[must_use]
    pub const fn stepper(&self) -> &LockstepStepper {
        &self.stepper
    }

    /// The controller relay.
    #[must_use]
    pub const fn relay(&self) -> &ControllerRelay<T::Address> {
        &self.relay
    }

    /// The lockstep configuration.
    #[must_use]
    pub const fn lockstep_config(&self) -> &LockstepConfig {
        &self.config
    }

    /// The hold configuration.
    #[must_use]
    pub const fn hold_config(&self) -> &HoldConfig {
        &self.hold_config
    }

    /// Returns the violation observer, if one was configured.
    #[must_use]
    pub fn violation_observer(&self) -> Option<&Arc<dyn ViolationObserver>> {
        self.violation_observer.as_ref()
    }
}

impl<T: Config> InvariantChecker for NetplaySession<T> {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.clock.is_running() != self.handshake.is_running() {
            return Err(InvariantViolation::new(
                "NetplaySession",
                "frame clock runs exactly while a run is active",
            )
            .with_details(format!(
                "clock_running={}, state={:?}",
                self.clock.is_running(),
                self.handshake.state()
            )));
        }
        if self.peer.is_some() != self.handshake.is_channel_open() {
            return Err(InvariantViolation::new(
                "NetplaySession",
                "a peer address is known exactly while the channel is open",
            ));
        }
        if self.event_queue.len() > self.max_event_queue_size {
            return Err(InvariantViolation::new(
                "NetplaySession",
                "event queue within its configured size",
            ));
        }
        self.stepper.check_invariants()
    }
}

impl<T: Config> std::fmt::Debug for NetplaySession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetplaySession")
            .field("state", &self.handshake.state())
            .field("mode", &self.handshake.mode())
            .field("sim_frame", &self.stepper.sim_frame())
            .field("peer", &self.peer)
            .field("connections", &self.connections.len())
            .field("pending_requests", &self.pending_requests.len())
            .field("events", &self.event_queue.len())
            .finish_non_exhaustive()
    }
}
