//! Shared helpers for driving sessions over in-process transports.
//!
//! A [`Node`] bundles a session with the simulation it drives and keeps the
//! events it produced, so tests can tick several sessions in turn and look at
//! what happened afterwards.

use std::sync::Arc;

use netplay_lockstep::telemetry::CollectingObserver;
use netplay_lockstep::{
    LockstepConfig, MemoryTransport, NetplayEvent, NetplaySession, PlayerSlot, SessionBuilder,
    SessionDigest, SessionMode, SessionState,
};
use web_time::Duration;

use crate::common::stubs::{PeerConfig, RecordingSim};

/// Address of the first paired session.
pub const HOST: u8 = 1;
/// Address of the second paired session.
pub const GUEST: u8 = 2;

/// Maximum iterations to wait for synchronization before giving up.
pub const MAX_SYNC_ITERATIONS: usize = 20;

/// One frame of the default pacing.
#[must_use]
pub fn frame_time() -> Duration {
    LockstepConfig::default().frame_interval
}

/// Digest of a small fake cartridge.
#[must_use]
pub fn digest(name: &str) -> SessionDigest {
    SessionDigest::from_content(name, name.as_bytes())
}

/// A session, the simulation it drives and the events it produced.
pub struct Node {
    pub session: NetplaySession<PeerConfig>,
    pub sim: RecordingSim,
    pub events: Vec<NetplayEvent<PeerConfig>>,
    #[allow(dead_code)]
    pub observer: Arc<CollectingObserver>,
}

#[allow(dead_code)]
impl Node {
    /// Builds a node on `transport` from a preconfigured builder.
    #[must_use]
    pub fn start(builder: SessionBuilder<PeerConfig>, transport: MemoryTransport<u8>) -> Self {
        let observer = Arc::new(CollectingObserver::new());
        let session = builder
            .with_violation_observer(observer.clone())
            .start_session(transport)
            .expect("valid session configuration");
        Self {
            session,
            sim: RecordingSim::new(),
            events: Vec::new(),
            observer,
        }
    }

    /// Ticks once, fulfils the requests and records the events.
    pub fn tick(&mut self, elapsed: Duration) {
        let requests = self.session.tick(elapsed);
        self.sim.handle(requests);
        self.events.extend(self.session.events());
    }

    /// Ticks by exactly one frame.
    pub fn frame(&mut self) {
        self.tick(frame_time());
    }

    /// Handles transport traffic without advancing the clock.
    pub fn poll(&mut self) {
        self.tick(Duration::ZERO);
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.current_state()
    }

    pub fn take_events(&mut self) -> Vec<NetplayEvent<PeerConfig>> {
        std::mem::take(&mut self.events)
    }

    /// Returns `true` if any recorded event matches `predicate`.
    pub fn saw(&self, predicate: impl Fn(&NetplayEvent<PeerConfig>) -> bool) -> bool {
        self.events.iter().any(predicate)
    }
}

/// Two paired sessions on connected in-process transports. Nothing has been
/// polled yet, so both still have to see the connection open.
#[allow(dead_code)]
#[must_use]
pub fn paired_nodes(config: LockstepConfig) -> (Node, Node) {
    let mut host_transport = MemoryTransport::new(HOST);
    let mut guest_transport = MemoryTransport::new(GUEST);
    host_transport.connect(&mut guest_transport);

    let host = Node::start(
        SessionBuilder::new()
            .with_lockstep_config(config)
            .with_local_slot(PlayerSlot::ONE),
        host_transport,
    );
    let guest = Node::start(
        SessionBuilder::new()
            .with_lockstep_config(config)
            .with_local_slot(PlayerSlot::TWO),
        guest_transport,
    );
    (host, guest)
}

/// Polls both nodes until both are synchronized. Returns the iterations taken.
#[allow(dead_code)]
pub fn synchronize(host: &mut Node, guest: &mut Node) -> Result<usize, String> {
    let mut iterations = 0;
    while host.state() != SessionState::Synchronized
        || guest.state() != SessionState::Synchronized
    {
        if iterations >= MAX_SYNC_ITERATIONS {
            return Err(format!(
                "synchronization timed out after {} iterations: host {:?}, guest {:?}",
                MAX_SYNC_ITERATIONS,
                host.state(),
                guest.state()
            ));
        }
        host.poll();
        guest.poll();
        iterations += 1;
    }
    Ok(iterations)
}

/// Paired nodes with identical content, already synchronized.
#[allow(dead_code)]
#[must_use]
pub fn synchronized_pair(config: LockstepConfig) -> (Node, Node) {
    let (mut host, mut guest) = paired_nodes(config);
    host.session.load_content(digest("cart"));
    guest.session.load_content(digest("cart"));
    synchronize(&mut host, &mut guest).expect("sessions synchronize");
    host.take_events();
    guest.take_events();
    (host, guest)
}

/// Ticks both nodes by one frame, `frames` times.
#[allow(dead_code)]
pub fn run_frames(host: &mut Node, guest: &mut Node, frames: usize) {
    for _ in 0..frames {
        host.frame();
        guest.frame();
    }
}

/// Asserts that both simulations computed the same checksum for every frame
/// they both simulated, and that they simulated at least `min_frames`.
#[allow(dead_code)]
pub fn assert_in_lockstep(host: &Node, guest: &Node, min_frames: usize) {
    let common = host.sim.frames().min(guest.sim.frames());
    assert!(
        common >= min_frames,
        "expected at least {} common frames, got {}",
        min_frames,
        common
    );
    assert_eq!(
        host.sim.history[..common],
        guest.sim.history[..common],
        "simulations diverged"
    );
}

/// A session in `mode` on `transport`, for tests that do not need a pair.
#[allow(dead_code)]
#[must_use]
pub fn single_node(mode: SessionMode, transport: MemoryTransport<u8>) -> Node {
    Node::start(SessionBuilder::new().with_mode(mode), transport)
}
