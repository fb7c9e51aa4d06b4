//! Solo session integration tests.

use crate::common::{digest, frame_time, run_frames, single_node, synchronized_pair, GUEST, HOST};
use netplay_lockstep::{
    Button, LockstepConfig, MemoryTransport, NetplayEvent, NetplayRequest, PlayerSlot,
    PressSource, SessionMode, SessionState, Transport, TransportEvent,
};
use web_time::Duration;

fn started_solo() -> crate::common::Node {
    let mut node = single_node(SessionMode::Solo, MemoryTransport::new(HOST));
    assert_eq!(node.state(), SessionState::AwaitingLocalReady);
    node.session.load_content(digest("cart"));
    assert_eq!(node.state(), SessionState::Synchronized);
    node
}

#[test]
fn solo_runs_without_a_peer() {
    let mut node = started_solo();
    for _ in 0..10 {
        node.frame();
    }
    // The first frame also applies the two seeded delay frames.
    assert_eq!(node.sim.total_steps(), 12);
    assert!(node.saw(|e| matches!(e, NetplayEvent::Synchronized)));
    assert!(!node.saw(|e| matches!(e, NetplayEvent::WaitingForInput { .. })));
    assert!(node.observer.is_empty());
}

#[test]
fn tap_shorter_than_a_frame_is_held_for_one_frame() {
    let mut node = started_solo();
    node.frame();

    node.session.set_source(Button::A, PressSource::Touch, true);
    node.session.set_source(Button::A, PressSource::Touch, false);
    node.frame();
    node.frame();

    assert_eq!(node.sim.steps_held(PlayerSlot::ONE, Button::A), Some(1));
    assert!(!node.session.local_buttons().a);
}

#[test]
fn remote_slot_stays_neutral() {
    let mut node = started_solo();
    node.session.set_sources(&[Button::A, Button::B], PressSource::Keyboard, true);
    for _ in 0..5 {
        node.frame();
    }
    assert!(node.sim.held(PlayerSlot::TWO).is_neutral());
    assert!(node.sim.held(PlayerSlot::ONE).a);
    assert!(node.sim.held(PlayerSlot::ONE).b);

    node.session.release_source(PressSource::Keyboard);
    node.frame();
    assert!(node.sim.held(PlayerSlot::ONE).is_neutral());
}

#[test]
fn long_pause_is_clamped_and_caught_up() {
    let mut node = started_solo();
    node.tick(Duration::from_secs(1));
    assert_eq!(node.sim.total_steps(), 4);
    assert!(node.session.sync_status().buffered_frames > 0);

    for _ in 0..10 {
        node.frame();
    }
    let status = node.session.sync_status();
    assert_eq!(status.buffered_frames, 0);
    assert_eq!(
        status.sim_frame,
        status.input_frame + node.session.lockstep_config().input_delay as i32
    );
    assert!(!node.saw(|e| matches!(e, NetplayEvent::WaitingForInput { .. })));
}

#[test]
fn incoming_connections_are_rejected() {
    let mut transport = MemoryTransport::new(HOST);
    let mut other = MemoryTransport::new(GUEST);
    transport.connect(&mut other);

    let mut node = single_node(SessionMode::Solo, transport);
    node.poll();

    assert_eq!(node.session.connection_role(&GUEST), None);
    assert_eq!(node.session.peer(), None);
    assert_eq!(
        other.receive_all_events(),
        vec![(HOST, TransportEvent::Opened), (HOST, TransportEvent::Closed)]
    );
}

#[test]
fn switching_to_solo_closes_the_peer_and_keeps_running() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    host.session
        .set_source(Button::Left, PressSource::JoystickAxis, true);
    run_frames(&mut host, &mut guest, 5);

    host.session.set_mode(SessionMode::Solo);
    assert_eq!(host.state(), SessionState::Synchronized);
    assert_eq!(host.session.peer(), None);

    host.frame();
    guest.poll();
    assert!(host.saw(|e| matches!(e, NetplayEvent::PeerDisconnected { addr } if *addr == GUEST)));
    assert_eq!(guest.state(), SessionState::AwaitingPeerReady);

    // The discarded run released everything before the solo run began.
    let restart = host
        .sim
        .calls
        .iter()
        .rposition(|c| {
            *c == NetplayRequest::ButtonUp {
                slot: PlayerSlot::ONE,
                button: Button::Left,
            }
        })
        .unwrap();
    assert!(host.sim.calls[restart..].contains(&NetplayRequest::Step {
        frame: netplay_lockstep::Frame::ZERO
    }));

    let steps = host.sim.total_steps();
    for _ in 0..5 {
        host.tick(frame_time());
    }
    assert!(host.sim.total_steps() >= steps + 5);
}
