//! Paired session integration tests: handshake, lockstep and recovery.

use crate::common::stubs::PeerConfig;
use crate::common::{
    assert_in_lockstep, digest, paired_nodes, run_frames, synchronize, synchronized_pair, Node,
    GUEST, HOST,
};
use netplay_lockstep::telemetry::ViolationKind;
use netplay_lockstep::{
    Button, ButtonVector, Frame, LockstepConfig, MemoryTransport, Message, NetplayError,
    NetplayEvent, NetplayRequest, PlayerSlot, PressSource, SessionBuilder, SessionMode, SessionState,
    Transport, TransportEvent,
};

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn identical_content_synchronizes_within_one_round_trip() {
    let (mut host, mut guest) = paired_nodes(LockstepConfig::default());
    assert_eq!(host.state(), SessionState::Idle);

    host.session.load_content(digest("cart"));
    guest.session.load_content(digest("cart"));
    assert_eq!(host.state(), SessionState::AwaitingPeerReady);

    let iterations = synchronize(&mut host, &mut guest).unwrap();
    assert!(iterations <= 2, "took {iterations} iterations");

    for node in [&host, &guest] {
        assert!(node.saw(|e| matches!(e, NetplayEvent::PeerConnected { .. })));
        assert!(node.saw(|e| matches!(e, NetplayEvent::DigestVerified { .. })));
        assert!(node.saw(|e| matches!(e, NetplayEvent::Synchronized)));
        assert!(node.observer.is_empty(), "{:?}", node.observer.violations());
    }
    assert_eq!(host.session.peer(), Some(&GUEST));
    assert_eq!(guest.session.peer(), Some(&HOST));
}

#[test]
fn mismatched_content_never_starts_the_clock() {
    let (mut host, mut guest) = paired_nodes(LockstepConfig::default());
    host.session.load_content(digest("cart"));
    guest.session.load_content(digest("other cart"));

    for _ in 0..5 {
        host.frame();
        guest.frame();
    }

    for node in [&host, &guest] {
        assert_eq!(node.state(), SessionState::DigestMismatch);
        assert!(node.saw(|e| matches!(e, NetplayEvent::DigestMismatch { .. })));
        assert!(node.observer.has_violation(ViolationKind::Handshake));
        assert_eq!(node.sim.total_steps(), 0);
        assert_eq!(node.session.sim_frame(), Frame::ZERO);
        assert!(matches!(
            node.session.verify_content(),
            Err(NetplayError::DigestMismatch { .. })
        ));
    }
}

#[test]
fn mismatch_recovers_once_matching_content_loads() {
    let (mut host, mut guest) = paired_nodes(LockstepConfig::default());
    host.session.load_content(digest("cart"));
    guest.session.load_content(digest("other cart"));
    host.poll();
    guest.poll();
    host.poll();
    assert_eq!(guest.state(), SessionState::DigestMismatch);

    guest.session.load_content(digest("cart"));
    synchronize(&mut host, &mut guest).unwrap();
    assert_eq!(guest.session.verify_content(), Ok(()));
    run_frames(&mut host, &mut guest, 10);
    assert_in_lockstep(&host, &guest, 8);
}

#[test]
fn late_loader_starts_both_sides() {
    let (mut host, mut guest) = paired_nodes(LockstepConfig::default());
    host.session.load_content(digest("cart"));
    for _ in 0..3 {
        host.poll();
        guest.poll();
    }
    assert_eq!(host.state(), SessionState::AwaitingPeerReady);
    assert_eq!(guest.state(), SessionState::AwaitingLocalReady);

    guest.session.load_content(digest("cart"));
    synchronize(&mut host, &mut guest).unwrap();
}

#[test]
fn peer_loading_while_host_relays_starts_once_paired_again() {
    let (mut host, mut guest) = paired_nodes(LockstepConfig::default());
    host.poll();
    guest.poll();

    host.session.set_mode(SessionMode::Relay);
    host.session.load_content(digest("cart"));
    guest.session.load_content(digest("cart"));
    host.poll();
    assert_eq!(host.state(), SessionState::Relaying);
    assert_eq!(host.session.handshake().peer_digest(), Some(&digest("cart")));

    host.session.set_mode(SessionMode::Paired);
    run_frames(&mut host, &mut guest, 30);

    assert_eq!(host.state(), SessionState::Synchronized);
    assert_eq!(guest.state(), SessionState::Synchronized);
    assert_eq!(host.session.verify_content(), Ok(()));
    assert_in_lockstep(&host, &guest, 20);
    for node in [&host, &guest] {
        assert!(node.observer.is_empty(), "{:?}", node.observer.violations());
    }
}

#[test]
fn relay_detour_restarts_a_running_peer() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    host.session.set_source(Button::B, PressSource::Keyboard, true);
    run_frames(&mut host, &mut guest, 10);

    host.session.set_mode(SessionMode::Relay);
    assert_eq!(host.state(), SessionState::Relaying);
    run_frames(&mut host, &mut guest, 5);
    assert!(guest.saw(|e| matches!(e, NetplayEvent::WaitingForInput { .. })));
    assert_eq!(guest.state(), SessionState::Synchronized);

    host.session.set_mode(SessionMode::Paired);
    run_frames(&mut host, &mut guest, 30);

    assert_eq!(host.state(), SessionState::Synchronized);
    assert_eq!(guest.state(), SessionState::Synchronized);
    assert_eq!(guest.sim.restarts, 1);
    assert_in_lockstep(&host, &guest, 20);
    // The key still held on the host counts again in the new run.
    assert!(host.sim.held(PlayerSlot::ONE).b);
    assert!(guest.sim.held(PlayerSlot::ONE).b);
}

// ============================================================================
// Lockstep
// ============================================================================

#[test]
fn both_simulations_see_identical_input() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());

    host.session.set_source(Button::A, PressSource::Keyboard, true);
    guest.session.set_source(Button::B, PressSource::Gamepad, true);
    run_frames(&mut host, &mut guest, 20);
    host.session.set_source(Button::A, PressSource::Keyboard, false);
    guest.session.set_source(Button::B, PressSource::Gamepad, false);
    run_frames(&mut host, &mut guest, 20);

    assert_in_lockstep(&host, &guest, 35);
    let held = host.sim.steps_held(PlayerSlot::ONE, Button::A);
    assert!(held.is_some());
    assert_eq!(held, guest.sim.steps_held(PlayerSlot::ONE, Button::A));
    assert_eq!(
        host.sim.steps_held(PlayerSlot::TWO, Button::B),
        guest.sim.steps_held(PlayerSlot::TWO, Button::B)
    );
    for node in [&host, &guest] {
        assert!(node.observer.is_empty(), "{:?}", node.observer.violations());
    }
}

#[test]
fn slot_one_edges_precede_slot_two_edges() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());

    // Both press in the same capture frame.
    host.session.set_source(Button::Start, PressSource::Touch, true);
    guest.session.set_source(Button::Start, PressSource::Touch, true);
    run_frames(&mut host, &mut guest, 6);

    for node in [&host, &guest] {
        let down_one = node
            .sim
            .calls
            .iter()
            .position(|c| {
                *c == NetplayRequest::ButtonDown {
                    slot: PlayerSlot::ONE,
                    button: Button::Start,
                }
            })
            .unwrap();
        assert_eq!(
            node.sim.calls[down_one + 1],
            NetplayRequest::ButtonDown {
                slot: PlayerSlot::TWO,
                button: Button::Start,
            }
        );
    }
}

#[test]
fn stalled_peer_reports_waiting_and_resumes() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    run_frames(&mut host, &mut guest, 5);
    host.take_events();

    // The guest stops ticking; the host runs out of remote input.
    for _ in 0..5 {
        host.frame();
    }
    let waiting: Vec<_> = host
        .events
        .iter()
        .filter(|e| matches!(e, NetplayEvent::WaitingForInput { .. }))
        .collect();
    assert_eq!(waiting.len(), 1);
    assert!(host.session.sync_status().waiting_on.is_some());

    guest.frame();
    host.frame();
    assert!(host.saw(|e| matches!(e, NetplayEvent::InputResumed { .. })));
    assert_eq!(host.session.sync_status().waiting_on, None);
}

#[test]
fn steps_per_tick_are_capped() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    run_frames(&mut host, &mut guest, 3);

    // Let the host fall behind, then catch up in one long tick.
    for _ in 0..10 {
        guest.frame();
    }
    let before = host.sim.total_steps();
    host.tick(web_time::Duration::from_millis(200));
    assert_eq!(host.sim.total_steps() - before, 4);
}

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn peer_disconnect_releases_buttons_and_resets() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    host.session.set_source(Button::A, PressSource::Keyboard, true);
    run_frames(&mut host, &mut guest, 10);
    assert!(host.sim.held(PlayerSlot::ONE).get(Button::A));
    assert!(guest.sim.held(PlayerSlot::ONE).get(Button::A));

    guest.session.disconnect(&HOST).unwrap();
    guest.poll();
    host.poll();

    for node in [&host, &guest] {
        assert_eq!(node.sim.held(PlayerSlot::ONE), ButtonVector::NEUTRAL);
        assert_eq!(node.sim.held(PlayerSlot::TWO), ButtonVector::NEUTRAL);
        assert_eq!(node.state(), SessionState::AwaitingPeerReady);
        assert_eq!(node.session.sim_frame(), Frame::ZERO);
        assert!(node.saw(|e| matches!(e, NetplayEvent::PeerDisconnected { .. })));
        assert_eq!(node.session.peer(), None);
    }

    let steps = host.sim.total_steps();
    host.frame();
    assert_eq!(host.sim.total_steps(), steps);
}

#[test]
fn disconnecting_an_unknown_address_fails() {
    let (mut host, _guest) = synchronized_pair(LockstepConfig::default());
    assert!(host.session.disconnect(&42).is_err());
    assert_eq!(host.state(), SessionState::Synchronized);
}

#[test]
fn reloading_content_restarts_both_runs() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    host.session.set_source(Button::Right, PressSource::Gamepad, true);
    run_frames(&mut host, &mut guest, 20);

    host.session.load_content(digest("cart"));
    assert_eq!(host.state(), SessionState::AwaitingPeerReady);
    synchronize(&mut host, &mut guest).unwrap();
    run_frames(&mut host, &mut guest, 20);

    assert_eq!(host.sim.restarts, 1);
    assert_eq!(guest.sim.restarts, 1);
    assert_in_lockstep(&host, &guest, 15);
    for node in [&host, &guest] {
        assert!(node.observer.is_empty(), "{:?}", node.observer.violations());
    }
}

#[test]
fn requested_resync_restarts_both_runs() {
    let (mut host, mut guest) = synchronized_pair(LockstepConfig::default());
    run_frames(&mut host, &mut guest, 20);

    host.session.resynchronize().unwrap();
    assert_eq!(host.state(), SessionState::AwaitingPeerReady);
    synchronize(&mut host, &mut guest).unwrap();
    run_frames(&mut host, &mut guest, 20);

    assert_eq!(host.sim.restarts, 1);
    assert_eq!(guest.sim.restarts, 1);
    assert_in_lockstep(&host, &guest, 15);
}

#[test]
fn resync_needs_a_running_session() {
    let (mut host, _guest) = paired_nodes(LockstepConfig::default());
    assert_eq!(
        host.session.resynchronize(),
        Err(NetplayError::NotSynchronized)
    );
}

#[test]
fn buffer_overflow_resynchronizes_both_sides() {
    let config = LockstepConfig {
        max_buffered_frames: 30,
        ..LockstepConfig::default()
    };
    let (mut host, mut guest) = synchronized_pair(config);

    for _ in 0..100 {
        host.frame();
        if host.saw(|e| matches!(e, NetplayEvent::Resynchronizing { .. })) {
            break;
        }
    }
    assert!(host.saw(|e| matches!(e, NetplayEvent::WaitingForInput { .. })));
    assert!(host.saw(|e| matches!(
        e,
        NetplayEvent::Resynchronizing {
            buffered: 31,
            max: 30
        }
    )));
    assert!(host.observer.has_violation(ViolationKind::Overflow));
    assert_eq!(host.state(), SessionState::AwaitingPeerReady);

    synchronize(&mut host, &mut guest).unwrap();
    run_frames(&mut host, &mut guest, 20);
    assert_eq!(host.sim.restarts, 1);
    assert_in_lockstep(&host, &guest, 15);
}

// ============================================================================
// Wire protocol against a scripted peer
// ============================================================================

/// A synchronized host whose peer is a bare transport driven by the test.
fn scripted_peer() -> (Node, MemoryTransport<u8>) {
    let mut host_transport = MemoryTransport::new(HOST);
    let mut peer = MemoryTransport::new(GUEST);
    host_transport.connect(&mut peer);

    let mut host = Node::start(SessionBuilder::<PeerConfig>::new(), host_transport);
    host.session.load_content(digest("cart"));
    host.poll();

    assert_eq!(
        peer.receive_all_events(),
        vec![
            (HOST, TransportEvent::Opened),
            (
                HOST,
                TransportEvent::Message(Message::rom_info(&digest("cart")))
            ),
            (HOST, TransportEvent::Message(Message::Ready)),
        ]
    );

    peer.send_to(&Message::rom_info(&digest("cart")), &HOST);
    peer.send_to(&Message::Ready, &HOST);
    host.poll();
    assert_eq!(host.state(), SessionState::Synchronized);
    // The host answers the announcement once.
    assert_eq!(
        peer.receive_all_events(),
        vec![(HOST, TransportEvent::Message(Message::Ready))]
    );
    (host, peer)
}

fn input_frame(frame: i32, player: u8) -> Message {
    Message::InputFrame {
        frame: Frame::new(frame),
        player,
        buttons: ButtonVector::NEUTRAL,
    }
}

#[test]
fn local_input_is_sent_tagged_with_the_delayed_frame() {
    let (mut host, mut peer) = scripted_peer();
    host.session.set_source(Button::Up, PressSource::Keyboard, true);
    host.frame();
    assert_eq!(
        peer.receive_all_events(),
        vec![(
            HOST,
            TransportEvent::Message(Message::InputFrame {
                frame: Frame::new(2),
                player: 1,
                buttons: ButtonVector::NEUTRAL.with(Button::Up),
            })
        )]
    );
}

#[test]
fn remote_input_for_the_local_slot_is_dropped() {
    let (mut host, mut peer) = scripted_peer();
    host.frame();
    peer.send_to(&input_frame(2, 1), &HOST);
    host.frame();

    assert!(host.observer.has_violation(ViolationKind::InputProtocol));
    assert_eq!(host.session.sim_frame(), Frame::new(2));
    assert_eq!(host.session.sync_status().waiting_on, Some(Frame::new(2)));
}

#[test]
fn stale_remote_input_is_dropped() {
    let (mut host, mut peer) = scripted_peer();
    for frame in 2..6 {
        peer.send_to(&input_frame(frame, 2), &HOST);
        host.frame();
    }
    assert_eq!(host.session.sim_frame(), Frame::new(6));
    assert!(host.observer.is_empty());

    peer.send_to(&input_frame(3, 2), &HOST);
    host.poll();
    let reports = host.observer.violations_from(&GUEST);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, ViolationKind::InputProtocol);
    assert_eq!(host.state(), SessionState::Synchronized);
}

#[test]
fn controller_messages_from_the_peer_are_rejected() {
    let (mut host, mut peer) = scripted_peer();
    peer.send_to(&Message::Hello { player: 1 }, &HOST);
    host.poll();
    assert!(host.observer.has_violation(ViolationKind::InputProtocol));
    assert_eq!(host.session.relay().holder(PlayerSlot::ONE), None);
}

#[test]
fn malformed_bytes_are_reported_and_ignored() {
    let (mut host, mut peer) = scripted_peer();
    peer.send_raw(vec![0xFF, 0xFF, 0xFF, 0xFF, 0x01], &HOST);
    host.poll();
    assert!(host.observer.has_violation(ViolationKind::InputProtocol));
    assert_eq!(host.state(), SessionState::Synchronized);
}

#[test]
fn framed_input_before_synchronization_is_ignored() {
    let mut host_transport = MemoryTransport::new(HOST);
    let mut peer = MemoryTransport::new(GUEST);
    host_transport.connect(&mut peer);
    let mut host = Node::start(SessionBuilder::<PeerConfig>::new(), host_transport);
    host.session.load_content(digest("cart"));

    peer.send_to(&input_frame(2, 2), &HOST);
    host.poll();
    assert!(host.observer.is_empty());
    assert_eq!(host.state(), SessionState::AwaitingPeerReady);
}
