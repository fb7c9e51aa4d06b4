//! Relay session integration tests: controller clients driving a host.

use crate::common::stubs::PeerConfig;
use crate::common::{digest, single_node, Node, HOST};
use netplay_lockstep::telemetry::ViolationKind;
use netplay_lockstep::{
    Button, ButtonVector, ConnectionRole, ControllerClient, HoldPolicy, InvalidRequestKind,
    MemoryTransport, Message, NetplayError, NetplayEvent, NetplayRequest, PlayerSlot, PressSource,
    SessionBuilder, SessionMode, SessionState, Transport, TransportEvent,
};
use web_time::{Duration, Instant};

const PAD_A: u8 = 10;
const PAD_B: u8 = 11;

/// A relaying host with two connected (not yet attached) controller endpoints.
fn relay_host() -> (Node, MemoryTransport<u8>, MemoryTransport<u8>) {
    let mut transport = MemoryTransport::new(HOST);
    let mut pad_a = MemoryTransport::new(PAD_A);
    let mut pad_b = MemoryTransport::new(PAD_B);
    transport.connect(&mut pad_a);
    transport.connect(&mut pad_b);
    pad_a.receive_all_events();
    pad_b.receive_all_events();

    let mut host = single_node(SessionMode::Relay, transport);
    host.session.load_content(digest("cart"));
    assert_eq!(host.state(), SessionState::Relaying);
    host.poll();
    assert_eq!(
        host.session.connection_role(&PAD_A),
        Some(ConnectionRole::ControllerClient)
    );
    (host, pad_a, pad_b)
}

fn press(btn: Button, player: u8) -> Message {
    Message::Input {
        btn,
        pressed: true,
        player: Some(player),
    }
}

#[test]
fn second_claim_evicts_the_first_controller() {
    let (mut host, mut pad_a, mut pad_b) = relay_host();

    pad_a.send_to(&ControllerClient::new(PlayerSlot::ONE).hello(), &HOST);
    host.poll();
    pad_b.send_to(&ControllerClient::new(PlayerSlot::ONE).hello(), &HOST);
    host.poll();

    let attachments: Vec<_> = host
        .events
        .iter()
        .filter(|e| {
            matches!(
                e,
                NetplayEvent::ControllerAttached { .. } | NetplayEvent::ControllerEvicted { .. }
            )
        })
        .cloned()
        .collect();
    assert_eq!(
        attachments,
        vec![
            NetplayEvent::ControllerAttached {
                addr: PAD_A,
                slot: PlayerSlot::ONE
            },
            NetplayEvent::ControllerEvicted {
                addr: PAD_A,
                slot: PlayerSlot::ONE
            },
            NetplayEvent::ControllerAttached {
                addr: PAD_B,
                slot: PlayerSlot::ONE
            },
        ]
    );
    assert_eq!(host.session.relay().holder(PlayerSlot::ONE), Some(&PAD_B));
    assert_eq!(host.session.connection_role(&PAD_A), None);
    assert_eq!(pad_a.receive_all_events(), vec![(HOST, TransportEvent::Closed)]);

    // The evicted pad can no longer reach the host.
    pad_a.send_to(&press(Button::A, 1), &HOST);
    host.frame();
    assert!(host.sim.held(PlayerSlot::ONE).is_neutral());
}

#[test]
fn controller_input_lands_on_frame_boundaries() {
    let (mut host, mut pad_a, _pad_b) = relay_host();
    let mut client = ControllerClient::new(PlayerSlot::TWO);
    let t0 = Instant::now();

    pad_a.send_to(&client.hello(), &HOST);
    let msg = client
        .set_source(Button::Select, PressSource::Touch, true, t0)
        .unwrap();
    pad_a.send_to(&msg, &HOST);
    host.frame();

    assert_eq!(
        host.sim.calls,
        vec![
            NetplayRequest::ButtonDown {
                slot: PlayerSlot::TWO,
                button: Button::Select
            },
            NetplayRequest::Step {
                frame: netplay_lockstep::Frame::ZERO
            },
        ]
    );
}

#[test]
fn short_taps_are_held_for_the_relay_minimum() {
    let (mut host, mut pad_a, _pad_b) = relay_host();
    let mut client = ControllerClient::with_policy(PlayerSlot::ONE, HoldPolicy::None);
    let t0 = Instant::now();

    pad_a.send_to(&client.hello(), &HOST);
    pad_a.send_to(
        &client.set_source(Button::A, PressSource::Touch, true, t0).unwrap(),
        &HOST,
    );
    host.frame();
    pad_a.send_to(
        &client
            .set_source(Button::A, PressSource::Touch, false, t0 + Duration::from_millis(1))
            .unwrap(),
        &HOST,
    );
    host.frame();
    assert!(host.session.relay().has_pending_release(PlayerSlot::ONE, Button::A));

    for _ in 0..4 {
        host.frame();
    }
    assert_eq!(host.sim.steps_held(PlayerSlot::ONE, Button::A), Some(4));
    assert!(host.session.relay().pressed(PlayerSlot::ONE).is_neutral());
}

#[test]
fn controller_disconnect_releases_its_buttons() {
    let (mut host, mut pad_a, _pad_b) = relay_host();
    pad_a.send_to(&Message::Hello { player: 1 }, &HOST);
    pad_a.send_to(&press(Button::Right, 1), &HOST);
    host.frame();
    assert!(host.sim.held(PlayerSlot::ONE).right);

    pad_a.close(&HOST);
    host.frame();

    assert_eq!(host.sim.held(PlayerSlot::ONE), ButtonVector::NEUTRAL);
    assert!(host.saw(|e| matches!(
        e,
        NetplayEvent::ControllerDetached {
            addr: PAD_A,
            slot: PlayerSlot::ONE
        }
    )));
    assert_eq!(host.session.relay().holder(PlayerSlot::ONE), None);
    assert_eq!(host.state(), SessionState::Relaying);
}

#[test]
fn input_without_a_matching_claim_is_dropped() {
    let (mut host, mut pad_a, mut pad_b) = relay_host();
    pad_a.send_to(&Message::Hello { player: 1 }, &HOST);
    // Claims slot 2 while holding slot 1.
    pad_a.send_to(&press(Button::A, 2), &HOST);
    // Never said hello.
    pad_b.send_to(&press(Button::B, 2), &HOST);
    host.frame();

    assert_eq!(
        host.observer
            .violations_of_kind(ViolationKind::InputProtocol)
            .len(),
        2
    );
    assert!(host.sim.held(PlayerSlot::ONE).is_neutral());
    assert!(host.sim.held(PlayerSlot::TWO).is_neutral());
}

#[test]
fn lockstep_messages_from_a_controller_are_rejected() {
    let (mut host, mut pad_a, _pad_b) = relay_host();
    pad_a.send_to(&Message::Ready, &HOST);
    host.poll();
    assert!(host.observer.has_violation(ViolationKind::InputProtocol));
    assert_eq!(host.state(), SessionState::Relaying);
}

#[test]
fn leaving_relay_releases_buttons_but_keeps_attachments() {
    let (mut host, mut pad_a, _pad_b) = relay_host();
    pad_a.send_to(&Message::Hello { player: 2 }, &HOST);
    pad_a.send_to(&press(Button::Up, 2), &HOST);
    host.frame();
    assert!(host.sim.held(PlayerSlot::TWO).up);

    host.session.set_mode(SessionMode::Solo);
    host.frame();
    assert!(host.sim.held(PlayerSlot::TWO).is_neutral());
    assert_eq!(host.session.relay().slot_of(&PAD_A), Some(PlayerSlot::TWO));
    assert_eq!(host.state(), SessionState::Synchronized);

    // Controller input is ignored outside of relay mode.
    pad_a.send_to(&press(Button::Down, 2), &HOST);
    for _ in 0..4 {
        host.frame();
    }
    assert!(host.sim.held(PlayerSlot::TWO).is_neutral());
}

#[test]
fn kicking_a_controller_frees_its_slot() {
    let (mut host, mut pad_a, _pad_b) = relay_host();
    pad_a.send_to(&Message::Hello { player: 2 }, &HOST);
    pad_a.send_to(&press(Button::B, 2), &HOST);
    host.frame();
    assert!(host.sim.held(PlayerSlot::TWO).b);

    assert_eq!(host.session.kick_controller(PlayerSlot::TWO), Ok(Some(PAD_A)));
    assert_eq!(host.session.kick_controller(PlayerSlot::TWO), Ok(None));
    host.frame();

    assert!(host.sim.held(PlayerSlot::TWO).is_neutral());
    assert!(host.saw(|e| matches!(
        e,
        NetplayEvent::ControllerDetached {
            addr: PAD_A,
            slot: PlayerSlot::TWO
        }
    )));
    assert_eq!(pad_a.receive_all_events(), vec![(HOST, TransportEvent::Closed)]);
}

#[test]
fn kicking_needs_relay_mode() {
    let mut host = single_node(SessionMode::Solo, MemoryTransport::new(HOST));
    assert!(matches!(
        host.session.kick_controller(PlayerSlot::ONE),
        Err(NetplayError::InvalidRequest {
            kind: InvalidRequestKind::WrongMode {
                expected: SessionMode::Relay,
                actual: SessionMode::Solo
            }
        })
    ));
}

#[test]
fn full_event_queue_counts_what_it_dropped() {
    let mut transport = MemoryTransport::new(HOST);
    let mut pad = MemoryTransport::new(PAD_A);
    transport.connect(&mut pad);

    let mut session = SessionBuilder::<PeerConfig>::new()
        .with_mode(SessionMode::Relay)
        .with_event_queue_size(10)
        .unwrap()
        .start_session(transport)
        .unwrap();
    session.load_content(digest("cart"));
    let _ = session.tick(Duration::ZERO);

    // Every claim moves the pad to the other slot.
    for slot in [PlayerSlot::ONE, PlayerSlot::TWO].into_iter().cycle().take(16) {
        pad.send_to(&ControllerClient::new(slot).hello(), &HOST);
        let _ = session.tick(Duration::ZERO);
    }

    let events = session.events();
    assert_eq!(events.len(), 10);
    assert!(events.discarded() >= 6);
    assert_eq!(
        events.last(),
        Some(NetplayEvent::ControllerAttached {
            addr: PAD_A,
            slot: PlayerSlot::TWO
        })
    );
    assert_eq!(session.events().discarded(), 0);
}
