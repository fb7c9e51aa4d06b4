//! Property-based tests for the input aggregator, the lockstep engine and the
//! handshake.
//!
//! # Properties Tested
//!
//! ## InputAggregator
//! - Without a hold policy, a button is down exactly while some source holds it
//! - Reported edges alternate per button
//! - With a frame hold, no release is reported before the minimum
//!
//! ## LockstepStepper
//! - Frames are stepped consecutively from 0, never more per tick than the cap
//! - Invariants hold after every operation
//! - Two engines fed the same inputs from opposite sides request identical
//!   sequences, whatever the delivery lag
//!
//! ## Handshake
//! - Starts and stops alternate
//! - A run only exists while its start conditions hold
//! - Two connected sides always settle, and both run once paired with the
//!   same content

use std::collections::{BTreeSet, VecDeque};

use netplay_lockstep::telemetry::InvariantChecker;
use netplay_lockstep::{
    Button, ButtonVector, Edge, Frame, Handshake, HandshakeAction, HandshakeEvent, HoldPolicy,
    InputAggregator, LockstepConfig, LockstepStepper, NetplayRequest, PlayerSlot, PressSource,
    SessionDigest, SessionMode,
};
use proptest::prelude::*;
use web_time::Instant;

// ============================================================================
// Property Test Strategies
// ============================================================================

fn button_strategy() -> impl Strategy<Value = Button> {
    (0..Button::COUNT).prop_map(|i| Button::ALL[i])
}

fn source_strategy() -> impl Strategy<Value = PressSource> {
    prop_oneof![
        Just(PressSource::Keyboard),
        Just(PressSource::Touch),
        Just(PressSource::Gamepad),
        Just(PressSource::JoystickAxis),
    ]
}

fn vector_strategy() -> impl Strategy<Value = ButtonVector> {
    any::<u8>().prop_map(ButtonVector::from_bits)
}

fn digest_strategy() -> impl Strategy<Value = SessionDigest> {
    prop_oneof![
        Just(SessionDigest::from_content("cart", b"cart")),
        Just(SessionDigest::from_content("other", b"other")),
    ]
}

fn mode_strategy() -> impl Strategy<Value = SessionMode> {
    prop_oneof![
        Just(SessionMode::Paired),
        Just(SessionMode::Solo),
        Just(SessionMode::Relay),
    ]
}

fn handshake_event_strategy() -> impl Strategy<Value = HandshakeEvent> {
    prop_oneof![
        digest_strategy().prop_map(|digest| HandshakeEvent::LocalContentLoaded { digest }),
        Just(HandshakeEvent::PeerReady),
        digest_strategy().prop_map(|digest| HandshakeEvent::PeerDigest { digest }),
        Just(HandshakeEvent::ChannelOpened),
        Just(HandshakeEvent::ConnectionClosed),
        mode_strategy().prop_map(|mode| HandshakeEvent::ModeChanged { mode }),
        Just(HandshakeEvent::Overflow),
    ]
}

/// Something one side of a connected pair does.
#[derive(Debug, Clone)]
enum PairStep {
    Load(bool, SessionDigest),
    Mode(bool, SessionMode),
    Overflow(bool),
    Deliver(bool),
}

fn pair_step_strategy() -> impl Strategy<Value = PairStep> {
    let side = any::<bool>();
    prop_oneof![
        (side.clone(), digest_strategy()).prop_map(|(a, digest)| PairStep::Load(a, digest)),
        (
            side.clone(),
            prop_oneof![Just(SessionMode::Paired), Just(SessionMode::Relay)]
        )
            .prop_map(|(a, mode)| PairStep::Mode(a, mode)),
        side.clone().prop_map(PairStep::Overflow),
        side.clone().prop_map(PairStep::Deliver),
        side.prop_map(PairStep::Deliver),
    ]
}

/// One aggregator operation: set or clear one source on one button, then
/// optionally advance a frame.
fn input_op_strategy() -> impl Strategy<Value = (Button, PressSource, bool, bool)> {
    (
        button_strategy(),
        source_strategy(),
        any::<bool>(),
        any::<bool>(),
    )
}

// ============================================================================
// InputAggregator
// ============================================================================

proptest! {
    /// Without a hold policy the output is the OR of all sources.
    #[test]
    fn prop_output_is_union_of_sources(
        ops in prop::collection::vec(input_op_strategy(), 1..200),
    ) {
        let mut aggregator = InputAggregator::new(HoldPolicy::None);
        let mut model: BTreeSet<(usize, PressSource)> = BTreeSet::new();
        let now = Instant::now();

        for (button, source, pressed, _) in ops {
            let before = aggregator.buttons().get(button);
            let edge = aggregator.set_source(button, source, pressed, now);
            if pressed {
                model.insert((button.index(), source));
            } else {
                model.remove(&(button.index(), source));
            }

            let expected = model.iter().any(|(b, _)| *b == button.index());
            prop_assert_eq!(aggregator.buttons().get(button), expected);
            match edge {
                Some(Edge::Pressed) => prop_assert!(!before && expected),
                Some(Edge::Released) => prop_assert!(before && !expected),
                None => prop_assert_eq!(before, expected),
            }
        }
    }

    /// With a frame hold, a release is never reported before the minimum
    /// number of frames since the press edge.
    #[test]
    fn prop_frame_hold_is_respected(
        min_frames in 1u32..6,
        ops in prop::collection::vec(input_op_strategy(), 1..200),
    ) {
        let mut aggregator = InputAggregator::new(HoldPolicy::FrameCount(min_frames));
        let mut frame: u32 = 0;
        let mut pressed_at = [None::<u32>; Button::COUNT];
        let now = Instant::now();

        let mut check = |changes: &[(Button, Edge)], frame: u32| -> Result<(), TestCaseError> {
            for &(button, edge) in changes {
                match edge {
                    Edge::Pressed => pressed_at[button.index()] = Some(frame),
                    Edge::Released => {
                        let start = pressed_at[button.index()].take();
                        prop_assert!(start.is_some(), "release without press");
                        prop_assert!(frame - start.unwrap_or(0) >= min_frames);
                    },
                }
            }
            Ok(())
        };

        for (button, source, pressed, advance) in ops {
            let edge = aggregator.set_source(button, source, pressed, now);
            let changes: Vec<_> = edge.map(|edge| (button, edge)).into_iter().collect();
            check(&changes, frame)?;
            if advance {
                frame += 1;
                let due = aggregator.advance_frame();
                check(&due, frame)?;
            }
        }
    }
}

// ============================================================================
// LockstepStepper
// ============================================================================

/// Ticks two engines against each other. Each tick both capture one vector,
/// then every message older than `lag` ticks is delivered and both drain.
/// Afterwards everything is delivered and both drain to completion.
fn run_pair(
    inputs: &[(ButtonVector, ButtonVector)],
    lags: &[usize],
) -> (Vec<NetplayRequest>, Vec<NetplayRequest>, LockstepStepper, LockstepStepper) {
    let config = LockstepConfig::default();
    let mut one = LockstepStepper::new(&config, PlayerSlot::ONE);
    let mut two = LockstepStepper::new(&config, PlayerSlot::TWO);
    let (mut out_one, mut out_two) = (Vec::new(), Vec::new());
    let mut to_two: VecDeque<(usize, Frame, ButtonVector)> = VecDeque::new();
    let mut to_one: VecDeque<(usize, Frame, ButtonVector)> = VecDeque::new();

    let deliver = |queue: &mut VecDeque<(usize, Frame, ButtonVector)>,
                   stepper: &mut LockstepStepper,
                   slot: PlayerSlot,
                   now: usize| {
        while queue.front().is_some_and(|(due, _, _)| *due <= now) {
            let (_, frame, buttons) = queue.pop_front().unwrap();
            stepper.store_remote(frame, slot, buttons).unwrap();
        }
    };

    for (tick, &(a, b)) in inputs.iter().enumerate() {
        let lag = lags[tick % lags.len()];
        one.begin_tick();
        two.begin_tick();
        let frame = one.capture_local(a).unwrap();
        to_two.push_back((tick + lag, frame, a));
        let frame = two.capture_local(b).unwrap();
        to_one.push_back((tick + lag, frame, b));

        deliver(&mut to_one, &mut one, PlayerSlot::TWO, tick);
        deliver(&mut to_two, &mut two, PlayerSlot::ONE, tick);
        one.drain(&mut out_one);
        two.drain(&mut out_two);
    }

    deliver(&mut to_one, &mut one, PlayerSlot::TWO, usize::MAX);
    deliver(&mut to_two, &mut two, PlayerSlot::ONE, usize::MAX);
    for stepper_out in [(&mut one, &mut out_one), (&mut two, &mut out_two)] {
        let (stepper, out) = stepper_out;
        loop {
            stepper.begin_tick();
            if stepper.drain(out).steps == 0 {
                break;
            }
        }
    }
    (out_one, out_two, one, two)
}

proptest! {
    /// Both sides request exactly the same edges and steps.
    #[test]
    fn prop_opposite_sides_agree(
        inputs in prop::collection::vec((vector_strategy(), vector_strategy()), 1..120),
        lags in prop::collection::vec(0usize..8, 1..10),
    ) {
        let (out_one, out_two, one, two) = run_pair(&inputs, &lags);
        prop_assert_eq!(&out_one, &out_two);

        // Every captured frame plus the seeded delay frames was applied.
        let expected = inputs.len() + LockstepConfig::default().input_delay;
        prop_assert_eq!(one.sim_frame().as_i32() as usize, expected);
        prop_assert_eq!(two.sim_frame().as_i32() as usize, expected);
        prop_assert_eq!(one.buffered_frames(), 0);
    }

    /// Steps come out in order from frame 0 and never exceed the cap per tick.
    #[test]
    fn prop_drain_is_ordered_and_capped(
        max_steps in 1u32..6,
        remote_lag in 0usize..12,
        ticks in 1usize..150,
    ) {
        let config = LockstepConfig {
            max_steps_per_tick: max_steps,
            ..LockstepConfig::default()
        };
        let mut stepper = LockstepStepper::new(&config, PlayerSlot::ONE);
        let mut next = 0;
        let mut stored_remote = config.input_delay;

        for tick in 0..ticks {
            stepper.begin_tick();
            stepper.capture_local(ButtonVector::NEUTRAL).unwrap();
            // The remote side delivers in bursts once it is `remote_lag` ticks behind.
            let remote_horizon = (tick + config.input_delay + 1).saturating_sub(remote_lag);
            while stored_remote < remote_horizon {
                stepper
                    .store_remote(Frame::new(stored_remote as i32), PlayerSlot::TWO, ButtonVector::NEUTRAL)
                    .unwrap();
                stored_remote += 1;
            }

            let mut out = Vec::new();
            let outcome = stepper.drain(&mut out);
            prop_assert!(outcome.steps <= max_steps);
            for request in out {
                if let NetplayRequest::Step { frame } = request {
                    prop_assert_eq!(frame.as_i32(), next);
                    next += 1;
                }
            }
            prop_assert!(stepper.check_invariants().is_ok());
        }
    }
}

// ============================================================================
// Handshake
// ============================================================================

proptest! {
    #[test]
    fn prop_handshake_runs_only_when_allowed(
        initial_mode in mode_strategy(),
        events in prop::collection::vec(handshake_event_strategy(), 1..60),
    ) {
        let mut handshake = Handshake::new(initial_mode);
        let mut running = false;

        for event in events {
            for action in handshake.handle(event) {
                match action {
                    HandshakeAction::StartSync | HandshakeAction::StartRelay => {
                        prop_assert!(!running, "started twice");
                        running = true;
                    },
                    HandshakeAction::StopSync | HandshakeAction::StopRelay => {
                        prop_assert!(running, "stopped while not running");
                        running = false;
                    },
                    _ => {},
                }
            }
            prop_assert_eq!(handshake.is_running(), running);
            prop_assert_eq!(handshake.state().is_running(), running);

            if running {
                prop_assert!(handshake.is_local_ready());
                if handshake.mode() == SessionMode::Paired {
                    prop_assert!(handshake.is_channel_open());
                    prop_assert_ne!(handshake.digests_match(), Some(false));
                }
            }
        }
    }
}

/// Two handshakes joined by an ordered channel in each direction.
struct HandshakePair {
    sides: [Handshake; 2],
    inbox: [VecDeque<HandshakeEvent>; 2],
}

impl HandshakePair {
    fn connected() -> Self {
        let mut pair = Self {
            sides: [
                Handshake::new(SessionMode::Paired),
                Handshake::new(SessionMode::Paired),
            ],
            inbox: [VecDeque::new(), VecDeque::new()],
        };
        pair.handle(0, HandshakeEvent::ChannelOpened);
        pair.handle(1, HandshakeEvent::ChannelOpened);
        pair
    }

    fn handle(&mut self, side: usize, event: HandshakeEvent) {
        for action in self.sides[side].handle(event) {
            let message = match action {
                HandshakeAction::SendRomInfo(digest) => HandshakeEvent::PeerDigest { digest },
                HandshakeAction::SendReady => HandshakeEvent::PeerReady,
                _ => continue,
            };
            self.inbox[1 - side].push_back(message);
        }
    }

    fn deliver(&mut self, side: usize) -> bool {
        match self.inbox[side].pop_front() {
            Some(event) => {
                self.handle(side, event);
                true
            },
            None => false,
        }
    }

    /// Delivers everything in flight. Returns the number of deliveries.
    fn drain(&mut self) -> usize {
        let mut delivered = 0;
        while self.deliver(0) | self.deliver(1) {
            delivered += 1;
            if delivered > 200 {
                break;
            }
        }
        delivered
    }
}

proptest! {
    #[test]
    fn prop_connected_pair_settles_and_runs(
        steps in prop::collection::vec(pair_step_strategy(), 0..40),
    ) {
        let mut pair = HandshakePair::connected();
        for step in steps {
            match step {
                PairStep::Load(a, digest) => {
                    pair.handle(usize::from(a), HandshakeEvent::LocalContentLoaded { digest });
                },
                PairStep::Mode(a, mode) => {
                    pair.handle(usize::from(a), HandshakeEvent::ModeChanged { mode });
                },
                PairStep::Overflow(a) => pair.handle(usize::from(a), HandshakeEvent::Overflow),
                PairStep::Deliver(a) => {
                    pair.deliver(usize::from(a));
                },
            }
        }

        let cart = SessionDigest::from_content("cart", b"cart");
        for side in 0..2 {
            pair.handle(side, HandshakeEvent::ModeChanged { mode: SessionMode::Paired });
            pair.handle(side, HandshakeEvent::LocalContentLoaded { digest: cart.clone() });
        }
        let delivered = pair.drain();
        prop_assert!(delivered <= 200, "handshake never settled");
        for side in &pair.sides {
            prop_assert!(side.is_running(), "stuck in {:?}", side.state());
        }
    }
}
