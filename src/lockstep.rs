//! The fixed-delay lockstep engine.
//!
//! Every logical advance captures the local controller, tags it with
//! `input_frame + input_delay` and buffers it. Frames are then applied in
//! order as soon as both slots are known. Because the first `input_delay`
//! frames are pre-seeded with released vectors, the local side never waits
//! on its own input, and the remote side has `input_delay` frames of time to
//! deliver its own.
//!
//! Applying a frame never hands whole vectors to the simulation: it diffs
//! each slot against the vector applied last and requests the edges, slot 1
//! before slot 2, buttons in canonical order, followed by exactly one
//! [`NetplayRequest::Step`].

pub mod clock;
pub mod frame_buffer;

use tracing::{debug, trace};

use crate::buttons::ButtonVector;
use crate::error::{NetplayError, ProtocolViolationKind};
use crate::sessions::config::LockstepConfig;
use crate::telemetry::{InvariantChecker, InvariantViolation};
use crate::{Frame, NetplayRequest, PlayerSlot};
use frame_buffer::FrameBuffer;

/// What one [`LockstepStepper::drain`] call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Frames applied.
    pub steps: u32,
    /// Set if draining stopped because input for this frame is incomplete.
    /// `None` if it stopped on the step cap.
    pub stalled_on: Option<Frame>,
}

/// Frame buffer, counters and applied vectors of one lockstep run.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{Button, ButtonVector, LockstepConfig, LockstepStepper, NetplayRequest, PlayerSlot};
///
/// let mut stepper = LockstepStepper::new(&LockstepConfig::default(), PlayerSlot::ONE);
/// let mut requests = Vec::new();
///
/// stepper.begin_tick();
/// let frame = stepper.capture_local(ButtonVector::NEUTRAL.with(Button::A))?;
/// assert_eq!(frame.as_i32(), 2);
///
/// // The two seeded frames apply at once; frame 2 waits for the remote slot.
/// let outcome = stepper.drain(&mut requests);
/// assert_eq!(outcome.steps, 2);
/// assert_eq!(outcome.stalled_on, Some(frame));
///
/// stepper.store_remote(frame, PlayerSlot::TWO, ButtonVector::NEUTRAL)?;
/// stepper.drain(&mut requests);
/// assert!(requests.contains(&NetplayRequest::ButtonDown { slot: PlayerSlot::ONE, button: Button::A }));
/// # Ok::<(), netplay_lockstep::NetplayError>(())
/// ```
#[derive(Debug, Clone)]
pub struct LockstepStepper {
    buffer: FrameBuffer,
    sim_frame: Frame,
    input_frame: Frame,
    input_delay: usize,
    max_steps_per_tick: u32,
    local_slot: PlayerSlot,
    applied: [ButtonVector; 2],
    steps_this_tick: u32,
}

impl LockstepStepper {
    /// Creates a stepper ready to run from frame 0.
    #[must_use]
    pub fn new(config: &LockstepConfig, local_slot: PlayerSlot) -> Self {
        let mut stepper = Self {
            buffer: FrameBuffer::new(config.max_buffered_frames),
            sim_frame: Frame::ZERO,
            input_frame: Frame::ZERO,
            input_delay: config.input_delay,
            max_steps_per_tick: config.max_steps_per_tick,
            local_slot,
            applied: [ButtonVector::NEUTRAL; 2],
            steps_this_tick: 0,
        };
        stepper.buffer.seed(stepper.input_delay);
        stepper
    }

    /// Discards the current run and prepares a new one from frame 0.
    ///
    /// Requests a release for every button the simulation currently holds.
    /// Calling it twice in a row requests nothing the second time.
    pub fn reset(&mut self, out: &mut Vec<NetplayRequest>) {
        self.release_all(out);
        if !self.buffer.is_empty() || self.sim_frame != Frame::ZERO {
            debug!(
                sim_frame = %self.sim_frame,
                buffered = self.buffer.len(),
                "discarding lockstep run"
            );
        }
        self.buffer.clear();
        self.sim_frame = Frame::ZERO;
        self.input_frame = Frame::ZERO;
        self.steps_this_tick = 0;
        self.buffer.seed(self.input_delay);
    }

    /// Requests a release for every applied button and forgets them.
    pub fn release_all(&mut self, out: &mut Vec<NetplayRequest>) {
        for slot in PlayerSlot::ALL {
            let held = &mut self.applied[slot.index()];
            out.extend(
                held.edges_to(&ButtonVector::NEUTRAL)
                    .map(|(button, edge)| NetplayRequest::edge(slot, button, edge)),
            );
            *held = ButtonVector::NEUTRAL;
        }
    }

    /// Starts a new external tick, refilling the step budget.
    pub fn begin_tick(&mut self) {
        self.steps_this_tick = 0;
    }

    /// Buffers the local vector for `input_frame + input_delay` and moves
    /// `input_frame` forward. Returns the frame the vector was tagged with.
    ///
    /// # Errors
    /// Returns [`NetplayError::BufferOverflow`] if the buffer is full; the
    /// counters are left unchanged.
    pub fn capture_local(&mut self, buttons: ButtonVector) -> Result<Frame, NetplayError> {
        let frame = self.input_frame + self.input_delay as i32;
        self.buffer.store(frame, self.local_slot, buttons)?;
        self.input_frame += 1;
        Ok(frame)
    }

    /// Buffers a vector for `slot` at `frame`.
    ///
    /// # Errors
    /// - [`ProtocolViolationKind::StaleFrame`] if `frame` was already applied.
    /// - [`ProtocolViolationKind::FrameTooFarAhead`] if `frame` lies beyond
    ///   the buffer window.
    /// - [`NetplayError::BufferOverflow`] if the buffer is full.
    pub fn store_remote(
        &mut self,
        frame: Frame,
        slot: PlayerSlot,
        buttons: ButtonVector,
    ) -> Result<(), NetplayError> {
        if frame < self.sim_frame {
            return Err(ProtocolViolationKind::StaleFrame {
                frame,
                sim_frame: self.sim_frame,
            }
            .into());
        }
        let limit = self.sim_frame + self.buffer.max_frames() as i32;
        if frame > limit {
            return Err(ProtocolViolationKind::FrameTooFarAhead { frame, limit }.into());
        }
        self.buffer.store(frame, slot, buttons)
    }

    /// Applies complete frames in order until one is incomplete or the step
    /// budget of this tick is used up.
    pub fn drain(&mut self, out: &mut Vec<NetplayRequest>) -> DrainOutcome {
        let mut outcome = DrainOutcome::default();
        while self.steps_this_tick < self.max_steps_per_tick {
            let Some(vectors) = self.buffer.take_complete(self.sim_frame) else {
                trace!(frame = %self.sim_frame, missing = ?self.buffer.missing_slots(self.sim_frame), "input incomplete");
                outcome.stalled_on = Some(self.sim_frame);
                break;
            };
            for slot in PlayerSlot::ALL {
                let next = vectors[slot.index()];
                let applied = &mut self.applied[slot.index()];
                out.extend(
                    applied
                        .edges_to(&next)
                        .map(|(button, edge)| NetplayRequest::edge(slot, button, edge)),
                );
                *applied = next;
            }
            out.push(NetplayRequest::Step {
                frame: self.sim_frame,
            });
            self.sim_frame += 1;
            self.steps_this_tick += 1;
            outcome.steps += 1;
        }
        crate::debug_check_invariants!(self, "after drain");
        outcome
    }

    /// The next frame to be applied.
    #[must_use]
    pub const fn sim_frame(&self) -> Frame {
        self.sim_frame
    }

    /// Number of local captures in this run.
    #[must_use]
    pub const fn input_frame(&self) -> Frame {
        self.input_frame
    }

    /// Frames of input delay.
    #[must_use]
    pub const fn input_delay(&self) -> usize {
        self.input_delay
    }

    /// The slot fed by [`capture_local`](Self::capture_local).
    #[must_use]
    pub const fn local_slot(&self) -> PlayerSlot {
        self.local_slot
    }

    /// Number of buffered frames.
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    /// The buffer cap.
    #[must_use]
    pub const fn max_buffered_frames(&self) -> usize {
        self.buffer.max_frames()
    }

    /// The vector last applied for `slot`.
    #[must_use]
    pub fn applied(&self, slot: PlayerSlot) -> ButtonVector {
        self.applied[slot.index()]
    }
}

impl InvariantChecker for LockstepStepper {
    fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let horizon = self.input_frame + self.input_delay as i32;
        if self.sim_frame > horizon {
            return Err(
                InvariantViolation::new("LockstepStepper", "sim_frame ran past local input")
                    .with_details(format!(
                        "sim_frame={}, input_frame={}, input_delay={}",
                        self.sim_frame, self.input_frame, self.input_delay
                    )),
            );
        }
        if self.buffer.len() > self.buffer.max_frames() {
            return Err(
                InvariantViolation::new("LockstepStepper", "buffer exceeds its cap").with_details(
                    format!("len={}, max={}", self.buffer.len(), self.buffer.max_frames()),
                ),
            );
        }
        if let Some(first) = self.buffer.first_frame() {
            if first < self.sim_frame {
                return Err(InvariantViolation::new(
                    "LockstepStepper",
                    "buffered frame below sim_frame",
                )
                .with_details(format!("first={}, sim_frame={}", first, self.sim_frame)));
            }
        }
        Ok(())
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
    use crate::buttons::Button;

    fn stepper() -> LockstepStepper {
        LockstepStepper::new(&LockstepConfig::default(), PlayerSlot::ONE)
    }

    fn steps(requests: &[NetplayRequest]) -> Vec<i32> {
        requests
            .iter()
            .filter_map(|r| match r {
                NetplayRequest::Step { frame } => Some(frame.as_i32()),
                _ => None,
            })
            .collect()
    }

    /// One advance with neutral remote input, as solo mode does it.
    fn advance_solo(stepper: &mut LockstepStepper, local: ButtonVector, out: &mut Vec<NetplayRequest>) {
        let frame = stepper.capture_local(local).unwrap();
        stepper
            .store_remote(frame, PlayerSlot::TWO, ButtonVector::NEUTRAL)
            .unwrap();
        stepper.drain(out);
    }

    #[test]
    fn seeded_frames_apply_on_first_advance() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        advance_solo(&mut stepper, ButtonVector::NEUTRAL, &mut out);
        assert_eq!(steps(&out), vec![0, 1, 2]);
        assert_eq!(stepper.sim_frame(), Frame::new(3));
        assert_eq!(stepper.input_frame(), Frame::new(1));
    }

    #[test]
    fn local_press_is_applied_after_delay() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        advance_solo(&mut stepper, ButtonVector::NEUTRAL.with(Button::B), &mut out);
        assert_eq!(
            out,
            vec![
                NetplayRequest::Step { frame: Frame::new(0) },
                NetplayRequest::Step { frame: Frame::new(1) },
                NetplayRequest::ButtonDown {
                    slot: PlayerSlot::ONE,
                    button: Button::B
                },
                NetplayRequest::Step { frame: Frame::new(2) },
            ]
        );
    }

    #[test]
    fn edges_slot_one_before_slot_two() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        stepper.drain(&mut out);
        out.clear();

        let frame = stepper
            .capture_local(ButtonVector::NEUTRAL.with(Button::Right))
            .unwrap();
        stepper
            .store_remote(frame, PlayerSlot::TWO, ButtonVector::NEUTRAL.with(Button::A))
            .unwrap();
        stepper.drain(&mut out);
        assert_eq!(
            out,
            vec![
                NetplayRequest::ButtonDown {
                    slot: PlayerSlot::ONE,
                    button: Button::Right
                },
                NetplayRequest::ButtonDown {
                    slot: PlayerSlot::TWO,
                    button: Button::A
                },
                NetplayRequest::Step { frame: Frame::new(2) },
            ]
        );
    }

    #[test]
    fn missing_remote_input_stalls() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        let frame = stepper.capture_local(ButtonVector::NEUTRAL).unwrap();
        let outcome = stepper.drain(&mut out);
        assert_eq!(outcome, DrainOutcome { steps: 2, stalled_on: Some(frame) });

        out.clear();
        let outcome = stepper.drain(&mut out);
        assert_eq!(outcome.steps, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn step_cap_is_shared_across_one_tick() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        for _ in 0..6 {
            advance_solo(&mut stepper, ButtonVector::NEUTRAL, &mut out);
        }
        assert_eq!(steps(&out).len(), 4);

        out.clear();
        stepper.begin_tick();
        stepper.drain(&mut out);
        assert_eq!(steps(&out), vec![4, 5, 6, 7]);
    }

    #[test]
    fn stale_and_far_frames_are_rejected() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        advance_solo(&mut stepper, ButtonVector::NEUTRAL, &mut out);

        let err = stepper
            .store_remote(Frame::new(1), PlayerSlot::TWO, ButtonVector::NEUTRAL)
            .unwrap_err();
        assert!(matches!(
            err,
            NetplayError::InputProtocol {
                kind: ProtocolViolationKind::StaleFrame { .. }
            }
        ));

        let err = stepper
            .store_remote(Frame::new(10_000), PlayerSlot::TWO, ButtonVector::NEUTRAL)
            .unwrap_err();
        assert!(matches!(
            err,
            NetplayError::InputProtocol {
                kind: ProtocolViolationKind::FrameTooFarAhead { .. }
            }
        ));
    }

    #[test]
    fn overflow_leaves_counters_unchanged() {
        let config = LockstepConfig {
            max_buffered_frames: 4,
            ..LockstepConfig::default()
        };
        let mut stepper = LockstepStepper::new(&config, PlayerSlot::ONE);
        // Seeded 0 and 1, local 2 and 3 fill the buffer.
        stepper.capture_local(ButtonVector::NEUTRAL).unwrap();
        stepper.capture_local(ButtonVector::NEUTRAL).unwrap();
        let err = stepper.capture_local(ButtonVector::NEUTRAL).unwrap_err();
        assert_eq!(err, NetplayError::BufferOverflow { buffered: 5, max: 4 });
        assert_eq!(stepper.input_frame(), Frame::new(2));
    }

    #[test]
    fn reset_releases_applied_buttons_once() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        stepper.begin_tick();
        advance_solo(&mut stepper, ButtonVector::NEUTRAL.with(Button::Up), &mut out);
        assert!(stepper.applied(PlayerSlot::ONE).get(Button::Up));

        out.clear();
        stepper.reset(&mut out);
        assert_eq!(
            out,
            vec![NetplayRequest::ButtonUp {
                slot: PlayerSlot::ONE,
                button: Button::Up
            }]
        );
        assert_eq!(stepper.sim_frame(), Frame::ZERO);
        assert_eq!(stepper.buffered_frames(), 2);

        out.clear();
        stepper.reset(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn invariants_hold_through_a_run() {
        let mut stepper = stepper();
        let mut out = Vec::new();
        for _ in 0..50 {
            stepper.begin_tick();
            advance_solo(&mut stepper, ButtonVector::NEUTRAL, &mut out);
            stepper.check_invariants().unwrap();
        }
        assert_eq!(stepper.sim_frame(), Frame::new(52));
    }
}
