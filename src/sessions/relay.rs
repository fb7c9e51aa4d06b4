//! Host-side multiplexer from controller clients to player slots.

use std::fmt::Debug;

use tracing::{debug, info, trace};

use crate::buttons::{Button, ButtonVector, Edge};
use crate::error::{NetplayError, ProtocolViolationKind};
use crate::input::hold::{HoldPolicy, HoldTracker};
use crate::{Frame, NetplayRequest, PlayerSlot};

/// What an [`ControllerRelay::attach`] call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment<A> {
    /// The previous holder of the slot, which must be disconnected.
    pub evicted: Option<A>,
    /// `false` if the connection already held the slot.
    pub changed: bool,
}

/// Maps controller connections to the two player slots and applies their
/// discrete button events to the local simulation.
///
/// Each slot has at most one holder. Presses are applied at once; releases
/// are held back until the button has been down for `min_hold_frames`
/// simulation frames, counted by [`ControllerRelay::advance_frame`].
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{Button, ControllerRelay, Frame, NetplayRequest, PlayerSlot};
///
/// let mut relay = ControllerRelay::new(2);
/// let mut requests = Vec::new();
/// relay.attach("phone", PlayerSlot::ONE, &mut requests);
///
/// relay.apply_input(&"phone", Button::A, true, Some(PlayerSlot::ONE), &mut requests)?;
/// relay.apply_input(&"phone", Button::A, false, Some(PlayerSlot::ONE), &mut requests)?;
/// // The release waits for two frames.
/// assert_eq!(requests, vec![NetplayRequest::ButtonDown { slot: PlayerSlot::ONE, button: Button::A }]);
///
/// requests.clear();
/// relay.advance_frame(&mut requests);
/// relay.advance_frame(&mut requests);
/// assert_eq!(
///     requests,
///     vec![
///         NetplayRequest::Step { frame: Frame::new(0) },
///         NetplayRequest::Step { frame: Frame::new(1) },
///         NetplayRequest::ButtonUp { slot: PlayerSlot::ONE, button: Button::A },
///     ]
/// );
/// # Ok::<(), netplay_lockstep::NetplayError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ControllerRelay<A> {
    holders: [Option<A>; 2],
    pressed: [ButtonVector; 2],
    holds: [HoldTracker; 2],
    frame: Frame,
    min_hold_frames: u32,
}

impl<A> ControllerRelay<A>
where
    A: Clone + PartialEq + Debug,
{
    /// Creates a relay with both slots free.
    #[must_use]
    pub fn new(min_hold_frames: u32) -> Self {
        let policy = HoldPolicy::FrameCount(min_hold_frames);
        Self {
            holders: [None, None],
            pressed: [ButtonVector::NEUTRAL; 2],
            holds: [HoldTracker::new(policy), HoldTracker::new(policy)],
            frame: Frame::ZERO,
            min_hold_frames,
        }
    }

    /// Gives `slot` to `conn`.
    ///
    /// A previous holder of the slot is evicted and its buttons released. If
    /// `conn` held the other slot, it moves and its old slot is released.
    pub fn attach(
        &mut self,
        conn: A,
        slot: PlayerSlot,
        out: &mut Vec<NetplayRequest>,
    ) -> Attachment<A> {
        if self.holders[slot.index()].as_ref() == Some(&conn) {
            trace!(?conn, %slot, "repeated claim ignored");
            return Attachment {
                evicted: None,
                changed: false,
            };
        }
        if let Some(previous) = self.slot_of(&conn) {
            debug!(?conn, from = %previous, to = %slot, "controller changes slot");
            self.release_slot(previous, out);
            self.holders[previous.index()] = None;
        }
        let evicted = self.holders[slot.index()].take();
        if let Some(evicted) = &evicted {
            info!(?evicted, %slot, "controller evicted by a newer claim");
            self.release_slot(slot, out);
        }
        info!(?conn, %slot, "controller attached");
        self.holders[slot.index()] = Some(conn);
        Attachment {
            evicted,
            changed: true,
        }
    }

    /// Removes `conn` and releases every button its slot holds.
    /// Returns the slot it held.
    pub fn detach(&mut self, conn: &A, out: &mut Vec<NetplayRequest>) -> Option<PlayerSlot> {
        let slot = self.slot_of(conn)?;
        self.release_slot(slot, out);
        self.holders[slot.index()] = None;
        info!(?conn, %slot, "controller detached");
        Some(slot)
    }

    /// Applies a discrete button event from `conn`.
    ///
    /// `claimed` is the slot the message names, if any; it must agree with
    /// the slot `conn` holds. Returns the edge that was requested, if any.
    ///
    /// # Errors
    /// - [`ProtocolViolationKind::NotAttached`] if `conn` holds no slot.
    /// - [`ProtocolViolationKind::WrongSlot`] if `claimed` names the other slot.
    pub fn apply_input(
        &mut self,
        conn: &A,
        button: Button,
        pressed: bool,
        claimed: Option<PlayerSlot>,
        out: &mut Vec<NetplayRequest>,
    ) -> Result<Option<Edge>, NetplayError> {
        let slot = self.slot_of(conn).ok_or(ProtocolViolationKind::NotAttached)?;
        if let Some(actual) = claimed.filter(|claimed| *claimed != slot) {
            return Err(ProtocolViolationKind::WrongSlot {
                expected: slot,
                actual,
            }
            .into());
        }

        let held = self.pressed[slot.index()].get(button);
        let hold = &mut self.holds[slot.index()];
        match (pressed, held) {
            (true, true) => {
                hold.pressed(button, None);
                Ok(None)
            },
            (true, false) => {
                hold.pressed(button, None);
                self.pressed[slot.index()].set(button, true);
                out.push(NetplayRequest::ButtonDown { slot, button });
                Ok(Some(Edge::Pressed))
            },
            (false, false) => Ok(None),
            (false, true) => {
                if hold.released(button, None) {
                    self.pressed[slot.index()].set(button, false);
                    out.push(NetplayRequest::ButtonUp { slot, button });
                    Ok(Some(Edge::Released))
                } else {
                    trace!(%slot, %button, "relay release held back");
                    Ok(None)
                }
            },
        }
    }

    /// Requests one simulation step, then applies releases that became due.
    pub fn advance_frame(&mut self, out: &mut Vec<NetplayRequest>) {
        out.push(NetplayRequest::Step { frame: self.frame });
        self.frame += 1;
        for slot in PlayerSlot::ALL {
            let hold = &mut self.holds[slot.index()];
            hold.advance_frame();
            for button in hold.take_due(None) {
                if self.pressed[slot.index()].get(button) {
                    self.pressed[slot.index()].set(button, false);
                    out.push(NetplayRequest::ButtonUp { slot, button });
                }
            }
        }
    }

    /// Releases every held button of both slots and clears hold tracking.
    /// Attachments are kept.
    pub fn release_all(&mut self, out: &mut Vec<NetplayRequest>) {
        for slot in PlayerSlot::ALL {
            self.release_slot(slot, out);
        }
    }

    /// Like [`ControllerRelay::release_all`], and restarts the frame count.
    pub fn reset(&mut self, out: &mut Vec<NetplayRequest>) {
        self.release_all(out);
        self.frame = Frame::ZERO;
    }

    fn release_slot(&mut self, slot: PlayerSlot, out: &mut Vec<NetplayRequest>) {
        let held = &mut self.pressed[slot.index()];
        out.extend(
            held.edges_to(&ButtonVector::NEUTRAL)
                .map(|(button, edge)| NetplayRequest::edge(slot, button, edge)),
        );
        *held = ButtonVector::NEUTRAL;
        self.holds[slot.index()].clear();
    }

    /// The slot held by `conn`.
    #[must_use]
    pub fn slot_of(&self, conn: &A) -> Option<PlayerSlot> {
        PlayerSlot::ALL
            .into_iter()
            .find(|slot| self.holders[slot.index()].as_ref() == Some(conn))
    }

    /// The connection holding `slot`.
    #[must_use]
    pub fn holder(&self, slot: PlayerSlot) -> Option<&A> {
        self.holders[slot.index()].as_ref()
    }

    /// Buttons currently applied for `slot`.
    #[must_use]
    pub fn pressed(&self, slot: PlayerSlot) -> ButtonVector {
        self.pressed[slot.index()]
    }

    /// Returns `true` if a release of `button` on `slot` waits for the minimum hold.
    #[must_use]
    pub fn has_pending_release(&self, slot: PlayerSlot, button: Button) -> bool {
        self.holds[slot.index()].is_pending(button)
    }

    /// The next frame [`ControllerRelay::advance_frame`] will request.
    #[must_use]
    pub const fn frame(&self) -> Frame {
        self.frame
    }

    /// Minimum hold in frames.
    #[must_use]
    pub const fn min_hold_frames(&self) -> u32 {
        self.min_hold_frames
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

    const P1: PlayerSlot = PlayerSlot::ONE;
    const P2: PlayerSlot = PlayerSlot::TWO;

    fn down(slot: PlayerSlot, button: Button) -> NetplayRequest {
        NetplayRequest::ButtonDown { slot, button }
    }

    fn up(slot: PlayerSlot, button: Button) -> NetplayRequest {
        NetplayRequest::ButtonUp { slot, button }
    }

    fn ups(requests: &[NetplayRequest]) -> usize {
        requests
            .iter()
            .filter(|r| matches!(r, NetplayRequest::ButtonUp { .. }))
            .count()
    }

    #[test]
    fn tap_is_held_for_minimum_frames() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.apply_input(&1, Button::A, true, Some(P1), &mut out).unwrap();
        relay.apply_input(&1, Button::A, false, Some(P1), &mut out).unwrap();
        assert_eq!(out, vec![down(P1, Button::A)]);
        assert!(relay.has_pending_release(P1, Button::A));

        out.clear();
        for _ in 0..3 {
            relay.advance_frame(&mut out);
        }
        assert_eq!(ups(&out), 0);
        relay.advance_frame(&mut out);
        assert_eq!(out.last(), Some(&up(P1, Button::A)));
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn late_release_is_immediate() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.apply_input(&1, Button::B, true, None, &mut out).unwrap();
        for _ in 0..4 {
            relay.advance_frame(&mut out);
        }
        out.clear();
        let edge = relay.apply_input(&1, Button::B, false, None, &mut out).unwrap();
        assert_eq!(edge, Some(Edge::Released));
        assert_eq!(out, vec![up(P1, Button::B)]);
    }

    #[test]
    fn repress_cancels_pending_release() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.apply_input(&1, Button::A, true, None, &mut out).unwrap();
        relay.apply_input(&1, Button::A, false, None, &mut out).unwrap();
        let edge = relay.apply_input(&1, Button::A, true, None, &mut out).unwrap();
        assert_eq!(edge, None);
        assert!(!relay.has_pending_release(P1, Button::A));

        out.clear();
        for _ in 0..10 {
            relay.advance_frame(&mut out);
        }
        assert_eq!(ups(&out), 0);
        assert!(relay.pressed(P1).a);
    }

    #[test]
    fn release_of_unpressed_button_is_ignored() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P2, &mut out);
        let edge = relay.apply_input(&1, Button::Up, false, None, &mut out).unwrap();
        assert_eq!(edge, None);
        assert!(out.is_empty());
    }

    #[test]
    fn newer_claim_evicts_and_releases() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.apply_input(&1, Button::Left, true, None, &mut out).unwrap();
        out.clear();

        let attachment = relay.attach(2u32, P1, &mut out);
        assert_eq!(attachment.evicted, Some(1));
        assert!(attachment.changed);
        assert_eq!(out, vec![up(P1, Button::Left)]);
        assert_eq!(relay.holder(P1), Some(&2));
        assert_eq!(relay.slot_of(&1), None);
    }

    #[test]
    fn repeated_claim_changes_nothing() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.apply_input(&1, Button::A, true, None, &mut out).unwrap();
        out.clear();
        let attachment = relay.attach(1u32, P1, &mut out);
        assert!(!attachment.changed);
        assert!(out.is_empty());
        assert!(relay.pressed(P1).a);
    }

    #[test]
    fn claim_of_other_slot_moves_the_controller() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.apply_input(&1, Button::A, true, None, &mut out).unwrap();
        out.clear();
        let attachment = relay.attach(1u32, P2, &mut out);
        assert_eq!(attachment.evicted, None);
        assert_eq!(out, vec![up(P1, Button::A)]);
        assert_eq!(relay.slot_of(&1), Some(P2));
        assert_eq!(relay.holder(P1), None);
    }

    #[test]
    fn input_must_come_from_attached_slot() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        assert_eq!(
            relay.apply_input(&7u32, Button::A, true, None, &mut out),
            Err(NetplayError::InputProtocol {
                kind: ProtocolViolationKind::NotAttached
            })
        );
        relay.attach(7u32, P1, &mut out);
        assert_eq!(
            relay.apply_input(&7, Button::A, true, Some(P2), &mut out),
            Err(NetplayError::InputProtocol {
                kind: ProtocolViolationKind::WrongSlot {
                    expected: P1,
                    actual: P2
                }
            })
        );
        assert!(out.is_empty());
    }

    #[test]
    fn detach_releases_everything_and_clears_holds() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P2, &mut out);
        relay.apply_input(&1, Button::A, true, None, &mut out).unwrap();
        relay.apply_input(&1, Button::Start, true, None, &mut out).unwrap();
        relay.apply_input(&1, Button::A, false, None, &mut out).unwrap();
        out.clear();

        assert_eq!(relay.detach(&1, &mut out), Some(P2));
        assert_eq!(out, vec![up(P2, Button::A), up(P2, Button::Start)]);
        assert!(!relay.has_pending_release(P2, Button::A));
        assert_eq!(relay.detach(&1, &mut out), None);
    }

    #[test]
    fn reset_restarts_frames_and_keeps_holders() {
        let mut relay = ControllerRelay::new(4);
        let mut out = Vec::new();
        relay.attach(1u32, P1, &mut out);
        relay.advance_frame(&mut out);
        relay.reset(&mut out);
        assert_eq!(relay.frame(), Frame::ZERO);
        assert_eq!(relay.holder(P1), Some(&1));
    }
}
