//! Minimum-hold policies.
//!
//! A fixed-rate consumer samples buttons once per frame, so a tap shorter than
//! a frame could fall between two samples and never be seen. A hold policy
//! keeps a button logically pressed for a minimum time after its press edge,
//! delaying the release if every source lets go earlier.
//!
//! Two mechanisms exist side by side:
//!
//! | Policy | Clock | Used by |
//! |--------|-------|---------|
//! | [`HoldPolicy::WallClock`] | `web_time::Instant` | controller clients sending discrete edges |
//! | [`HoldPolicy::FrameCount`] | simulation frames | the relay host and local lockstep capture |
//!
//! Frame counting keeps delayed releases on frame boundaries, so they stay in
//! step with the simulation; wall-clock timing is the only option for a
//! client that has no simulation of its own.

use smallvec::SmallVec;
use web_time::{Duration, Instant};

use crate::buttons::Button;

/// How long a button stays pressed at minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldPolicy {
    /// Releases are applied as soon as they happen.
    #[default]
    None,
    /// Releases are delayed until this long after the press edge.
    WallClock(Duration),
    /// Releases are delayed until this many frames after the press edge.
    FrameCount(u32),
}

impl HoldPolicy {
    /// 60 ms, the policy of controller clients.
    pub const CONTROLLER_CLIENT: HoldPolicy = HoldPolicy::WallClock(Duration::from_millis(60));
    /// 4 frames, the policy of the relay host.
    pub const RELAY: HoldPolicy = HoldPolicy::FrameCount(4);
    /// 1 frame, the policy of local lockstep capture: a tap between two
    /// captures is still seen by one frame.
    pub const LOCAL_CAPTURE: HoldPolicy = HoldPolicy::FrameCount(1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stamp {
    At(Instant),
    Frame(u64),
}

/// Per-button press stamps and pending releases for one controller.
///
/// Wall-clock stamps need a `now`; callers without a clock pass `None`,
/// which makes a wall-clock policy release immediately.
#[derive(Debug, Clone)]
pub(crate) struct HoldTracker {
    policy: HoldPolicy,
    frame: u64,
    pressed_at: [Option<Stamp>; Button::COUNT],
    release_due: [Option<Stamp>; Button::COUNT],
}

impl HoldTracker {
    pub(crate) fn new(policy: HoldPolicy) -> Self {
        Self {
            policy,
            frame: 0,
            pressed_at: [None; Button::COUNT],
            release_due: [None; Button::COUNT],
        }
    }

    pub(crate) const fn policy(&self) -> HoldPolicy {
        self.policy
    }

    fn stamp(&self, now: Option<Instant>) -> Option<Stamp> {
        match self.policy {
            HoldPolicy::None => None,
            HoldPolicy::WallClock(_) => now.map(Stamp::At),
            HoldPolicy::FrameCount(_) => Some(Stamp::Frame(self.frame)),
        }
    }

    /// Records a press edge and cancels any pending release of `button`.
    pub(crate) fn pressed(&mut self, button: Button, now: Option<Instant>) {
        let i = button.index();
        self.pressed_at[i] = self.stamp(now);
        self.release_due[i] = None;
    }

    /// Returns `true` if the release of `button` may be applied now.
    /// Otherwise the release is scheduled and `false` is returned.
    pub(crate) fn released(&mut self, button: Button, now: Option<Instant>) -> bool {
        let i = button.index();
        let due = match (self.policy, self.pressed_at[i]) {
            (HoldPolicy::WallClock(min), Some(Stamp::At(start))) => {
                let due = start + min;
                now.filter(|now| *now < due).map(|_| Stamp::At(due))
            },
            (HoldPolicy::FrameCount(min), Some(Stamp::Frame(start))) => {
                let due = start.saturating_add(u64::from(min));
                (self.frame < due).then_some(Stamp::Frame(due))
            },
            _ => None,
        };
        match due {
            Some(due) => {
                self.release_due[i] = Some(due);
                false
            },
            None => {
                self.forget(button);
                true
            },
        }
    }

    pub(crate) fn is_pending(&self, button: Button) -> bool {
        self.release_due[button.index()].is_some()
    }

    /// Moves the frame clock forward by one simulation frame.
    pub(crate) fn advance_frame(&mut self) {
        self.frame = self.frame.saturating_add(1);
    }

    /// Removes and returns every pending release whose time has come, in
    /// canonical button order.
    pub(crate) fn take_due(&mut self, now: Option<Instant>) -> SmallVec<[Button; Button::COUNT]> {
        let mut due = SmallVec::new();
        for button in Button::ALL {
            let ready = match self.release_due[button.index()] {
                Some(Stamp::At(at)) => now.is_some_and(|now| now >= at),
                Some(Stamp::Frame(frame)) => self.frame >= frame,
                None => false,
            };
            if ready {
                self.forget(button);
                due.push(button);
            }
        }
        due
    }

    pub(crate) fn forget(&mut self, button: Button) {
        let i = button.index();
        self.pressed_at[i] = None;
        self.release_due[i] = None;
    }

    pub(crate) fn clear(&mut self) {
        self.pressed_at = [None; Button::COUNT];
        self.release_due = [None; Button::COUNT];
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

    #[test]
    fn frame_policy_delays_short_press() {
        let mut hold = HoldTracker::new(HoldPolicy::FrameCount(4));
        hold.pressed(Button::A, None);
        hold.advance_frame();
        assert!(!hold.released(Button::A, None));
        assert!(hold.is_pending(Button::A));

        hold.advance_frame();
        hold.advance_frame();
        assert!(hold.take_due(None).is_empty());
        hold.advance_frame();
        assert_eq!(hold.take_due(None).as_slice(), &[Button::A]);
        assert!(!hold.is_pending(Button::A));
    }

    #[test]
    fn frame_policy_releases_long_press_immediately() {
        let mut hold = HoldTracker::new(HoldPolicy::FrameCount(2));
        hold.pressed(Button::B, None);
        hold.advance_frame();
        hold.advance_frame();
        assert!(hold.released(Button::B, None));
        assert!(!hold.is_pending(Button::B));
    }

    #[test]
    fn wall_clock_policy_schedules_at_press_plus_minimum() {
        let start = Instant::now();
        let mut hold = HoldTracker::new(HoldPolicy::WallClock(Duration::from_millis(60)));
        hold.pressed(Button::Up, Some(start));
        assert!(!hold.released(Button::Up, Some(start + Duration::from_millis(10))));
        assert!(hold
            .take_due(Some(start + Duration::from_millis(59)))
            .is_empty());
        assert_eq!(
            hold.take_due(Some(start + Duration::from_millis(60)))
                .as_slice(),
            &[Button::Up]
        );
    }

    #[test]
    fn wall_clock_without_clock_releases_immediately() {
        let mut hold = HoldTracker::new(HoldPolicy::CONTROLLER_CLIENT);
        hold.pressed(Button::Start, None);
        assert!(hold.released(Button::Start, None));
    }

    #[test]
    fn new_press_cancels_pending_release() {
        let mut hold = HoldTracker::new(HoldPolicy::FrameCount(3));
        hold.pressed(Button::Left, None);
        assert!(!hold.released(Button::Left, None));
        hold.pressed(Button::Left, None);
        assert!(!hold.is_pending(Button::Left));
        for _ in 0..5 {
            hold.advance_frame();
        }
        assert!(hold.take_due(None).is_empty());
    }

    #[test]
    fn no_policy_never_delays() {
        let mut hold = HoldTracker::new(HoldPolicy::None);
        hold.pressed(Button::A, Some(Instant::now()));
        assert!(hold.released(Button::A, Some(Instant::now())));
    }
}
