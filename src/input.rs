//! Multi-source input aggregation.
//!
//! A button can be held by several physical sources at once: a key, an
//! on-screen touch control, a gamepad button and a gamepad stick may all
//! press LEFT. [`InputAggregator`] keeps one [`PressSourceSet`] per button
//! and derives a single output [`ButtonVector`] from them:
//!
//! - the raw state of a button is "some source holds it";
//! - the output follows the raw state, except that a [`HoldPolicy`] may keep
//!   a button pressed for a minimum time after its press edge.
//!
//! Only output changes are reported, as `(Button, Edge)` pairs.

pub mod hold;
pub mod mapping;

use smallvec::SmallVec;
use tracing::trace;
use web_time::Instant;

use crate::buttons::{Button, ButtonVector, Edge};
use hold::{HoldPolicy, HoldTracker};

/// Output edges produced by one aggregator call, in canonical button order.
pub type ButtonChanges = SmallVec<[(Button, Edge); Button::COUNT]>;

/// A physical origin of button presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PressSource {
    /// A keyboard key.
    Keyboard,
    /// An on-screen touch button.
    Touch,
    /// A gamepad button.
    Gamepad,
    /// A gamepad stick or the on-screen joystick.
    JoystickAxis,
}

impl PressSource {
    /// Every source.
    pub const ALL: [PressSource; 4] = [
        PressSource::Keyboard,
        PressSource::Touch,
        PressSource::Gamepad,
        PressSource::JoystickAxis,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// The set of sources currently holding one button.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PressSourceSet(u8);

impl PressSourceSet {
    /// The empty set.
    pub const EMPTY: PressSourceSet = PressSourceSet(0);

    /// Adds `source`. Returns `true` if it was not present.
    pub fn insert(&mut self, source: PressSource) -> bool {
        let added = !self.contains(source);
        self.0 |= source.bit();
        added
    }

    /// Removes `source`. Returns `true` if it was present.
    pub fn remove(&mut self, source: PressSource) -> bool {
        let removed = self.contains(source);
        self.0 &= !source.bit();
        removed
    }

    /// Returns `true` if `source` holds the button.
    #[must_use]
    pub const fn contains(&self, source: PressSource) -> bool {
        self.0 & source.bit() != 0
    }

    /// Returns `true` if no source holds the button.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of sources holding the button.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates over the sources in the set.
    pub fn iter(&self) -> impl Iterator<Item = PressSource> {
        let set = *self;
        PressSource::ALL.into_iter().filter(move |s| set.contains(*s))
    }
}

/// Merges press events from several sources into one controller.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{Button, Edge, HoldPolicy, InputAggregator, PressSource};
/// use web_time::Instant;
///
/// let mut input = InputAggregator::new(HoldPolicy::None);
/// let now = Instant::now();
///
/// assert_eq!(input.set_source(Button::Left, PressSource::Keyboard, true, now), Some(Edge::Pressed));
/// // A second source holding the same button changes nothing.
/// assert_eq!(input.set_source(Button::Left, PressSource::Touch, true, now), None);
/// assert_eq!(input.set_source(Button::Left, PressSource::Keyboard, false, now), None);
/// // Only the last release is an edge.
/// assert_eq!(input.set_source(Button::Left, PressSource::Touch, false, now), Some(Edge::Released));
/// ```
#[derive(Debug, Clone)]
pub struct InputAggregator {
    sources: [PressSourceSet; Button::COUNT],
    output: ButtonVector,
    hold: HoldTracker,
}

impl InputAggregator {
    /// Creates an aggregator with every button released.
    #[must_use]
    pub fn new(policy: HoldPolicy) -> Self {
        Self {
            sources: [PressSourceSet::EMPTY; Button::COUNT],
            output: ButtonVector::NEUTRAL,
            hold: HoldTracker::new(policy),
        }
    }

    /// The minimum-hold policy in effect.
    #[must_use]
    pub const fn policy(&self) -> HoldPolicy {
        self.hold.policy()
    }

    /// Records that `source` pressed or released `button`.
    ///
    /// Returns the output edge, if the output changed. Repeating a call with
    /// the same arguments never produces an edge.
    pub fn set_source(
        &mut self,
        button: Button,
        source: PressSource,
        pressed: bool,
        now: Instant,
    ) -> Option<Edge> {
        let set = &mut self.sources[button.index()];
        let was_held = !set.is_empty();
        if pressed {
            set.insert(source);
        } else {
            set.remove(source);
        }
        let held = !set.is_empty();

        match (was_held, held) {
            (false, true) => {
                self.hold.pressed(button, Some(now));
                self.emit(button, true)
            },
            (true, false) => {
                if self.hold.released(button, Some(now)) {
                    self.emit(button, false)
                } else {
                    trace!(%button, "release held back by minimum hold");
                    None
                }
            },
            _ => None,
        }
    }

    /// Applies the same change to several buttons, for combo controls.
    pub fn set_sources(
        &mut self,
        buttons: &[Button],
        source: PressSource,
        pressed: bool,
        now: Instant,
    ) -> ButtonChanges {
        let mut changes = ButtonChanges::new();
        for &button in buttons {
            if let Some(edge) = self.set_source(button, source, pressed, now) {
                changes.push((button, edge));
            }
        }
        changes
    }

    /// Drops `source` from every button, e.g. when a gamepad disconnects.
    /// The resulting releases obey the hold policy.
    pub fn release_source(&mut self, source: PressSource, now: Instant) -> ButtonChanges {
        let mut changes = ButtonChanges::new();
        for button in Button::ALL {
            if self.sources[button.index()].contains(source) {
                if let Some(edge) = self.set_source(button, source, false, now) {
                    changes.push((button, edge));
                }
            }
        }
        changes
    }

    /// Releases everything immediately, ignoring the hold policy.
    pub fn release_all(&mut self) -> ButtonChanges {
        self.sources = [PressSourceSet::EMPTY; Button::COUNT];
        self.hold.clear();
        let changes = self
            .output
            .edges_to(&ButtonVector::NEUTRAL)
            .collect::<ButtonChanges>();
        self.output = ButtonVector::NEUTRAL;
        changes
    }

    /// Applies wall-clock releases that have become due.
    pub fn poll(&mut self, now: Instant) -> ButtonChanges {
        let due = self.hold.take_due(Some(now));
        self.apply_due(&due)
    }

    /// Advances the frame clock of a frame-count policy by one frame and
    /// applies releases that have become due.
    pub fn advance_frame(&mut self) -> ButtonChanges {
        self.hold.advance_frame();
        let due = self.hold.take_due(None);
        self.apply_due(&due)
    }

    /// The output vector.
    #[must_use]
    pub const fn buttons(&self) -> ButtonVector {
        self.output
    }

    /// Returns `true` if some source currently holds `button`, regardless of
    /// the hold policy.
    #[must_use]
    pub fn is_raw_pressed(&self, button: Button) -> bool {
        !self.sources[button.index()].is_empty()
    }

    /// The sources currently holding `button`.
    #[must_use]
    pub fn sources(&self, button: Button) -> PressSourceSet {
        self.sources[button.index()]
    }

    /// Returns `true` if a release of `button` is waiting for the minimum hold.
    #[must_use]
    pub fn has_pending_release(&self, button: Button) -> bool {
        self.hold.is_pending(button)
    }

    fn apply_due(&mut self, due: &[Button]) -> ButtonChanges {
        due.iter()
            .filter_map(|&button| self.emit(button, false).map(|edge| (button, edge)))
            .collect()
    }

    fn emit(&mut self, button: Button, pressed: bool) -> Option<Edge> {
        if self.output.get(button) == pressed {
            return None;
        }
        self.output.set(button, pressed);
        Some(Edge::to(pressed))
    }
}

impl Default for InputAggregator {
    fn default() -> Self {
        Self::new(HoldPolicy::None)
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
    use web_time::Duration;

    fn ms(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    #[test]
    fn source_set_tracks_membership() {
        let mut set = PressSourceSet::default();
        assert!(set.insert(PressSource::Gamepad));
        assert!(!set.insert(PressSource::Gamepad));
        assert!(set.insert(PressSource::Touch));
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![PressSource::Touch, PressSource::Gamepad]
        );
        assert!(set.remove(PressSource::Gamepad));
        assert!(!set.remove(PressSource::Gamepad));
        assert!(set.remove(PressSource::Touch));
        assert!(set.is_empty());
    }

    #[test]
    fn repeated_identical_calls_are_no_ops() {
        let now = Instant::now();
        let mut input = InputAggregator::default();
        assert_eq!(
            input.set_source(Button::A, PressSource::Keyboard, true, now),
            Some(Edge::Pressed)
        );
        assert_eq!(
            input.set_source(Button::A, PressSource::Keyboard, true, now),
            None
        );
        assert_eq!(
            input.set_source(Button::A, PressSource::Keyboard, false, now),
            Some(Edge::Released)
        );
        assert_eq!(
            input.set_source(Button::A, PressSource::Keyboard, false, now),
            None
        );
    }

    #[test]
    fn wall_clock_hold_keeps_short_tap_pressed() {
        let start = Instant::now();
        let mut input = InputAggregator::new(HoldPolicy::CONTROLLER_CLIENT);

        input.set_source(Button::B, PressSource::Touch, true, start);
        assert_eq!(
            input.set_source(Button::B, PressSource::Touch, false, ms(start, 10)),
            None
        );
        assert!(input.buttons().get(Button::B));
        assert!(!input.is_raw_pressed(Button::B));
        assert!(input.has_pending_release(Button::B));

        assert!(input.poll(ms(start, 50)).is_empty());
        assert_eq!(
            input.poll(ms(start, 60)).as_slice(),
            &[(Button::B, Edge::Released)]
        );
        assert!(!input.buttons().get(Button::B));
    }

    #[test]
    fn wall_clock_hold_releases_long_press_immediately() {
        let start = Instant::now();
        let mut input = InputAggregator::new(HoldPolicy::CONTROLLER_CLIENT);
        input.set_source(Button::B, PressSource::Touch, true, start);
        assert_eq!(
            input.set_source(Button::B, PressSource::Touch, false, ms(start, 100)),
            Some(Edge::Released)
        );
    }

    #[test]
    fn repress_cancels_pending_release() {
        let start = Instant::now();
        let mut input = InputAggregator::new(HoldPolicy::CONTROLLER_CLIENT);
        input.set_source(Button::Up, PressSource::Keyboard, true, start);
        input.set_source(Button::Up, PressSource::Keyboard, false, ms(start, 5));
        assert_eq!(
            input.set_source(Button::Up, PressSource::Keyboard, true, ms(start, 20)),
            None
        );
        assert!(!input.has_pending_release(Button::Up));
        assert!(input.poll(ms(start, 500)).is_empty());
        assert!(input.buttons().get(Button::Up));
    }

    #[test]
    fn frame_hold_releases_on_advance() {
        let now = Instant::now();
        let mut input = InputAggregator::new(HoldPolicy::LOCAL_CAPTURE);
        input.set_source(Button::Start, PressSource::Keyboard, true, now);
        assert_eq!(
            input.set_source(Button::Start, PressSource::Keyboard, false, now),
            None
        );
        assert!(input.buttons().get(Button::Start));
        assert_eq!(
            input.advance_frame().as_slice(),
            &[(Button::Start, Edge::Released)]
        );
    }

    #[test]
    fn release_source_only_touches_that_source() {
        let now = Instant::now();
        let mut input = InputAggregator::default();
        input.set_source(Button::A, PressSource::Gamepad, true, now);
        input.set_source(Button::B, PressSource::Gamepad, true, now);
        input.set_source(Button::B, PressSource::Keyboard, true, now);

        let changes = input.release_source(PressSource::Gamepad, now);
        assert_eq!(changes.as_slice(), &[(Button::A, Edge::Released)]);
        assert!(input.buttons().get(Button::B));
        assert!(input.sources(Button::B).contains(PressSource::Keyboard));
    }

    #[test]
    fn release_all_ignores_hold_policy() {
        let now = Instant::now();
        let mut input = InputAggregator::new(HoldPolicy::FrameCount(10));
        input.set_sources(&[Button::A, Button::Right], PressSource::Touch, true, now);
        input.set_source(Button::A, PressSource::Touch, false, now);
        assert!(input.has_pending_release(Button::A));

        let changes = input.release_all();
        assert_eq!(
            changes.as_slice(),
            &[(Button::A, Edge::Released), (Button::Right, Edge::Released)]
        );
        assert!(input.buttons().is_neutral());
        assert!(!input.has_pending_release(Button::A));
        assert!(input.advance_frame().is_empty());
    }

    #[test]
    fn combo_presses_report_each_new_button() {
        let now = Instant::now();
        let mut input = InputAggregator::default();
        input.set_source(Button::A, PressSource::Keyboard, true, now);
        let changes = input.set_sources(&[Button::A, Button::B], PressSource::Touch, true, now);
        assert_eq!(changes.as_slice(), &[(Button::B, Edge::Pressed)]);
    }
}
