//! Default device tables for platform adapters.
//!
//! Nothing here touches a device. An adapter reads its platform events,
//! looks the codes up in these tables and feeds the results to an
//! [`InputAggregator`](crate::InputAggregator) with the matching
//! [`PressSource`](crate::PressSource).

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::buttons::Button;

/// Direction changes reported by [`AxisState`] and [`GamepadPoller`].
pub type DirectionChanges = SmallVec<[(Button, bool); 4]>;

/// Keyboard code to button table.
///
/// Codes are layout independent key names (`"KeyZ"`, `"ArrowUp"`), as
/// reported by browsers and most windowing libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    keys: BTreeMap<String, Button>,
}

impl KeyMap {
    /// A map without any binding.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: BTreeMap::new(),
        }
    }

    /// Binds `code` to `button`, replacing any previous binding of `code`.
    #[must_use]
    pub fn bind(mut self, code: impl Into<String>, button: Button) -> Self {
        self.keys.insert(code.into(), button);
        self
    }

    /// The button bound to `code`.
    #[must_use]
    pub fn button(&self, code: &str) -> Option<Button> {
        self.keys.get(code).copied()
    }

    /// Every binding, ordered by key code.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, Button)> + '_ {
        self.keys.iter().map(|(code, button)| (code.as_str(), *button))
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::empty()
            .bind("ArrowUp", Button::Up)
            .bind("ArrowDown", Button::Down)
            .bind("ArrowLeft", Button::Left)
            .bind("ArrowRight", Button::Right)
            .bind("KeyZ", Button::A)
            .bind("KeyX", Button::B)
            .bind("Enter", Button::Start)
            .bind("ShiftLeft", Button::Select)
            .bind("ShiftRight", Button::Select)
    }
}

/// Gamepad button index to button table, using the standard gamepad layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamepadButtonMap {
    buttons: BTreeMap<usize, Button>,
}

impl GamepadButtonMap {
    /// Binds the gamepad button at `index` to `button`.
    #[must_use]
    pub fn bind(mut self, index: usize, button: Button) -> Self {
        self.buttons.insert(index, button);
        self
    }

    /// The button bound to gamepad button `index`.
    #[must_use]
    pub fn button(&self, index: usize) -> Option<Button> {
        self.buttons.get(&index).copied()
    }

    /// Every binding, ordered by gamepad index.
    pub fn bindings(&self) -> impl Iterator<Item = (usize, Button)> + '_ {
        self.buttons.iter().map(|(index, button)| (*index, *button))
    }
}

impl Default for GamepadButtonMap {
    fn default() -> Self {
        Self {
            buttons: BTreeMap::new(),
        }
        .bind(0, Button::A)
        .bind(1, Button::B)
        .bind(8, Button::Select)
        .bind(9, Button::Start)
        .bind(12, Button::Up)
        .bind(13, Button::Down)
        .bind(14, Button::Left)
        .bind(15, Button::Right)
    }
}

/// Which of the four directions a stick points to. Up is negative `y`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Directions {
    /// Pointing up.
    pub up: bool,
    /// Pointing down.
    pub down: bool,
    /// Pointing left.
    pub left: bool,
    /// Pointing right.
    pub right: bool,
}

impl Directions {
    /// Classifies a normalized stick position.
    #[must_use]
    pub fn from_axes(x: f32, y: f32, threshold: f32) -> Self {
        Self {
            up: y < -threshold,
            down: y > threshold,
            left: x < -threshold,
            right: x > threshold,
        }
    }

    /// Returns whether the direction `button` is active. Non-direction
    /// buttons are never active.
    #[must_use]
    pub const fn get(&self, button: Button) -> bool {
        match button {
            Button::Up => self.up,
            Button::Down => self.down,
            Button::Left => self.left,
            Button::Right => self.right,
            _ => false,
        }
    }

    /// Directions that differ between `self` and `next`, with their new state.
    #[must_use]
    pub fn changes_to(&self, next: &Directions) -> DirectionChanges {
        Button::DIRECTIONS
            .into_iter()
            .filter(|b| self.get(*b) != next.get(*b))
            .map(|b| (b, next.get(b)))
            .collect()
    }
}

/// Edge detection for an analog gamepad stick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AxisState {
    current: Directions,
}

impl AxisState {
    /// Normalized deflection past which a direction counts as pressed.
    pub const THRESHOLD: f32 = 0.5;

    /// Feeds a stick reading in `-1.0..=1.0` and returns the changed
    /// directions.
    pub fn update(&mut self, x: f32, y: f32) -> DirectionChanges {
        let next = Directions::from_axes(x, y, Self::THRESHOLD);
        let changes = self.current.changes_to(&next);
        self.current = next;
        changes
    }

    /// The current directions.
    #[must_use]
    pub const fn directions(&self) -> Directions {
        self.current
    }
}

/// Edge detection for one polled gamepad: buttons through a
/// [`GamepadButtonMap`] and the left stick through an [`AxisState`].
#[derive(Debug, Clone, Default)]
pub struct GamepadPoller {
    map: GamepadButtonMap,
    pressed: BTreeMap<usize, bool>,
    axes: AxisState,
}

impl GamepadPoller {
    /// Creates a poller with a custom button map.
    #[must_use]
    pub fn new(map: GamepadButtonMap) -> Self {
        Self {
            map,
            pressed: BTreeMap::new(),
            axes: AxisState::default(),
        }
    }

    /// Feeds one snapshot of the gamepad and returns every button whose
    /// state changed, mapped buttons first, stick directions last.
    ///
    /// `buttons[i]` is the state of gamepad button `i`; missing indices read
    /// as released.
    pub fn poll(&mut self, buttons: &[bool], stick: (f32, f32)) -> SmallVec<[(Button, bool); 12]> {
        let mut changes = SmallVec::new();
        for (index, button) in self.map.bindings() {
            let now = buttons.get(index).copied().unwrap_or(false);
            let before = self.pressed.insert(index, now).unwrap_or(false);
            if now != before {
                changes.push((button, now));
            }
        }
        changes.extend(self.axes.update(stick.0, stick.1));
        changes
    }

    /// Forgets everything, e.g. after the gamepad disconnected. The caller
    /// releases the gamepad source on its aggregator.
    pub fn reset(&mut self) {
        self.pressed.clear();
        self.axes = AxisState::default();
    }
}

/// Fraction of the radius inside which the on-screen joystick reads neutral.
pub const JOYSTICK_DEAD_ZONE: f32 = 0.2;

/// Fraction of the radius past which an on-screen joystick direction counts
/// as pressed.
pub const JOYSTICK_THRESHOLD: f32 = 0.35;

/// Clamps a knob offset to the joystick radius.
#[must_use]
pub fn clamp_knob(x: f32, y: f32, radius: f32) -> (f32, f32) {
    let radius = effective_radius(radius);
    let distance = x.hypot(y);
    if distance > radius {
        let scale = radius / distance;
        (x * scale, y * scale)
    } else {
        (x, y)
    }
}

/// Classifies an on-screen joystick knob offset (in pixels from the centre)
/// into directions.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::input::mapping::joystick_directions;
///
/// let d = joystick_directions(-40.0, 0.0, 50.0);
/// assert!(d.left && !d.right && !d.up);
/// // Inside the dead zone nothing is pressed.
/// assert_eq!(joystick_directions(5.0, -5.0, 50.0), Default::default());
/// ```
#[must_use]
pub fn joystick_directions(x: f32, y: f32, radius: f32) -> Directions {
    let (x, y) = clamp_knob(x, y, radius);
    let radius = effective_radius(radius);
    if x.hypot(y) < radius * JOYSTICK_DEAD_ZONE {
        return Directions::default();
    }
    Directions::from_axes(x / radius, y / radius, JOYSTICK_THRESHOLD)
}

fn effective_radius(radius: f32) -> f32 {
    if radius > 0.0 {
        radius
    } else {
        1.0
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
    fn default_key_map() {
        let keys = KeyMap::default();
        assert_eq!(keys.button("ArrowLeft"), Some(Button::Left));
        assert_eq!(keys.button("KeyZ"), Some(Button::A));
        assert_eq!(keys.button("KeyX"), Some(Button::B));
        assert_eq!(keys.button("Enter"), Some(Button::Start));
        assert_eq!(keys.button("ShiftRight"), Some(Button::Select));
        assert_eq!(keys.button("KeyQ"), None);
    }

    #[test]
    fn rebinding_replaces_code() {
        let keys = KeyMap::default().bind("KeyZ", Button::B);
        assert_eq!(keys.button("KeyZ"), Some(Button::B));
    }

    #[test]
    fn default_gamepad_map() {
        let map = GamepadButtonMap::default();
        assert_eq!(map.button(0), Some(Button::A));
        assert_eq!(map.button(9), Some(Button::Start));
        assert_eq!(map.button(14), Some(Button::Left));
        assert_eq!(map.button(3), None);
        assert_eq!(map.bindings().count(), 8);
    }

    #[test]
    fn axis_reports_only_changes() {
        let mut axes = AxisState::default();
        assert_eq!(axes.update(-0.9, 0.0).as_slice(), &[(Button::Left, true)]);
        assert!(axes.update(-0.8, 0.1).is_empty());
        assert_eq!(
            axes.update(0.0, -0.7).as_slice(),
            &[(Button::Up, true), (Button::Left, false)]
        );
        // Exactly at the threshold is not pressed.
        assert_eq!(axes.update(0.0, -0.5).as_slice(), &[(Button::Up, false)]);
    }

    #[test]
    fn gamepad_poller_diffs_snapshots() {
        let mut pad = GamepadPoller::default();
        let mut buttons = [false; 16];
        buttons[0] = true;
        assert_eq!(pad.poll(&buttons, (0.0, 0.0)).as_slice(), &[(Button::A, true)]);
        assert!(pad.poll(&buttons, (0.0, 0.0)).is_empty());
        buttons[0] = false;
        assert_eq!(
            pad.poll(&buttons, (0.0, 0.9)).as_slice(),
            &[(Button::A, false), (Button::Down, true)]
        );
        // A short snapshot reads missing buttons as released.
        assert!(pad.poll(&[], (0.0, 0.9)).is_empty());
    }

    #[test]
    fn joystick_dead_zone_and_threshold() {
        assert_eq!(joystick_directions(9.0, 0.0, 50.0), Directions::default());
        // Outside the dead zone but under the threshold.
        assert_eq!(joystick_directions(15.0, 0.0, 50.0), Directions::default());
        let d = joystick_directions(30.0, 30.0, 50.0);
        assert!(d.right && d.down);
        assert!(!d.left && !d.up);
    }

    #[test]
    fn knob_is_clamped_to_radius() {
        let (x, y) = clamp_knob(300.0, 400.0, 50.0);
        assert!((x - 30.0).abs() < 1e-4);
        assert!((y - 40.0).abs() < 1e-4);
        assert_eq!(clamp_knob(3.0, 4.0, 50.0), (3.0, 4.0));
    }

    #[test]
    fn zero_radius_falls_back_to_unit() {
        let d = joystick_directions(0.0, -1.0, 0.0);
        assert!(d.up);
    }
}
