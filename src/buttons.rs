//! The fixed controller layout shared by every player slot.
//!
//! A [`ButtonVector`] is always fully populated: every button is either
//! pressed or released, there are no partial vectors. Edges between two
//! vectors are produced in the canonical [`Button::ALL`] order so that two
//! peers applying the same vectors issue identical call sequences.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NetplayError, ProtocolViolationKind};

/// A single controller button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Button {
    /// The A button.
    A,
    /// The B button.
    B,
    /// The SELECT button.
    Select,
    /// The START button.
    Start,
    /// D-pad up.
    Up,
    /// D-pad down.
    Down,
    /// D-pad left.
    Left,
    /// D-pad right.
    Right,
}

impl Button {
    /// Number of buttons on the controller.
    pub const COUNT: usize = 8;

    /// Every button, in the order edges are applied.
    pub const ALL: [Button; Button::COUNT] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    /// The four directions of the d-pad.
    pub const DIRECTIONS: [Button; 4] = [Button::Up, Button::Down, Button::Left, Button::Right];

    /// Position of this button in [`Button::ALL`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The wire name of this button.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::Select => "SELECT",
            Self::Start => "START",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Button {
    type Err = NetplayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Button::ALL
            .into_iter()
            .find(|button| button.name() == s)
            .ok_or_else(|| {
                ProtocolViolationKind::UnknownButton {
                    name: s.to_owned(),
                }
                .into()
            })
    }
}

/// A press or release transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    /// The button went down.
    Pressed,
    /// The button went up.
    Released,
}

impl Edge {
    /// The edge that leads to `pressed`.
    #[inline]
    #[must_use]
    pub const fn to(pressed: bool) -> Self {
        if pressed {
            Self::Pressed
        } else {
            Self::Released
        }
    }

    /// Returns `true` for [`Edge::Pressed`].
    #[inline]
    #[must_use]
    pub const fn is_pressed(self) -> bool {
        matches!(self, Self::Pressed)
    }
}

/// The state of every button of one controller.
///
/// Serialized with upper-case button names (`{"A":false,"UP":true,...}`).
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{Button, ButtonVector, Edge};
///
/// let held = ButtonVector::NEUTRAL.with(Button::A).with(Button::Left);
/// let next = ButtonVector::NEUTRAL.with(Button::A).with(Button::Right);
///
/// let edges: Vec<_> = held.edges_to(&next).collect();
/// assert_eq!(edges, vec![(Button::Left, Edge::Released), (Button::Right, Edge::Pressed)]);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ButtonVector {
    /// The A button.
    pub a: bool,
    /// The B button.
    pub b: bool,
    /// D-pad up.
    pub up: bool,
    /// D-pad down.
    pub down: bool,
    /// D-pad left.
    pub left: bool,
    /// D-pad right.
    pub right: bool,
    /// The START button.
    pub start: bool,
    /// The SELECT button.
    pub select: bool,
}

impl ButtonVector {
    /// Every button released.
    pub const NEUTRAL: ButtonVector = ButtonVector {
        a: false,
        b: false,
        up: false,
        down: false,
        left: false,
        right: false,
        start: false,
        select: false,
    };

    /// Returns whether `button` is pressed.
    #[must_use]
    pub const fn get(&self, button: Button) -> bool {
        match button {
            Button::A => self.a,
            Button::B => self.b,
            Button::Select => self.select,
            Button::Start => self.start,
            Button::Up => self.up,
            Button::Down => self.down,
            Button::Left => self.left,
            Button::Right => self.right,
        }
    }

    /// Sets the state of `button`.
    pub fn set(&mut self, button: Button, pressed: bool) {
        let field = match button {
            Button::A => &mut self.a,
            Button::B => &mut self.b,
            Button::Select => &mut self.select,
            Button::Start => &mut self.start,
            Button::Up => &mut self.up,
            Button::Down => &mut self.down,
            Button::Left => &mut self.left,
            Button::Right => &mut self.right,
        };
        *field = pressed;
    }

    /// Returns a copy with `button` pressed.
    #[must_use]
    pub fn with(mut self, button: Button) -> Self {
        self.set(button, true);
        self
    }

    /// Returns `true` if no button is pressed.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }

    /// Iterates over the pressed buttons in canonical order.
    pub fn pressed(&self) -> impl Iterator<Item = Button> {
        let vector = *self;
        Button::ALL.into_iter().filter(move |b| vector.get(*b))
    }

    /// Iterates over the transitions that turn `self` into `next`, in
    /// canonical button order.
    pub fn edges_to(&self, next: &ButtonVector) -> impl Iterator<Item = (Button, Edge)> {
        let (from, to) = (*self, *next);
        Button::ALL.into_iter().filter_map(move |button| {
            let (had, want) = (from.get(button), to.get(button));
            (had != want).then_some((button, Edge::to(want)))
        })
    }

    /// Packs the vector into one byte, bit `i` being `Button::ALL[i]`.
    #[must_use]
    pub fn bits(&self) -> u8 {
        self.pressed()
            .fold(0u8, |bits, button| bits | (1 << button.index()))
    }

    /// Inverse of [`ButtonVector::bits`].
    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        let mut vector = Self::NEUTRAL;
        for button in Button::ALL {
            vector.set(button, bits & (1 << button.index()) != 0);
        }
        vector
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
    fn button_names_round_trip_through_from_str() {
        for button in Button::ALL {
            assert_eq!(button.name().parse::<Button>().unwrap(), button);
        }
    }

    #[test]
    fn unknown_button_name_is_a_protocol_error() {
        let err = "TURBO".parse::<Button>().unwrap_err();
        assert!(matches!(
            err,
            NetplayError::InputProtocol {
                kind: ProtocolViolationKind::UnknownButton { .. }
            }
        ));
    }

    #[test]
    fn canonical_order_matches_index() {
        for (i, button) in Button::ALL.iter().enumerate() {
            assert_eq!(button.index(), i);
        }
    }

    #[test]
    fn edges_follow_canonical_order() {
        let from = ButtonVector::NEUTRAL.with(Button::Right).with(Button::Start);
        let to = ButtonVector::NEUTRAL.with(Button::A).with(Button::Up);
        let edges: Vec<_> = from.edges_to(&to).collect();
        assert_eq!(
            edges,
            vec![
                (Button::A, Edge::Pressed),
                (Button::Start, Edge::Released),
                (Button::Up, Edge::Pressed),
                (Button::Right, Edge::Released),
            ]
        );
    }

    #[test]
    fn identical_vectors_produce_no_edges() {
        let v = ButtonVector::NEUTRAL.with(Button::B);
        assert_eq!(v.edges_to(&v).count(), 0);
    }

    #[test]
    fn bits_cover_every_button() {
        let all = Button::ALL
            .into_iter()
            .fold(ButtonVector::NEUTRAL, ButtonVector::with);
        assert_eq!(all.bits(), 0xFF);
        assert_eq!(ButtonVector::from_bits(0b0000_0101), {
            ButtonVector::NEUTRAL.with(Button::A).with(Button::Select)
        });
    }

    #[test]
    fn json_uses_upper_case_names() {
        let v = ButtonVector::NEUTRAL.with(Button::Up);
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains(r#""UP":true"#));
        assert!(json.contains(r#""SELECT":false"#));
        assert_eq!(serde_json::to_string(&Button::Select).unwrap(), r#""SELECT""#);
    }
}
