//! The client end of a relay: a phone or pad that presses buttons on a host.
//!
//! A controller client has no simulation, so its minimum hold is measured in
//! wall-clock time. Call [`ControllerClient::poll`] regularly (every animation
//! frame is plenty) to flush releases the hold delayed.

use web_time::Instant;

use crate::buttons::{Button, ButtonVector, Edge};
use crate::input::hold::HoldPolicy;
use crate::input::{ButtonChanges, InputAggregator, PressSource};
use crate::network::messages::Message;
use crate::PlayerSlot;

/// Turns local device input into relay messages for one player slot.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{Button, ControllerClient, Message, PlayerSlot, PressSource};
/// use web_time::{Duration, Instant};
///
/// let mut client = ControllerClient::new(PlayerSlot::TWO);
/// assert_eq!(client.hello(), Message::Hello { player: 2 });
///
/// let start = Instant::now();
/// let sent = client.set_source(Button::A, PressSource::Touch, true, start);
/// assert_eq!(sent, Some(Message::Input { btn: Button::A, pressed: true, player: Some(2) }));
///
/// // A 10 ms tap: the release goes out once 60 ms have passed.
/// assert_eq!(client.set_source(Button::A, PressSource::Touch, false, start + Duration::from_millis(10)), None);
/// assert!(client.poll(start + Duration::from_millis(30)).is_empty());
/// assert_eq!(client.poll(start + Duration::from_millis(60)).len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct ControllerClient {
    input: InputAggregator,
    slot: PlayerSlot,
}

impl ControllerClient {
    /// Creates a client for `slot` with the [`HoldPolicy::CONTROLLER_CLIENT`] policy.
    #[must_use]
    pub fn new(slot: PlayerSlot) -> Self {
        Self::with_policy(slot, HoldPolicy::CONTROLLER_CLIENT)
    }

    /// Creates a client for `slot` with a custom hold policy.
    #[must_use]
    pub fn with_policy(slot: PlayerSlot, policy: HoldPolicy) -> Self {
        Self {
            input: InputAggregator::new(policy),
            slot,
        }
    }

    /// The message claiming this client's slot. Send it whenever the
    /// connection opens.
    #[must_use]
    pub fn hello(&self) -> Message {
        Message::Hello {
            player: self.slot.as_u8(),
        }
    }

    /// Switches to `slot`.
    ///
    /// The host releases everything the old slot held when it sees the new
    /// claim, so local state is cleared without sending releases. Returns the
    /// claim to send, or nothing if the slot did not change.
    pub fn set_slot(&mut self, slot: PlayerSlot) -> Option<Message> {
        if slot == self.slot {
            return None;
        }
        let _ = self.input.release_all();
        self.slot = slot;
        Some(self.hello())
    }

    /// Records a press or release from `source`; returns the message to send.
    pub fn set_source(
        &mut self,
        button: Button,
        source: PressSource,
        pressed: bool,
        now: Instant,
    ) -> Option<Message> {
        self.input
            .set_source(button, source, pressed, now)
            .map(|edge| self.message(button, edge))
    }

    /// Applies the same change to several buttons.
    pub fn set_sources(
        &mut self,
        buttons: &[Button],
        source: PressSource,
        pressed: bool,
        now: Instant,
    ) -> Vec<Message> {
        let changes = self.input.set_sources(buttons, source, pressed, now);
        self.messages(&changes)
    }

    /// Drops `source` from every button.
    pub fn release_source(&mut self, source: PressSource, now: Instant) -> Vec<Message> {
        let changes = self.input.release_source(source, now);
        self.messages(&changes)
    }

    /// Releases everything at once, e.g. when the page loses focus.
    pub fn release_all(&mut self) -> Vec<Message> {
        let changes = self.input.release_all();
        self.messages(&changes)
    }

    /// Returns the delayed releases that became due.
    pub fn poll(&mut self, now: Instant) -> Vec<Message> {
        let changes = self.input.poll(now);
        self.messages(&changes)
    }

    /// The slot this client claims.
    #[must_use]
    pub const fn slot(&self) -> PlayerSlot {
        self.slot
    }

    /// Buttons as last reported to the host.
    #[must_use]
    pub const fn buttons(&self) -> ButtonVector {
        self.input.buttons()
    }

    /// Returns `true` if a release of `button` waits for the minimum hold.
    #[must_use]
    pub fn has_pending_release(&self, button: Button) -> bool {
        self.input.has_pending_release(button)
    }

    fn messages(&self, changes: &ButtonChanges) -> Vec<Message> {
        changes
            .iter()
            .map(|&(button, edge)| self.message(button, edge))
            .collect()
    }

    fn message(&self, button: Button, edge: Edge) -> Message {
        Message::Input {
            btn: button,
            pressed: edge.is_pressed(),
            player: Some(self.slot.as_u8()),
        }
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

    fn input(btn: Button, pressed: bool, player: u8) -> Message {
        Message::Input {
            btn,
            pressed,
            player: Some(player),
        }
    }

    #[test]
    fn long_press_releases_immediately() {
        let mut client = ControllerClient::new(PlayerSlot::ONE);
        let t0 = Instant::now();
        client.set_source(Button::B, PressSource::Keyboard, true, t0);
        let sent = client.set_source(
            Button::B,
            PressSource::Keyboard,
            false,
            t0 + Duration::from_millis(100),
        );
        assert_eq!(sent, Some(input(Button::B, false, 1)));
    }

    #[test]
    fn short_tap_release_is_delayed_until_poll() {
        let mut client = ControllerClient::new(PlayerSlot::ONE);
        let t0 = Instant::now();
        client.set_source(Button::Start, PressSource::Touch, true, t0);
        assert_eq!(
            client.set_source(
                Button::Start,
                PressSource::Touch,
                false,
                t0 + Duration::from_millis(5)
            ),
            None
        );
        assert!(client.has_pending_release(Button::Start));
        assert!(client.poll(t0 + Duration::from_millis(59)).is_empty());
        assert_eq!(
            client.poll(t0 + Duration::from_millis(61)),
            vec![input(Button::Start, false, 1)]
        );
        assert!(!client.buttons().start);
    }

    #[test]
    fn combo_sources_produce_one_message_per_edge() {
        let mut client = ControllerClient::new(PlayerSlot::TWO);
        let now = Instant::now();
        let sent = client.set_sources(&[Button::A, Button::B], PressSource::Touch, true, now);
        assert_eq!(
            sent,
            vec![input(Button::A, true, 2), input(Button::B, true, 2)]
        );
        // Already held by touch: a keyboard press changes nothing.
        assert!(client
            .set_sources(&[Button::A], PressSource::Keyboard, true, now)
            .is_empty());
    }

    #[test]
    fn slot_change_sends_new_claim_and_forgets_buttons() {
        let mut client = ControllerClient::new(PlayerSlot::ONE);
        client.set_source(Button::A, PressSource::Gamepad, true, Instant::now());
        assert_eq!(client.set_slot(PlayerSlot::ONE), None);
        assert_eq!(
            client.set_slot(PlayerSlot::TWO),
            Some(Message::Hello { player: 2 })
        );
        assert!(client.buttons().is_neutral());
    }

    #[test]
    fn release_all_skips_the_hold() {
        let mut client = ControllerClient::new(PlayerSlot::ONE);
        let now = Instant::now();
        client.set_source(Button::Left, PressSource::JoystickAxis, true, now);
        client.set_source(Button::A, PressSource::Touch, true, now);
        assert_eq!(
            client.release_all(),
            vec![input(Button::A, false, 1), input(Button::Left, false, 1)]
        );
    }
}
