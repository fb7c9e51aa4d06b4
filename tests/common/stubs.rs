//! A deterministic simulation stub that records everything it was asked to do.

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::use_self
)]

use netplay_lockstep::hash::ContentHasher;
use netplay_lockstep::{
    apply_requests, Button, ButtonVector, Config, Frame, NetplayRequest, PlayerSlot, StepFunction,
};

/// Sessions in the integration tests address each other by a small number.
#[derive(Debug)]
pub struct PeerConfig;

impl Config for PeerConfig {
    type Address = u8;
}

/// Folds the held buttons of both slots into a running checksum every step.
///
/// A `Step` for frame 0 after frames were already simulated is a restart:
/// the checksum and frame history start over, the way a caller would reset
/// its emulator when a run begins again.
#[derive(Debug, Clone, Default)]
pub struct RecordingSim {
    held: [ButtonVector; 2],
    state: u32,
    next_frame: i32,
    /// Checksum after each simulated frame of the current run.
    pub history: Vec<u32>,
    /// Every request fulfilled, in order, across runs.
    pub calls: Vec<NetplayRequest>,
    /// Number of times a run started over at frame 0.
    pub restarts: usize,
}

#[allow(dead_code)]
impl RecordingSim {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, requests: Vec<NetplayRequest>) {
        apply_requests(requests, self);
    }

    /// Buttons currently held for `slot`.
    #[must_use]
    pub fn held(&self, slot: PlayerSlot) -> ButtonVector {
        self.held[slot.index()]
    }

    /// Frames simulated in the current run.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.state
    }

    /// Number of steps fulfilled across all runs.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, NetplayRequest::Step { .. }))
            .count()
    }

    /// Number of steps between the first press of `button` for `slot` and
    /// the release that followed it.
    #[must_use]
    pub fn steps_held(&self, slot: PlayerSlot, button: Button) -> Option<usize> {
        let down = self
            .calls
            .iter()
            .position(|call| *call == NetplayRequest::ButtonDown { slot, button })?;
        let up = down
            + self.calls[down..]
                .iter()
                .position(|call| *call == NetplayRequest::ButtonUp { slot, button })?;
        Some(
            self.calls[down..up]
                .iter()
                .filter(|call| matches!(call, NetplayRequest::Step { .. }))
                .count(),
        )
    }
}

impl StepFunction for RecordingSim {
    fn button_down(&mut self, slot: PlayerSlot, button: Button) {
        assert!(
            !self.held[slot.index()].get(button),
            "{button} pressed twice for {slot}"
        );
        self.held[slot.index()].set(button, true);
        self.calls.push(NetplayRequest::ButtonDown { slot, button });
    }

    fn button_up(&mut self, slot: PlayerSlot, button: Button) {
        assert!(
            self.held[slot.index()].get(button),
            "{button} released for {slot} while not held"
        );
        self.held[slot.index()].set(button, false);
        self.calls.push(NetplayRequest::ButtonUp { slot, button });
    }

    fn step(&mut self, frame: Frame) {
        if frame == Frame::ZERO && self.next_frame != 0 {
            self.restarts += 1;
            self.next_frame = 0;
            self.state = 0;
            self.history.clear();
        }
        assert_eq!(frame.as_i32(), self.next_frame, "frames must be stepped in order");

        let mut hasher = ContentHasher::new();
        hasher.update(&self.state.to_le_bytes());
        hasher.update(&frame.as_i32().to_le_bytes());
        hasher.update(&[self.held[0].bits(), self.held[1].bits()]);
        self.state = hasher.finish_u32();
        self.history.push(self.state);
        self.next_frame += 1;
        self.calls.push(NetplayRequest::Step { frame });
    }
}
