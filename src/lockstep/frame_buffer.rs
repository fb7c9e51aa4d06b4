//! Per-frame input storage for both player slots.

use std::collections::BTreeMap;

use crate::buttons::ButtonVector;
use crate::error::NetplayError;
use crate::{Frame, PlayerSlot};

/// The input known so far for one frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameInputEntry {
    slots: [Option<ButtonVector>; 2],
}

impl FrameInputEntry {
    /// The vector stored for `slot`, if any.
    #[must_use]
    pub fn get(&self, slot: PlayerSlot) -> Option<ButtonVector> {
        self.slots[slot.index()]
    }

    /// Stores the vector for `slot`. A second write replaces the first.
    pub fn set(&mut self, slot: PlayerSlot, buttons: ButtonVector) {
        self.slots[slot.index()] = Some(buttons);
    }

    /// Returns `true` once both slots are known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Both vectors, if the entry is complete.
    #[must_use]
    pub fn vectors(&self) -> Option<[ButtonVector; 2]> {
        match self.slots {
            [Some(one), Some(two)] => Some([one, two]),
            _ => None,
        }
    }
}

/// A capped, ordered map of [`FrameInputEntry`] values.
///
/// Entries are created on first write and removed exactly once, by
/// [`FrameBuffer::take_complete`].
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    entries: BTreeMap<Frame, FrameInputEntry>,
    max_frames: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer holding at most `max_frames` entries.
    #[must_use]
    pub fn new(max_frames: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_frames,
        }
    }

    /// Stores `buttons` for `slot` at `frame`.
    ///
    /// # Errors
    /// Returns [`NetplayError::BufferOverflow`] if `frame` would be a new
    /// entry and the buffer is full. The buffer is left unchanged.
    pub fn store(
        &mut self,
        frame: Frame,
        slot: PlayerSlot,
        buttons: ButtonVector,
    ) -> Result<(), NetplayError> {
        if !self.entries.contains_key(&frame) && self.entries.len() >= self.max_frames {
            return Err(NetplayError::BufferOverflow {
                buffered: self.entries.len() + 1,
                max: self.max_frames,
            });
        }
        self.entries.entry(frame).or_default().set(slot, buttons);
        Ok(())
    }

    /// Removes and returns the entry at `frame` if both slots are known.
    pub fn take_complete(&mut self, frame: Frame) -> Option<[ButtonVector; 2]> {
        let vectors = self.entries.get(&frame)?.vectors()?;
        self.entries.remove(&frame);
        Some(vectors)
    }

    /// Fills frames `0..delay` of both slots with all-released vectors.
    pub fn seed(&mut self, delay: usize) {
        for frame in 0..delay {
            let entry = self.entries.entry(Frame::new(frame as i32)).or_default();
            for slot in PlayerSlot::ALL {
                entry.set(slot, ButtonVector::NEUTRAL);
            }
        }
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of buffered frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured cap.
    #[must_use]
    pub const fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// The entry at `frame`.
    #[must_use]
    pub fn get(&self, frame: Frame) -> Option<&FrameInputEntry> {
        self.entries.get(&frame)
    }

    /// The lowest buffered frame.
    #[must_use]
    pub fn first_frame(&self) -> Option<Frame> {
        self.entries.keys().next().copied()
    }

    /// The slots still missing at `frame`, in slot order.
    #[must_use]
    pub fn missing_slots(&self, frame: Frame) -> Vec<PlayerSlot> {
        let entry = self.entries.get(&frame).copied().unwrap_or_default();
        PlayerSlot::ALL
            .into_iter()
            .filter(|slot| entry.get(*slot).is_none())
            .collect()
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

    #[test]
    fn entry_completes_with_both_slots() {
        let mut buffer = FrameBuffer::new(8);
        buffer
            .store(Frame::new(3), PlayerSlot::TWO, ButtonVector::NEUTRAL)
            .unwrap();
        assert!(buffer.take_complete(Frame::new(3)).is_none());
        assert_eq!(buffer.missing_slots(Frame::new(3)), vec![PlayerSlot::ONE]);

        let pressed = ButtonVector::NEUTRAL.with(Button::A);
        buffer.store(Frame::new(3), PlayerSlot::ONE, pressed).unwrap();
        assert_eq!(
            buffer.take_complete(Frame::new(3)),
            Some([pressed, ButtonVector::NEUTRAL])
        );
        assert!(buffer.is_empty());
        assert!(buffer.take_complete(Frame::new(3)).is_none());
    }

    #[test]
    fn second_write_overwrites() {
        let mut buffer = FrameBuffer::new(8);
        let first = ButtonVector::NEUTRAL.with(Button::Left);
        let second = ButtonVector::NEUTRAL.with(Button::Right);
        buffer.store(Frame::new(0), PlayerSlot::ONE, first).unwrap();
        buffer.store(Frame::new(0), PlayerSlot::ONE, second).unwrap();
        assert_eq!(
            buffer.get(Frame::new(0)).unwrap().get(PlayerSlot::ONE),
            Some(second)
        );
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn full_buffer_rejects_new_frames_but_accepts_existing() {
        let mut buffer = FrameBuffer::new(2);
        buffer
            .store(Frame::new(0), PlayerSlot::ONE, ButtonVector::NEUTRAL)
            .unwrap();
        buffer
            .store(Frame::new(1), PlayerSlot::ONE, ButtonVector::NEUTRAL)
            .unwrap();
        let err = buffer
            .store(Frame::new(2), PlayerSlot::ONE, ButtonVector::NEUTRAL)
            .unwrap_err();
        assert_eq!(err, NetplayError::BufferOverflow { buffered: 3, max: 2 });
        assert_eq!(buffer.len(), 2);

        buffer
            .store(Frame::new(1), PlayerSlot::TWO, ButtonVector::NEUTRAL)
            .unwrap();
    }

    #[test]
    fn seed_fills_delay_frames() {
        let mut buffer = FrameBuffer::new(8);
        buffer.seed(2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.first_frame(), Some(Frame::new(0)));
        assert!(buffer.get(Frame::new(1)).unwrap().is_complete());
        assert!(buffer.get(Frame::new(2)).is_none());
    }
}
