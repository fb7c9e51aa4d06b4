//! Draining iterator over queued session events.

use std::collections::vec_deque::Drain;
use std::iter::FusedIterator;

use crate::{Config, NetplayEvent};

/// Drains the events a [`NetplaySession`] queued since the last call to
/// [`NetplaySession::events`], oldest first.
///
/// The session keeps at most the configured number of events. When more
/// accumulate the oldest are discarded; [`EventDrain::discarded`] says how
/// many were lost since the previous drain. Events left unconsumed when the
/// drain is dropped are discarded too.
///
/// # Examples
///
/// ```
/// use netplay_lockstep::{
///     Config, MemoryTransport, NetplayEvent, SessionBuilder, SessionDigest, SessionMode,
/// };
///
/// struct Local;
/// impl Config for Local {
///     type Address = u8;
/// }
///
/// let mut session = SessionBuilder::<Local>::new()
///     .with_mode(SessionMode::Solo)
///     .start_session(MemoryTransport::new(0))?;
/// session.load_content(SessionDigest::from_content("demo", b"demo"));
///
/// let events = session.events();
/// assert_eq!(events.discarded(), 0);
/// for event in events {
///     if let NetplayEvent::Synchronized = event {
///         // start rendering
///     }
/// }
/// # Ok::<(), netplay_lockstep::NetplayError>(())
/// ```
///
/// [`NetplaySession`]: crate::NetplaySession
/// [`NetplaySession::events`]: crate::NetplaySession::events
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct EventDrain<'a, T: Config> {
    inner: Drain<'a, NetplayEvent<T>>,
    discarded: usize,
}

impl<'a, T: Config> EventDrain<'a, T> {
    pub(crate) fn new(inner: Drain<'a, NetplayEvent<T>>, discarded: usize) -> Self {
        Self { inner, discarded }
    }

    /// Number of events dropped from the front of a full queue since the
    /// previous drain.
    #[must_use]
    pub const fn discarded(&self) -> usize {
        self.discarded
    }
}

impl<T: Config> Iterator for EventDrain<'_, T> {
    type Item = NetplayEvent<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T: Config> ExactSizeIterator for EventDrain<'_, T> {}

impl<T: Config> FusedIterator for EventDrain<'_, T> {}

impl<T: Config> std::fmt::Debug for EventDrain<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDrain")
            .field("remaining", &self.len())
            .field("discarded", &self.discarded)
            .finish()
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
    use crate::Frame;
    use std::collections::VecDeque;

    struct TestConfig;

    impl Config for TestConfig {
        type Address = u32;
    }

    fn resumed(frame: i32) -> NetplayEvent<TestConfig> {
        NetplayEvent::InputResumed {
            frame: Frame::new(frame),
        }
    }

    #[test]
    fn yields_events_oldest_first_and_empties_the_queue() {
        let mut queue: VecDeque<_> = (1..=3).map(resumed).collect();
        let events: Vec<_> = EventDrain::new(queue.drain(..), 0).collect();
        assert_eq!(events, vec![resumed(1), resumed(2), resumed(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn reports_discarded_events() {
        let mut queue: VecDeque<_> = (1..=2).map(resumed).collect();
        let drain = EventDrain::new(queue.drain(..), 7);
        assert_eq!(drain.discarded(), 7);
        assert_eq!(drain.len(), 2);
        assert_eq!(
            format!("{drain:?}"),
            "EventDrain { remaining: 2, discarded: 7 }"
        );
    }

    #[test]
    fn dropping_discards_the_rest() {
        let mut queue: VecDeque<_> = (1..=2).map(resumed).collect();
        {
            let mut drain = EventDrain::new(queue.drain(..), 0);
            assert_eq!(drain.next(), Some(resumed(1)));
        }
        assert!(queue.is_empty());
    }
}
