//! An in-process [`Transport`] for tests, demos and local play.
//!
//! Endpoints are wired together with [`MemoryTransport::connect`]. Every
//! message still goes through the binary codec, so what arrives has been
//! encoded and decoded exactly as it would be on a real connection, and raw
//! bytes can be injected with [`MemoryTransport::send_raw`] to exercise the
//! malformed-input path.
//!
//! Delivery is reliable and ordered per connection, and nothing is delivered
//! until the receiver calls [`Transport::receive_all_events`].
//!
//! # Example
//!
//! ```
//! use netplay_lockstep::{MemoryTransport, Message, Transport, TransportEvent};
//!
//! let mut host = MemoryTransport::new("host");
//! let mut guest = MemoryTransport::new("guest");
//! host.connect(&mut guest);
//!
//! guest.send_to(&Message::Ready, &"host");
//! let events = host.receive_all_events();
//! assert_eq!(events, vec![
//!     ("guest", TransportEvent::Opened),
//!     ("guest", TransportEvent::Message(Message::Ready)),
//! ]);
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::network::codec;
use crate::network::messages::Message;
use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::{Transport, TransportEvent};

/// What travels between two in-process endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    Opened,
    Bytes(Vec<u8>),
    Closed,
}

impl Delivery {
    /// Decodes a delivery into the event a session sees.
    pub(crate) fn into_event(self) -> TransportEvent {
        match self {
            Self::Opened => TransportEvent::Opened,
            Self::Bytes(bytes) => match codec::decode_message(&bytes) {
                Ok(message) => TransportEvent::Message(message),
                Err(err) => TransportEvent::Malformed {
                    reason: err.to_string(),
                },
            },
            Self::Closed => TransportEvent::Closed,
        }
    }
}

type Inbox<A> = Arc<Mutex<VecDeque<(A, Delivery)>>>;

/// One endpoint of an in-process connection graph.
#[derive(Debug)]
pub struct MemoryTransport<A>
where
    A: Clone + Ord + Debug,
{
    local: A,
    inbox: Inbox<A>,
    peers: BTreeMap<A, Inbox<A>>,
}

impl<A> MemoryTransport<A>
where
    A: Clone + Ord + Debug,
{
    /// Creates an unconnected endpoint known to others as `local`.
    #[must_use]
    pub fn new(local: A) -> Self {
        Self {
            local,
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            peers: BTreeMap::new(),
        }
    }

    /// The address other endpoints know this one by.
    #[must_use]
    pub fn local_addr(&self) -> &A {
        &self.local
    }

    /// Opens a connection between `self` and `other`. Both sides receive a
    /// [`TransportEvent::Opened`] for the other.
    pub fn connect(&mut self, other: &mut MemoryTransport<A>) {
        self.peers.insert(other.local.clone(), Arc::clone(&other.inbox));
        other.peers.insert(self.local.clone(), Arc::clone(&self.inbox));
        self.inbox
            .lock()
            .push_back((other.local.clone(), Delivery::Opened));
        other
            .inbox
            .lock()
            .push_back((self.local.clone(), Delivery::Opened));
    }

    /// Returns `true` if a connection to `addr` is open.
    #[must_use]
    pub fn is_connected(&self, addr: &A) -> bool {
        self.peers.contains_key(addr)
    }

    /// Delivers raw bytes to `addr` without encoding them.
    pub fn send_raw(&mut self, bytes: Vec<u8>, addr: &A) {
        self.deliver(addr, Delivery::Bytes(bytes));
    }

    fn deliver(&self, addr: &A, delivery: Delivery) {
        match self.peers.get(addr) {
            Some(inbox) => inbox.lock().push_back((self.local.clone(), delivery)),
            None => trace!(?addr, "dropping delivery to unconnected endpoint"),
        }
    }
}

impl<A> Transport<A> for MemoryTransport<A>
where
    A: Clone + PartialEq + Eq + Ord + Hash + Debug + Send + Sync,
{
    fn send_to(&mut self, msg: &Message, addr: &A) {
        match codec::encode(msg) {
            Ok(bytes) => self.deliver(addr, Delivery::Bytes(bytes)),
            Err(err) => {
                report_violation!(
                    ViolationSeverity::Error,
                    ViolationKind::InternalError,
                    "failed to encode {} for {:?}: {}",
                    msg.kind(),
                    addr,
                    err
                );
            },
        }
    }

    fn receive_all_events(&mut self) -> Vec<(A, TransportEvent)> {
        let deliveries: Vec<_> = self.inbox.lock().drain(..).collect();
        deliveries
            .into_iter()
            .map(|(from, delivery)| {
                if delivery == Delivery::Closed {
                    self.peers.remove(&from);
                }
                (from, delivery.into_event())
            })
            .collect()
    }

    fn close(&mut self, addr: &A) {
        self.deliver(addr, Delivery::Closed);
        self.peers.remove(addr);
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

    fn pair() -> (MemoryTransport<u8>, MemoryTransport<u8>) {
        let mut a = MemoryTransport::new(1);
        let mut b = MemoryTransport::new(2);
        a.connect(&mut b);
        a.receive_all_events();
        b.receive_all_events();
        (a, b)
    }

    #[test]
    fn messages_arrive_in_order() {
        let (mut a, mut b) = pair();
        a.send_to(&Message::Hello { player: 1 }, &2);
        a.send_to(&Message::Ready, &2);
        assert_eq!(
            b.receive_all_events(),
            vec![
                (1, TransportEvent::Message(Message::Hello { player: 1 })),
                (1, TransportEvent::Message(Message::Ready)),
            ]
        );
        assert!(b.receive_all_events().is_empty());
    }

    #[test]
    fn close_notifies_the_other_side_only() {
        let (mut a, mut b) = pair();
        a.close(&2);
        assert!(a.receive_all_events().is_empty());
        assert!(!a.is_connected(&2));
        assert_eq!(b.receive_all_events(), vec![(1, TransportEvent::Closed)]);
        assert!(!b.is_connected(&1));

        // Nothing is delivered after the close.
        b.send_to(&Message::Ready, &1);
        assert!(a.receive_all_events().is_empty());
    }

    #[test]
    fn garbage_is_reported_as_malformed() {
        let (mut a, mut b) = pair();
        a.send_raw(vec![0xFF, 0xFF, 0xFF, 0xFF, 0x01], &2);
        let events = b.receive_all_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].1, TransportEvent::Malformed { .. }));
    }

    #[test]
    fn one_endpoint_can_serve_many() {
        let mut host = MemoryTransport::new(0u8);
        let mut c1 = MemoryTransport::new(1u8);
        let mut c2 = MemoryTransport::new(2u8);
        host.connect(&mut c1);
        host.connect(&mut c2);
        assert_eq!(
            host.receive_all_events(),
            vec![(1, TransportEvent::Opened), (2, TransportEvent::Opened)]
        );
        c2.send_to(&Message::Hello { player: 2 }, &0);
        c1.send_to(&Message::Hello { player: 1 }, &0);
        let from: Vec<u8> = host.receive_all_events().into_iter().map(|(a, _)| a).collect();
        assert_eq!(from, vec![2, 1]);
    }
}
