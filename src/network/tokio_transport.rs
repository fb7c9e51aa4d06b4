//! A [`Transport`] over `tokio::sync::mpsc` channels.
//!
//! Sessions are synchronous: [`NetplaySession::tick`] never awaits. In an
//! async application the session lives in one task and the task suspends in
//! exactly two places, the frame interval and inbound traffic:
//!
//! ```no_run
//! use netplay_lockstep::TokioTransport;
//! use web_time::Duration;
//!
//! # async fn run(mut transport: TokioTransport<u32>) {
//! let mut interval = tokio::time::interval(Duration::from_millis(16));
//! loop {
//!     tokio::select! {
//!         _ = interval.tick() => {
//!             // session.tick(elapsed) and fulfil the requests
//!         }
//!         _ = transport.wait_for_event() => {
//!             // session.poll_remote_clients()
//!         }
//!     }
//! #   break;
//! }
//! # }
//! ```
//!
//! Endpoints are connected with [`TokioTransport::connect`] before they are
//! moved into their tasks. Messages go through the binary codec.
//!
//! [`NetplaySession::tick`]: crate::NetplaySession::tick

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::network::codec;
use crate::network::memory_transport::Delivery;
use crate::network::messages::Message;
use crate::report_violation;
use crate::telemetry::{ViolationKind, ViolationSeverity};
use crate::{Transport, TransportEvent};

/// One endpoint, backed by an unbounded mpsc channel per inbox.
#[derive(Debug)]
pub struct TokioTransport<A>
where
    A: Clone + Ord + Debug,
{
    local: A,
    inbox_tx: UnboundedSender<(A, Delivery)>,
    inbox_rx: UnboundedReceiver<(A, Delivery)>,
    stash: VecDeque<(A, Delivery)>,
    peers: BTreeMap<A, UnboundedSender<(A, Delivery)>>,
}

impl<A> TokioTransport<A>
where
    A: Clone + Ord + Debug,
{
    /// Creates an unconnected endpoint known to others as `local`.
    #[must_use]
    pub fn new(local: A) -> Self {
        let (inbox_tx, inbox_rx) = unbounded_channel();
        Self {
            local,
            inbox_tx,
            inbox_rx,
            stash: VecDeque::new(),
            peers: BTreeMap::new(),
        }
    }

    /// Opens a connection between `self` and `other`.
    pub fn connect(&mut self, other: &mut TokioTransport<A>) {
        self.peers
            .insert(other.local.clone(), other.inbox_tx.clone());
        other.peers.insert(self.local.clone(), self.inbox_tx.clone());
        // Both receivers are alive: we hold them.
        let _ = self.inbox_tx.send((other.local.clone(), Delivery::Opened));
        let _ = other.inbox_tx.send((self.local.clone(), Delivery::Opened));
    }

    /// Waits until at least one event is available. The event stays queued
    /// for the next [`Transport::receive_all_events`].
    ///
    /// Cancel safe: dropping the future loses nothing.
    pub async fn wait_for_event(&mut self) {
        if !self.stash.is_empty() {
            return;
        }
        if let Some(delivery) = self.inbox_rx.recv().await {
            self.stash.push_back(delivery);
        }
    }

    fn deliver(&mut self, addr: &A, delivery: Delivery) {
        let Some(peer) = self.peers.get(addr) else {
            trace!(?addr, "dropping delivery to unconnected endpoint");
            return;
        };
        if peer.send((self.local.clone(), delivery)).is_err() {
            trace!(?addr, "peer endpoint dropped");
            self.peers.remove(addr);
            // A dropped endpoint is a closed connection.
            self.stash.push_back((addr.clone(), Delivery::Closed));
        }
    }
}

impl<A> Transport<A> for TokioTransport<A>
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
        while let Ok(delivery) = self.inbox_rx.try_recv() {
            self.stash.push_back(delivery);
        }
        let deliveries: Vec<_> = self.stash.drain(..).collect();
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
        if let Some(peer) = self.peers.remove(addr) {
            let _ = peer.send((self.local.clone(), Delivery::Closed));
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

    #[tokio::test]
    async fn wait_for_event_wakes_on_message() {
        let mut a = TokioTransport::new(1u8);
        let mut b = TokioTransport::new(2u8);
        a.connect(&mut b);
        b.receive_all_events();

        let handle = tokio::spawn(async move {
            a.send_to(&Message::Ready, &2);
            a
        });
        b.wait_for_event().await;
        let _a = handle.await.unwrap();
        assert_eq!(
            b.receive_all_events(),
            vec![(1, TransportEvent::Message(Message::Ready))]
        );
    }

    #[tokio::test]
    async fn dropped_endpoint_reads_as_closed() {
        let mut a = TokioTransport::new(1u8);
        let mut b = TokioTransport::new(2u8);
        a.connect(&mut b);
        a.receive_all_events();
        drop(b);
        a.send_to(&Message::Ready, &2);
        assert_eq!(a.receive_all_events(), vec![(2, TransportEvent::Closed)]);
    }

    #[tokio::test]
    async fn close_reaches_peer() {
        let mut a = TokioTransport::new(1u8);
        let mut b = TokioTransport::new(2u8);
        a.connect(&mut b);
        b.receive_all_events();
        a.close(&2);
        b.wait_for_event().await;
        assert_eq!(b.receive_all_events(), vec![(1, TransportEvent::Closed)]);
    }
}
