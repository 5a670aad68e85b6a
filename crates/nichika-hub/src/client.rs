//! Client handle and its delivery buffer.
//!
//! [`Client::new`] returns two halves of one bounded queue: the [`Client`]
//! (producer side, owned by the hub while registered) and the [`Outbox`]
//! (consumer side, drained by the connection's output pump). Dropping or
//! closing the `Client` closes the queue; the pump sees `None` from
//! [`Outbox::recv`] once the remaining payloads are drained.

use std::fmt;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

/// Unique client identifier.
///
/// Every [`Client`] gets a fresh id, so two ids compare equal only when they
/// name the same handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    fn new() -> Self {
        Self(format!("client_{}", Uuid::now_v7()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a non-blocking offer was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OfferError {
    /// The buffer is at capacity; the output pump is not keeping up.
    #[error("delivery buffer full")]
    Full,
    /// The output pump dropped its [`Outbox`].
    #[error("delivery buffer closed")]
    Closed,
}

impl OfferError {
    /// Short label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Closed => "closed",
        }
    }
}

/// A connected endpoint as seen by the hub.
pub struct Client {
    id: ClientId,
    origin: String,
    tx: mpsc::Sender<Bytes>,
    /// Zero-capacity buffers hold their only slot here so every offer is `Full`.
    _reserved: Option<mpsc::OwnedPermit<Bytes>>,
}

impl Client {
    /// Create a client handle with a delivery buffer of `capacity` payloads.
    ///
    /// `origin` identifies the peer in diagnostics (usually its socket
    /// address). A `capacity` of zero produces a buffer that is always full.
    pub fn new(origin: impl Into<String>, capacity: usize) -> (Self, Outbox) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reserved = if capacity == 0 {
            tx.clone().try_reserve_owned().ok()
        } else {
            None
        };
        let client = Self {
            id: id.clone(),
            origin: origin.into(),
            tx,
            _reserved: reserved,
        };
        (client, Outbox { id, rx })
    }

    /// The client's id.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Network origin of the peer.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Enqueue a payload without waiting.
    pub fn offer(&self, payload: Bytes) -> Result<(), OfferError> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => OfferError::Full,
            TrySendError::Closed(_) => OfferError::Closed,
        })
    }

    /// Close the delivery buffer.
    ///
    /// Consumes the handle, so a buffer can only ever be closed once.
    pub fn close(self) {
        drop(self);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Draining side of a client's delivery buffer.
#[derive(Debug)]
pub struct Outbox {
    id: ClientId,
    rx: mpsc::Receiver<Bytes>,
}

impl Outbox {
    /// Id of the client this outbox belongs to.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Wait for the next payload. `None` once the buffer is closed and empty.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take a queued payload if one is ready.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Whether the producing side has been closed.
    ///
    /// Payloads queued before the close can still be drained.
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique() {
        let (a, _rx_a) = Client::new("10.0.0.1:5000", 1);
        let (b, _rx_b) = Client::new("10.0.0.1:5000", 1);
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("client_"));
    }

    #[test]
    fn outbox_shares_client_id() {
        let (client, outbox) = Client::new("peer", 4);
        assert_eq!(client.id(), outbox.id());
        assert_eq!(client.origin(), "peer");
    }

    #[tokio::test]
    async fn offer_then_recv() {
        let (client, mut outbox) = Client::new("peer", 4);
        client.offer(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(outbox.recv().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn offer_to_full_buffer() {
        let (client, _outbox) = Client::new("peer", 1);
        assert!(client.offer(Bytes::from_static(b"m1")).is_ok());
        assert_eq!(client.offer(Bytes::from_static(b"m2")), Err(OfferError::Full));
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let (client, mut outbox) = Client::new("peer", 0);
        assert_eq!(client.offer(Bytes::from_static(b"m1")), Err(OfferError::Full));
        assert_eq!(client.offer(Bytes::from_static(b"m2")), Err(OfferError::Full));
        assert!(outbox.try_recv().is_none());
        assert!(!outbox.is_closed());
    }

    #[test]
    fn offer_after_outbox_dropped() {
        let (client, outbox) = Client::new("peer", 4);
        drop(outbox);
        assert_eq!(client.offer(Bytes::from_static(b"m1")), Err(OfferError::Closed));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (client, mut outbox) = Client::new("peer", 4);
        client.offer(Bytes::from_static(b"last")).unwrap();
        client.close();

        assert!(outbox.is_closed());
        assert_eq!(outbox.recv().await.unwrap(), Bytes::from_static(b"last"));
        assert!(outbox.recv().await.is_none());
    }

    #[test]
    fn zero_capacity_close_releases_reserved_slot() {
        let (client, outbox) = Client::new("peer", 0);
        client.close();
        assert!(outbox.is_closed());
    }

    #[test]
    fn offer_error_labels() {
        assert_eq!(OfferError::Full.as_str(), "full");
        assert_eq!(OfferError::Closed.as_str(), "closed");
        assert_eq!(OfferError::Full.to_string(), "delivery buffer full");
    }

    #[test]
    fn debug_omits_channel() {
        let (client, _outbox) = Client::new("192.168.1.7:443", 1);
        let debug = format!("{client:?}");
        assert!(debug.contains("192.168.1.7:443"));
        assert!(debug.contains("client_"));
    }
}
