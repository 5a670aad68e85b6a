//! The hub control loop and its producer handle.
//!
//! [`Hub`] owns the registry. Nothing else can reach the map: producers talk
//! to the loop through a cloneable [`HubHandle`], and each request is one
//! step of [`Hub::run`]. The steps are also exposed as plain methods on
//! `&mut Hub` so they can be driven without a runtime.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use bytes::Bytes;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::client::{Client, ClientId, OfferError, Outbox};
use crate::config::HubConfig;
use crate::error::{HubError, Result};
use crate::metrics::{
    HUB_BROADCASTS_TOTAL, HUB_CLIENTS_ACTIVE, HUB_CLIENTS_EVICTED_TOTAL,
    HUB_CLIENTS_REGISTERED_TOTAL, HUB_CLIENTS_UNREGISTERED_TOTAL, HUB_MESSAGES_DELIVERED_TOTAL,
};

/// Snapshot of hub membership and lifetime counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Clients currently registered.
    pub members: usize,
    /// Clients admitted since start.
    pub registered: u64,
    /// Clients removed by an unregister request.
    pub unregistered: u64,
    /// Clients evicted during fan-out.
    pub evicted: u64,
    /// Broadcast events processed.
    pub broadcasts: u64,
    /// Payloads enqueued to client buffers.
    pub delivered: u64,
}

/// Client registry plus counters. Only ever touched by the control loop.
#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, Client>,
    stats: HubStats,
}

impl Registry {
    fn register(&mut self, client: Client) {
        match self.clients.entry(client.id().clone()) {
            Entry::Occupied(_) => {
                debug!(client = client.origin(), client_id = %client.id(), "client already registered");
            }
            Entry::Vacant(slot) => {
                debug!(client = client.origin(), client_id = %client.id(), "new client connected");
                let _ = slot.insert(client);
                self.stats.registered += 1;
                counter!(HUB_CLIENTS_REGISTERED_TOTAL).increment(1);
                self.record_active();
            }
        }
    }

    fn unregister(&mut self, id: &ClientId) {
        let Some(client) = self.clients.remove(id) else {
            trace!(client_id = %id, "unregister for unknown client ignored");
            return;
        };
        info!(client = client.origin(), client_id = %id, "client unregistered");
        client.close();
        self.stats.unregistered += 1;
        counter!(HUB_CLIENTS_UNREGISTERED_TOTAL).increment(1);
        self.record_active();
    }

    fn broadcast(&mut self, payload: &Bytes) {
        self.stats.broadcasts += 1;
        counter!(HUB_BROADCASTS_TOTAL).increment(1);

        // Offers never wait; failures are collected and evicted after the pass.
        let mut failed: Vec<(ClientId, OfferError)> = Vec::new();
        for (id, client) in &self.clients {
            match client.offer(payload.clone()) {
                Ok(()) => {
                    self.stats.delivered += 1;
                    debug!(
                        client = client.origin(),
                        payload = %String::from_utf8_lossy(payload),
                        "sent message to client"
                    );
                }
                Err(reason) => failed.push((id.clone(), reason)),
            }
        }
        counter!(HUB_MESSAGES_DELIVERED_TOTAL)
            .increment((self.clients.len() - failed.len()) as u64);

        for (id, reason) in failed {
            if let Some(client) = self.clients.remove(&id) {
                warn!(
                    client = client.origin(),
                    client_id = %id,
                    reason = reason.as_str(),
                    "evicting client"
                );
                client.close();
                self.stats.evicted += 1;
                counter!(HUB_CLIENTS_EVICTED_TOTAL, "reason" => reason.as_str()).increment(1);
            }
        }
        self.record_active();
    }

    fn close_all(&mut self) {
        let remaining = self.clients.len();
        for (_, client) in self.clients.drain() {
            client.close();
        }
        if remaining > 0 {
            info!(remaining, "closed remaining clients");
        }
        self.record_active();
    }

    fn stats(&self) -> HubStats {
        HubStats {
            members: self.clients.len(),
            ..self.stats
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(&self) {
        gauge!(HUB_CLIENTS_ACTIVE).set(self.clients.len() as f64);
    }
}

/// Receiving ends of the intake queues.
struct Intake {
    register: mpsc::Receiver<Client>,
    unregister: mpsc::Receiver<ClientId>,
    broadcast: mpsc::Receiver<Bytes>,
    stats: mpsc::Receiver<oneshot::Sender<HubStats>>,
}

/// The broadcast coordinator.
pub struct Hub {
    registry: Registry,
    intake: Intake,
    shutdown: CancellationToken,
}

impl Hub {
    /// Create a hub and the handle producers use to reach it.
    ///
    /// The hub does nothing until [`Hub::run`] (or [`Hub::spawn`]) drives it.
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let capacity = config.intake_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (stats_tx, stats_rx) = mpsc::channel(capacity);

        let hub = Self {
            registry: Registry::default(),
            intake: Intake {
                register: register_rx,
                unregister: unregister_rx,
                broadcast: broadcast_rx,
                stats: stats_rx,
            },
            shutdown: CancellationToken::new(),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats_tx,
            client_buffer: config.client_buffer,
        };
        (hub, handle)
    }

    /// Stop the control loop when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Admit a client. Re-admitting a registered id is a no-op.
    pub fn register(&mut self, client: Client) {
        self.registry.register(client);
    }

    /// Remove a client and close its buffer. Unknown ids are ignored.
    pub fn unregister(&mut self, id: &ClientId) {
        self.registry.unregister(id);
    }

    /// Offer `payload` to every registered client, evicting any whose
    /// buffer refuses it.
    pub fn broadcast(&mut self, payload: &Bytes) {
        self.registry.broadcast(payload);
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.registry.clients.contains_key(id)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.registry.clients.len()
    }

    /// Whether no clients are registered.
    pub fn is_empty(&self) -> bool {
        self.registry.clients.is_empty()
    }

    /// Current membership and counters.
    pub fn stats(&self) -> HubStats {
        self.registry.stats()
    }

    /// Run the control loop.
    ///
    /// Processes one intake event at a time until the shutdown token fires or
    /// every [`HubHandle`] has been dropped, then closes all remaining
    /// clients and returns the final stats. When several intakes are ready
    /// at once the next one is picked at random.
    pub async fn run(self) -> HubStats {
        let Self {
            mut registry,
            mut intake,
            shutdown,
        } = self;
        info!("hub started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("hub shutdown requested");
                    break;
                }
                client = intake.register.recv() => match client {
                    Some(client) => registry.register(client),
                    None => break,
                },
                id = intake.unregister.recv() => match id {
                    Some(id) => registry.unregister(&id),
                    None => break,
                },
                payload = intake.broadcast.recv() => match payload {
                    Some(payload) => registry.broadcast(&payload),
                    None => break,
                },
                reply = intake.stats.recv() => match reply {
                    Some(reply) => {
                        let _ = reply.send(registry.stats());
                    }
                    None => break,
                },
            }
        }

        registry.close_all();
        let stats = registry.stats();
        info!(
            registered = stats.registered,
            evicted = stats.evicted,
            broadcasts = stats.broadcasts,
            "hub stopped"
        );
        stats
    }

    /// Spawn the control loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<HubStats> {
        tokio::spawn(self.run())
    }
}

/// Producer side of the hub. Cheap to clone.
///
/// Every method only enqueues a request; the control loop applies it later.
/// The loop stops once all handles are dropped.
#[derive(Clone, Debug)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Client>,
    unregister_tx: mpsc::Sender<ClientId>,
    broadcast_tx: mpsc::Sender<Bytes>,
    stats_tx: mpsc::Sender<oneshot::Sender<HubStats>>,
    client_buffer: usize,
}

impl HubHandle {
    /// Submit a client for admission.
    pub async fn register(&self, client: Client) -> Result<()> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Build a client with the configured buffer size and register it.
    pub async fn connect(&self, origin: impl Into<String>) -> Result<Outbox> {
        let (client, outbox) = Client::new(origin, self.client_buffer);
        self.register(client).await?;
        Ok(outbox)
    }

    /// Submit a client for removal. Safe if it is already gone.
    pub async fn unregister(&self, id: &ClientId) -> Result<()> {
        self.unregister_tx
            .send(id.clone())
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit a payload for fan-out, waiting for intake capacity.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.broadcast_tx
            .send(payload.into())
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit a payload for fan-out without waiting.
    pub fn try_broadcast(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.broadcast_tx.try_send(payload.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::IntakeFull,
            mpsc::error::TrySendError::Closed(_) => HubError::Closed,
        })
    }

    /// Ask the control loop for a stats snapshot.
    pub async fn stats(&self) -> Result<HubStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.stats_tx
            .send(reply_tx)
            .await
            .map_err(|_| HubError::Closed)?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }

    /// Delivery buffer size used by [`HubHandle::connect`].
    pub fn client_buffer(&self) -> usize {
        self.client_buffer
    }

    /// Whether the control loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.broadcast_tx.is_closed()
    }
}
