//! Metric names recorded by the hub.
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the process installs a recorder.

/// Clients admitted to the registry (counter).
pub const HUB_CLIENTS_REGISTERED_TOTAL: &str = "hub_clients_registered_total";
/// Clients removed by an unregister request (counter).
pub const HUB_CLIENTS_UNREGISTERED_TOTAL: &str = "hub_clients_unregistered_total";
/// Clients evicted during fan-out (counter, labels: reason).
pub const HUB_CLIENTS_EVICTED_TOTAL: &str = "hub_clients_evicted_total";
/// Clients currently registered (gauge).
pub const HUB_CLIENTS_ACTIVE: &str = "hub_clients_active";
/// Broadcast events processed (counter).
pub const HUB_BROADCASTS_TOTAL: &str = "hub_broadcasts_total";
/// Payloads enqueued to client buffers (counter).
pub const HUB_MESSAGES_DELIVERED_TOTAL: &str = "hub_messages_delivered_total";
