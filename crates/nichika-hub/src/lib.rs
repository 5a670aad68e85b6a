//! # nichika-hub
//!
//! Broadcast hub for fanning payloads out to connected clients.
//!
//! A single control loop owns the client registry and serializes every
//! membership change against delivery:
//!
//! ```text
//!   HubHandle::register ───┐
//!   HubHandle::unregister ─┼──► Hub::run ──► registry: HashMap<ClientId, Client>
//!   HubHandle::broadcast ──┤        │
//!   HubHandle::stats ──────┘        └──► Client::offer (try_send) ──► Outbox ──► output pump
//! ```
//!
//! Delivery never waits on a client. A client whose buffer is full when a
//! broadcast arrives is evicted: it leaves the registry and its buffer is
//! closed in the same step, which is the signal its output pump uses to
//! hang up.

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;

pub use client::{Client, ClientId, OfferError, Outbox};
pub use config::HubConfig;
pub use error::HubError;
pub use hub::{Hub, HubHandle, HubStats};
