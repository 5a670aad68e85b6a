//! # nichika-server
//!
//! Axum HTTP + WebSocket transport in front of the broadcast hub.
//!
//! - `GET /ws`: WebSocket upgrade; every peer becomes a hub client
//! - `POST /broadcast`: submit the request body to every connected client
//! - `GET /health`: liveness and member count
//! - `GET /metrics`: Prometheus text

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::{AppState, NichikaServer};
pub use shutdown::ShutdownCoordinator;
