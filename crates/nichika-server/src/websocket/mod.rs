//! WebSocket connection management, heartbeat, and the per-connection pumps.

pub mod connection;
pub mod heartbeat;
pub mod session;
