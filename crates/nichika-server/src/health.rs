//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the hub answers, `"shutting_down"` after shutdown has
    /// begun, `"degraded"` once the hub has stopped without one.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Clients currently registered with the hub.
    pub connections: usize,
}

/// Build a health response. `connections` is `None` when the hub did not
/// answer.
pub fn health_check(
    start_time: Instant,
    connections: Option<usize>,
    shutting_down: bool,
) -> HealthResponse {
    let status = match (shutting_down, connections) {
        (true, _) => "shutting_down",
        (false, Some(_)) => "ok",
        (false, None) => "degraded",
    };
    HealthResponse {
        status: status.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: connections.unwrap_or(0),
    }
}
