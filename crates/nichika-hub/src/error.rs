//! Hub error types.

use thiserror::Error;

/// Errors returned to producers submitting work to the hub.
///
/// Delivery failures are never reported here: a slow client is evicted
/// inside the control loop and the broadcaster does not learn about it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum HubError {
    /// The control loop has stopped and no longer accepts requests.
    #[error("hub is not running")]
    Closed,
    /// The broadcast intake is at capacity (non-waiting submit only).
    #[error("hub broadcast intake is full")]
    IntakeFull,
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
