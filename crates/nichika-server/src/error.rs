//! Server error types.

use nichika_hub::HubError;
use thiserror::Error;

/// Errors surfaced while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
    /// The hub is no longer accepting requests.
    #[error(transparent)]
    Hub(#[from] HubError),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
