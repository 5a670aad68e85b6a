//! Process-wide stop signal for the listener, the hub and every session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::graceful_shutdown`] waits by default.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Owns the root [`CancellationToken`]. The hub and the listener watch
/// clones; sessions watch child tokens.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// A coordinator whose token has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token. Later calls do nothing.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// `true` once [`shutdown`](Self::shutdown) has been called. New
    /// WebSocket upgrades are refused from then on.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token and join `handles`, giving up after `deadline`
    /// (default 30s). Returns whether every task finished in time.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        deadline: Option<Duration>,
    ) -> bool {
        let deadline = deadline.unwrap_or(DRAIN_DEADLINE);
        self.shutdown();
        info!(tasks = handles.len(), ?deadline, "draining tasks");

        match tokio::time::timeout(deadline, futures::future::join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(?deadline, "drain deadline passed with tasks still running");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_coordinator_is_running() {
        assert!(!ShutdownCoordinator::new().is_shutting_down());
    }

    #[test]
    fn shutdown_reaches_clones_and_children() {
        let coord = ShutdownCoordinator::new();
        let clone = coord.token();
        let child = coord.token().child_token();

        coord.shutdown();
        coord.shutdown();

        assert!(coord.is_shutting_down());
        assert!(clone.is_cancelled());
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn drain_joins_tasks_that_watch_the_token() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let task = tokio::spawn(async move { token.cancelled().await });

        assert!(coord.graceful_shutdown(vec![task], None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_gives_up_on_stuck_tasks() {
        let coord = ShutdownCoordinator::new();
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let finished = coord
            .graceful_shutdown(vec![stuck], Some(Duration::from_millis(100)))
            .await;
        assert!(!finished);
        assert!(coord.is_shutting_down());
    }
}
