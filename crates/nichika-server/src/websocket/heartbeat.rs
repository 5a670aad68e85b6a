//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::Liveness;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Number of consecutive silent intervals tolerated: `timeout / interval`,
/// at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let n = (timeout.as_millis() / interval_ms).max(1);
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Watch a connection's liveness.
///
/// At each `interval` tick the alive flag is checked and reset. Once
/// [`max_missed`] consecutive ticks find it unset the peer is considered
/// dead.
pub async fn run_heartbeat(
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;
    let max_missed = max_missed(interval, timeout);
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if liveness.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_missed_from_timeout_and_interval() {
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(90)), 3);
        assert_eq!(max_missed(Duration::from_millis(100), Duration::from_millis(250)), 2);
        assert_eq!(max_missed(Duration::from_secs(30), Duration::from_secs(10)), 1);
        assert_eq!(max_missed(Duration::ZERO, Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let live = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(live, Duration::from_secs(100), Duration::from_secs(300), cancel2).await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let live = Arc::new(Liveness::new());
        let _ = live.check_alive();

        let result = run_heartbeat(
            live,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_peer_stays_alive() {
        let live = Arc::new(Liveness::new());
        let live2 = Arc::clone(&live);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(live2, Duration::from_millis(100), Duration::from_millis(200), cancel2)
                .await
        });

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            live.mark_alive();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
