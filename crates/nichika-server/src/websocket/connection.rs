//! Per-connection liveness and the server-wide connection limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Liveness shared between a connection's read and write pumps.
///
/// The read pump marks the peer alive on any inbound frame; the heartbeat
/// checks and resets the flag once per interval.
#[derive(Debug)]
pub struct Liveness {
    connected_at: Instant,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
}

impl Liveness {
    /// A fresh, alive connection.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
        }
    }

    /// Record activity from the peer.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag.
    ///
    /// Returns `true` if the peer was active since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last inbound activity.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting limit on concurrent WebSocket connections.
#[derive(Debug)]
pub struct ConnectionSlots {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionSlots {
    /// Allow up to `max` concurrent connections.
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max,
        })
    }

    /// Take a slot, or `None` at the limit. The slot frees on drop.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| SlotGuard {
                slots: Arc::clone(self),
            })
    }

    /// Connections currently holding a slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Configured limit.
    pub fn max(&self) -> usize {
        self.max
    }
}

/// A held connection slot.
#[derive(Debug)]
pub struct SlotGuard {
    slots: Arc<ConnectionSlots>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.slots.active.fetch_sub(1, Ordering::AcqRel);
    }
}
