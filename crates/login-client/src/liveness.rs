//! Heartbeat bookkeeping for the login socket.
//!
//! The periodic tick itself is a timer owned by the client; this type only
//! records when the peer last answered and decides when the link is stale.

use std::time::Duration;
use tokio::time::Instant;

/// Slack added on top of the missed-heartbeat budget.
const STALE_GRACE: Duration = Duration::from_millis(500);

/// Number of heartbeat intervals the server may stay silent.
const MISSED_HEARTBEATS: u32 = 5;

/// Tracks pong timestamps and detects a silent server.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    interval: Duration,
    last_pong: Option<Instant>,
}

impl LivenessMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_pong: None,
        }
    }

    /// Heartbeat period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Elapsed silence after which the connection counts as dead.
    pub fn stale_after(&self) -> Duration {
        self.interval * MISSED_HEARTBEATS + STALE_GRACE
    }

    /// Record the handshake start as the baseline for the first check.
    pub fn start(&mut self, now: Instant) {
        self.last_pong = Some(now);
    }

    /// Record an inbound pong.
    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = Some(now);
    }

    /// Forget all heartbeat state.
    pub fn reset(&mut self) {
        self.last_pong = None;
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// True if a baseline exists and the server has been silent for too long.
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.last_pong {
            Some(last) => now.saturating_duration_since(last) > self.stale_after(),
            None => false,
        }
    }
}
