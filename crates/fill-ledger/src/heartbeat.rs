//! Websocket liveness tracking for the transaction feed.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

/// Tracks ping/pong timing and message activity on one connection.
#[derive(Debug)]
pub struct Heartbeat {
    /// Idle time after which a ping is sent.
    interval: Duration,
    /// How long a pong may take.
    timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl Heartbeat {
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            state: Mutex::new(HeartbeatState {
                last_ping: None,
                last_message: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Period at which liveness should be checked.
    #[must_use]
    pub fn check_period(&self) -> Duration {
        (self.interval / 2).max(Duration::from_millis(1))
    }

    /// Reset on a fresh connection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_ping = None;
        state.last_message = Instant::now();
        state.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut state = self.state.lock();
        state.last_ping = Some(Instant::now());
        state.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        state.waiting_for_pong = false;
        state.last_message = Instant::now();
        if let Some(ping) = state.last_ping {
            debug!(rtt_ms = ping.elapsed().as_millis() as u64, "Received pong");
        }
    }

    pub fn record_message(&self) {
        self.state.lock().last_message = Instant::now();
    }

    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        let state = self.state.lock();
        state.waiting_for_pong
            && state
                .last_ping
                .is_some_and(|ping| ping.elapsed() > self.timeout)
    }

    /// A ping is due when the connection has been idle for a full interval
    /// and no ping is outstanding.
    #[must_use]
    pub fn should_ping(&self) -> bool {
        let state = self.state.lock();
        !state.waiting_for_pong && state.last_message.elapsed() >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ping_due_after_idle_interval() {
        let hb = Heartbeat::new(Duration::from_secs(30), Duration::from_secs(10));
        assert!(!hb.should_ping());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(hb.should_ping());

        hb.record_ping();
        assert!(!hb.should_ping());
        assert!(!hb.is_timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pong_times_out() {
        let hb = Heartbeat::new(Duration::from_secs(30), Duration::from_secs(10));
        hb.record_ping();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(hb.is_timed_out());

        hb.record_pong();
        assert!(!hb.is_timed_out());
    }
}
