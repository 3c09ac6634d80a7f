//! Client-side keepalive schedule and lifetime tracking.

use tokio::time::{Duration, Instant};

/// Tracks the keepalive cadence and how long the server has been silent.
///
/// Only clients run a timer: they emit KEEPALIVE with the RESPOND flag every
/// `period` and give the transport up once `max_lifetime` passes without an
/// acknowledgement.
#[derive(Debug)]
pub(crate) struct KeepaliveTimer {
    period: Duration,
    max_lifetime: Duration,
    last_acknowledged: Instant,
}

impl KeepaliveTimer {
    pub(crate) fn new(period: Duration, max_lifetime: Duration) -> Self {
        Self {
            period,
            max_lifetime,
            last_acknowledged: Instant::now(),
        }
    }

    pub(crate) fn period(&self) -> Duration { self.period }

    /// Record a keepalive acknowledgement (or any fresh transport binding).
    pub(crate) fn acknowledged(&mut self) { self.last_acknowledged = Instant::now(); }

    /// Whether the server has been silent past the maximum lifetime.
    pub(crate) fn is_expired(&self) -> bool {
        self.last_acknowledged.elapsed() > self.max_lifetime
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_silence() {
        let mut timer = KeepaliveTimer::new(Duration::from_millis(100), Duration::from_secs(1));
        assert!(!timer.is_expired());

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(timer.is_expired());

        timer.acknowledged();
        assert!(!timer.is_expired());
    }
}
