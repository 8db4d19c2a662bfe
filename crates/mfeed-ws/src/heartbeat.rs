//! Heartbeat tracking for a stream session.
//!
//! A ping arms a pong deadline. Any inbound frame clears it, so servers
//! that never echo pings still count as alive while they keep talking.
//! Owned by a single session; dropped with it on disconnect.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Ping/pong deadline state for one session.
#[derive(Debug)]
pub struct Heartbeat {
    ping_interval: Duration,
    pong_timeout: Duration,
    pong_deadline: Option<Instant>,
    last_ping: Option<Instant>,
    last_rtt: Option<Duration>,
}

impl Heartbeat {
    pub fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            pong_deadline: None,
            last_ping: None,
            last_rtt: None,
        }
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    /// Record that a ping was sent; arms the pong deadline unless one is
    /// already pending.
    pub fn record_ping(&mut self, now: Instant) {
        if self.pong_deadline.is_none() {
            self.last_ping = Some(now);
            self.pong_deadline = Some(now + self.pong_timeout);
        }
    }

    /// Record any inbound frame; clears a pending pong deadline.
    pub fn record_activity(&mut self, now: Instant) {
        if self.pong_deadline.take().is_some() {
            if let Some(ping_time) = self.last_ping {
                let rtt = now.saturating_duration_since(ping_time);
                self.last_rtt = Some(rtt);
                debug!(rtt_ms = rtt.as_millis() as u64, "Liveness after ping");
            }
        }
    }

    /// Deadline by which some inbound frame must arrive, if armed.
    pub fn pong_deadline(&self) -> Option<Instant> {
        self.pong_deadline
    }

    /// Time from the last ping to the first frame after it.
    pub fn last_rtt(&self) -> Option<Duration> {
        self.last_rtt
    }
}

/// Resolve at the pong deadline, or never when none is armed.
pub async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> Heartbeat {
        Heartbeat::new(Duration::from_secs(20), Duration::from_secs(10))
    }

    #[test]
    fn test_initial_state() {
        let hb = heartbeat();
        assert!(hb.pong_deadline().is_none());
        assert!(hb.last_rtt().is_none());
    }

    #[test]
    fn test_ping_arms_deadline() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.record_ping(now);

        assert_eq!(hb.pong_deadline(), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_any_activity_clears_deadline() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.record_ping(now);
        hb.record_activity(now + Duration::from_millis(40));

        assert!(hb.pong_deadline().is_none());
        assert_eq!(hb.last_rtt(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_activity_without_ping_keeps_rtt_empty() {
        let mut hb = heartbeat();
        hb.record_activity(Instant::now());
        assert!(hb.last_rtt().is_none());
    }

    #[test]
    fn test_second_ping_keeps_pending_deadline() {
        let mut hb = heartbeat();
        let now = Instant::now();
        hb.record_ping(now);
        hb.record_ping(now + Duration::from_secs(5));
        assert_eq!(hb.pong_deadline(), Some(now + Duration::from_secs(10)));

        hb.record_activity(now + Duration::from_secs(6));
        hb.record_ping(now + Duration::from_secs(20));
        assert_eq!(hb.pong_deadline(), Some(now + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deadline_fires_at_deadline() {
        let start = Instant::now();
        wait_for_deadline(Some(start + Duration::from_millis(250))).await;
        assert!(Instant::now() >= start + Duration::from_millis(250));
    }

    #[test]
    fn test_wait_without_deadline_stays_pending() {
        let mut wait = tokio_test::task::spawn(wait_for_deadline(None));
        tokio_test::assert_pending!(wait.poll());
        tokio_test::assert_pending!(wait.poll());
    }
}
