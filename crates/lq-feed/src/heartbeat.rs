//! Ping bookkeeping for one connection.
//!
//! The driver ticks this on its ping interval. By default every tick just
//! asks for a ping; with a pong timeout configured, a tick that finds the
//! previous ping unanswered for longer than the timeout reports
//! [`HeartbeatAction::Timeout`] instead.

use std::time::Duration;

use tokio::time::Instant;

/// What the driver should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    SendPing,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    pong_timeout: Option<Duration>,
    ping_outstanding_since: Option<Instant>,
}

impl Heartbeat {
    pub fn new(pong_timeout: Option<Duration>) -> Self {
        Self { pong_timeout, ping_outstanding_since: None }
    }

    pub fn on_tick(&mut self, now: Instant) -> HeartbeatAction {
        if let (Some(timeout), Some(since)) = (self.pong_timeout, self.ping_outstanding_since) {
            if now.saturating_duration_since(since) > timeout {
                return HeartbeatAction::Timeout;
            }
        }
        if self.ping_outstanding_since.is_none() {
            self.ping_outstanding_since = Some(now);
        }
        HeartbeatAction::SendPing
    }

    pub fn record_pong(&mut self) {
        self.ping_outstanding_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_timeout_always_pings() {
        let mut hb = Heartbeat::new(None);
        let t0 = Instant::now();
        for i in 0..10 {
            assert_eq!(hb.on_tick(t0 + Duration::from_secs(30 * i)), HeartbeatAction::SendPing);
        }
    }

    #[test]
    fn pong_clears_outstanding_ping() {
        let mut hb = Heartbeat::new(Some(Duration::from_secs(10)));
        let t0 = Instant::now();
        assert_eq!(hb.on_tick(t0), HeartbeatAction::SendPing);
        hb.record_pong();
        assert_eq!(hb.on_tick(t0 + Duration::from_secs(30)), HeartbeatAction::SendPing);
        // The 30 s ping is outstanding; 5 s later is still within the timeout.
        assert_eq!(hb.on_tick(t0 + Duration::from_secs(35)), HeartbeatAction::SendPing);
    }

    #[test]
    fn unanswered_ping_times_out() {
        let mut hb = Heartbeat::new(Some(Duration::from_secs(10)));
        let t0 = Instant::now();
        assert_eq!(hb.on_tick(t0), HeartbeatAction::SendPing);
        assert_eq!(hb.on_tick(t0 + Duration::from_secs(5)), HeartbeatAction::SendPing);
        assert_eq!(hb.on_tick(t0 + Duration::from_secs(11)), HeartbeatAction::Timeout);
    }
}
