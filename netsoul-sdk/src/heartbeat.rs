//! Keepalive scheduling while the session is online.
//!
//! The heartbeat owns no timer task. It only tracks the next deadline; the
//! client loop awaits [`Heartbeat::tick`] inside its `select!` so a tick can
//! never race a closed writer.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::HeartbeatError;

/// Interval between two `ping` commands.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct Heartbeat {
    period: Duration,
    next: Option<Instant>,
    starts: u32,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new(HEARTBEAT_INTERVAL)
    }
}

impl Heartbeat {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: None,
            starts: 0,
        }
    }

    /// Arm the heartbeat. The first ping fires one period from now.
    pub fn start(&mut self) -> Result<(), HeartbeatError> {
        if self.next.is_some() {
            return Err(HeartbeatError::AlreadyRunning);
        }
        self.next = Some(Instant::now() + self.period);
        self.starts += 1;
        tracing::debug!(period_secs = self.period.as_secs(), "Heartbeat started");
        Ok(())
    }

    /// Disarm. Safe to call any number of times.
    pub fn stop(&mut self) {
        if self.next.take().is_some() {
            tracing::debug!("Heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.next.is_some()
    }

    /// How many times the heartbeat has been armed.
    pub fn start_count(&self) -> u32 {
        self.starts
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next deadline and schedule the following one.
    ///
    /// Never resolves while stopped. Cancel-safe: the deadline only moves
    /// once the sleep has completed.
    pub async fn tick(&mut self) {
        match self.next {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                self.next = Some(deadline + self.period);
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_start_is_rejected() {
        let mut hb = Heartbeat::default();
        hb.start().unwrap();
        assert_eq!(hb.start(), Err(HeartbeatError::AlreadyRunning));
        assert_eq!(hb.start_count(), 1);
    }

    #[test]
    fn stop_is_idempotent_and_allows_restart() {
        let mut hb = Heartbeat::default();
        hb.stop();
        hb.start().unwrap();
        hb.stop();
        hb.stop();
        assert!(!hb.is_running());
        hb.start().unwrap();
        assert_eq!(hb.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_every_period() {
        let mut hb = Heartbeat::default();
        let begin = Instant::now();
        hb.start().unwrap();
        hb.tick().await;
        assert_eq!(begin.elapsed(), HEARTBEAT_INTERVAL);
        hb.tick().await;
        assert_eq!(begin.elapsed(), HEARTBEAT_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_heartbeat_never_ticks() {
        let mut hb = Heartbeat::default();
        let fired = tokio::time::timeout(Duration::from_secs(60), hb.tick()).await;
        assert!(fired.is_err());
    }
}
