//! Heartbeat monitor.
//!
//! Owns an optional `tokio::time::Interval`. The event loop awaits
//! [`HeartbeatMonitor::tick`] and sends a ping whenever it completes.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::trace;

/// Default interval between liveness probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic liveness probe timer.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Option<Duration>,
    enabled: bool,
    interval: Option<Interval>,
}

impl HeartbeatMonitor {
    /// Creates a stopped monitor. `None` disables heartbeats entirely.
    #[must_use]
    pub fn new(period: Option<Duration>) -> Self {
        Self {
            period,
            enabled: period.is_some(),
            interval: None,
        }
    }

    /// Starts ticking; the first tick is one full period from now.
    pub fn start(&mut self) {
        let Some(period) = self.period.filter(|_| self.enabled) else {
            return;
        };

        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        trace!(?period, "Heartbeat started");
    }

    /// Stops ticking immediately.
    pub fn stop(&mut self) {
        if self.interval.take().is_some() {
            trace!("Heartbeat stopped");
        }
    }

    /// Enables or disables probes. `connected` restarts the timer when enabling.
    pub fn set_enabled(&mut self, enabled: bool, connected: bool) {
        self.enabled = enabled;
        if !enabled {
            self.stop();
        } else if connected && self.interval.is_none() {
            self.start();
        }
    }

    /// Returns `true` while the timer runs.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Returns `true` if probes are enabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Completes on the next tick; never completes while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}
