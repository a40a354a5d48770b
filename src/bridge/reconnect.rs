//! Reconnect policy and scheduler.
//!
//! # Backoff
//!
//! ```text
//! Attempt    Delay (initial=3s, factor=1.5, max=30s)
//! ───────────────────────────────────────────────
//!    1        3.000s
//!    2        4.500s
//!    3        6.750s
//!    4       10.125s
//!    5       15.188s
//!   >5       GIVE UP  → Error state, ReconnectFailed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use tracing::debug;

// ============================================================================
// Constants
// ============================================================================

/// Delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(3_000);

/// Upper bound for any reconnect delay.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_millis(30_000);

/// Multiplier applied per consecutive failure.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Consecutive failures tolerated before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay for attempt 1.
    pub initial_interval: Duration,
    /// Delay cap.
    pub max_interval: Duration,
    /// Growth factor per attempt (at least 1.0).
    pub backoff_factor: f64,
    /// Attempts allowed before the bridge gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay before attempt number `attempt` (1-based).
    ///
    /// `min(initial * factor^(attempt - 1), max)`; attempt 0 is treated as 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(exponent);
        let cap = self.max_interval.as_secs_f64();

        if scaled.is_finite() && scaled < cap {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_interval
        }
    }

    /// Returns `true` if another attempt is allowed after `attempts` failures.
    #[inline]
    #[must_use]
    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

// ============================================================================
// ReconnectScheduler
// ============================================================================

/// What the scheduler decided after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A retry timer is armed.
    Retry {
        /// Attempt number the timer will start (1-based).
        attempt: u32,
        /// Delay until it fires.
        delay: Duration,
    },
    /// Retries are exhausted or disabled.
    GiveUp {
        /// Attempts made since the last successful open.
        attempts: u32,
    },
}

/// Tracks consecutive failures and owns the single retry timer.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    enabled: bool,
    attempts: u32,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectScheduler {
    /// Creates a scheduler with zero recorded attempts.
    #[must_use]
    pub fn new(policy: ReconnectPolicy, enabled: bool) -> Self {
        Self {
            policy,
            enabled,
            attempts: 0,
            timer: None,
        }
    }

    /// Records a failure and arms the retry timer if attempts remain.
    pub fn on_failure(&mut self) -> Decision {
        self.timer = None;

        if !self.enabled || !self.policy.allows(self.attempts) {
            debug!(attempts = self.attempts, "Reconnect attempts exhausted");
            return Decision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.timer = Some(Box::pin(sleep(delay)));

        debug!(attempt = self.attempts, ?delay, "Reconnect scheduled");
        Decision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Cancels a pending retry. Returns `true` if one was armed.
    pub fn cancel(&mut self) -> bool {
        self.timer.take().is_some()
    }

    /// Cancels any retry and clears the attempt counter.
    pub fn reset(&mut self) {
        self.timer = None;
        self.attempts = 0;
    }

    /// Returns `true` while a retry timer is armed.
    #[inline]
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.timer.is_some()
    }

    /// Attempts made since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The active policy.
    #[inline]
    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Completes when the armed timer fires; never completes when disarmed.
    ///
    /// Cancel safe: dropping the future leaves the timer armed.
    pub async fn fired(&mut self) -> u32 {
        match self.timer.as_mut() {
            Some(timer) => timer.await,
            None => std::future::pending().await,
        }
        self.timer = None;
        self.attempts
    }
}

// ============================================================================
// Tests
// ============================================================================
