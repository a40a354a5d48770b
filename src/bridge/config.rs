//! Bridge configuration.
//!
//! Built and validated by [`BridgeBuilder`](super::BridgeBuilder); read-only
//! once the bridge is running.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

use super::correlator::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_PENDING_REQUESTS};
use super::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use super::reconnect::ReconnectPolicy;

// ============================================================================
// Constants
// ============================================================================

/// Default backend host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default backend port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default time allowed for a transport to open (10s).
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for a manual close to complete.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the notification channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ============================================================================
// BridgeConfig
// ============================================================================

/// Runtime configuration of a bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Backend WebSocket URL (`ws://` or `wss://`).
    pub url: Url,

    /// Backoff policy for automatic reconnection.
    pub reconnect: ReconnectPolicy,

    /// Reconnect automatically after a non-clean close.
    pub auto_reconnect: bool,

    /// Maximum time for a transport to open.
    pub connection_timeout: Duration,

    /// Liveness probe interval; `None` disables probes.
    pub heartbeat_interval: Option<Duration>,

    /// Timeout used by calls that do not specify one.
    pub call_timeout: Duration,

    /// Maximum outstanding calls.
    pub max_pending_requests: usize,

    /// Notification channel capacity.
    pub event_capacity: usize,

    /// Time to wait for the close handshake of a manual disconnect.
    pub close_timeout: Duration,
}

impl BridgeConfig {
    /// Creates a configuration for `url` with every other setting at its default.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: ReconnectPolicy::default(),
            auto_reconnect: true,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "Backend URL must use ws:// or wss://, got: {}",
                self.url
            )));
        }

        let policy = &self.reconnect;
        if policy.initial_interval.is_zero() {
            return Err(Error::config("initial_reconnect_interval must be non-zero"));
        }
        if policy.max_interval < policy.initial_interval {
            return Err(Error::config(format!(
                "max_reconnect_interval ({:?}) is shorter than initial_reconnect_interval ({:?})",
                policy.max_interval, policy.initial_interval
            )));
        }
        if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
            return Err(Error::config(format!(
                "backoff_factor must be a finite number >= 1.0, got: {}",
                policy.backoff_factor
            )));
        }

        let non_zero = [
            ("connection_timeout", self.connection_timeout),
            ("call_timeout", self.call_timeout),
            ("close_timeout", self.close_timeout),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, value)| value.is_zero()) {
            return Err(Error::config(format!("{name} must be non-zero")));
        }

        if self.heartbeat_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::config(
                "heartbeat_interval must be non-zero. Use without_heartbeat() to disable it.",
            ));
        }
        if self.max_pending_requests == 0 {
            return Err(Error::config("max_pending_requests must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
