//! Builder pattern for bridge configuration.
//!
//! Provides a fluent API for configuring and creating [`Bridge`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use connection_bridge::Bridge;
//!
//! # async fn example() -> connection_bridge::Result<()> {
//! let bridge = Bridge::builder()
//!     .port(9000)
//!     .connection_timeout(Duration::from_secs(5))
//!     .max_reconnect_attempts(10)
//!     .build()?;
//!
//! bridge.connect()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Connector, WsConnector};

use super::config::{
    BridgeConfig, DEFAULT_CLOSE_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_EVENT_CAPACITY,
    DEFAULT_HOST, DEFAULT_PORT,
};
use super::core::Bridge;
use super::correlator::{DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_PENDING_REQUESTS};
use super::heartbeat::DEFAULT_HEARTBEAT_INTERVAL;
use super::reconnect::ReconnectPolicy;

// ============================================================================
// BridgeBuilder
// ============================================================================

/// Builder for configuring a [`Bridge`] instance.
///
/// Use [`Bridge::builder()`] to create a new builder.
#[derive(Clone)]
pub struct BridgeBuilder {
    /// Full backend URL; overrides host/port.
    url: Option<String>,
    /// Backend host.
    host: Option<String>,
    /// Backend port.
    port: Option<u16>,
    /// Reconnect backoff policy.
    reconnect: ReconnectPolicy,
    /// Automatic reconnection toggle.
    auto_reconnect: bool,
    /// Time allowed for the transport to open.
    connection_timeout: Duration,
    /// Liveness probe interval.
    heartbeat_interval: Option<Duration>,
    /// Default call timeout.
    call_timeout: Duration,
    /// Outstanding call limit.
    max_pending_requests: usize,
    /// Notification channel capacity.
    event_capacity: usize,
    /// Manual close handshake timeout.
    close_timeout: Duration,
    /// Transport implementation.
    connector: Option<Arc<dyn Connector>>,
}

impl fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("url", &self.url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("reconnect", &self.reconnect)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("connection_timeout", &self.connection_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("call_timeout", &self.call_timeout)
            .field("max_pending_requests", &self.max_pending_requests)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// BridgeBuilder Implementation
// ============================================================================

impl BridgeBuilder {
    /// Creates a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            reconnect: ReconnectPolicy::default(),
            auto_reconnect: true,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            connector: None,
        }
    }

    /// Sets the full backend URL, e.g. `ws://127.0.0.1:9000`.
    ///
    /// Takes precedence over [`host`](Self::host) and [`port`](Self::port).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the backend host (default `127.0.0.1`).
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the backend port (default `9000`).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Replaces the whole reconnect policy.
    #[inline]
    #[must_use]
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the delay before the first reconnect attempt.
    #[inline]
    #[must_use]
    pub fn initial_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect.initial_interval = interval;
        self
    }

    /// Sets the cap on reconnect delays.
    #[inline]
    #[must_use]
    pub fn max_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect.max_interval = interval;
        self
    }

    /// Sets the delay multiplier per failed attempt.
    #[inline]
    #[must_use]
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect.backoff_factor = factor;
        self
    }

    /// Sets how many consecutive reconnect attempts are made before giving up.
    #[inline]
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Sets the time allowed for the transport to open.
    #[inline]
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the liveness probe interval.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Disables liveness probes.
    #[inline]
    #[must_use]
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat_interval = None;
        self
    }

    /// Sets the timeout used by [`Bridge::call_default`].
    #[inline]
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the maximum number of outstanding calls.
    #[inline]
    #[must_use]
    pub fn max_pending_requests(mut self, limit: usize) -> Self {
        self.max_pending_requests = limit;
        self
    }

    /// Sets the capacity of the notification channel.
    #[inline]
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets how long a manual disconnect waits for the close handshake.
    #[inline]
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Uses a custom transport instead of WebSocket.
    #[inline]
    #[must_use]
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Resolves and validates the configuration without starting a bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL or any setting is invalid.
    pub fn build_config(&self) -> Result<BridgeConfig> {
        let config = BridgeConfig {
            url: self.resolve_url()?,
            reconnect: self.reconnect,
            auto_reconnect: self.auto_reconnect,
            connection_timeout: self.connection_timeout,
            heartbeat_interval: self.heartbeat_interval,
            call_timeout: self.call_timeout,
            max_pending_requests: self.max_pending_requests,
            event_capacity: self.event_capacity,
            close_timeout: self.close_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds the bridge and spawns its event loop on the current runtime.
    ///
    /// The bridge starts `Uninstantiated`; call [`Bridge::connect`] to open
    /// the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the configuration is invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn build(self) -> Result<Bridge> {
        let config = self.build_config()?;
        let runtime = Handle::try_current().map_err(|_| {
            Error::config(
                "Bridge must be built inside a tokio runtime.\n\
                 Example: call build() from an async fn run by #[tokio::main]",
            )
        })?;
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector::new()));

        Ok(Bridge::spawn(config, connector, &runtime))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BridgeBuilder {
    /// Resolves the backend URL from `url` or `host`/`port`.
    fn resolve_url(&self) -> Result<Url> {
        let raw = match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "ws://{}:{}",
                self.host.as_deref().unwrap_or(DEFAULT_HOST),
                self.port.unwrap_or(DEFAULT_PORT)
            ),
        };

        Url::parse(&raw).map_err(|e| Error::config(format!("Invalid backend URL '{raw}': {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
