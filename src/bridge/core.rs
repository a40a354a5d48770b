//! Bridge handle.
//!
//! [`Bridge`] is a cheap cloneable handle to one event loop. Every method is
//! non-blocking except the ones awaiting a backend answer ([`Bridge::call`],
//! [`Bridge::notify`]) or a state ([`Bridge::wait_for_state`]).
//!
//! # Example
//!
//! ```no_run
//! use connection_bridge::{Bridge, BridgeEvent, ConnectionState};
//! use serde_json::json;
//!
//! # async fn example() -> connection_bridge::Result<()> {
//! let bridge = Bridge::builder().url("ws://127.0.0.1:9000").build()?;
//!
//! bridge.on("user_updated", |event| println!("{}", event.payload));
//! bridge.connect()?;
//! bridge.wait_for_state(ConnectionState::Open).await?;
//!
//! let users = bridge.call_default("get_users", json!({})).await?;
//! println!("{users}");
//!
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{ConnectionError, Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::Envelope;
use crate::transport::Connector;

use super::builder::BridgeBuilder;
use super::config::BridgeConfig;
use super::event_loop::{BridgeCommand, EventLoop, Shared};
use super::events::BridgeEvent;
use super::router::InboundRouter;
use super::state::ConnectionState;
use super::stats::ConnectionStats;

// ============================================================================
// Bridge
// ============================================================================

/// Client side of the frontend/backend connection.
///
/// Clones share the same connection. The event loop stops when
/// [`Bridge::shutdown`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct Bridge {
    /// Command channel to the event loop.
    commands: mpsc::UnboundedSender<BridgeCommand>,
    /// Current state, published by the event loop.
    state: watch::Receiver<ConnectionState>,
    /// Notification channel (kept for `subscribe`).
    events: broadcast::Sender<BridgeEvent>,
    /// Statistics and last error.
    shared: Arc<Shared>,
    /// Subscriber registry (shared with the event loop).
    router: InboundRouter,
    /// Validated configuration.
    config: Arc<BridgeConfig>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("url", &self.config.url.as_str())
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Bridge - Construction
// ============================================================================

impl Bridge {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }

    /// Spawns the event loop on `runtime`.
    pub(crate) fn spawn(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        runtime: &Handle,
    ) -> Self {
        let config = Arc::new(config);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Uninstantiated);
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        let shared = Arc::new(Shared::default());
        let router = InboundRouter::new();

        let event_loop = EventLoop::new(
            Arc::clone(&config),
            connector,
            Arc::clone(&shared),
            router.clone(),
            state_tx,
            events_tx.clone(),
            commands_rx,
        );
        runtime.spawn(event_loop.run());

        debug!(url = %config.url, "Bridge created");

        Self {
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
            shared,
            router,
            config,
        }
    }
}

// ============================================================================
// Bridge - Lifecycle
// ============================================================================

impl Bridge {
    /// Starts connecting.
    ///
    /// Returns immediately; follow progress with [`Bridge::events`] or
    /// [`Bridge::wait_for_state`]. Ignored while already connecting or open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeClosed`] if the bridge was shut down.
    pub fn connect(&self) -> Result<()> {
        self.send(BridgeCommand::Connect)
    }

    /// Closes the connection with code 1000 and cancels any pending retry.
    ///
    /// No reconnection follows a manual disconnect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeClosed`] if the bridge was shut down.
    pub fn disconnect(&self) -> Result<()> {
        self.send(BridgeCommand::Disconnect)
    }

    /// Drops the current connection, resets statistics and the retry
    /// counter, then connects again.
    ///
    /// This is the only way out of the `Error` state reached after retries
    /// are exhausted, besides [`Bridge::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeClosed`] if the bridge was shut down.
    pub fn reconnect(&self) -> Result<()> {
        self.send(BridgeCommand::Reconnect)
    }

    /// Enables or disables liveness probes at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeClosed`] if the bridge was shut down.
    pub fn set_heartbeat(&self, enabled: bool) -> Result<()> {
        self.send(BridgeCommand::SetHeartbeat(enabled))
    }

    /// Stops the event loop.
    ///
    /// Closes the transport and rejects every pending call with
    /// [`Error::BridgeClosed`]. Resolves once teardown finished; calling it
    /// again is a no-op.
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .commands
            .send(BridgeCommand::Shutdown { done: done_tx })
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    /// Returns `true` once the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

// ============================================================================
// Bridge - Calls
// ============================================================================

impl Bridge {
    /// Sends a correlated call and waits for its response.
    ///
    /// `timeout` defaults to the configured call timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] immediately, without I/O, unless `Open`/`Ready`
    /// - [`Error::TooManyPending`] if the pending table is full
    /// - [`Error::Timeout`] if no response arrives in time
    /// - [`Error::Rejected`] if the backend answers `success: false` or an error frame
    /// - [`Error::Transport`] if the frame could not be sent
    /// - [`Error::BridgeClosed`] if the bridge shuts down first
    pub async fn call(
        &self,
        name: impl Into<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::BridgeClosed);
        }
        let state = self.state();
        if !state.is_open() {
            return Err(Error::not_connected(state));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BridgeCommand::Call {
            name: name.into(),
            payload,
            timeout: timeout.unwrap_or(self.config.call_timeout),
            reply: reply_tx,
        })?;

        reply_rx.await.map_err(|_| Error::BridgeClosed)?
    }

    /// Sends a call with the configured default timeout.
    ///
    /// # Errors
    ///
    /// See [`Bridge::call`].
    pub async fn call_default(&self, name: impl Into<String>, payload: Value) -> Result<Value> {
        self.call(name, payload, None).await
    }

    /// Sends an envelope without waiting for a response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless `Open`/`Ready`
    /// - [`Error::Transport`] if the frame could not be sent
    /// - [`Error::BridgeClosed`] if the bridge was shut down
    pub async fn notify(&self, name: impl Into<String>, payload: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::BridgeClosed);
        }
        let state = self.state();
        if !state.is_open() {
            return Err(Error::not_connected(state));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BridgeCommand::Notify {
            name: name.into(),
            payload,
            reply: reply_tx,
        })?;

        reply_rx.await.map_err(|_| Error::BridgeClosed)?
    }

    /// Number of calls awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }
}

// ============================================================================
// Bridge - Subscriptions
// ============================================================================

impl Bridge {
    /// Registers a handler for backend events named `name`.
    ///
    /// Handlers run on the event loop and must not block.
    pub fn on<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.router.subscribe(name, Arc::new(handler))
    }

    /// Registers a handler for every backend event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.router.subscribe_all(Arc::new(handler))
    }

    /// Removes a handler. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    /// Subscribes to bridge notifications.
    ///
    /// Only notifications sent after this call are received.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }
}

// ============================================================================
// Bridge - Observation
// ============================================================================

impl Bridge {
    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns `true` while calls may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Waits until the state equals `target`.
    ///
    /// Resolves immediately if it already does.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BridgeClosed`] if the event loop stops first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::BridgeClosed)
    }

    /// Snapshot of the connection counters.
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats.read().clone()
    }

    /// Most recent connection or inbound error.
    #[must_use]
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.shared.last_error.read().clone()
    }

    /// The validated configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn send(&self, command: BridgeCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::BridgeClosed)
    }
}
