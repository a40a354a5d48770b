//! Bridge event loop.
//!
//! A single task owns the transport, the pending request table, the
//! reconnect scheduler and the heartbeat monitor. [`Bridge`](super::Bridge)
//! handles talk to it through [`BridgeCommand`]s.
//!
//! # Inputs
//!
//! The loop selects over:
//!
//! - Commands from bridge handles
//! - Results of spawned connect attempts
//! - Events from the current transport
//! - Expired call timers
//! - The reconnect timer
//! - The heartbeat interval
//! - The close handshake deadline
//!
//! Every input is handled to completion before the next one is polled, so
//! state changes are totally ordered.

// ============================================================================
// Imports
// ============================================================================

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{ControlFrame, ControlKind, Envelope, encode, timestamp_ms};
use crate::transport::{CLOSE_NORMAL, Connector, Link, TransportEvent};

use super::config::BridgeConfig;
use super::correlator::{Correlator, Responder, Settlement};
use super::events::BridgeEvent;
use super::heartbeat::HeartbeatMonitor;
use super::reconnect::{Decision, ReconnectScheduler};
use super::router::{InboundRouter, Route};
use super::state::{ConnectionState, StateChange};
use super::stats::ConnectionStats;

// ============================================================================
// BridgeCommand
// ============================================================================

/// Requests sent from bridge handles to the event loop.
pub(crate) enum BridgeCommand {
    /// Open the transport.
    Connect,
    /// Close the transport and stay closed.
    Disconnect,
    /// Drop the transport, reset counters and connect again.
    Reconnect,
    /// Send a correlated call.
    Call {
        name: String,
        payload: Value,
        timeout: Duration,
        reply: Responder,
    },
    /// Send an uncorrelated envelope.
    Notify {
        name: String,
        payload: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Enable or disable liveness probes.
    SetHeartbeat(bool),
    /// Stop the event loop.
    Shutdown { done: oneshot::Sender<()> },
}

/// Result of one spawned connect attempt.
struct ConnectAttempt {
    seq: u64,
    result: Result<Link>,
}

// ============================================================================
// Shared
// ============================================================================

/// State read by handles without a round trip to the event loop.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) stats: RwLock<ConnectionStats>,
    pub(crate) last_error: RwLock<Option<ConnectionError>>,
    pub(crate) pending: AtomicUsize,
}

// ============================================================================
// EventLoop
// ============================================================================

pub(crate) struct EventLoop {
    config: Arc<BridgeConfig>,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    router: InboundRouter,

    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<BridgeEvent>,

    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    attempts_tx: mpsc::UnboundedSender<ConnectAttempt>,
    attempts_rx: mpsc::UnboundedReceiver<ConnectAttempt>,
    connect_task: Option<JoinHandle<()>>,
    attempt_seq: u64,

    link: Option<Link>,
    correlator: Correlator,
    scheduler: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
    close_deadline: Option<Pin<Box<Sleep>>>,
}

impl EventLoop {
    pub(crate) fn new(
        config: Arc<BridgeConfig>,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        router: InboundRouter,
        state_tx: watch::Sender<ConnectionState>,
        events: broadcast::Sender<BridgeEvent>,
        commands: mpsc::UnboundedReceiver<BridgeCommand>,
    ) -> Self {
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();

        Self {
            correlator: Correlator::new(config.max_pending_requests),
            scheduler: ReconnectScheduler::new(config.reconnect, config.auto_reconnect),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval),
            config,
            connector,
            shared,
            router,
            state: ConnectionState::Uninstantiated,
            state_tx,
            events,
            commands,
            attempts_tx,
            attempts_rx,
            connect_task: None,
            attempt_seq: 0,
            link: None,
            close_deadline: None,
        }
    }

    /// Runs until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self) {
        debug!(url = %self.config.url, "Bridge event loop started");

        let done = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(BridgeCommand::Shutdown { done }) => break Some(done),
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All bridge handles dropped");
                        break None;
                    }
                },

                Some(attempt) = self.attempts_rx.recv() => {
                    self.handle_connect_result(attempt).await;
                }

                event = next_transport_event(&mut self.link) => {
                    self.handle_transport_event(event).await;
                }

                Some(request_id) = self.correlator.next_expired() => {
                    self.handle_expired(request_id);
                }

                attempt = self.scheduler.fired() => {
                    self.handle_retry(attempt);
                }

                () = self.heartbeat.tick() => {
                    self.send_heartbeat().await;
                }

                () = deadline(&mut self.close_deadline) => {
                    self.handle_close_timeout();
                }
            }
        };

        self.teardown().await;

        if let Some(done) = done {
            let _ = done.send(());
        }
        debug!("Bridge event loop terminated");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Connect => self.connect(),
            BridgeCommand::Disconnect => self.disconnect("disconnect requested").await,
            BridgeCommand::Reconnect => self.manual_reconnect().await,
            BridgeCommand::Call {
                name,
                payload,
                timeout,
                reply,
            } => self.call(name, payload, timeout, reply).await,
            BridgeCommand::Notify {
                name,
                payload,
                reply,
            } => {
                let result = self.notify(name, payload).await;
                let _ = reply.send(result);
            }
            BridgeCommand::SetHeartbeat(enabled) => {
                debug!(enabled, "Heartbeat toggled");
                self.heartbeat.set_enabled(enabled, self.state.is_open());
            }
            // Handled by the run loop.
            BridgeCommand::Shutdown { .. } => {}
        }
    }

    fn connect(&mut self) {
        match self.state {
            ConnectionState::Uninstantiated | ConnectionState::Closed | ConnectionState::Error => {
                self.scheduler.reset();
                self.transition(ConnectionState::Connecting, "connect requested");
                self.spawn_connect();
            }
            ConnectionState::Reconnecting => {
                self.scheduler.cancel();
                self.transition(ConnectionState::Connecting, "connect requested");
                self.spawn_connect();
            }
            state => debug!(%state, "Connect ignored"),
        }
    }

    async fn disconnect(&mut self, reason: &str) {
        self.scheduler.cancel();
        self.heartbeat.stop();
        self.abort_connect();

        match self.state {
            ConnectionState::Uninstantiated
            | ConnectionState::Closing
            | ConnectionState::Closed => {
                debug!(state = %self.state, "Disconnect ignored");
                return;
            }
            _ => {}
        }

        info!(reason, "Disconnecting");
        self.transition(ConnectionState::Closing, reason);

        let Some(link) = self.link.as_mut() else {
            self.transition(ConnectionState::Closed, reason);
            return;
        };

        let closed = link.sink.close(CLOSE_NORMAL, reason).await;
        match closed {
            Ok(()) => {
                self.close_deadline = Some(Box::pin(sleep(self.config.close_timeout)));
            }
            Err(e) => {
                warn!(error = %e, "Close handshake failed");
                self.link = None;
                self.emit(BridgeEvent::Disconnected {
                    code: None,
                    reason: e.to_string(),
                    clean: false,
                });
                self.transition(ConnectionState::Closed, reason);
            }
        }
    }

    async fn manual_reconnect(&mut self) {
        info!(state = %self.state, "Manual reconnect");
        self.shared.stats.write().reset();
        self.scheduler.reset();
        self.close_deadline = None;

        if self.state == ConnectionState::Connecting {
            self.spawn_connect();
            return;
        }

        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.sink.close(CLOSE_NORMAL, "reconnect requested").await {
                debug!(error = %e, "Close before reconnect failed");
            }
            self.emit(BridgeEvent::Disconnected {
                code: Some(CLOSE_NORMAL),
                reason: "reconnect requested".to_string(),
                clean: true,
            });
        }

        if self.state.is_open() {
            self.transition(ConnectionState::Closing, "reconnect requested");
        }
        if self.state == ConnectionState::Closing {
            self.transition(ConnectionState::Closed, "reconnect requested");
        }

        if self.transition(ConnectionState::Connecting, "reconnect requested") {
            self.spawn_connect();
        }
    }

    async fn call(&mut self, name: String, payload: Value, timeout: Duration, reply: Responder) {
        if !self.state.is_open() {
            let _ = reply.send(Err(Error::not_connected(self.state)));
            return;
        }
        if let Err(e) = self.correlator.ensure_capacity() {
            let _ = reply.send(Err(e));
            return;
        }

        let request_id = self.correlator.next_id();
        let text = match encode(&Envelope::call(request_id, name.as_str(), payload)) {
            Ok(text) => text,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.correlator.insert(request_id, name, timeout, reply);
        self.sync_pending();

        if let Err(e) = self.send_text(text).await {
            warn!(%request_id, error = %e, "Failed to send call");
            let message = e.to_string();
            if let Some(settled) = self.correlator.settle(request_id, Err(e)) {
                self.emit(BridgeEvent::CallFailed {
                    request_id,
                    name: settled.name,
                    message,
                });
            }
            self.sync_pending();
            return;
        }

        trace!(%request_id, ?timeout, "Call sent");
    }

    async fn notify(&mut self, name: String, payload: Value) -> Result<()> {
        if !self.state.is_open() {
            return Err(Error::not_connected(self.state));
        }
        let text = encode(&Envelope::notification(name, payload))?;
        self.send_text(text).await
    }

    // ========================================================================
    // Connect Attempts
    // ========================================================================

    fn spawn_connect(&mut self) {
        self.abort_connect();
        self.attempt_seq += 1;
        self.shared.stats.write().connect_attempts += 1;

        let seq = self.attempt_seq;
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let limit = self.config.connection_timeout;
        let attempts_tx = self.attempts_tx.clone();

        debug!(seq, %url, "Connect attempt started");
        self.connect_task = Some(tokio::spawn(async move {
            let result = match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(Error::connection_timeout(limit.as_millis() as u64)),
            };
            let _ = attempts_tx.send(ConnectAttempt { seq, result });
        }));
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
    }

    async fn handle_connect_result(&mut self, attempt: ConnectAttempt) {
        if attempt.seq != self.attempt_seq || self.state != ConnectionState::Connecting {
            debug!(seq = attempt.seq, state = %self.state, "Discarding stale connect result");
            if let Ok(mut link) = attempt.result {
                let _ = link.sink.close(CLOSE_NORMAL, "stale connection").await;
            }
            return;
        }

        self.connect_task = None;
        match attempt.result {
            Ok(link) => self.on_opened(link),
            Err(e) => self.on_connect_failed(e),
        }
    }

    fn on_opened(&mut self, link: Link) {
        self.link = Some(link);
        self.scheduler.reset();
        self.shared.stats.write().record_opened();

        info!(url = %self.config.url, "Connected");
        self.transition(ConnectionState::Open, "transport opened");
        self.heartbeat.start();
        self.emit(BridgeEvent::Connected { at: timestamp_ms() });
    }

    fn on_connect_failed(&mut self, error: Error) {
        warn!(error = %error, "Connect attempt failed");
        self.record_failure(&error);

        if matches!(error, Error::ConnectionTimeout { .. }) {
            self.transition(ConnectionState::Error, "connection timeout");
        }
        self.schedule_reconnect("connect attempt failed");
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        match self.scheduler.on_failure() {
            Decision::Retry { attempt, delay } => {
                info!(attempt, ?delay, "Reconnect scheduled");
                self.transition(ConnectionState::Reconnecting, reason);
                self.emit(BridgeEvent::ReconnectScheduled { attempt, delay });
            }
            Decision::GiveUp { attempts } => {
                if self.state != ConnectionState::Error {
                    let reason = if self.config.auto_reconnect {
                        "reconnect attempts exhausted"
                    } else {
                        reason
                    };
                    self.transition(ConnectionState::Error, reason);
                }

                let last_error = self.shared.last_error.read().clone();
                if let Some(record) = &last_error {
                    self.emit(BridgeEvent::Error(record.clone()));
                }
                if self.config.auto_reconnect {
                    warn!(attempts, "Reconnect failed");
                    self.emit(BridgeEvent::ReconnectFailed {
                        attempts,
                        last_error,
                    });
                }
            }
        }
    }

    fn handle_retry(&mut self, attempt: u32) {
        self.shared.stats.write().reconnects += 1;
        info!(attempt, "Reconnecting");
        if self.transition(ConnectionState::Connecting, "reconnect attempt") {
            self.spawn_connect();
        }
    }

    // ========================================================================
    // Transport Events
    // ========================================================================

    async fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => {
                self.shared.stats.write().record_received(text.len());
                if self.state == ConnectionState::Open {
                    self.transition(ConnectionState::Ready, "first message received");
                }
                let route = self.router.route(&text, &self.correlator);
                self.apply_route(route).await;
            }
            Some(TransportEvent::Undecodable(reason)) => {
                self.shared.stats.write().record_received(0);
                let route = self.router.undecodable(&reason);
                self.apply_route(route).await;
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.on_transport_lost(code, reason, None);
            }
            Some(TransportEvent::Failed(message)) => {
                self.on_transport_lost(None, message.clone(), Some(message));
            }
            None => {
                let message = "transport event stream ended".to_string();
                self.on_transport_lost(None, message.clone(), Some(message));
            }
        }
    }

    fn on_transport_lost(&mut self, code: Option<u16>, reason: String, failure: Option<String>) {
        self.link = None;
        let clean = failure.is_none() && code == Some(CLOSE_NORMAL);

        info!(?code, %reason, clean, "Transport closed");
        self.emit(BridgeEvent::Disconnected {
            code,
            reason: reason.clone(),
            clean,
        });

        match self.state {
            ConnectionState::Closing => {
                self.close_deadline = None;
                self.transition(ConnectionState::Closed, "closed by client");
            }
            ConnectionState::Open | ConnectionState::Ready if clean => {
                self.transition(ConnectionState::Closed, "closed by backend");
            }
            ConnectionState::Open | ConnectionState::Ready => {
                let error = match failure {
                    Some(message) => Error::socket(message),
                    None => Error::socket(format!(
                        "connection lost (code {}): {reason}",
                        code.map_or_else(|| "none".to_string(), |c| c.to_string())
                    )),
                };
                self.record_failure(&error);
                self.schedule_reconnect("connection lost");
            }
            state => debug!(%state, "Transport closed outside open state"),
        }
    }

    async fn apply_route(&mut self, route: Route) {
        match route {
            Route::Response {
                id: request_id,
                outcome,
            } => {
                let failure = outcome.as_ref().err().map(ToString::to_string);
                if let Some(settled) = self.correlator.settle(request_id, outcome) {
                    debug!(
                        %request_id,
                        name = %settled.name,
                        elapsed = ?settled.elapsed,
                        "Response received"
                    );
                    if let (Settlement::Rejected, Some(message)) = (settled.status, failure) {
                        self.emit(BridgeEvent::CallFailed {
                            request_id,
                            name: settled.name,
                            message,
                        });
                    }
                }
                self.sync_pending();
            }

            Route::Stale(request_id) => {
                warn!(%request_id, "Dropping response for settled request");
            }

            Route::Error(record) => {
                warn!(kind = %record.kind, message = %record.message, "Inbound error");
                self.shared.stats.write().record_error();
                *self.shared.last_error.write() = Some(record.clone());
                self.emit(BridgeEvent::Error(record));
            }

            Route::Control(control) => match control.kind {
                ControlKind::Ping => {
                    let pong = ControlFrame {
                        kind: ControlKind::Pong,
                        timestamp: timestamp_ms(),
                    };
                    match encode(&pong) {
                        Ok(text) => {
                            if let Err(e) = self.send_text(text).await {
                                warn!(error = %e, "Failed to answer ping");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to encode pong"),
                    }
                }
                ControlKind::Pong => trace!(sent = control.timestamp, "Pong received"),
            },

            Route::Event(envelope) => {
                self.router.dispatch(&envelope);
                self.emit(BridgeEvent::Message(envelope));
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn handle_expired(&mut self, request_id: RequestId) {
        if let Some(settled) = self.correlator.expire(request_id) {
            warn!(%request_id, name = %settled.name, timeout = ?settled.timeout, "Call timed out");
            self.emit(BridgeEvent::CallTimeout {
                request_id,
                name: settled.name,
                timeout: settled.timeout,
            });
        }
        self.sync_pending();
    }

    async fn send_heartbeat(&mut self) {
        let text = match encode(&ControlFrame::ping()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode ping");
                return;
            }
        };

        match self.send_text(text).await {
            Ok(()) => trace!("Ping sent"),
            Err(e) => warn!(error = %e, "Failed to send ping"),
        }
    }

    fn handle_close_timeout(&mut self) {
        self.close_deadline = None;
        if self.state != ConnectionState::Closing {
            return;
        }

        warn!(timeout = ?self.config.close_timeout, "Close handshake timed out");
        self.link = None;
        self.emit(BridgeEvent::Disconnected {
            code: None,
            reason: "close handshake timed out".to_string(),
            clean: false,
        });
        self.transition(ConnectionState::Closed, "close handshake timed out");
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    async fn teardown(&mut self) {
        info!("Bridge shutting down");
        self.commands.close();
        self.scheduler.cancel();
        self.heartbeat.stop();
        self.abort_connect();
        self.close_deadline = None;

        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.sink.close(CLOSE_NORMAL, "bridge shutdown").await {
                debug!(error = %e, "Close on shutdown failed");
            }
            self.emit(BridgeEvent::Disconnected {
                code: Some(CLOSE_NORMAL),
                reason: "bridge shutdown".to_string(),
                clean: true,
            });
        }

        if self.state.can_transition_to(ConnectionState::Closing) {
            self.transition(ConnectionState::Closing, "bridge shutdown");
        }
        if self.state == ConnectionState::Closing {
            self.transition(ConnectionState::Closed, "bridge shutdown");
        }

        self.correlator.fail_all(|| Error::BridgeClosed);
        self.sync_pending();
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Applies a transition if the table allows it.
    fn transition(&mut self, next: ConnectionState, reason: &str) -> bool {
        let old = self.state;
        if !old.can_transition_to(next) {
            warn!(%old, %next, reason, "Refusing illegal state transition");
            return false;
        }

        self.state = next;
        self.state_tx.send_replace(next);
        if !next.is_open() {
            self.heartbeat.stop();
        }

        debug!(%old, new = %next, reason, "State changed");
        self.emit(BridgeEvent::StateChanged(StateChange::new(old, next, reason)));
        true
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(Error::not_connected(self.state));
        };

        let bytes = text.len();
        if let Err(e) = link.sink.send_text(text).await {
            self.shared.stats.write().record_error();
            return Err(e);
        }
        self.shared.stats.write().record_sent(bytes);
        Ok(())
    }

    fn record_failure(&self, error: &Error) {
        self.shared.stats.write().record_error();
        *self.shared.last_error.write() = Some(ConnectionError::from(error));
    }

    fn sync_pending(&self) {
        self.shared
            .pending
            .store(self.correlator.len(), Ordering::Release);
    }

    fn emit(&self, event: BridgeEvent) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }
}

/// Next event of the current transport; pending while there is none.
async fn next_transport_event(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => pending().await,
    }
}

/// Completes when the deadline passes; pending while unset.
async fn deadline(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(timer) => timer.await,
        None => pending().await,
    }
}
