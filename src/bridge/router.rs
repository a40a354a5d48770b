//! Inbound router.
//!
//! Classifies each inbound text frame into a [`Route`]:
//!
//! | Order | Condition | Route |
//! |-------|-----------|-------|
//! | 1 | not JSON / unknown shape | [`Route::Error`] (`ParseError` / `ProtocolError`) |
//! | 2 | id matches a pending call | [`Route::Response`] |
//! | 3 | id of an already settled call | [`Route::Stale`] |
//! | 4 | `error_type` marker or `name == "error"` | [`Route::Error`] |
//! | 5 | `type` ping/pong | [`Route::Control`] |
//! | 6 | anything named | [`Route::Event`] |
//!
//! Events are dispatched to handlers registered by name and to subscribe-all
//! handlers. Handlers are cloned out of the registry before being invoked, so
//! a handler may subscribe or unsubscribe without deadlocking.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{trace, warn};

use crate::error::{ConnectionError, Error, ErrorKind, Result};
use crate::identifiers::{RequestId, SubscriptionId};
use crate::protocol::codec::preview;
use crate::protocol::{ControlFrame, Envelope, ErrorEnvelope, Frame, decode};

use super::correlator::Correlator;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked for a broadcast event.
pub type EventHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Envelope name the backend uses for uncorrelated error reports.
const ERROR_EVENT_NAME: &str = "error";

/// Classification of one inbound frame.
#[derive(Debug)]
pub enum Route {
    /// Answer to a pending call.
    Response {
        /// Correlation id.
        id: RequestId,
        /// Outcome to hand to the caller.
        outcome: Result<Value>,
    },
    /// Answer to a call that already settled.
    Stale(RequestId),
    /// Malformed frame or backend error report.
    Error(ConnectionError),
    /// Broadcast event.
    Event(Envelope),
    /// Ping or pong.
    Control(ControlFrame),
}

// ============================================================================
// Subscriptions
// ============================================================================

#[derive(Default)]
struct Subscriptions {
    by_name: FxHashMap<String, Vec<(SubscriptionId, EventHandler)>>,
    all: Vec<(SubscriptionId, EventHandler)>,
}

impl Subscriptions {
    fn handlers_for(&self, name: &str) -> Vec<EventHandler> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .chain(self.all.iter())
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        if let Some(index) = self.all.iter().position(|(sub, _)| *sub == id) {
            self.all.remove(index);
            return true;
        }

        let mut emptied = None;
        let mut found = false;
        for (name, handlers) in &mut self.by_name {
            if let Some(index) = handlers.iter().position(|(sub, _)| *sub == id) {
                handlers.remove(index);
                found = true;
                if handlers.is_empty() {
                    emptied = Some(name.clone());
                }
                break;
            }
        }

        if let Some(name) = emptied {
            self.by_name.remove(&name);
        }
        found
    }

    fn len(&self) -> usize {
        self.all.len() + self.by_name.values().map(Vec::len).sum::<usize>()
    }
}

// ============================================================================
// InboundRouter
// ============================================================================

/// Frame classifier and subscriber registry.
///
/// Cloning shares the registry.
#[derive(Clone, Default)]
pub struct InboundRouter {
    subscriptions: Arc<RwLock<Subscriptions>>,
}

impl std::fmt::Debug for InboundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRouter")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl InboundRouter {
    /// Creates a router with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Registry
    // ========================================================================

    /// Registers a handler for events named `name`.
    pub fn subscribe(&self, name: impl Into<String>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        let name = name.into();
        trace!(%id, %name, "Subscribed");
        self.subscriptions
            .write()
            .by_name
            .entry(name)
            .or_default()
            .push((id, handler));
        id
    }

    /// Registers a handler for every event.
    pub fn subscribe_all(&self, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId::next();
        trace!(%id, "Subscribed to all events");
        self.subscriptions.write().all.push((id, handler));
        id
    }

    /// Removes a handler. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.write().remove(id)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Classifies an inbound text frame.
    #[must_use]
    pub fn route(&self, text: &str, correlator: &Correlator) -> Route {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                let details = json!({ "raw_message": preview(text) });
                return Route::Error(ConnectionError::from(&e).with_details(details));
            }
        };

        if let Some(id) = frame.request_id() {
            if correlator.is_pending(&id) {
                return Route::Response {
                    id,
                    outcome: Self::outcome(id, frame),
                };
            }
            if correlator.is_retired(&id) {
                return Route::Stale(id);
            }
        }

        match frame {
            Frame::Error(error) => Route::Error(Self::backend_error(error)),
            Frame::Envelope(envelope) if envelope.name == ERROR_EVENT_NAME => {
                let kind = envelope
                    .payload
                    .get("error_type")
                    .and_then(Value::as_str)
                    .map_or(ErrorKind::Unknown, ErrorKind::from_marker);
                let record = ConnectionError::new(kind, envelope.error_message())
                    .with_details(envelope.payload);
                Route::Error(record)
            }
            Frame::Envelope(envelope) => Route::Event(envelope),
            Frame::Control(control) => Route::Control(control),
        }
    }

    /// Classifies a frame the transport could not turn into text.
    #[must_use]
    pub fn undecodable(&self, reason: &str) -> Route {
        let record = ConnectionError::new(ErrorKind::ParseError, reason.to_string())
            .with_details(json!({ "error_type": "UTF8_DECODE_ERROR" }));
        Route::Error(record)
    }

    fn outcome(id: RequestId, frame: Frame) -> Result<Value> {
        match frame {
            Frame::Envelope(envelope) if envelope.success() == Some(false) => {
                Err(Error::rejected(id, envelope.error_message(), envelope.payload))
            }
            Frame::Envelope(envelope) => Ok(envelope.payload),
            Frame::Error(error) => Err(Error::rejected(
                id,
                error.message,
                error.details.unwrap_or(Value::Null),
            )),
            Frame::Control(_) => Err(Error::protocol("control frame carries no id")),
        }
    }

    fn backend_error(error: ErrorEnvelope) -> ConnectionError {
        let kind = ErrorKind::from_marker(&error.error_type);
        let details = json!({
            "id": error.id,
            "error_type": error.error_type,
            "details": error.details,
        });
        ConnectionError::new(kind, error.message).with_details(details)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Invokes every handler interested in `envelope`.
    ///
    /// Returns the number of handlers called. A panicking handler is logged
    /// and skipped.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let handlers = self.subscriptions.read().handlers_for(&envelope.name);

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(envelope))).is_err() {
                warn!(name = %envelope.name, "Event handler panicked");
            }
        }

        trace!(name = %envelope.name, handlers = handlers.len(), "Event dispatched");
        handlers.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
