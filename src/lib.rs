//! Connection Bridge - Resilient RPC-over-WebSocket client.
//!
//! This library keeps a single long-lived WebSocket connection between a
//! frontend process and a backend process, and layers request/response
//! calls, broadcast events and liveness probes on top of it.
//!
//! # Architecture
//!
//! The bridge follows an actor model:
//!
//! - **Handle ([`Bridge`])**: cloneable, sends commands, never touches the socket
//! - **Event loop**: one task owning the transport, pending calls and timers
//!
//! Key design principles:
//!
//! - Every state change goes through an explicit transition table
//! - Calls while disconnected fail fast; nothing is queued
//! - Non-clean closes reconnect with exponential backoff, clean closes do not
//! - Each call settles exactly once (response, rejection or timeout)
//!
//! # Quick Start
//!
//! ```no_run
//! use connection_bridge::{Bridge, ConnectionState, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let bridge = Bridge::builder().url("ws://127.0.0.1:9000").build()?;
//!
//!     bridge.on("user_updated", |event| println!("updated: {}", event.payload));
//!
//!     bridge.connect()?;
//!     bridge.wait_for_state(ConnectionState::Open).await?;
//!
//!     let users = bridge.call_default("get_users", json!({})).await?;
//!     println!("users: {users}");
//!
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | [`Bridge`] handle, state machine, reconnect, heartbeat, correlation |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire envelopes and codec |
//! | [`transport`] | WebSocket and in-memory transports |

// ============================================================================
// Modules
// ============================================================================

/// Bridge handle and connection management.
///
/// Use [`Bridge::builder()`] to create a configured bridge.
pub mod bridge;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for calls and subscriptions.
pub mod identifiers;

/// Wire protocol message types.
///
/// Envelopes, backend error frames, ping/pong control frames and the codec
/// that classifies inbound text.
pub mod protocol;

/// Transport layer.
///
/// The [`Connector`](transport::Connector) seam plus WebSocket and
/// in-memory implementations.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{
    Bridge, BridgeBuilder, BridgeConfig, BridgeEvent, ConnectionState, ConnectionStats,
    EventHandler, ReconnectPolicy, Settlement, StateChange,
};

// Error types
pub use error::{ConnectionError, Error, ErrorKind, Result};

// Identifier types
pub use identifiers::{RequestId, SubscriptionId};

// Protocol types
pub use protocol::{ControlFrame, ControlKind, Envelope, ErrorEnvelope, Source};

// Transport types
pub use transport::{Connector, TransportEvent, TransportSink, WsConnector};
