//! Transport layer.
//!
//! The bridge never talks to a socket directly. It asks a [`Connector`] for a
//! [`Link`]: a write half ([`TransportSink`]) plus a channel of
//! [`TransportEvent`]s produced by the read half.
//!
//! ```text
//! ┌─────────────────┐   send_text / close   ┌─────────────────┐
//! │  Bridge event   │──────────────────────►│  TransportSink  │
//! │  loop (actor)   │                       └─────────────────┘
//! │                 │   TransportEvent      ┌─────────────────┐
//! │                 │◄──────────────────────│  reader         │
//! └─────────────────┘                       └─────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `websocket` | `tokio-tungstenite` client connector |
//! | `memory` | In-process transport driven by tests |

// ============================================================================
// Submodules
// ============================================================================

/// In-memory transport with an explicitly driven backend side.
pub mod memory;

/// WebSocket client transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::{AcceptMode, MemoryBackend, MemoryConnector, MemoryPeer};
pub use websocket::WsConnector;

// ============================================================================
// Constants
// ============================================================================

/// Close code signalling a graceful shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for a connection lost without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

// ============================================================================
// Types
// ============================================================================

/// Something the read half of a transport observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame (binary frames are delivered here once UTF-8 decoded).
    Message(String),
    /// A frame that could not be turned into text.
    Undecodable(String),
    /// The transport closed.
    Closed {
        /// Close code, `None` if the peer sent no close frame.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The transport failed.
    Failed(String),
}

impl TransportEvent {
    /// Returns `true` for a close carrying [`CLOSE_NORMAL`].
    #[inline]
    #[must_use]
    pub fn is_clean_close(&self) -> bool {
        matches!(self, Self::Closed { code: Some(CLOSE_NORMAL), .. })
    }
}

/// An established transport.
pub struct Link {
    /// Write half.
    pub sink: Box<dyn TransportSink>,
    /// Events from the read half, in delivery order.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Opens transports to the backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establishes a new transport.
    ///
    /// Resolving means the transport is open. The bridge applies its own
    /// connect timeout around this call.
    async fn connect(&self, url: &Url) -> Result<Link>;
}

/// Write half of a transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Starts the close handshake.
    ///
    /// Completion is reported through [`TransportEvent::Closed`].
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
