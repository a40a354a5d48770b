//! Error types for the connection bridge.
//!
//! Two layers live here:
//!
//! - [`enum@Error`]: the crate error returned by every fallible operation.
//! - [`ErrorKind`] / [`ConnectionError`]: the fixed taxonomy reported to
//!   observers through `BridgeEvent::Error` and `Bridge::last_error`.
//!
//! # Usage
//!
//! ```ignore
//! use connection_bridge::{Bridge, Error, Result};
//!
//! async fn example(bridge: &Bridge) -> Result<()> {
//!     match bridge.call("get_users", serde_json::json!({}), None).await {
//!         Ok(payload) => println!("{payload}"),
//!         Err(e) if e.is_timeout() => println!("backend too slow"),
//!         Err(e) => return Err(e),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::ConnectionRefused`], [`Error::ConnectionTimeout`], [`Error::Socket`] |
//! | Transport | [`Error::NotConnected`], [`Error::Transport`], [`Error::BridgeClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::Parse`], [`Error::TooManyPending`] |
//! | Call | [`Error::Timeout`], [`Error::Rejected`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::result::Result as StdResult;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::bridge::ConnectionState;
use crate::identifiers::RequestId;
use crate::protocol::timestamp_ms;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by `BridgeBuilder::build` when a setting is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The backend refused the connection.
    #[error("Connection refused: {message}")]
    ConnectionRefused {
        /// Description of the refusal.
        message: String,
    },

    /// The transport did not open within the connect timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Low-level socket failure on an established transport.
    #[error("Socket error: {message}")]
    Socket {
        /// Description of the socket failure.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Operation requires an open connection.
    ///
    /// Returned immediately, without any I/O, by calls made while the
    /// bridge is not `Open`/`Ready`.
    #[error("Not connected (state: {state})")]
    NotConnected {
        /// State the bridge was in when the call was refused.
        state: ConnectionState,
    },

    /// Sending on the transport failed.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The bridge event loop has stopped.
    #[error("Bridge closed")]
    BridgeClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation in an inbound frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Inbound frame could not be parsed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },

    /// Too many calls awaiting a response.
    #[error("Too many pending requests: {pending}/{limit}")]
    TooManyPending {
        /// Calls currently outstanding.
        pending: usize,
        /// Configured limit.
        limit: usize,
    },

    // ========================================================================
    // Call Errors
    // ========================================================================
    /// No response arrived before the call's timeout.
    #[error("Request {request_id} ({name}) timed out after {timeout_ms}ms")]
    Timeout {
        /// The request that timed out.
        request_id: RequestId,
        /// Operation name of the call.
        name: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The backend answered with `success: false` or an error frame.
    #[error("Request {request_id} rejected: {message}")]
    Rejected {
        /// The rejected request.
        request_id: RequestId,
        /// Error message supplied by the backend.
        message: String,
        /// Full response payload.
        payload: Value,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection refused error.
    #[inline]
    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::ConnectionRefused {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a socket error.
    #[inline]
    pub fn socket(message: impl Into<String>) -> Self {
        Self::Socket {
            message: message.into(),
        }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(state: ConnectionState) -> Self {
        Self::NotConnected { state }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a parse error.
    #[inline]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn timeout(request_id: RequestId, name: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            request_id,
            name: name.into(),
            timeout_ms,
        }
    }

    /// Creates a rejected call error.
    #[inline]
    pub fn rejected(request_id: RequestId, message: impl Into<String>, payload: Value) -> Self {
        Self::Rejected {
            request_id,
            message: message.into(),
            payload,
        }
    }

    /// Maps a connect failure from the operating system into the taxonomy.
    pub(crate) fn from_connect_io(err: IoError) -> Self {
        match err.kind() {
            IoErrorKind::ConnectionRefused => Self::connection_refused(err.to_string()),
            IoErrorKind::TimedOut => Self::socket(format!("connect timed out: {err}")),
            _ => Self::Io(err),
        }
    }
}

// ============================================================================
// Error Classification
// ============================================================================

impl Error {
    /// Returns the taxonomy kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionRefused { .. } => ErrorKind::ConnectionRefused,
            Self::ConnectionTimeout { .. } => ErrorKind::ConnectionTimeout,
            Self::Socket { .. } | Self::WebSocket(_) => ErrorKind::SocketError,
            Self::Io(e) if e.kind() == IoErrorKind::ConnectionRefused => {
                ErrorKind::ConnectionRefused
            }
            Self::Io(_) => ErrorKind::SocketError,
            Self::NotConnected { .. }
            | Self::Transport { .. }
            | Self::BridgeClosed => ErrorKind::TransportError,
            Self::Protocol { .. } | Self::TooManyPending { .. } => ErrorKind::ProtocolError,
            Self::Parse { .. } => ErrorKind::ParseError,
            Self::Json(_) => ErrorKind::SerializationError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config { .. } | Self::Rejected { .. } => ErrorKind::Unknown,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a connection or transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionTimeout
                | ErrorKind::SocketError
                | ErrorKind::TransportError
        )
    }

    /// Returns `true` if this error may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotConnected { .. }
                | Self::Timeout { .. }
                | Self::TooManyPending { .. }
        )
    }
}

// ============================================================================
// ErrorKind
// ============================================================================

/// Fixed error taxonomy reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The backend refused the connection.
    ConnectionRefused,
    /// The transport did not open in time.
    ConnectionTimeout,
    /// Malformed but parseable inbound data, or a backend protocol error.
    ProtocolError,
    /// Outbound data could not be serialized.
    SerializationError,
    /// Operation attempted without a usable transport.
    TransportError,
    /// Socket-level failure.
    SocketError,
    /// Inbound data could not be parsed.
    ParseError,
    /// A call timed out.
    Timeout,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Maps a backend `error_type` marker onto the taxonomy.
    #[must_use]
    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "JSON_PARSE_ERROR" | "BINARY_PARSE_ERROR" | "UTF8_DECODE_ERROR" | "PARSE_ERROR" => {
                Self::ParseError
            }
            "PROTOCOL_ERROR" => Self::ProtocolError,
            "SERIALIZATION_ERROR" => Self::SerializationError,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionRefused => "ConnectionRefused",
            Self::ConnectionTimeout => "ConnectionTimeout",
            Self::ProtocolError => "ProtocolError",
            Self::SerializationError => "SerializationError",
            Self::TransportError => "TransportError",
            Self::SocketError => "SocketError",
            Self::ParseError => "ParseError",
            Self::Timeout => "Timeout",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// ConnectionError
// ============================================================================

/// Immutable error record published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
    /// Creation time, epoch milliseconds.
    pub timestamp: u64,
    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ConnectionError {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: timestamp_ms(),
            details: None,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&Error> for ConnectionError {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = Error::connection_refused("backend down");
        assert_eq!(err.to_string(), "Connection refused: backend down");
    }

    #[test]
    fn test_not_connected_is_transport_error() {
        let err = Error::not_connected(ConnectionState::Closed);
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("Closed"));
    }

    #[test]
    fn test_bridge_closed_is_terminal_transport_error() {
        let err = Error::BridgeClosed;
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert!(err.is_connection_error());
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Bridge closed");
    }

    #[test]
    fn test_timeout_kind() {
        let err = Error::timeout(RequestId::generate(), "get_users", 100);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_timeout());
        assert!(err.is_recoverable());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_connect_io_mapping() {
        let refused = IoError::new(IoErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            Error::from_connect_io(refused).kind(),
            ErrorKind::ConnectionRefused
        );

        let other = IoError::new(IoErrorKind::BrokenPipe, "pipe");
        assert_eq!(Error::from_connect_io(other).kind(), ErrorKind::SocketError);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert_eq!(err.kind(), ErrorKind::SerializationError);
    }

    #[test]
    fn test_marker_mapping() {
        assert_eq!(ErrorKind::from_marker("JSON_PARSE_ERROR"), ErrorKind::ParseError);
        assert_eq!(ErrorKind::from_marker("UTF8_DECODE_ERROR"), ErrorKind::ParseError);
        assert_eq!(ErrorKind::from_marker("PROTOCOL_ERROR"), ErrorKind::ProtocolError);
        assert_eq!(ErrorKind::from_marker("SOMETHING_ELSE"), ErrorKind::Unknown);
    }

    #[test]
    fn test_connection_error_from_error() {
        let err = Error::parse("bad frame");
        let record = ConnectionError::from(&err).with_details(json!({"raw": "{"}));
        assert_eq!(record.kind, ErrorKind::ParseError);
        assert_eq!(record.message, "Parse error: bad frame");
        assert!(record.timestamp > 0);
        assert_eq!(record.to_string(), "[ParseError] Parse error: bad frame");
    }
}
