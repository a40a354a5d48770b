//! Envelope, error and control message types.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::RequestId;

use super::timestamp_ms;

// ============================================================================
// Source
// ============================================================================

/// Origin of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Sent by this client.
    Frontend,
    /// Sent by the backend process.
    #[default]
    Backend,
    /// Any other origin label.
    #[serde(other)]
    Other,
}

// ============================================================================
// Envelope
// ============================================================================

/// The canonical message wrapper.
///
/// # Format
///
/// ```json
/// {
///   "id": "uuid",
///   "name": "get_users",
///   "payload": { ... },
///   "timestamp": 1700000000000,
///   "source": "frontend"
/// }
/// ```
///
/// Unsolicited backend events may omit `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id (empty for uncorrelated events).
    #[serde(default)]
    pub id: String,

    /// Operation or event name.
    pub name: String,

    /// Operation-specific data.
    #[serde(default)]
    pub payload: Value,

    /// Send time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: u64,

    /// Origin of the message.
    #[serde(default)]
    pub source: Source,
}

impl Envelope {
    /// Creates an outbound call envelope.
    #[must_use]
    pub fn call(id: RequestId, name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.into(),
            payload,
            timestamp: timestamp_ms(),
            source: Source::Frontend,
        }
    }

    /// Creates an outbound fire-and-forget envelope.
    #[must_use]
    pub fn notification(name: impl Into<String>, payload: Value) -> Self {
        Self::call(RequestId::generate(), name, payload)
    }

    /// Returns the correlation id, if the envelope carries a valid one.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        RequestId::parse(&self.id)
    }

    /// Returns the payload's `success` flag, if present.
    #[inline]
    #[must_use]
    pub fn success(&self) -> Option<bool> {
        self.payload.get("success").and_then(Value::as_bool)
    }

    /// Returns the error message carried by a failed payload.
    ///
    /// Looks at `error`, then `message`, falling back to a generic text.
    #[must_use]
    pub fn error_message(&self) -> String {
        ["error", "message"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(Value::as_str))
            .unwrap_or("request failed")
            .to_string()
    }
}

// ============================================================================
// ErrorEnvelope
// ============================================================================

/// Error frame emitted by the backend.
///
/// # Format
///
/// ```json
/// {
///   "id": "parse_error",
///   "error_type": "JSON_PARSE_ERROR",
///   "message": "Invalid JSON format",
///   "details": { ... },
///   "timestamp": 1700000000000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Correlation id, or a marker such as `parse_error`.
    #[serde(default)]
    pub id: String,

    /// Error marker.
    pub error_type: String,

    /// Human readable message.
    #[serde(default)]
    pub message: String,

    /// Optional structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Send time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

impl ErrorEnvelope {
    /// Returns the correlation id, if the frame carries a valid one.
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        RequestId::parse(&self.id)
    }
}

// ============================================================================
// ControlFrame
// ============================================================================

/// Control frame discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Liveness probe.
    Ping,
    /// Probe answer.
    Pong,
}

/// Liveness probe frame.
///
/// # Format
///
/// ```json
/// { "type": "ping", "timestamp": 1700000000000 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Probe type.
    #[serde(rename = "type")]
    pub kind: ControlKind,

    /// Send time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: u64,
}

impl ControlFrame {
    /// Creates a ping stamped with the current time.
    #[inline]
    #[must_use]
    pub fn ping() -> Self {
        Self {
            kind: ControlKind::Ping,
            timestamp: timestamp_ms(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
