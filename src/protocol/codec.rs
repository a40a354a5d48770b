//! Frame encoding and inbound classification.
//!
//! Decoding looks at the keys of the parsed JSON object, in this order:
//!
//! 1. `error_type` present → [`Frame::Error`]
//! 2. `name` present → [`Frame::Envelope`]
//! 3. `type` is `ping`/`pong` → [`Frame::Control`]
//!
//! Anything else is a protocol error. Text that is not JSON is a parse error.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::envelope::{ControlFrame, Envelope, ErrorEnvelope};

/// Characters of a rejected frame kept in error details.
const RAW_PREVIEW_CHARS: usize = 200;

// ============================================================================
// Frame
// ============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Response or named event.
    Envelope(Envelope),
    /// Backend error frame.
    Error(ErrorEnvelope),
    /// Ping or pong.
    Control(ControlFrame),
}

impl Frame {
    /// Returns the correlation id carried by the frame, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Envelope(envelope) => envelope.request_id(),
            Self::Error(error) => error.request_id(),
            Self::Control(_) => None,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Serializes an outbound message into a text frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
#[inline]
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes an inbound text frame.
///
/// # Errors
///
/// - [`Error::Parse`] if the text is not valid JSON
/// - [`Error::Protocol`] if the JSON does not match any known frame shape
pub fn decode(text: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| Error::parse(format!("{e} (raw: {})", preview(text))))?;

    let Value::Object(map) = value else {
        return Err(Error::protocol("frame is not a JSON object"));
    };

    if map.contains_key("error_type") {
        return from_map(map).map(Frame::Error);
    }

    if map.contains_key("name") {
        return from_map(map).map(Frame::Envelope);
    }

    if map.get("type").and_then(Value::as_str).is_some() {
        return from_map(map).map(Frame::Control);
    }

    Err(Error::protocol("frame has no name, error_type or control type"))
}

/// Returns the first characters of a frame for diagnostics.
#[must_use]
pub fn preview(text: &str) -> String {
    text.chars().take(RAW_PREVIEW_CHARS).collect()
}

fn from_map<T: serde::de::DeserializeOwned>(map: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(map)).map_err(|e| Error::protocol(e.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
