//! Wire protocol message types.
//!
//! One JSON object travels per WebSocket text frame.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Envelope`] | Both | Call, response or named event |
//! | [`ErrorEnvelope`] | Backend → Client | Classified backend error (`error_type` marker) |
//! | [`ControlFrame`] | Both | `ping` / `pong` liveness probes |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Frame encoding and inbound classification |
//! | `envelope` | Message structures |

// ============================================================================
// Submodules
// ============================================================================

/// Frame encoding and decoding.
pub mod codec;

/// Envelope, error and control message types.
pub mod envelope;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{Frame, decode, encode};
pub use envelope::{ControlFrame, ControlKind, Envelope, ErrorEnvelope, Source};

// ============================================================================
// Helpers
// ============================================================================

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
