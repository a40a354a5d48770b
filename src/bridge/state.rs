//! Connection lifecycle states.
//!
//! # Transition Table
//!
//! | From | To |
//! |------|----|
//! | `Uninstantiated`, `Closed`, `Error` | `Connecting` |
//! | `Connecting` | `Open`, `Error`, `Reconnecting`, `Closing` |
//! | `Open` | `Ready`, `Closed`, `Reconnecting`, `Error`, `Closing` |
//! | `Ready` | `Closed`, `Reconnecting`, `Error`, `Closing` |
//! | `Reconnecting` | `Connecting`, `Closing` |
//! | `Error` | `Reconnecting`, `Closing` |
//! | `Closing` | `Closed` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::timestamp_ms;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the bridge's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// `connect()` was never called.
    #[default]
    Uninstantiated,
    /// A connect attempt is in flight.
    Connecting,
    /// The transport is open.
    Open,
    /// The transport is open and the backend has sent data.
    Ready,
    /// A manual disconnect is waiting for the close to complete.
    Closing,
    /// The transport is closed and no retry is planned.
    Closed,
    /// Waiting for the next reconnect attempt.
    Reconnecting,
    /// A connection failure was recorded.
    ///
    /// Usually final: after retries are exhausted, or with auto-reconnect
    /// disabled, the bridge stays here until a manual `connect()` or
    /// `reconnect()`. A connect timeout also passes through `Error` while
    /// retries remain and moves on to `Reconnecting`. With auto-reconnect
    /// enabled, `BridgeEvent::ReconnectFailed` marks the permanent outage.
    Error,
}

impl ConnectionState {
    /// Returns `true` if calls may be sent.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::Ready)
    }

    /// Returns `true` if `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Uninstantiated | Closed | Error, Connecting)
                | (Connecting, Open | Error | Reconnecting | Closing)
                | (Open, Ready | Closed | Reconnecting | Error | Closing)
                | (Ready, Closed | Reconnecting | Error | Closing)
                | (Reconnecting, Connecting | Closing)
                | (Error, Reconnecting | Closing)
                | (Closing, Closed)
        )
    }

    /// Returns the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninstantiated => "Uninstantiated",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Ready => "Ready",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Reconnecting => "Reconnecting",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StateChange
// ============================================================================

/// Notification emitted on every state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Previous state.
    pub old: ConnectionState,
    /// New state.
    pub new: ConnectionState,
    /// Why the transition happened.
    pub reason: String,
    /// Transition time, epoch milliseconds.
    pub timestamp: u64,
}

impl StateChange {
    /// Creates a change record stamped with the current time.
    #[must_use]
    pub fn new(old: ConnectionState, new: ConnectionState, reason: impl Into<String>) -> Self {
        Self {
            old,
            new,
            reason: reason.into(),
            timestamp: timestamp_ms(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
