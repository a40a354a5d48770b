//! Local notifications published by the bridge.

use std::time::Duration;

use crate::error::ConnectionError;
use crate::identifiers::RequestId;
use crate::protocol::Envelope;

use super::state::StateChange;

/// Notification delivered over the bridge's broadcast channel.
///
/// Receivers that fall behind lose the oldest notifications
/// (`RecvError::Lagged`); the bridge itself never blocks on them.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Any state transition.
    StateChanged(StateChange),

    /// The transport opened.
    Connected {
        /// Epoch milliseconds at which the transport opened.
        at: u64,
    },

    /// The transport closed or was lost.
    Disconnected {
        /// Close code, `None` if the transport failed without one.
        code: Option<u16>,
        /// Close reason or failure description.
        reason: String,
        /// `true` for a close with code 1000.
        clean: bool,
    },

    /// Inbound parse/protocol error, backend error report, or terminal
    /// connection failure.
    Error(ConnectionError),

    /// Broadcast event from the backend.
    Message(Envelope),

    /// A call was rejected by the backend or could not be sent.
    CallFailed {
        /// Correlation id.
        request_id: RequestId,
        /// Operation name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A call received no response in time.
    CallTimeout {
        /// Correlation id.
        request_id: RequestId,
        /// Operation name.
        name: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A reconnect attempt is scheduled.
    ReconnectScheduled {
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt starts.
        delay: Duration,
    },

    /// Reconnect attempts are exhausted.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
        /// Failure that ended the last attempt.
        last_error: Option<ConnectionError>,
    },
}
