//! Connection counters.

use serde::{Deserialize, Serialize};

use crate::protocol::timestamp_ms;

/// Monotonic counters describing bridge traffic.
///
/// Reset only by a manual `reconnect()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Frames sent, heartbeats included.
    pub messages_sent: u64,
    /// Frames received.
    pub messages_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Errors recorded (transport failures and inbound parse/protocol errors).
    pub errors_count: u64,
    /// Reconnect attempts fired by the scheduler.
    pub reconnects: u64,
    /// Connect attempts of any origin.
    pub connect_attempts: u64,
    /// Time of the last received frame, epoch milliseconds.
    pub last_message_at: Option<u64>,
    /// Time the current transport opened, epoch milliseconds.
    pub connection_start_time: Option<u64>,
}

impl ConnectionStats {
    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.messages_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_received(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
        self.last_message_at = Some(timestamp_ms());
    }

    pub(crate) fn record_error(&mut self) {
        self.errors_count += 1;
    }

    pub(crate) fn record_opened(&mut self) {
        self.connection_start_time = Some(timestamp_ms());
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
