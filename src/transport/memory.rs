//! In-memory transport.
//!
//! [`MemoryConnector`] plugs into the bridge like any other connector; the
//! paired [`MemoryBackend`] plays the backend. Each successful connect yields
//! a [`MemoryPeer`] through which a test reads the frames the bridge sent and
//! injects messages, closes and failures.
//!
//! # Example
//!
//! ```ignore
//! let (connector, mut backend) = memory::channel();
//! let bridge = Bridge::builder().connector(connector).build()?;
//! bridge.connect()?;
//!
//! let mut peer = backend.accept().await.expect("bridge connected");
//! let request = peer.next_envelope().await.expect("call sent");
//! peer.reply(&request, json!({"success": true}));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, Frame, Source, decode, encode, timestamp_ms};

use super::{CLOSE_ABNORMAL, Connector, Link, TransportEvent, TransportSink};

// ============================================================================
// AcceptMode
// ============================================================================

/// How the in-memory backend answers connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptMode {
    /// Open the transport.
    #[default]
    Accept,
    /// Fail with a connection refused error.
    Refuse,
    /// Never answer (exercises the connect timeout).
    Hang,
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug)]
struct Shared {
    mode: Mutex<AcceptMode>,
    attempts: AtomicUsize,
    last_url: Mutex<Option<Url>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Creates a connected connector/backend pair.
#[must_use]
pub fn channel() -> (MemoryConnector, MemoryBackend) {
    let (peers_tx, peers_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        mode: Mutex::new(AcceptMode::Accept),
        attempts: AtomicUsize::new(0),
        last_url: Mutex::new(None),
        peers: peers_tx,
    });

    (
        MemoryConnector {
            shared: Arc::clone(&shared),
        },
        MemoryBackend {
            shared,
            peers: peers_rx,
        },
    )
}

// ============================================================================
// MemoryConnector
// ============================================================================

/// Connector half of the in-memory transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        *self.shared.last_url.lock() = Some(url.clone());

        let mode = *self.shared.mode.lock();
        match mode {
            AcceptMode::Refuse => {
                return Err(Error::connection_refused(format!("{url} refused connection")));
            }
            AcceptMode::Hang => std::future::pending::<()>().await,
            AcceptMode::Accept => {}
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client_close = Arc::new(Mutex::new(None));

        let peer = MemoryPeer {
            frames: frames_rx,
            events: events_tx.clone(),
            client_close: Arc::clone(&client_close),
        };

        self.shared
            .peers
            .send(peer)
            .map_err(|_| Error::connection_refused("memory backend dropped"))?;

        Ok(Link {
            sink: Box::new(MemorySink {
                frames: Some(frames_tx),
                events: events_tx,
                client_close,
            }),
            events: events_rx,
        })
    }
}

// ============================================================================
// MemoryBackend
// ============================================================================

/// Backend half of the in-memory transport.
#[derive(Debug)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryBackend {
    /// Changes how future connect attempts are answered.
    pub fn set_mode(&self, mode: AcceptMode) {
        *self.shared.mode.lock() = mode;
    }

    /// Returns the number of connect attempts seen so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Returns the URL of the most recent connect attempt.
    #[must_use]
    pub fn last_url(&self) -> Option<Url> {
        self.shared.last_url.lock().clone()
    }

    /// Waits for the next accepted connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.peers.recv().await
    }

    /// Returns an already accepted connection without waiting.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Backend side of one in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
    client_close: Arc<Mutex<Option<u16>>>,
}

impl MemoryPeer {
    /// Delivers a raw text frame to the bridge.
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Delivers a raw binary frame, decoded the way the WebSocket reader does.
    pub fn send_binary(&self, data: Vec<u8>) {
        let len = data.len();
        let event = match String::from_utf8(data) {
            Ok(text) => TransportEvent::Message(text),
            Err(e) => TransportEvent::Undecodable(format!(
                "binary frame of {len} bytes is not UTF-8: {e}"
            )),
        };
        let _ = self.events.send(event);
    }

    /// Delivers a JSON value as a text frame.
    pub fn send_json(&self, value: &Value) {
        self.send_text(value.to_string());
    }

    /// Delivers a backend-originated named event.
    pub fn emit(&self, name: impl Into<String>, payload: Value) {
        let envelope = Envelope {
            id: String::new(),
            name: name.into(),
            payload,
            timestamp: timestamp_ms(),
            source: Source::Backend,
        };
        if let Ok(text) = encode(&envelope) {
            self.send_text(text);
        }
    }

    /// Answers a call with the given payload.
    pub fn reply(&self, request: &Envelope, payload: Value) {
        let envelope = Envelope {
            id: request.id.clone(),
            name: request.name.clone(),
            payload,
            timestamp: timestamp_ms(),
            source: Source::Backend,
        };
        if let Ok(text) = encode(&envelope) {
            self.send_text(text);
        }
    }

    /// Closes the connection from the backend side.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Closed {
            code: Some(code),
            reason: reason.into(),
        });
    }

    /// Drops the connection without a close frame.
    pub fn drop_connection(&self) {
        self.close(CLOSE_ABNORMAL, "connection lost");
    }

    /// Reports a transport failure to the bridge.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Failed(message.into()));
    }

    /// Waits for the next frame the bridge sent.
    ///
    /// Returns `None` once the bridge closed or dropped the link.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Returns a frame the bridge already sent, without waiting.
    pub fn try_next_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    /// Waits for the next envelope, skipping control frames.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        while let Some(text) = self.next_frame().await {
            if let Ok(Frame::Envelope(envelope)) = decode(&text) {
                return Some(envelope);
            }
            trace!(%text, "Skipping non-envelope frame");
        }
        None
    }

    /// Returns the close code the bridge sent, if it closed the link.
    #[must_use]
    pub fn client_close_code(&self) -> Option<u16> {
        *self.client_close.lock()
    }
}

// ============================================================================
// MemorySink
// ============================================================================

/// Write half handed to the bridge.
struct MemorySink {
    frames: Option<mpsc::UnboundedSender<String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    client_close: Arc<Mutex<Option<u16>>>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| Error::transport("link closed"))?;
        frames
            .send(text)
            .map_err(|_| Error::transport("memory peer dropped"))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        *self.client_close.lock() = Some(code);
        self.frames = None;
        // The backend side acknowledges the close immediately.
        let _ = self.events.send(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
