//! WebSocket client transport.
//!
//! Connects with `tokio-tungstenite`, splits the stream and spawns a reader
//! task that turns WebSocket messages into [`TransportEvent`]s.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Connector, Link, TransportEvent, TransportSink};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// WsConnector
// ============================================================================

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Link> {
        let (ws_stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Io(io) => Error::from_connect_io(io),
                other => Error::WebSocket(other),
            })?;

        debug!(%url, status = %response.status(), "WebSocket handshake completed");

        let (write, read) = ws_stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read, events_tx));

        Ok(Link {
            sink: Box::new(WsSink { write, reader }),
            events: events_rx,
        })
    }
}

// ============================================================================
// WsSink
// ============================================================================

/// Write half of a WebSocket link.
///
/// Aborts the reader task when dropped.
struct WsSink {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| Error::transport(e.to_string()))
    }
}

impl Drop for WsSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Forwards inbound WebSocket messages until the stream closes or fails.
async fn read_loop(mut read: SplitStream<WsStream>, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(message) = read.next().await {
        let event = match message {
            Ok(Message::Text(text)) => TransportEvent::Message(text.to_string()),

            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => TransportEvent::Message(text),
                Err(e) => TransportEvent::Undecodable(format!(
                    "binary frame of {} bytes is not UTF-8: {e}",
                    data.len()
                )),
            },

            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                    .unwrap_or_default();
                debug!(?code, %reason, "WebSocket closed by remote");
                let _ = events.send(TransportEvent::Closed { code, reason });
                return;
            }

            // tungstenite answers protocol-level pings itself
            Ok(_) => continue,

            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                let _ = events.send(TransportEvent::Failed(e.to_string()));
                return;
            }
        };

        if events.send(event).is_err() {
            trace!("Link dropped, stopping reader");
            return;
        }
    }

    let _ = events.send(TransportEvent::Closed {
        code: None,
        reason: "stream ended".to_string(),
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use tokio::net::TcpListener;

    use crate::error::ErrorKind;
    use crate::transport::CLOSE_NORMAL;

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream)
                .await
                .expect("upgrade");
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(_) | Message::Binary(_) => {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_text_roundtrip_and_clean_close() {
        let addr = echo_server().await;
        let url = Url::parse(&format!("ws://{addr}")).expect("url");

        let mut link = WsConnector::new().connect(&url).await.expect("connect");
        link.sink
            .send_text(r#"{"name":"echo"}"#.to_string())
            .await
            .expect("send");

        let event = link.events.recv().await.expect("event");
        assert_eq!(event, TransportEvent::Message(r#"{"name":"echo"}"#.to_string()));

        link.sink.close(CLOSE_NORMAL, "bye").await.expect("close");
        let event = link.events.recv().await.expect("close event");
        assert!(matches!(
            event,
            TransportEvent::Closed { .. } | TransportEvent::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind should succeed");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);

        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        let err = WsConnector::new().connect(&url).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    }
}
