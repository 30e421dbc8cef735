//! Single WebSocket session with a background read/write task.
//!
//! Each [`Transport`] wraps one connection. A tokio task:
//! 1. Reads frames and forwards text to the owner as [`TransportEvent::Text`].
//! 2. Writes outbound text handed over through [`FrameSender`].
//! 3. Answers protocol-level pings.
//! 4. Reports [`TransportEvent::Closed`] once when the socket goes away.
//!
//! Reconnecting is the caller's business; a closed transport is never reused.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, info, warn};

use crate::error::FeedError;

/// What the session task reports to the transport owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame, verbatim.
    Text(String),
    /// The connection is gone. Sent at most once, always last.
    Closed { reason: String },
}

/// Cloneable handle for queueing outbound text frames.
#[derive(Debug, Clone)]
pub struct FrameSender(mpsc::UnboundedSender<String>);

impl FrameSender {
    /// Queue a frame. Fails only when the session has ended.
    pub fn send(&self, text: String) -> Result<(), FeedError> {
        self.0.send(text).map_err(|_| FeedError::NotConnected)
    }
}

/// An open connection: outbound queue, inbound event stream, and the task
/// driving the socket (absent for in-memory transports).
pub struct Transport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Transport {
    /// Build a transport over caller-owned channels. The peer reads what the
    /// client sends from the receiver paired with `outbound_tx` and pushes
    /// server frames into the sender paired with `inbound_rx`.
    pub fn from_channels(
        outbound_tx: mpsc::UnboundedSender<String>,
        inbound_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound_tx, inbound_rx, shutdown_tx: None, task: None }
    }

    pub fn sender(&self) -> FrameSender {
        FrameSender(self.outbound_tx.clone())
    }

    /// Next inbound event. `None` means the peer vanished without a close
    /// report, which callers treat like [`TransportEvent::Closed`].
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound_rx.recv().await
    }

    /// Close the socket and wait for the session task to finish.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Opens transports. The manager only depends on this seam, so tests can
/// substitute an in-memory server.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport, FeedError>;
}

/// [`Connector`] backed by `tokio-tungstenite` (plain or TLS).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, FeedError> {
        let request = url.into_client_request()?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("[ws] connected to {url}");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        let task = tokio::spawn(session_loop(ws_stream, outbound_rx, inbound_tx, shutdown_rx));

        Ok(Transport { outbound_tx, inbound_rx, shutdown_tx: Some(shutdown_tx), task: Some(task) })
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read/write loop for one socket. Ends on close, error, or shutdown.
async fn session_loop(
    ws_stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            // Shutdown signal (or the Transport was dropped)
            _ = shutdown_rx.changed() => {
                debug!("[ws] shutdown requested");
                let _ = ws_write.close().await;
                return;
            }

            // Incoming message
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound_tx.send(TransportEvent::Text(text.as_str().to_owned())).is_err() {
                            let _ = ws_write.close().await;
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) => format!("close frame {} {}", u16::from(f.code), f.reason.as_str()),
                            None => "close frame".to_string(),
                        };
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("[ws] ignoring {} byte binary frame", data.len());
                    }
                    Some(Err(e)) => break format!("read error: {e}"),
                    None => break "stream ended".to_string(),
                    _ => {} // Pong, Frame
                }
            }

            // Outbound message from the owner
            msg = outbound_rx.recv() => {
                match msg {
                    Some(text) => {
                        if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                            break format!("send error: {e}");
                        }
                    }
                    None => {
                        let _ = ws_write.close().await;
                        return;
                    }
                }
            }
        }
    };

    warn!("[ws] disconnected: {reason}");
    let _ = inbound_tx.send(TransportEvent::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_transport_round_trip() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let mut transport = Transport::from_channels(out_tx, in_rx);

        transport.sender().send("hello".into()).unwrap();
        assert_eq!(out_rx.recv().await.as_deref(), Some("hello"));

        in_tx.send(TransportEvent::Text("world".into())).unwrap();
        assert_eq!(transport.recv().await, Some(TransportEvent::Text("world".into())));

        drop(in_tx);
        assert_eq!(transport.recv().await, None);
    }

    #[tokio::test]
    async fn sender_fails_after_peer_gone() {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (_in_tx, in_rx) = mpsc::unbounded_channel();
        let transport = Transport::from_channels(out_tx, in_rx);
        drop(out_rx);
        assert!(matches!(transport.sender().send("x".into()), Err(FeedError::NotConnected)));
    }

    #[tokio::test]
    async fn ws_connector_reports_refused_connection() {
        // Port 1 on loopback is never listening.
        let res = WsConnector::new().connect("ws://127.0.0.1:1").await;
        assert!(matches!(res, Err(FeedError::WebSocket(_))));
    }
}
