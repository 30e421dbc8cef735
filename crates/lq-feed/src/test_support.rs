//! In-memory server for manager tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lq_core::error::FeedError;
use lq_core::ws::{Connector, Transport, TransportEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server side of one accepted connection.
pub(crate) struct Session {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl Session {
    /// Next frame the client sent, if one arrives within a second.
    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(1), self.from_client.recv()).await.ok().flatten()
    }

    /// Every frame already queued by the client.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            out.push(text);
        }
        out
    }

    pub fn push(&self, text: &str) {
        let _ = self.to_client.send(TransportEvent::Text(text.to_string()));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed { reason: reason.to_string() });
    }
}

/// [`Connector`] that accepts (or refuses) connections without a network.
pub(crate) struct MockConnector {
    refuse: AtomicBool,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<Instant>>,
    sessions_tx: mpsc::UnboundedSender<Session>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Session>) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            attempt_times: Mutex::new(Vec::new()),
            sessions_tx,
        });
        (connector, sessions_rx)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempt_times.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<Transport, FeedError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().push(Instant::now());
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FeedError::WebSocket("connection refused".into()));
        }
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.sessions_tx.send(Session { from_client: out_rx, to_client: in_tx });
        Ok(Transport::from_channels(out_tx, in_rx))
    }
}

/// Let spawned tasks run without moving the paused clock far.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Wait for the next accepted session.
pub(crate) async fn accept(sessions: &mut mpsc::UnboundedReceiver<Session>) -> Session {
    tokio::time::timeout(Duration::from_secs(120), sessions.recv())
        .await
        .expect("no connection within 120s")
        .expect("connector dropped")
}

pub(crate) fn price_frame(ticker: &str, price: f64) -> String {
    format!(
        r#"{{"type":"price_update","data":{{"ticker":"{ticker}","currentPrice":{price},"dayChange":0.5,"dayChangePercent":1.2,"volume":"78.01 Cr","timestamp":"2024-05-01T10:00:00Z"}}}}"#
    )
}
