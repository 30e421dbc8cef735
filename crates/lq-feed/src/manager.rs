//! Connection manager: one socket, many ticker subscriptions.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──connect()/subscribe()──► Connecting ──open──► Connected
//!   ▲                               ▲    │                 │
//!   │                     backoff   │    │ open failed     │ closed / pong timeout
//!   │                     elapsed   │    ▼                 ▼
//!   └──────disconnect()──────────── Disconnected ◄─────────┘
//!                                    (retries exhausted: stays here)
//! ```
//!
//! A connection *cycle* is one driver task: it opens the transport, runs the
//! session (frame dispatch + heartbeat), and on loss waits out the backoff
//! before trying again. Entering `Connected` always resets the attempt counter
//! and re-sends a `subscribe` frame for every ticker in the registry, since a
//! new socket starts with no server-side subscriptions.
//!
//! # Locking
//!
//! Registry and connection fields share one mutex. It is never held while a
//! listener runs, so listeners may call back into the manager. Each frame is
//! dispatched against the registry as it is at that moment; an unsubscribe
//! that has returned is never followed by a delivery for that ticker.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use lq_core::config::FeedConfig;
use lq_core::error::FeedError;
use lq_core::types::{
    ConnectionState, ConnectionStatus, FeedEvent, FeedStatus, InboundFrame, OutboundFrame, Ticker, normalize_tickers,
};
use lq_core::ws::{Connector, FrameSender, Transport, TransportEvent, WsConnector};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffConfig, ReconnectPolicy};
use crate::heartbeat::{Heartbeat, HeartbeatAction};
use crate::registry::{Listener, Sink, SubscriberRegistry, SubscriptionId};

/// Runtime settings for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub ws_url: String,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Option<Duration>,
    pub backoff: BackoffConfig,
    /// Log every frame at debug level.
    pub debug_frames: bool,
}

impl ManagerConfig {
    /// Defaults (30 s ping, no pong timeout, 1 s..30 s backoff, 5 attempts)
    /// for the given endpoint.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            heartbeat_interval: Duration::from_secs(30),
            pong_timeout: None,
            backoff: BackoffConfig::default(),
            debug_frames: false,
        }
    }

    pub fn from_feed_config(cfg: &FeedConfig) -> Self {
        Self {
            ws_url: cfg.ws_url().to_string(),
            heartbeat_interval: cfg.heartbeat_interval(),
            pong_timeout: cfg.pong_timeout(),
            backoff: BackoffConfig::from_feed_config(cfg),
            debug_frames: cfg.debug_websocket,
        }
    }
}

/// Shared handle to the price-feed connection. Cloning is cheap; all clones
/// drive the same socket and registry.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<State>,
}

struct State {
    conn: ConnectionState,
    registry: SubscriberRegistry,
    policy: ReconnectPolicy,
    /// Outbound queue of the open transport; `None` unless `Connected`.
    sender: Option<FrameSender>,
    /// The running driver, if any.
    cycle: Option<Cycle>,
    generation: u64,
}

struct Cycle {
    generation: u64,
    shutdown_tx: watch::Sender<bool>,
}

impl State {
    fn is_current(&self, generation: u64) -> bool {
        self.cycle.as_ref().is_some_and(|c| c.generation == generation)
    }

    /// Queue a frame on the open transport; dropped with a warning otherwise.
    fn send(&self, frame: &OutboundFrame, debug_frames: bool) {
        let Some(sender) = self.sender.as_ref().filter(|_| self.conn == ConnectionState::Connected) else {
            warn!("[feed] cannot send {}: not connected", frame.kind());
            return;
        };
        let text = match frame.to_text() {
            Ok(text) => text,
            Err(e) => {
                error!("[feed] failed to encode {}: {e}", frame.kind());
                return;
            }
        };
        if debug_frames && !matches!(frame, OutboundFrame::Ping) {
            debug!("[feed] sending {text}");
        }
        if let Err(e) = sender.send(text) {
            warn!("[feed] dropping {}: {e}", frame.kind());
        }
    }
}

/// How a session ended.
enum SessionEnd {
    Shutdown,
    Lost(String),
}

impl ConnectionManager {
    /// Manager using the given connector. Nothing connects until
    /// [`connect`](Self::connect) or the first [`subscribe`](Self::subscribe).
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let policy = ReconnectPolicy::new(config.backoff);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state: Mutex::new(State {
                    conn: ConnectionState::Idle,
                    registry: SubscriberRegistry::new(),
                    policy,
                    sender: None,
                    cycle: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Manager over a real WebSocket connection.
    pub fn from_config(cfg: &FeedConfig) -> Self {
        Self::new(ManagerConfig::from_feed_config(cfg), Arc::new(WsConnector::new()))
    }

    /// Start a connection cycle unless one is already running (connecting,
    /// connected, or waiting to retry). Must be called inside a tokio runtime.
    pub fn connect(&self) {
        let mut st = self.shared.state.lock();
        self.start_cycle(&mut st);
    }

    /// Subscribe `listener` to `tickers`. Starts a connection cycle if none
    /// is running. Symbols are trimmed, upper-cased, and deduplicated.
    pub fn subscribe<S: AsRef<str>>(&self, tickers: &[S], listener: Listener) -> Result<SubscriptionId, FeedError> {
        self.register(tickers, Sink::Callback(listener))
    }

    fn register<S: AsRef<str>>(&self, tickers: &[S], sink: Sink) -> Result<SubscriptionId, FeedError> {
        let tickers = normalize_tickers(tickers)?;
        let mut st = self.shared.state.lock();
        let (id, _) = st.registry.register(sink, &tickers);
        debug!("[feed] {id} subscribed to {}", join(&tickers));

        if st.conn == ConnectionState::Connected {
            st.send(&OutboundFrame::Subscribe { tickers }, self.shared.config.debug_frames);
        } else {
            info!("[feed] not connected; {} will be subscribed on connect", join(&tickers));
        }
        if st.cycle.is_none() {
            self.start_cycle(&mut st);
        }
        Ok(id)
    }

    /// Like [`subscribe`](Self::subscribe), delivering events into a channel.
    /// Dropping the receiver ends the subscription at its next delivery.
    pub fn subscribe_channel<S: AsRef<str>>(
        &self,
        tickers: &[S],
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<FeedEvent>), FeedError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(tickers, Sink::Channel(tx))?;
        Ok((id, rx))
    }

    /// Register an existing subscription under more tickers.
    pub fn add_tickers<S: AsRef<str>>(&self, id: SubscriptionId, tickers: &[S]) -> Result<(), FeedError> {
        let tickers = normalize_tickers(tickers)?;
        let mut st = self.shared.state.lock();
        st.registry.add(id, &tickers)?;
        if st.conn == ConnectionState::Connected {
            st.send(&OutboundFrame::Subscribe { tickers }, self.shared.config.debug_frames);
        }
        Ok(())
    }

    /// Stop delivering `tickers` to subscription `id`. Tickers nobody wants
    /// any more are unsubscribed server-side on a best-effort basis.
    pub fn unsubscribe<S: AsRef<str>>(&self, id: SubscriptionId, tickers: &[S]) -> Result<(), FeedError> {
        let tickers = normalize_tickers(tickers)?;
        let mut st = self.shared.state.lock();
        let unwatched = st.registry.remove(id, &tickers)?;
        debug!("[feed] {id} unsubscribed from {}", join(&tickers));
        self.shared.release(&st, unwatched);
        Ok(())
    }

    /// Drop subscription `id` from every ticker it holds.
    pub fn unsubscribe_all(&self, id: SubscriptionId) -> Result<(), FeedError> {
        let mut st = self.shared.state.lock();
        let unwatched = st.registry.remove_all(id)?;
        debug!("[feed] {id} removed");
        self.shared.release(&st, unwatched);
        Ok(())
    }

    /// Tear everything down: cancel any pending retry, stop the heartbeat,
    /// close the socket, and forget all subscriptions. A later `connect()` or
    /// `subscribe()` starts a fresh cycle.
    pub fn disconnect(&self) {
        let cycle = {
            let mut st = self.shared.state.lock();
            st.registry.clear();
            st.policy.reset();
            st.sender = None;
            st.conn = ConnectionState::Idle;
            st.cycle.take()
        };
        if let Some(cycle) = cycle {
            let _ = cycle.shutdown_tx.send(true);
        }
        info!("[feed] disconnected by caller");
    }

    pub fn status(&self) -> FeedStatus {
        let st = self.shared.state.lock();
        FeedStatus {
            is_connected: st.conn == ConnectionState::Connected,
            state: st.conn,
            reconnect_attempts: st.policy.attempts(),
            subscribed_tickers: st.registry.tickers(),
            ws_url: self.shared.config.ws_url.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().conn == ConnectionState::Connected
    }

    fn start_cycle(&self, st: &mut State) -> bool {
        if st.cycle.is_some() {
            debug!("[feed] connect ignored: cycle already running ({:?})", st.conn);
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("[feed] connect called outside a tokio runtime");
            return false;
        };

        st.generation += 1;
        let generation = st.generation;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        st.cycle = Some(Cycle { generation, shutdown_tx });
        st.policy.reset();
        st.conn = ConnectionState::Connecting;

        info!("[feed] connecting to {}", self.shared.config.ws_url);
        runtime.spawn(run_cycle(Arc::clone(&self.shared), generation, shutdown_rx));
        true
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").field("status", &self.status()).finish()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// One connection cycle: open, run, back off, repeat until shut down or out
/// of attempts.
async fn run_cycle(shared: Arc<Shared>, generation: u64, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let opened = tokio::select! {
            res = shared.connector.connect(&shared.config.ws_url) => res,
            _ = shutdown_rx.changed() => return,
        };

        let reason = match opened {
            Ok(mut transport) => {
                if !shared.on_open(generation, &transport) {
                    transport.close().await;
                    return;
                }
                match run_session(&shared, &mut transport, &mut shutdown_rx).await {
                    SessionEnd::Shutdown => return,
                    SessionEnd::Lost(reason) => reason,
                }
            }
            Err(e) => format!("open failed: {e}"),
        };

        let Some(delay) = shared.on_lost(generation, &reason) else {
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => return,
        }
        if !shared.on_retry(generation) {
            return;
        }
    }
}

/// Dispatch frames and keep the heartbeat going until the transport drops.
async fn run_session(
    shared: &Shared,
    transport: &mut Transport,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let period = shared.config.heartbeat_interval;
    let mut heartbeat = Heartbeat::new(shared.config.pong_timeout);
    let mut ping_tick = tokio::time::interval_at(Instant::now() + period, period);
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                transport.close().await;
                return SessionEnd::Shutdown;
            }

            event = transport.recv() => {
                match event {
                    Some(TransportEvent::Text(text)) => shared.handle_text(&text, &mut heartbeat),
                    Some(TransportEvent::Closed { reason }) => return SessionEnd::Lost(reason),
                    None => return SessionEnd::Lost("transport dropped".into()),
                }
            }

            _ = ping_tick.tick() => {
                match heartbeat.on_tick(Instant::now()) {
                    HeartbeatAction::SendPing => {
                        shared.state.lock().send(&OutboundFrame::Ping, shared.config.debug_frames);
                    }
                    HeartbeatAction::Timeout => {
                        transport.close().await;
                        return SessionEnd::Lost("no pong within timeout".into());
                    }
                }
            }
        }
    }
}

impl Shared {
    /// Unsubscribe server-side whatever nobody wants any more.
    fn release(&self, st: &State, unwatched: Vec<Ticker>) {
        if unwatched.is_empty() || st.conn != ConnectionState::Connected {
            return;
        }
        st.send(&OutboundFrame::Unsubscribe { tickers: unwatched }, self.config.debug_frames);
    }

    /// Deliver to each sink in turn, then drop subscriptions whose channel
    /// receiver has gone away.
    fn deliver(&self, sinks: &[(SubscriptionId, Sink)], event: &FeedEvent) {
        let mut closed = Vec::new();
        for (id, sink) in sinks {
            match catch_unwind(AssertUnwindSafe(|| sink.deliver(event))) {
                Ok(true) => {}
                Ok(false) => closed.push(*id),
                Err(_) => error!("[feed] listener {id} panicked"),
            }
        }
        if closed.is_empty() {
            return;
        }

        let mut st = self.state.lock();
        let mut unwatched = Vec::new();
        for id in closed {
            // Already removed if the caller unsubscribed during delivery.
            if let Ok(tickers) = st.registry.remove_all(id) {
                debug!("[feed] {id} receiver dropped; removed");
                unwatched.extend(tickers);
            }
        }
        self.release(&st, unwatched);
    }

    /// Transition to `Connected`. Returns `false` if this cycle was cancelled.
    fn on_open(&self, generation: u64, transport: &Transport) -> bool {
        let sinks = {
            let mut st = self.state.lock();
            if !st.is_current(generation) {
                return false;
            }
            st.conn = ConnectionState::Connected;
            st.policy.reset();
            st.sender = Some(transport.sender());

            let tickers = st.registry.tickers();
            if !tickers.is_empty() {
                info!("[feed] resubscribing {}", join(&tickers));
                st.send(&OutboundFrame::Subscribe { tickers }, self.config.debug_frames);
            }
            st.registry.all_sinks()
        };
        info!("[feed] connected to {}", self.config.ws_url);
        self.deliver(&sinks, &FeedEvent::Connection(ConnectionStatus::Connected));
        true
    }

    /// Transition to `Disconnected` and pick the retry delay. `None` means
    /// stop: either the cycle was cancelled or attempts are exhausted.
    fn on_lost(&self, generation: u64, reason: &str) -> Option<Duration> {
        let (sinks, delay, attempt) = {
            let mut st = self.state.lock();
            if !st.is_current(generation) {
                return None;
            }
            st.conn = ConnectionState::Disconnected;
            st.sender = None;
            let delay = st.policy.next_delay();
            if delay.is_none() {
                st.cycle = None;
            }
            (st.registry.all_sinks(), delay, st.policy.attempts())
        };

        warn!("[feed] connection lost: {reason}");
        self.deliver(&sinks, &FeedEvent::Connection(ConnectionStatus::Disconnected));

        let max = self.config.backoff.max_attempts;
        match delay {
            Some(d) => info!("[feed] reconnect attempt {attempt}/{max} in {}ms", d.as_millis()),
            None => error!("[feed] max reconnection attempts ({max}) reached; giving up"),
        }
        delay
    }

    /// Backoff elapsed; returns `false` if the cycle was cancelled meanwhile.
    fn on_retry(&self, generation: u64) -> bool {
        let mut st = self.state.lock();
        if !st.is_current(generation) {
            return false;
        }
        st.conn = ConnectionState::Connecting;
        true
    }

    fn handle_text(&self, text: &str, heartbeat: &mut Heartbeat) {
        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[feed] dropping malformed frame: {e}");
                return;
            }
        };
        if self.config.debug_frames {
            debug!("[feed] received {}", frame.kind());
        }

        match frame {
            InboundFrame::Connection { message } => {
                info!("[feed] server greeting: {}", message.as_deref().unwrap_or("-"));
            }
            InboundFrame::PriceUpdate(update) => {
                let sinks = self.state.lock().registry.sinks_for(&update.ticker);
                if sinks.is_empty() {
                    debug!("[feed] no subscribers for {}", update.ticker);
                    return;
                }
                self.deliver(&sinks, &FeedEvent::Price(update));
            }
            InboundFrame::SubscriptionSuccess { tickers } => {
                debug!("[feed] server confirmed {}", join(&tickers));
                let sinks = self.state.lock().registry.all_sinks();
                self.deliver(&sinks, &FeedEvent::SubscriptionAck { tickers });
            }
            InboundFrame::Pong => heartbeat.record_pong(),
            InboundFrame::Error { message } => {
                error!("[feed] server error: {message}");
                let sinks = self.state.lock().registry.all_sinks();
                self.deliver(&sinks, &FeedEvent::ServerError { message });
            }
            InboundFrame::Unknown { kind } => debug!("[feed] ignoring frame type {kind:?}"),
        }
    }
}

fn join(tickers: &[Ticker]) -> String {
    tickers.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",")
}
