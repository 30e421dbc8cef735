//! Latest-price cache for a fixed set of tickers.
//!
//! A [`PriceWatcher`] is the typical consumer of the manager: it holds one
//! subscription, keeps the most recent [`PriceSnapshot`] per ticker and
//! tracks whether the feed is live. Snapshots survive disconnects so a
//! dashboard can keep showing the last known price while offline. Dropping
//! the watcher releases its subscription.

use std::sync::Arc;

use ahash::AHashMap;
use lq_core::error::FeedError;
use lq_core::time_util::now_ms;
use lq_core::types::{ConnectionStatus, FeedEvent, PriceUpdate, Ticker, Volume, normalize_tickers};
use parking_lot::Mutex;
use tracing::debug;

use crate::manager::ConnectionManager;
use crate::registry::{Listener, SubscriptionId};

/// Last known quote for one ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    pub current_price: f64,
    pub day_change: f64,
    pub day_change_percent: f64,
    pub volume: Volume,
    /// Server timestamp of the update this snapshot came from.
    pub last_updated: String,
    /// Local wall-clock receipt time, ms since the Unix epoch.
    pub received_at_ms: u64,
}

impl From<&PriceUpdate> for PriceSnapshot {
    fn from(u: &PriceUpdate) -> Self {
        Self {
            current_price: u.current_price,
            day_change: u.day_change,
            day_change_percent: u.day_change_percent,
            volume: u.volume.clone(),
            last_updated: u.timestamp.clone(),
            received_at_ms: now_ms(),
        }
    }
}

#[derive(Debug, Default)]
struct Cache {
    prices: AHashMap<Ticker, PriceSnapshot>,
    connected: bool,
}

impl Cache {
    fn apply(&mut self, event: &FeedEvent) {
        match event {
            FeedEvent::Connection(status) => self.connected = *status == ConnectionStatus::Connected,
            FeedEvent::Price(update) => {
                self.prices.insert(update.ticker.clone(), PriceSnapshot::from(update));
            }
            FeedEvent::SubscriptionAck { .. } | FeedEvent::ServerError { .. } => {}
        }
    }
}

pub struct PriceWatcher {
    manager: ConnectionManager,
    id: SubscriptionId,
    tickers: Vec<Ticker>,
    cache: Arc<Mutex<Cache>>,
}

impl PriceWatcher {
    /// Subscribe `tickers` on `manager`, connecting it if needed.
    pub fn new<S: AsRef<str>>(manager: &ConnectionManager, tickers: &[S]) -> Result<Self, FeedError> {
        let tickers = normalize_tickers(tickers)?;
        let cache = Arc::new(Mutex::new(Cache::default()));

        let sink = Arc::clone(&cache);
        let listener: Listener = Arc::new(move |event: &FeedEvent| sink.lock().apply(event));

        // Seed the flag while holding the cache lock so an event delivered
        // concurrently is applied after it, never overwritten by it.
        let id = {
            let mut guard = cache.lock();
            let id = manager.subscribe(&tickers, listener)?;
            guard.connected = manager.is_connected();
            id
        };
        debug!("[watcher] {id} watching {} ticker(s)", tickers.len());

        Ok(Self { manager: manager.clone(), id, tickers, cache })
    }

    /// Latest snapshot for `ticker`, if one has arrived.
    pub fn price(&self, ticker: &str) -> Option<PriceSnapshot> {
        let ticker = Ticker::new(ticker).ok()?;
        self.cache.lock().prices.get(&ticker).cloned()
    }

    /// All snapshots received so far, sorted by ticker.
    pub fn prices(&self) -> Vec<(Ticker, PriceSnapshot)> {
        let cache = self.cache.lock();
        let mut out: Vec<(Ticker, PriceSnapshot)> =
            cache.prices.iter().map(|(t, p)| (t.clone(), p.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn is_connected(&self) -> bool {
        self.cache.lock().connected
    }

    pub fn tickers(&self) -> &[Ticker] {
        &self.tickers
    }
}

impl Drop for PriceWatcher {
    fn drop(&mut self) {
        // Already gone if the manager was disconnected in the meantime.
        if let Err(e) = self.manager.unsubscribe_all(self.id) {
            debug!("[watcher] {}: {e}", self.id);
        }
    }
}
