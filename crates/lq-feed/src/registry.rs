//! Subscriber registry: which subscriptions want which tickers.
//!
//! Two indexes are kept in step:
//!
//! - ticker → set of [`SubscriptionId`]s. A ticker with no subscribers has no
//!   key at all, so presence of a key means "someone wants this ticker".
//! - [`SubscriptionId`] → [`Sink`] plus the tickers it holds. A subscription
//!   whose ticker set empties is dropped, and its id becomes unknown.
//!
//! Both sides are sets: adding a ticker a subscription already holds changes
//! nothing, and a single removal undoes it.

use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use lq_core::error::FeedError;
use lq_core::types::{FeedEvent, Ticker};
use tokio::sync::mpsc;

/// Callback invoked for each event delivered to a subscription.
pub type Listener = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Where a subscription's events go.
#[derive(Clone)]
pub enum Sink {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<FeedEvent>),
}

impl Sink {
    /// Hand over one event. Returns `false` once the receiving side is gone.
    pub fn deliver(&self, event: &FeedEvent) -> bool {
        match self {
            Self::Callback(listener) => {
                listener(event);
                true
            }
            Self::Channel(tx) => tx.send(event.clone()).is_ok(),
        }
    }
}

impl From<Listener> for Sink {
    fn from(listener: Listener) -> Self {
        Self::Callback(listener)
    }
}

impl From<mpsc::UnboundedSender<FeedEvent>> for Sink {
    fn from(tx: mpsc::UnboundedSender<FeedEvent>) -> Self {
        Self::Channel(tx)
    }
}

/// Handle returned by subscribe; used to add tickers or unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Entry {
    sink: Sink,
    tickers: AHashSet<Ticker>,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    by_ticker: AHashMap<Ticker, AHashSet<SubscriptionId>>,
    subscriptions: AHashMap<SubscriptionId, Entry>,
    next_id: u64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription for `tickers`.
    ///
    /// Returns the handle and the tickers that had no subscriber before.
    pub fn register(&mut self, sink: impl Into<Sink>, tickers: &[Ticker]) -> (SubscriptionId, Vec<Ticker>) {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.insert(id, Entry { sink: sink.into(), tickers: AHashSet::new() });
        let newly_watched = self.link(id, tickers);
        (id, newly_watched)
    }

    /// Add tickers to an existing subscription. Returns the tickers that had
    /// no subscriber before.
    pub fn add(&mut self, id: SubscriptionId, tickers: &[Ticker]) -> Result<Vec<Ticker>, FeedError> {
        if !self.subscriptions.contains_key(&id) {
            return Err(FeedError::UnknownSubscription(id.0));
        }
        Ok(self.link(id, tickers))
    }

    /// Remove tickers from a subscription. Returns the tickers nobody wants
    /// any more.
    pub fn remove(&mut self, id: SubscriptionId, tickers: &[Ticker]) -> Result<Vec<Ticker>, FeedError> {
        let entry = self.subscriptions.get_mut(&id).ok_or(FeedError::UnknownSubscription(id.0))?;

        let mut unwatched = Vec::new();
        for ticker in tickers {
            if !entry.tickers.remove(ticker) {
                continue;
            }
            if let Some(set) = self.by_ticker.get_mut(ticker) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_ticker.remove(ticker);
                    unwatched.push(ticker.clone());
                }
            }
        }

        if entry.tickers.is_empty() {
            self.subscriptions.remove(&id);
        }
        Ok(unwatched)
    }

    /// Drop a subscription entirely. Returns the tickers nobody wants any more.
    pub fn remove_all(&mut self, id: SubscriptionId) -> Result<Vec<Ticker>, FeedError> {
        let held: Vec<Ticker> = self
            .subscriptions
            .get(&id)
            .ok_or(FeedError::UnknownSubscription(id.0))?
            .tickers
            .iter()
            .cloned()
            .collect();
        let unwatched = self.remove(id, &held)?;
        // An entry registered with no tickers survives `remove`; drop it here.
        self.subscriptions.remove(&id);
        Ok(unwatched)
    }

    /// Sinks registered for `ticker`, in subscription order.
    pub fn sinks_for(&self, ticker: &Ticker) -> Vec<(SubscriptionId, Sink)> {
        let Some(ids) = self.by_ticker.get(ticker) else {
            return Vec::new();
        };
        let mut out: Vec<(SubscriptionId, Sink)> =
            ids.iter().filter_map(|id| self.subscriptions.get(id).map(|e| (*id, e.sink.clone()))).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Every sink once, in subscription order.
    pub fn all_sinks(&self) -> Vec<(SubscriptionId, Sink)> {
        let mut out: Vec<(SubscriptionId, Sink)> =
            self.subscriptions.iter().map(|(id, e)| (*id, e.sink.clone())).collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }

    /// Tickers with at least one subscriber, sorted.
    pub fn tickers(&self) -> Vec<Ticker> {
        let mut out: Vec<Ticker> = self.by_ticker.keys().cloned().collect();
        out.sort();
        out
    }

    pub fn subscriber_count(&self, ticker: &Ticker) -> usize {
        self.by_ticker.get(ticker).map_or(0, |set| set.len())
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Forget everything. Ids handed out earlier stay unique.
    pub fn clear(&mut self) {
        self.by_ticker.clear();
        self.subscriptions.clear();
    }

    fn link(&mut self, id: SubscriptionId, tickers: &[Ticker]) -> Vec<Ticker> {
        let mut newly_watched = Vec::new();
        let Some(entry) = self.subscriptions.get_mut(&id) else {
            return newly_watched;
        };
        for ticker in tickers {
            if !entry.tickers.insert(ticker.clone()) {
                continue;
            }
            let set = self.by_ticker.entry(ticker.clone()).or_default();
            if set.is_empty() {
                newly_watched.push(ticker.clone());
            }
            set.insert(id);
        }
        newly_watched
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("tickers", &self.tickers())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Ticker {
        Ticker::new(s).unwrap()
    }

    fn noop() -> Listener {
        Arc::new(|_: &FeedEvent| {})
    }

    #[test]
    fn register_reports_newly_watched() {
        let mut reg = SubscriberRegistry::new();
        let (_a, new_a) = reg.register(noop(), &[t("IDEA"), t("YESBANK")]);
        assert_eq!(new_a, vec![t("IDEA"), t("YESBANK")]);

        let (_b, new_b) = reg.register(noop(), &[t("IDEA"), t("SAIL")]);
        assert_eq!(new_b, vec![t("SAIL")]);
        assert_eq!(reg.subscriber_count(&t("IDEA")), 2);
        assert_eq!(reg.tickers(), vec![t("IDEA"), t("SAIL"), t("YESBANK")]);
    }

    #[test]
    fn emptied_ticker_key_is_removed() {
        let mut reg = SubscriberRegistry::new();
        let (a, _) = reg.register(noop(), &[t("IDEA")]);
        let (b, _) = reg.register(noop(), &[t("IDEA")]);

        assert!(reg.remove(a, &[t("IDEA")]).unwrap().is_empty());
        assert_eq!(reg.tickers(), vec![t("IDEA")]);

        assert_eq!(reg.remove(b, &[t("IDEA")]).unwrap(), vec![t("IDEA")]);
        assert!(reg.tickers().is_empty());
        assert!(reg.sinks_for(&t("IDEA")).is_empty());
    }

    #[test]
    fn set_semantics_single_removal_undoes_double_add() {
        let mut reg = SubscriberRegistry::new();
        let (a, _) = reg.register(noop(), &[t("IDEA"), t("TCS")]);
        assert!(reg.add(a, &[t("IDEA")]).unwrap().is_empty());
        assert_eq!(reg.subscriber_count(&t("IDEA")), 1);

        assert_eq!(reg.remove(a, &[t("IDEA")]).unwrap(), vec![t("IDEA")]);
        assert_eq!(reg.tickers(), vec![t("TCS")]);
    }

    #[test]
    fn subscription_dies_with_its_last_ticker() {
        let mut reg = SubscriberRegistry::new();
        let (a, _) = reg.register(noop(), &[t("IDEA")]);
        reg.remove(a, &[t("IDEA")]).unwrap();
        assert!(!reg.contains(a));
        assert!(matches!(reg.add(a, &[t("TCS")]), Err(FeedError::UnknownSubscription(_))));
        assert!(matches!(reg.remove(a, &[t("TCS")]), Err(FeedError::UnknownSubscription(_))));
    }

    #[test]
    fn remove_all_reports_only_unwatched() {
        let mut reg = SubscriberRegistry::new();
        let (a, _) = reg.register(noop(), &[t("IDEA"), t("SAIL")]);
        let (_b, _) = reg.register(noop(), &[t("SAIL")]);
        assert_eq!(reg.remove_all(a).unwrap(), vec![t("IDEA")]);
        assert_eq!(reg.tickers(), vec![t("SAIL")]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn listeners_are_isolated_per_ticker() {
        let mut reg = SubscriberRegistry::new();
        let (a, _) = reg.register(noop(), &[t("IDEA")]);
        let (b, _) = reg.register(noop(), &[t("SAIL")]);
        let (c, _) = reg.register(noop(), &[t("IDEA"), t("SAIL")]);

        let idea: Vec<SubscriptionId> = reg.sinks_for(&t("IDEA")).into_iter().map(|(id, _)| id).collect();
        assert_eq!(idea, vec![a, c]);
        let all: Vec<SubscriptionId> = reg.all_sinks().into_iter().map(|(id, _)| id).collect();
        assert_eq!(all, vec![a, b, c]);
    }

    #[test]
    fn channel_sink_reports_dropped_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Sink::from(tx);
        let event = FeedEvent::ServerError { message: "x".into() };
        assert!(sink.deliver(&event));
        drop(rx);
        assert!(!sink.deliver(&event));
        assert!(Sink::from(noop()).deliver(&event));
    }

    #[test]
    fn clear_keeps_ids_unique() {
        let mut reg = SubscriberRegistry::new();
        let (a, _) = reg.register(noop(), &[t("IDEA")]);
        reg.clear();
        assert!(reg.is_empty());
        let (b, _) = reg.register(noop(), &[t("IDEA")]);
        assert_ne!(a, b);
    }

    #[test]
    fn keys_always_match_live_subscriptions() {
        // Deterministic pseudo-random walk over subscribe/add/remove.
        let symbols = ["IDEA", "YESBANK", "SAIL", "TCS", "INFY"];
        let mut reg = SubscriberRegistry::new();
        let mut ids: Vec<SubscriptionId> = Vec::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..2_000 {
            let sym = t(symbols[(next() % symbols.len() as u64) as usize]);
            match next() % 3 {
                0 => ids.push(reg.register(noop(), &[sym]).0),
                1 if !ids.is_empty() => {
                    let id = ids[(next() % ids.len() as u64) as usize];
                    let _ = reg.add(id, &[sym]);
                }
                _ if !ids.is_empty() => {
                    let id = ids[(next() % ids.len() as u64) as usize];
                    let _ = reg.remove(id, &[sym]);
                }
                _ => {}
            }

            for s in symbols {
                let ticker = t(s);
                let holders = reg.subscriptions.values().filter(|e| e.tickers.contains(&ticker)).count();
                assert_eq!(reg.subscriber_count(&ticker), holders);
                assert_eq!(reg.by_ticker.contains_key(&ticker), holders > 0);
            }
        }
    }
}
