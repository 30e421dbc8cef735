//! # lq-feed
//!
//! Real-time stock price feed over a single multiplexed WebSocket.
//!
//! ## Architecture
//!
//! [`ConnectionManager`] owns one connection to the price backend and fans
//! out its frames to any number of subscriptions, each registered for a set
//! of tickers. The socket is opened lazily on the first subscription, kept
//! alive with application-level pings, and re-established with bounded
//! exponential backoff after an unexpected close.
//!
//! ## Modules
//!
//! - [`manager`] — connection lifecycle, dispatch, and the public API
//! - [`registry`] — ticker ↔ subscription bookkeeping
//! - [`backoff`] — reconnect delay policy
//! - [`heartbeat`] — ping/pong tracking
//! - [`watcher`] — latest-price cache built on a subscription

pub mod backoff;
pub mod heartbeat;
pub mod manager;
pub mod registry;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use backoff::{BackoffConfig, ReconnectPolicy};
pub use manager::{ConnectionManager, ManagerConfig};
pub use registry::{Listener, Sink, SubscriptionId};
pub use watcher::{PriceSnapshot, PriceWatcher};
