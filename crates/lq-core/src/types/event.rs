//! Events delivered to subscribers and the status snapshot.
//!
//! Every listener receives [`FeedEvent`]s through one channel: price updates
//! for its tickers, plus connection lifecycle and server errors broadcast to
//! everyone.

use serde::Serialize;

use super::frame::PriceUpdate;
use super::ticker::Ticker;

/// Transport liveness as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// A typed event delivered to a subscription's listener.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The feed connected or lost its connection.
    Connection(ConnectionStatus),

    /// Latest price for one of the subscription's tickers.
    Price(PriceUpdate),

    /// The server acknowledged a subscribe request.
    SubscriptionAck { tickers: Vec<Ticker> },

    /// The server reported an application-level error.
    ServerError { message: String },
}

/// Lifecycle state of the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected, or torn down by an explicit disconnect.
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Lost the connection; a retry may be pending.
    Disconnected,
}

/// Read-only snapshot returned by the manager's `status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub is_connected: bool,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub subscribed_tickers: Vec<Ticker>,
    pub ws_url: String,
}
