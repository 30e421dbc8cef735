//! Typed error definitions for the livequote client.
//!
//! Provides [`FeedError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate with `anyhow::Result` at the application
//! edge.

use thiserror::Error;

/// Domain-specific errors for the price-feed client.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Inbound frame could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A subscribe call was made with no tickers.
    #[error("ticker list is empty")]
    EmptyTickers,

    /// A ticker symbol was blank after normalization.
    #[error("invalid ticker symbol: {0:?}")]
    InvalidTicker(String),

    /// An outbound frame was dropped because no transport is open.
    #[error("not connected")]
    NotConnected,

    /// The subscription handle is not (or no longer) registered.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(u64),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}
