//! # lq-core
//!
//! Core crate for the livequote price-feed client, providing:
//!
//! - **Types** (`types`) — tickers, wire frames, subscriber events, status
//! - **Configuration** (`config`) — JSON config + environment overrides
//! - **Error types** (`error`) — domain-specific `FeedError` via thiserror
//! - **WebSocket** (`ws`) — `Connector` seam and the tungstenite transport
//! - **Time utilities** (`time_util`) — wall-clock timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
