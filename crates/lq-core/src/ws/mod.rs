//! WebSocket transport: one session per connection, no built-in reconnect.

pub mod client;

pub use client::{Connector, FrameSender, Transport, TransportEvent, WsConnector};
