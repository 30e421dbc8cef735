//! Core data types: ticker symbols, wire frames, and subscriber events.

pub mod event;
pub mod frame;
pub mod ticker;

pub use event::*;
pub use frame::*;
pub use ticker::*;
