//! Shared type definitions.
//!
//! Split in two:
//!
//! - [`market`] — the value objects that flow through the queues and into
//!   storage (candles, trade ticks, order-book levels and samples)
//! - [`message`] — the [`FeedMessage`](message::FeedMessage) tagged union
//!   produced by the transport parser and consumed by the dispatch path

pub mod market;
pub mod message;

pub use market::*;
pub use message::*;
