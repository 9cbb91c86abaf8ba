//! The tagged union delivered by the transport parser.
//!
//! The ingestion engine never re-parses raw frames — a per-stream parser
//! closure turns each text frame into zero or more [`FeedMessage`]s, and the
//! dispatch path only matches on this enum.

use super::market::{BookLevel, CandleRecord, TradeTick};

// ---------------------------------------------------------------------------
// Order book updates
// ---------------------------------------------------------------------------

/// Whether a book update replaces the whole book or patches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookUpdateKind {
    /// Full replacement — clears both sides first.
    Snapshot,
    /// Incremental patch — `size == 0` deletes a level.
    Delta,
}

/// One parsed order-book message for a single symbol.
#[derive(Debug, Clone)]
pub struct BookUpdate {
    pub symbol: String,
    pub kind: BookUpdateKind,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub update_id: u64,
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// FeedMessage — tagged union for dispatch
// ---------------------------------------------------------------------------

/// A parsed transport message.
///
/// Everything the feed can deliver, reduced to what the core reacts to.
/// Messages the parser recognizes but the core does not care about arrive as
/// [`FeedMessage::Unhandled`] so they can be counted/logged without being
/// silently swallowed.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// The feed acknowledged a subscription request.
    SubscriptionAck { topic: String },
    /// Peer-initiated heartbeat — must be answered in kind.
    HeartbeatIn,
    /// Reply to one of our heartbeats.
    HeartbeatAck,
    /// One OHLCV candle.
    Candle(CandleRecord),
    /// Order book snapshot or delta.
    Book(BookUpdate),
    /// One or more trade executions.
    TradeTicks(Vec<TradeTick>),
    /// Recognized frame the core has no handler for.
    Unhandled { topic: String },
}
