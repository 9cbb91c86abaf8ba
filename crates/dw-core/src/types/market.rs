//! Market data value objects — the records flowing through the system.
//!
//! Everything here is an immutable value: produced once by the ingestion
//! path, enqueued, and consumed exactly once by the batch writer (or read
//! from a replica snapshot). Prices and sizes are `f64`, matching the feed's
//! decimal-string payloads after parsing.
//!
//! # Timestamp convention
//!
//! All timestamps are **milliseconds since Unix epoch** (the exchange's
//! native resolution); `created_at` columns are stamped by the writer.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sides
// ---------------------------------------------------------------------------

/// Order-book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order book level
// ---------------------------------------------------------------------------

/// One price level: `(price, size)`. A level with size 0 does not exist —
/// absence is the representation, never a zero entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

impl BookLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

// ---------------------------------------------------------------------------
// Candle
// ---------------------------------------------------------------------------

/// One OHLCV candle for a `(symbol, timeframe)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub symbol: String,
    pub timeframe: String,
    pub timestamp_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl std::fmt::Display for CandleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Candle({} {} o={} h={} l={} c={} v={})",
            self.symbol, self.timeframe, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

// ---------------------------------------------------------------------------
// Trade tick
// ---------------------------------------------------------------------------

/// A single public trade execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub symbol: String,
    pub timestamp_ms: u64,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
}

impl std::fmt::Display for TradeTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tick({} {} {:.8}x{:.4})",
            self.symbol, self.side, self.price, self.size
        )
    }
}

// ---------------------------------------------------------------------------
// Order book sample
// ---------------------------------------------------------------------------

/// A periodic durable sample of one symbol's order book.
///
/// The sampler serializes the level arrays to JSON here; whether the blobs
/// are additionally compressed is the writer's concern, decided at insert
/// time. Sampling runs on its own timer at a deliberately lower frequency
/// than book mutation, trading replay fidelity for bounded write volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSample {
    pub symbol: String,
    pub timestamp_ms: u64,
    pub bids_json: String,
    pub asks_json: String,
}
