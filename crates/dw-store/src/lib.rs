//! # dw-store
//!
//! Durable persistence for the depthwatch pipeline:
//!
//! - [`store::MarketStore`] — SQLite handle, schema bootstrap, and batched
//!   inserts for the three logical tables (candles, order-book samples,
//!   trade ticks)
//! - [`writer::BatchWriter`] — timer-driven consumer that drains the three
//!   bounded queues and writes them in bounded chunks, with a final flush
//!   on shutdown
//!
//! Persistence is a soft guarantee: a failed chunk is logged and skipped,
//! never allowed to stall ingestion or abort the writer loop.

pub mod store;
pub mod writer;

pub use store::MarketStore;
pub use writer::BatchWriter;
