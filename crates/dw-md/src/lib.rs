//! # dw-md
//!
//! The market-data core: order-book replication, wall analytics, and the
//! ingestion engine that feeds both.
//!
//! ## Architecture
//!
//! ```text
//! transport ──► parser closure ──► FeedEngine::dispatch (sync, never awaits)
//!                                     ├─► OrderBookReplica ──► WallTracker
//!                                     │        (observer callbacks per level)
//!                                     ├─► candle / tick BoundedQueues
//!                                     └─► KeepaliveHandler (heartbeats)
//!
//! sampling timer ──► replica snapshots ──► sample BoundedQueue
//! batch timer    ──► BatchWriter drains all three queues ──► SQLite
//! ```
//!
//! Mutation of a symbol's replica and tracker happens only on the dispatch
//! path; every other component reads through the engine's snapshot/wall
//! accessors.

pub mod engine;
pub mod keepalive;
pub mod replica;
pub mod walls;

pub use engine::{ConnState, FeedEngine, StreamSpec};
pub use keepalive::KeepaliveHandler;
pub use replica::{BookObserver, BookSnapshot, NoopObserver, OrderBookReplica};
pub use walls::{WallCluster, WallEvent, WallEventKind, WallLifetime, WallTracker};
