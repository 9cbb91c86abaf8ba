//! # dw-core
//!
//! Core crate for the depthwatch market-data pipeline, providing:
//!
//! - **Types** (`types`) — market records, sides, and the `FeedMessage`
//!   tagged union the dispatch path consumes
//! - **Configuration** (`config`) — JSON config deserialization with defaults
//! - **Error types** (`error`) — domain-specific `DwError` via thiserror
//! - **Bounded queues** (`queue`) — drop-on-full buffers with atomic drain
//! - **WebSocket** (`ws`) — TLS connection helper for the ingestion engine
//! - **Time utilities** (`time_util`) — wall-clock and monotonic timestamps
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod queue;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
