//! Typed error definitions for the depthwatch system.
//!
//! Provides [`DwError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the depthwatch system.
#[derive(Debug, Error)]
pub enum DwError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The reconnect-attempt budget is exhausted — terminal for the feed.
    #[error("gave up reconnecting after {0} attempts")]
    GivenUp(u32),

    /// SQLite storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Parsed-message shape violated the dispatch contract.
    #[error("parse error: {0}")]
    Parse(String),
}
