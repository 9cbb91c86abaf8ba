//! Configuration parsing for the depthwatch system.
//!
//! Everything is read from a single JSON config file. Tuning fields are all
//! optional and fall back to production defaults, so a minimal config is
//! just the feed URL, the symbol list, and a database path:
//!
//! ```json
//! {
//!   "ws_url": "wss://stream.example.com/v5/public",
//!   "symbols": ["BTCUSDT", "ETHUSDT"],
//!   "db_path": "/var/lib/depthwatch/market.db",
//!   "log": { "level": "info", "dir": "/var/log/depthwatch" }
//! }
//! ```

use serde::Deserialize;

use crate::error::DwError;

fn default_max_levels() -> usize {
    100
}
fn default_staleness_threshold_ms() -> u64 {
    60_000
}
fn default_max_queue_size() -> usize {
    10_000
}
fn default_warn_queue_size() -> usize {
    5_000
}
fn default_batch_interval_ms() -> u64 {
    5_000
}
fn default_max_batch_rows() -> usize {
    1_000
}
fn default_compression_enabled() -> bool {
    true
}
fn default_ping_interval_ms() -> u64 {
    30_000
}
fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_spoofing_threshold_ms() -> u64 {
    5_000
}
fn default_min_lifetime_ms() -> u64 {
    30_000
}
fn default_min_refills_for_iceberg() -> u32 {
    3
}
fn default_cluster_proximity_percent() -> f64 {
    0.5
}
fn default_cluster_min_walls() -> usize {
    2
}
fn default_history_capacity() -> usize {
    1_000
}
fn default_sample_interval_ms() -> u64 {
    1_000
}

/// Logging block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Option<String>,
    /// Directory for daily-rotating log files. Console-only when absent.
    pub dir: Option<String>,
}

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Full WebSocket URL of the market-data feed.
    pub ws_url: String,

    /// Symbols to subscribe (e.g. `["BTCUSDT", "ETHUSDT"]`).
    pub symbols: Vec<String>,

    /// SQLite database path. `":memory:"` is accepted for smoke runs.
    pub db_path: String,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,

    // --- Order book replica ---
    /// Maximum retained levels per side; worse levels are evicted.
    #[serde(default = "default_max_levels")]
    pub max_levels: usize,

    /// A replica silent for longer than this reads as `None`.
    #[serde(default = "default_staleness_threshold_ms")]
    pub staleness_threshold_ms: u64,

    // --- Queues ---
    /// Capacity of each bounded queue (candles, samples, ticks).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Queue length that triggers a growth warning.
    #[serde(default = "default_warn_queue_size")]
    pub warn_queue_size: usize,

    // --- Batch writer ---
    /// Interval between drain-and-write passes.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Maximum rows per insert statement chunk.
    #[serde(default = "default_max_batch_rows")]
    pub max_batch_rows: usize,

    /// Whether order-book sample payloads are lz4-compressed.
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,

    // --- Connection ---
    /// Heartbeat send interval.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Linear backoff base: attempt `n` waits `n * base`.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect budget before the feed gives up for good.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    // --- Wall analytics ---
    /// A wall removed sooner than this after creation is flagged as spoofing.
    #[serde(default = "default_spoofing_threshold_ms")]
    pub spoofing_threshold_ms: u64,

    /// Minimum lifetime before a wall counts as real.
    #[serde(default = "default_min_lifetime_ms")]
    pub min_lifetime_ms: u64,

    /// Refill count at which a wall is flagged as an iceberg.
    #[serde(default = "default_min_refills_for_iceberg")]
    pub min_refills_for_iceberg: u32,

    /// Neighbor-price distance (percent) for cluster merging.
    #[serde(default = "default_cluster_proximity_percent")]
    pub cluster_proximity_percent: f64,

    /// Minimum walls for a merged group to count as a cluster.
    #[serde(default = "default_cluster_min_walls")]
    pub cluster_min_walls: usize,

    /// Global wall-event history ring capacity.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    // --- Sampling ---
    /// Interval between durable order-book samples.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl FeedConfig {
    /// Reject configs that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<(), DwError> {
        if self.ws_url.is_empty() {
            return Err(DwError::Config("ws_url must not be empty".into()));
        }
        if self.symbols.is_empty() {
            return Err(DwError::Config("at least one symbol is required".into()));
        }
        if self.max_levels == 0 {
            return Err(DwError::Config("max_levels must be positive".into()));
        }
        if self.max_queue_size == 0 {
            return Err(DwError::Config("max_queue_size must be positive".into()));
        }
        if self.max_batch_rows == 0 {
            return Err(DwError::Config("max_batch_rows must be positive".into()));
        }
        Ok(())
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<FeedConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: FeedConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: FeedConfig = serde_json::from_str(
            r#"{"ws_url": "wss://x", "symbols": ["BTCUSDT"], "db_path": ":memory:"}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_levels, 100);
        assert_eq!(cfg.staleness_threshold_ms, 60_000);
        assert_eq!(cfg.batch_interval_ms, 5_000);
        assert_eq!(cfg.min_refills_for_iceberg, 3);
        assert!(cfg.compression_enabled);
    }

    #[test]
    fn overrides_are_honored() {
        let cfg: FeedConfig = serde_json::from_str(
            r#"{
                "ws_url": "wss://x", "symbols": ["BTCUSDT"], "db_path": ":memory:",
                "max_levels": 25, "compression_enabled": false, "history_capacity": 64
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.max_levels, 25);
        assert_eq!(cfg.history_capacity, 64);
        assert!(!cfg.compression_enabled);
    }

    #[test]
    fn empty_symbols_rejected() {
        let cfg: FeedConfig = serde_json::from_str(
            r#"{"ws_url": "wss://x", "symbols": [], "db_path": ":memory:"}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }
}
