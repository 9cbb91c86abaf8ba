//! # depthwatch
//!
//! Main entry point: loads a JSON configuration file, opens the SQLite
//! store, builds the ingestion engine, and runs until interrupted.
//!
//! # Usage
//!
//! ```bash
//! depthwatch config.json --log-level info
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dw_md::FeedEngine;
use dw_store::MarketStore;
use tracing::info;

mod parser;

/// Market-data replica and wall-analytics recorder.
#[derive(Parser)]
#[command(name = "depthwatch", about = "Market-data replica and wall-analytics recorder")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level when RUST_LOG and the config are silent.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = dw_core::config::load_config(&cli.config)?;

    let level = config.log.level.clone().unwrap_or_else(|| cli.log_level.clone());
    dw_core::logging::init(&level, config.log.dir.as_deref(), "depthwatch");

    info!(
        "depthwatch starting — config={}, {} symbol(s), db={}",
        cli.config.display(),
        config.symbols.len(),
        config.db_path,
    );

    let store = Arc::new(MarketStore::open(&config.db_path, config.compression_enabled)?);
    let spec = parser::stream_spec(&config);

    let mut engine = FeedEngine::new(config, store);
    engine.start(spec);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    engine.stop().await;
    let (cd, sd, td) = engine.dropped_counts();
    if cd + sd + td > 0 {
        info!("dropped under overload — candles={cd} samples={sd} ticks={td}");
    }
    info!("depthwatch stopped — goodbye");
    Ok(())
}
