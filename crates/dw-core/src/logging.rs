//! Logging initialization using the `tracing` ecosystem.
//!
//! Console output plus optional daily-rotating file output. The level comes
//! from `RUST_LOG` when set, falling back to the configured default.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber. Call once at startup.
///
/// - `default_level`: used when the `RUST_LOG` env var is absent (e.g. `"info"`)
/// - `log_dir`: when `Some`, a daily-rotating file layer is added alongside
///   the console, with `file_prefix` as the file name prefix
pub fn init(default_level: &str, log_dir: Option<&str>, file_prefix: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, file_prefix);
            let file_layer = fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .init();
        }
    }
}
