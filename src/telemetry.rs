//! Log subscriber setup
//!
//! The library only emits `tracing` events and spans. Applications that do
//! not install their own subscriber can call [`init_subscriber`]:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, falling back to the given level)
//!   └── Fmt Layer (text or JSON)
//! ```

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the subscriber
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    SubscriberError(String),
}

/// Parse a log level name, defaulting to INFO for unknown names
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a global fmt subscriber
///
/// `RUST_LOG` takes precedence over `level` when it is set.
///
/// ```no_run
/// mizuchi_storage::telemetry::init_subscriber("debug", true).unwrap();
/// ```
pub fn init_subscriber(level: &str, json: bool) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).as_str().to_lowercase()));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true);
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(env_filter).with(fmt_layer),
        )
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);
        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(env_filter).with(fmt_layer),
        )
    };

    result.map_err(|e| TelemetryError::SubscriberError(e.to_string()))
}
