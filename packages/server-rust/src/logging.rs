//! Tracing subscriber setup and the sink behind module loggers.

use linna_core::{Fields, LogLevel, LogSink};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::service::config::LogFormat;

/// Forwards module log records to `tracing` under the `linna::module` target.
///
/// Accumulated fields are rendered as one JSON object so arbitrary names
/// survive the fixed field set of `tracing` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: LogLevel, fields: &Fields, message: &str) {
        let fields = serde_json::to_string(fields).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(target: "linna::module", fields = %fields, "{message}"),
            LogLevel::Info => tracing::info!(target: "linna::module", fields = %fields, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "linna::module", fields = %fields, "{message}"),
            LogLevel::Error => tracing::error!(target: "linna::module", fields = %fields, "{message}"),
        }
    }
}

fn env_filter() -> EnvFilter {
    let linna = std::env::var("LINNA_LOG").ok();
    let rust = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    build_filter(linna.as_deref(), rust.as_deref())
}

/// First directive that parses wins, otherwise `info`.
fn build_filter(linna: Option<&str>, rust: Option<&str>) -> EnvFilter {
    [linna, rust]
        .into_iter()
        .flatten()
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Filter controlled by `LINNA_LOG` or `RUST_LOG` (default: `info`).
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?,
    }
    Ok(())
}
