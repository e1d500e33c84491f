//! Process-wide tracing setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` (default
//! `info`, overridable with `RUST_LOG`) and one output layer. Records from
//! the `log` facade, used by the database layer, are bridged in through
//! `tracing-log`.

use std::io::{self, IsTerminal};

use thiserror::Error;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("A global tracing subscriber is already installed: {0}")]
    SubscriberAlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// RFC3339 UTC timestamps with millisecond precision.
#[derive(Clone, Debug, Default)]
struct Rfc3339Utc;

impl FormatTime for Rfc3339Utc {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        w.write_str(&now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber. A second call returns an error.
pub fn init_tracing(format: LogFormat) -> Result<(), TelemetryError> {
    let filter = env_filter("info");

    match format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_timer(Rfc3339Utc)
                .with_target(true)
                .with_ansi(io::stdout().is_terminal())
                .compact();
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_timer(Rfc3339Utc)
                .with_current_span(true)
                .with_span_list(false);
            tracing::subscriber::set_global_default(Registry::default().with(filter).with(layer))?;
        }
    }

    tracing_log::LogTracer::init()?;
    tracing::debug!(?format, "Tracing initialised");
    Ok(())
}
