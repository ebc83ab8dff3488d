//! Tracing subscriber setup.

use crate::config::LoggingConfig;
use time::format_description::well_known::Rfc3339;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Where console logs go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    /// Used by the stdio transport, where stdout carries protocol frames
    Stderr,
}

/// Resolve the log filter: `RUST_LOG` wins, then the configured level,
/// then `info`.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config
            .log_level
            .as_deref()
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "info".to_string());
        EnvFilter::new(level)
    })
}

/// Install the global subscriber.
///
/// The returned guard flushes the log file on drop and must be held for the
/// lifetime of the process.
pub fn init(config: &LoggingConfig, target: LogTarget) -> anyhow::Result<Option<WorkerGuard>> {
    let writer = match target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let console = fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_timer(UtcTime::new(Rfc3339))
        .compact();

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(UtcTime::new(Rfc3339));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
