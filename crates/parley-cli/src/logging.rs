//! Tracing subscriber setup

use anyhow::{Context, Result};
use parley_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `logging.dir` is set.
///
/// The returned guard flushes the file writer and must live until exit.
pub fn init(verbose: bool, config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let default_level = default_directive(verbose, config);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match &config.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::daily(dir, "parley.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_level(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn default_directive(verbose: bool, config: &LoggingConfig) -> String {
    if verbose {
        return "debug".to_string();
    }
    config
        .level
        .clone()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}
