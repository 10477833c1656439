//! Tracing subscriber setup.
//!
//! Console output goes to stderr. When a log directory is configured, a
//! daily rotated file layer is added through a non-blocking writer whose
//! guard lives for the rest of the process.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;
use crate::error::{Result, VigilError};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Log file prefix inside the configured directory.
const LOG_FILE_PREFIX: &str = "vigil.log";

/// Build the env filter: `RUST_LOG` wins, then the configured level.
fn build_filter(logging: &LoggingConfig) -> Result<EnvFilter> {
    match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => Ok(EnvFilter::from_default_env()),
        _ => EnvFilter::try_new(logging.level.clone())
            .map_err(|e| VigilError::Config(format!("invalid log filter: {e}"))),
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log directory cannot be
/// created, or both console and file output are disabled.
pub fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = build_filter(logging)?;

    let mut file_writer = None;
    if let Some(dir) = logging.directory.as_ref() {
        std::fs::create_dir_all(dir)?;
        let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        file_writer = Some(non_blocking);
    }

    if !logging.console && file_writer.is_none() {
        return Err(VigilError::Config(
            "logging disabled for both console and file".to_owned(),
        ));
    }

    let console_layer = logging
        .console
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    let file_layer = file_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| VigilError::Config(format!("tracing already initialised: {e}")))?;

    Ok(())
}
