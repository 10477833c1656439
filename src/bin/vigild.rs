//! Vigil daemon.
//!
//! Loads configuration, opens the task store, re-arms persisted tasks and
//! runs until interrupted. Alerts go to the log sink.
//!
//! Usage: `vigild [--config <path>] [--file-logs]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use vigil::config::VigilConfig;
use vigil::notifications::LogSink;
use vigil::{Vigil, diagnostics, vigil_dirs};

struct Args {
    config_path: PathBuf,
    file_logs: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        config_path: VigilConfig::default_config_path(),
        file_logs: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = iter.next() else {
                    bail!("--config needs a path");
                };
                args.config_path = PathBuf::from(path);
            }
            "--file-logs" => args.file_logs = true,
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;

    let mut config = if args.config_path.exists() {
        VigilConfig::from_file(&args.config_path)
            .with_context(|| format!("loading {}", args.config_path.display()))?
    } else {
        VigilConfig::default()
    };
    if args.file_logs && config.logging.directory.is_none() {
        config.logging.directory = Some(vigil_dirs::logs_dir());
    }

    diagnostics::init_tracing(&config.logging).context("initialising logging")?;
    tracing::info!(config = %args.config_path.display(), "vigild starting");

    let mut vigil = Vigil::new(config, Arc::new(LogSink)).map_err(|e| {
        tracing::error!(error = %e, "vigild failed to start");
        anyhow::anyhow!("vigild failed to start: {e}")
    })?;
    vigil.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::info!("interrupt received, shutting down");
    vigil.shutdown().await;

    tracing::info!("vigild shut down cleanly");
    Ok(())
}
