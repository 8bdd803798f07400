use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dockhand::Daemon;
use dockhand::runtime::options::DaemonOptions;

#[derive(Debug, Parser)]
#[command(name = "dockhandd", author, version, about = "dockhand container engine daemon")]
struct DaemonArgs {
    /// Daemon home directory (default: ~/.dockhand).
    #[arg(long, env = "DOCKHAND_HOME")]
    home: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, env = "DOCKHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (overrides RUST_LOG).
    #[arg(long)]
    debug: bool,

    /// Also write logs to daily-rotated files in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_logging(args: &DaemonArgs) -> Option<WorkerGuard> {
    let filter = if args.debug {
        EnvFilter::new("dockhand=debug,dockhandd=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dockhand=info"))
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dockhandd.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();
    let _guard = init_logging(&args);

    let mut options = match &args.config {
        Some(path) => DaemonOptions::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => DaemonOptions::default(),
    };
    if let Some(home) = args.home {
        options.home_dir = home;
    }

    tracing::info!(home = %options.home_dir.display(), "Starting dockhandd");
    let daemon = Daemon::new(options)
        .await
        .context("Failed to start daemon")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    daemon.shutdown().await;
    Ok(())
}
