use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use poolkeeper_daemon::cli::{Cli, Command};
use poolkeeper_daemon::{Daemon, DaemonConfig};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    let config = load_config(&cli.config)?;
    match cli.command {
        Command::Serve => serve(config).await,
        _ => cli.run(&config),
    }
}

fn load_config(path: &Path) -> Result<DaemonConfig> {
    if path.exists() {
        DaemonConfig::from_file(path)
    } else {
        tracing::warn!("Config file not found, using defaults: {}", path.display());
        Ok(DaemonConfig::default())
    }
}

async fn serve(config: DaemonConfig) -> Result<()> {
    tracing::info!("poolkeeper daemon starting...");
    let daemon = Arc::new(tokio::task::spawn_blocking(move || Daemon::open(config)).await??);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
            _ = terminate.recv() => tracing::info!("terminate received"),
        }
        shutdown.cancel();
    });

    daemon.run(cancel).await
}
