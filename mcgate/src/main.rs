#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mcgate_lib::config::{load_from_path, Config};
use mcgate_lib::quota::{spawn_background_tasks, QuotaLedger, QuotaStore};
use mcgate_lib::service::{ReloadAction, ReloadController, ReloadHandle, ServiceManager};
use mcgate_lib::telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Protocol-aware TCP reverse proxy for Minecraft traffic")]
struct Cli {
    /// Path to the configuration file (.toml, .json, .yaml)
    #[arg(short, long, value_name = "FILE", default_value = "mcgate.toml", env = "MCGATE_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_from_path(&cli.config) {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            eprintln!("failed to load configuration from {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };

    if let Err(err) = init_tracing(&config.logging) {
        eprintln!("failed to initialize logging: {err}");
        std::process::exit(1);
    }
    info!(path = %cli.config.display(), services = config.services.len(), "configuration loaded");

    if let Err(err) = run(cli.config, config).await {
        error!(%err, "mcgate exited with error");
        std::process::exit(1);
    }
}

async fn run(config_path: PathBuf, config: Arc<Config>) -> Result<(), BoxError> {
    let limiter = config.traffic_limiter.clone();
    let store = QuotaStore::new(limiter.data_file.clone());
    let ledger = if limiter.enabled {
        if store.ensure_exists()? {
            info!(path = %limiter.data_file.display(), "created empty traffic data file");
        }
        Arc::new(QuotaLedger::load(store, limiter.retention_days).await?)
    } else {
        Arc::new(QuotaLedger::new(store, limiter.retention_days))
    };

    let background = CancellationToken::new();
    let tasks = if limiter.enabled {
        info!(limit_mb = limiter.limit_mb, "traffic limiter enabled");
        spawn_background_tasks(ledger.clone(), &limiter, background.clone())
    } else {
        Vec::new()
    };

    let mut manager = ServiceManager::new(config, ledger.clone());
    manager.start().await?;

    let cancel = CancellationToken::new();
    let (controller, reload) = ReloadController::new(manager, config_path, cancel.clone());
    let controller = tokio::spawn(controller.run());

    wait_for_shutdown(&reload).await?;
    info!("shutdown signal received");

    cancel.cancel();
    let mut manager = controller.await?;
    let grace = manager.config().timeout.shutdown();
    let remaining = manager.shutdown(grace).await;
    if remaining > 0 {
        warn!(remaining, "closing with connections still open");
    }

    background.cancel();
    for task in tasks {
        let _ = task.await;
    }
    if limiter.enabled {
        if let Err(err) = ledger.close().await {
            error!(%err, "failed to save traffic data on shutdown");
        }
    }
    info!("shutdown complete");
    Ok(())
}

/// Serve SIGHUP as a reload request until SIGINT or SIGTERM arrives.
#[cfg(unix)]
async fn wait_for_shutdown(reload: &ReloadHandle) -> Result<(), BoxError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                if !reload.request(ReloadAction::Config) {
                    warn!("reload already pending");
                }
            }
            _ = terminate.recv() => return Ok(()),
            res = tokio::signal::ctrl_c() => return res.map_err(Into::into),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_reload: &ReloadHandle) -> Result<(), BoxError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
