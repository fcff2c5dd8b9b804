use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use guardian_backup::{
    configure_routes, create_backup_app_state, BackupService, FileBackupStore, ProcessEngine,
};
use guardian_core::GuardianConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, env = "GUARDIAN_ADDRESS")]
    pub address: Option<String>,

    /// Data directory for the backup history and staging files
    #[arg(long, env = "GUARDIAN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Seconds between scheduler ticks
    #[arg(long)]
    pub tick_secs: Option<u64>,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let mut config = GuardianConfig::from_env().context("Invalid GUARDIAN_* configuration")?;
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(secs) = self.tick_secs.filter(|s| *s > 0) {
            config.scheduler_tick_secs = secs;
        }

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(serve(config))
    }
}

async fn serve(config: GuardianConfig) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", config.data_dir.display()))?;

    let store = FileBackupStore::open(config.backup_history_path()).await?;
    debug!("Backup history loaded from {}", store.path().display());
    let engine = Arc::new(ProcessEngine::from_config(&config));
    let service = Arc::new(BackupService::new(
        engine,
        Arc::new(store),
        Some(config.job_timeout()),
    ));

    let shutdown = CancellationToken::new();
    let scheduler = {
        let service = service.clone();
        let token = shutdown.clone();
        let tick = config.scheduler_tick();
        tokio::spawn(async move { service.start_backup_scheduler(tick, token).await })
    };

    let app = configure_routes().with_state(create_backup_app_state(service));
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!("Guardian API listening on {}", config.address);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = scheduler.await {
        error!("Scheduler task ended abnormally: {}", e);
    }
    info!("Guardian server exited");
    Ok(())
}
