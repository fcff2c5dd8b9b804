use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use guardian_backup::models::{EngineType, NewConnection};
use guardian_backup::{BackupService, BackupStore, ProcessEngine};
use guardian_core::GuardianConfig;

/// Target database flags shared by `backup` and `restore`
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Database engine: postgresql, mysql, mongodb or sqlite
    #[arg(long, env = "GUARDIAN_DB_ENGINE")]
    pub engine: EngineType,

    #[arg(long, env = "GUARDIAN_DB_HOST", default_value = "localhost")]
    pub host: String,

    /// Defaults to the engine's standard port
    #[arg(long, env = "GUARDIAN_DB_PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "GUARDIAN_DB_USERNAME", default_value = "")]
    pub username: String,

    #[arg(long, env = "GUARDIAN_DB_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Database name, or the database file for sqlite
    #[arg(long, env = "GUARDIAN_DB_NAME")]
    pub dbname: String,

    /// Data directory for staging files (defaults to GUARDIAN_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

impl ConnectionArgs {
    /// File based engines need no network credentials, so placeholders
    /// satisfy the required-field check
    pub fn new_connection(&self, name: &str) -> NewConnection {
        let placeholder = |value: &str| {
            if value.is_empty() && self.engine == EngineType::Sqlite {
                "local".to_string()
            } else {
                value.to_string()
            }
        };
        NewConnection {
            name: name.to_string(),
            engine: self.engine,
            host: placeholder(&self.host),
            port: self.port,
            username: placeholder(&self.username),
            password: placeholder(&self.password),
            database: self.dbname.clone(),
        }
    }

    /// Service backed by the process engine
    pub fn service(&self, store: Arc<dyn BackupStore>) -> anyhow::Result<BackupService> {
        let mut config = GuardianConfig::from_env().context("Invalid GUARDIAN_* configuration")?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        let engine = Arc::new(ProcessEngine::from_config(&config));
        Ok(BackupService::new(
            engine,
            store,
            Some(config.job_timeout()),
        ))
    }
}

pub fn timeout_from_secs(secs: Option<u64>) -> Option<Duration> {
    secs.filter(|s| *s > 0).map(Duration::from_secs)
}
