use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use colored::Colorize;
use guardian_backup::models::{
    Backup, BackupConfig, BackupKind, BackupStatus, ConnectionStatus, LogLevel, StorageTarget,
};
use guardian_backup::InMemoryBackupStore;
use guardian_core::{format_duration, format_file_size};
use tracing::{info, warn};

use super::connection::{timeout_from_secs, ConnectionArgs};

/// Suffix of the manifest written next to local artifacts
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

#[derive(Args)]
pub struct BackupCommand {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Storage target: local, aws_s3, google_cloud or azure_blob
    #[arg(long, default_value = "local")]
    storage: String,

    /// Directory for local storage, bucket[/prefix] for object stores
    #[arg(long)]
    path: String,

    /// Backup type: full, incremental or differential
    #[arg(long, default_value = "full")]
    kind: String,

    /// Store the dump without compression
    #[arg(long)]
    no_compress: bool,

    /// Abort the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl BackupCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let service = self
            .connection
            .service(Arc::new(InMemoryBackupStore::new()))?;
        let connection = service
            .create_connection(self.connection.new_connection(&self.connection.dbname))
            .await?;
        if connection.status != ConnectionStatus::Connected {
            warn!(
                "Connection test failed ({}), attempting the backup anyway",
                connection.error.as_deref().unwrap_or("unknown error")
            );
        }

        let config = BackupConfig {
            compress: !self.no_compress,
            ..BackupConfig::new(
                parse_kind(&self.kind)?,
                parse_storage(&self.storage)?,
                &self.path,
            )
        };
        info!(
            "Backing up {} database {} to {}",
            connection.engine, connection.database, self.path
        );

        let handle = service
            .start_backup(&connection.id, config, timeout_from_secs(self.timeout_secs))
            .await?;
        let backup = handle.wait().await?;

        print_backup(&backup);

        match backup.status {
            BackupStatus::Completed => {
                if let (StorageTarget::Local, Some(path), Some(manifest)) = (
                    backup.config.storage_type,
                    backup.path.as_deref(),
                    backup.manifest.as_ref(),
                ) {
                    let manifest_path = manifest_path(Path::new(path));
                    let json = serde_json::to_vec_pretty(manifest)?;
                    tokio::fs::write(&manifest_path, json)
                        .await
                        .with_context(|| {
                            format!("Failed to write manifest {}", manifest_path.display())
                        })?;
                }
                Ok(())
            }
            _ => anyhow::bail!(
                "Backup failed: {}",
                backup.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

pub fn manifest_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(MANIFEST_SUFFIX);
    PathBuf::from(name)
}

fn parse_kind(raw: &str) -> anyhow::Result<BackupKind> {
    serde_json::from_value(serde_json::Value::from(raw.to_ascii_lowercase()))
        .map_err(|_| anyhow::anyhow!("Unknown backup type '{}'", raw))
}

fn parse_storage(raw: &str) -> anyhow::Result<StorageTarget> {
    serde_json::from_value(serde_json::Value::from(raw.to_ascii_lowercase()))
        .map_err(|_| anyhow::anyhow!("Unknown storage target '{}'", raw))
}

fn print_backup(backup: &Backup) {
    println!();
    let status = match backup.status {
        BackupStatus::Completed => backup.status.to_string().bright_green(),
        BackupStatus::Failed => backup.status.to_string().bright_red(),
        _ => backup.status.to_string().bright_yellow(),
    };
    println!("{} {}", "Backup:".bright_white().bold(), backup.name.bright_cyan());
    println!("  {} {}", "ID:".bright_white(), backup.id);
    println!("  {} {}", "Status:".bright_white(), status);
    if let Some(size) = backup.size {
        println!("  {} {}", "Size:".bright_white(), format_file_size(size));
    }
    if let Some(duration) = backup.duration() {
        let secs = duration.num_seconds().max(0) as u64;
        println!("  {} {}", "Duration:".bright_white(), format_duration(secs));
    }
    if let Some(path) = &backup.path {
        println!("  {} {}", "Location:".bright_white(), path.bright_green());
    }
    if let Some(manifest) = &backup.manifest {
        println!(
            "  {} {}",
            "Items:".bright_white(),
            manifest.items.join(", ")
        );
    }

    println!();
    println!("{}", "Log:".bright_white().bold());
    for entry in &backup.logs {
        let level = match entry.level {
            LogLevel::Info => "INFO ".bright_blue(),
            LogLevel::Warning => "WARN ".bright_yellow(),
            LogLevel::Error => "ERROR".bright_red(),
        };
        println!(
            "  {} {} {}",
            entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
            level,
            entry.message
        );
    }
    println!();
}
