use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use guardian_backup::models::{
    Backup, BackupConfig, BackupKind, BackupManifest, BackupStatus, DatabaseConnection,
    EngineType, RestoreOptions, StorageTarget,
};
use guardian_backup::{BackupArtifact, BackupStore, InMemoryBackupStore};
use guardian_core::generate_id;
use tracing::{debug, info, warn};

use super::backup::manifest_path;
use super::connection::{timeout_from_secs, ConnectionArgs};

#[derive(Args)]
pub struct RestoreCommand {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Artifact produced by `data-guard backup` (local path or s3://bucket/key)
    #[arg(long)]
    file: String,

    /// Replace existing data before restoring
    #[arg(long)]
    drop_existing: bool,

    /// Restore only this table or collection (repeatable)
    #[arg(long = "item")]
    items: Vec<String>,

    /// The artifact was taken with `backup --no-compress` (only read when
    /// there is no manifest next to it)
    #[arg(long)]
    no_compress: bool,

    /// Abort the restore after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl RestoreCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let store = Arc::new(InMemoryBackupStore::new());
        let service = self.connection.service(store.clone())?;
        let connection = service
            .create_connection(self.connection.new_connection(&self.connection.dbname))
            .await?;

        let manifest = self.load_manifest().await?;
        let backup = self.imported_backup(&connection, manifest).await?;
        store.save(&backup).await?;

        let options = RestoreOptions {
            drop_existing: self.drop_existing,
            selective_restore: !self.items.is_empty(),
            items: self.items.clone(),
        };
        info!(
            "Restoring {} onto {} database {}",
            self.file, connection.engine, connection.database
        );

        let restore = service.restore_backup(
            &backup.id,
            Some(connection.id.as_str()),
            options,
            timeout_from_secs(self.timeout_secs),
        );
        tokio::pin!(restore);
        let outcome = tokio::select! {
            result = &mut restore => result?,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupt received, cancelling the restore");
                match service.cancel_restore(&connection.id).await {
                    // Wait for the engine to stop so the error is reported
                    Ok(()) => restore.await?,
                    Err(e) => {
                        debug!("Restore was not running yet: {}", e);
                        anyhow::bail!("Restore interrupted before it started");
                    }
                }
            }
        };

        println!();
        println!("{}", outcome.message.bright_green().bold());
        println!();
        Ok(())
    }

    /// Use the manifest written by `backup` when present, otherwise describe
    /// the artifact from the flags
    async fn load_manifest(&self) -> anyhow::Result<BackupManifest> {
        let sidecar = manifest_path(Path::new(&self.file));
        match tokio::fs::read(&sidecar).await {
            Ok(bytes) => {
                debug!("Using manifest {}", sidecar.display());
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("Invalid manifest {}", sidecar.display()))
            }
            Err(_) => {
                warn!(
                    "No manifest next to {}; assuming it holds {}",
                    self.file,
                    if self.items.is_empty() {
                        "the whole database".to_string()
                    } else {
                        self.items.join(", ")
                    }
                );
                Ok(BackupManifest {
                    engine: self.connection.engine,
                    database: self.connection.dbname.clone(),
                    compressed: !self.no_compress
                        && artifact_compressed(self.connection.engine, &self.file),
                    items: self.items.clone(),
                })
            }
        }
    }

    async fn imported_backup(
        &self,
        connection: &DatabaseConnection,
        manifest: BackupManifest,
    ) -> anyhow::Result<Backup> {
        let size_bytes = match tokio::fs::metadata(&self.file).await {
            Ok(meta) => meta.len(),
            Err(_) if self.file.starts_with("s3://") => 0,
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read backup file {}", self.file))
            }
        };

        let location = Path::new(&self.file)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let now = Utc::now();
        let mut backup = Backup::new_pending(
            generate_id().to_string(),
            connection,
            BackupConfig::new(BackupKind::Full, StorageTarget::Local, &location),
            now,
        );
        backup.transition(BackupStatus::InProgress)?;
        backup.complete(
            BackupArtifact {
                size_bytes,
                storage_path: self.file.clone(),
                manifest,
            },
            now,
        )?;
        Ok(backup)
    }
}

/// Whether an artifact written by `backup` is compressed, judged from its
/// name. Mongo archives are gzipped internally and keep the `.archive` name.
fn artifact_compressed(engine: EngineType, file: &str) -> bool {
    if file.ends_with(".gz") {
        return true;
    }
    engine == EngineType::Mongodb && file.ends_with(".archive")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        restore: RestoreCommand,
    }

    fn command(args: &[&str]) -> RestoreCommand {
        let mut argv = vec!["data-guard", "--dbname", "events"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv).restore
    }

    #[test]
    fn test_artifact_compression_from_name() {
        assert!(artifact_compressed(
            EngineType::Mysql,
            "/var/backups/orders-20240101T020000.sql.gz"
        ));
        assert!(!artifact_compressed(
            EngineType::Mysql,
            "/var/backups/orders-20240101T020000.sql"
        ));
        assert!(artifact_compressed(
            EngineType::Mongodb,
            "/var/backups/events-20240101T020000.archive"
        ));
        assert!(artifact_compressed(
            EngineType::Sqlite,
            "s3://backups/app-20240101T020000.db.gz"
        ));
        assert!(!artifact_compressed(
            EngineType::Postgresql,
            "/var/backups/orders-20240101T020000.dump"
        ));
    }

    #[tokio::test]
    async fn test_manifest_fallback_for_mongo_archive() {
        let file = "/nonexistent/events-20240101T020000.archive";

        let manifest = command(&["--engine", "mongodb", "--file", file])
            .load_manifest()
            .await
            .unwrap();
        assert_eq!(manifest.engine, EngineType::Mongodb);
        assert_eq!(manifest.database, "events");
        assert!(manifest.compressed);

        let plain = command(&["--engine", "mongodb", "--file", file, "--no-compress"])
            .load_manifest()
            .await
            .unwrap();
        assert!(!plain.compressed);
    }
}
