//! Backup engine adapters
//!
//! An adapter performs the actual dump and restore I/O for a connection. The
//! job runner drives it and owns all state transitions; adapters only report
//! success or an [`EngineError`].

mod process;
mod storage;

pub use process::ProcessEngine;
pub use storage::{ArtifactStorage, StorageLocation};

use async_trait::async_trait;

use crate::error::EngineError;
use crate::models::{
    Backup, BackupConfig, BackupManifest, DatabaseConnection, RestoreOptions,
};

/// What a successful backup produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub size_bytes: u64,
    pub storage_path: String,
    pub manifest: BackupManifest,
}

/// Contract consumed by the job runner.
///
/// Futures returned by these methods may be dropped before completion when
/// a run is cancelled or times out; implementations must stop their
/// underlying work when that happens.
#[async_trait]
pub trait BackupEngine: Send + Sync {
    async fn perform_backup(
        &self,
        connection: &DatabaseConnection,
        config: &BackupConfig,
    ) -> Result<BackupArtifact, EngineError>;

    async fn perform_restore(
        &self,
        connection: &DatabaseConnection,
        backup: &Backup,
        options: &RestoreOptions,
    ) -> Result<(), EngineError>;

    async fn test_connection(&self, connection: &DatabaseConnection) -> Result<(), EngineError>;
}
