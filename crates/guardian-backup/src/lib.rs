//! Database backup orchestration: connections, backup runs, restores and
//! recurring schedules, with an HTTP API over the whole service.

pub mod cron;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

pub use cron::{next_fire, CronError, CronExpression};
pub use engine::{ArtifactStorage, BackupArtifact, BackupEngine, ProcessEngine, StorageLocation};
pub use error::{BackupError, EngineError, ErrorKind};
pub use handlers::{configure_routes, create_backup_app_state, BackupApiDoc, BackupAppState};
pub use services::{
    BackupHandle, BackupService, BackupStore, ConnectionRegistry, FileBackupStore,
    InMemoryBackupStore, JobRunner, Scheduler,
};
