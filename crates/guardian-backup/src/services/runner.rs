//! Executes backup and restore runs.
//!
//! At most one run (backup or restore) is active per connection. The slot is
//! held by a [`ConnectionLease`] that is released when dropped, so every exit
//! path of a run frees the connection: success, engine failure, timeout,
//! cancellation or a panicking engine.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use guardian_core::generate_id;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::ConnectionRegistry;
use super::store::BackupStore;
use crate::engine::BackupEngine;
use crate::error::{BackupError, EngineError};
use crate::models::{
    Backup, BackupConfig, BackupStatus, DatabaseConnection, LogLevel, OperationOutcome,
    RestoreOptions,
};

pub const RESTORE_OK_MESSAGE: &str = "Backup restored successfully!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOperation {
    Backup,
    Restore,
}

impl std::fmt::Display for JobOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOperation::Backup => write!(f, "backup"),
            JobOperation::Restore => write!(f, "restore"),
        }
    }
}

struct ActiveJob {
    operation: JobOperation,
    backup_id: String,
    token: CancellationToken,
}

/// Per-connection active job table
#[derive(Clone, Default)]
struct ActiveJobs {
    jobs: Arc<Mutex<HashMap<String, ActiveJob>>>,
}

impl ActiveJobs {
    // A panic while holding the lock cannot leave the map half-updated
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(
        &self,
        connection_id: &str,
        operation: JobOperation,
        backup_id: &str,
    ) -> Result<ConnectionLease, BackupError> {
        let mut jobs = self.lock();
        if let Some(active) = jobs.get(connection_id) {
            return Err(BackupError::Conflict(format!(
                "Connection {} already has an active {} ({})",
                connection_id, active.operation, active.backup_id
            )));
        }

        let token = CancellationToken::new();
        jobs.insert(
            connection_id.to_string(),
            ActiveJob {
                operation,
                backup_id: backup_id.to_string(),
                token: token.clone(),
            },
        );
        debug!("Acquired {} slot for connection {}", operation, connection_id);

        Ok(ConnectionLease {
            jobs: self.clone(),
            connection_id: connection_id.to_string(),
            token,
        })
    }
}

/// Exclusive claim on a connection for the duration of one run
pub struct ConnectionLease {
    jobs: ActiveJobs,
    connection_id: String,
    token: CancellationToken,
}

impl ConnectionLease {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.connection_id);
        debug!("Released slot for connection {}", self.connection_id);
    }
}

/// Per-run settings
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the runner's default engine timeout
    pub timeout: Option<Duration>,
    /// Scheduled job that triggered the run
    pub schedule_id: Option<u64>,
}

/// Returned by [`JobRunner::start`] while the run continues in the background
#[derive(Debug)]
pub struct BackupHandle {
    pub backup_id: String,
    pub connection_id: String,
    token: CancellationToken,
    task: JoinHandle<Backup>,
}

impl BackupHandle {
    /// Ask the run to stop; it finishes as `failed` with "cancelled by user"
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(self) -> Result<Backup, BackupError> {
        self.task
            .await
            .map_err(|e| BackupError::Internal(format!("Backup task failed: {}", e)))
    }
}

#[derive(Clone)]
pub struct JobRunner {
    registry: ConnectionRegistry,
    store: Arc<dyn BackupStore>,
    engine: Arc<dyn BackupEngine>,
    active: ActiveJobs,
    default_timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(
        registry: ConnectionRegistry,
        store: Arc<dyn BackupStore>,
        engine: Arc<dyn BackupEngine>,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
            active: ActiveJobs::default(),
            default_timeout: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Start a backup of `connection_id`.
    ///
    /// The record is saved `in_progress` before this returns; the engine runs
    /// on a separate task.
    pub async fn start(
        &self,
        connection_id: &str,
        config: BackupConfig,
        options: RunOptions,
    ) -> Result<BackupHandle, BackupError> {
        config.validate()?;
        let connection = self.registry.get(connection_id)?;

        let backup_id = generate_id().to_string();
        let lease = self
            .active
            .acquire(connection_id, JobOperation::Backup, &backup_id)?;

        let now = Utc::now();
        let mut backup = Backup::new_pending(backup_id.clone(), &connection, config, now);
        backup.schedule_id = options.schedule_id;
        backup.transition(BackupStatus::InProgress)?;
        backup.log(LogLevel::Info, "Starting backup process...", now);
        backup.log(
            LogLevel::Info,
            format!(
                "Connected to {} database at {}",
                connection.engine,
                connection.address()
            ),
            now,
        );
        self.store.save(&backup).await?;

        info!(
            "Started backup {} of connection {} ({})",
            backup_id, connection.name, connection_id
        );

        let token = lease.token();
        let timeout = options.timeout.or(self.default_timeout);
        let runner = self.clone();
        let task = tokio::spawn(async move {
            runner
                .execute_backup(connection, backup, lease, timeout)
                .await
        });

        Ok(BackupHandle {
            backup_id,
            connection_id: connection_id.to_string(),
            token,
            task,
        })
    }

    async fn execute_backup(
        &self,
        connection: DatabaseConnection,
        mut backup: Backup,
        lease: ConnectionLease,
        timeout: Option<Duration>,
    ) -> Backup {
        backup.log(
            LogLevel::Info,
            format!(
                "Starting {} backup of database {}",
                backup.config.kind, connection.database
            ),
            Utc::now(),
        );
        let compression = if backup.config.compress {
            "Compressing backup data..."
        } else {
            "Skipping compression as per configuration"
        };
        backup.log(LogLevel::Info, compression, Utc::now());
        if let Err(e) = self.store.update(&backup).await {
            warn!("Failed to record progress of backup {}: {}", backup.id, e);
        }

        let result = guarded(
            lease.token(),
            timeout,
            self.engine.perform_backup(&connection, &backup.config),
        )
        .await;

        let finished_at = Utc::now();
        let transition = match result {
            Ok(artifact) => {
                let size = artifact.size_bytes;
                let outcome = backup.complete(artifact, finished_at);
                info!(
                    "Backup {} of {} completed ({} bytes)",
                    backup.id, connection.name, size
                );
                outcome
            }
            Err(e) => {
                warn!("Backup {} of {} failed: {}", backup.id, connection.name, e);
                backup.fail(e.to_string(), finished_at)
            }
        };
        if let Err(e) = transition {
            error!("Could not finalize backup {}: {}", backup.id, e);
        }

        if let Err(e) = self.store.update(&backup).await {
            error!("Failed to persist backup {}: {}", backup.id, e);
        }
        if let Err(e) = self
            .registry
            .record_backup_outcome(&backup.connection_id, &backup)
        {
            warn!(
                "Could not record outcome of backup {} on connection {}: {}",
                backup.id, backup.connection_id, e
            );
        }

        // The slot is freed only after the terminal record is visible
        drop(lease);
        backup
    }

    /// Restore `backup_id` onto `connection_id`. The backup record itself is
    /// not modified.
    pub async fn restore(
        &self,
        connection_id: &str,
        backup_id: &str,
        options: RestoreOptions,
        timeout: Option<Duration>,
    ) -> Result<OperationOutcome, BackupError> {
        let backup = self.store.get(backup_id).await?;
        if backup.status != BackupStatus::Completed {
            return Err(BackupError::Validation(format!(
                "Backup {} is {}; only completed backups can be restored",
                backup_id, backup.status
            )));
        }
        options.validate()?;

        let connection = self.registry.get(connection_id)?;
        if let Some(manifest) = &backup.manifest {
            if manifest.engine != connection.engine {
                return Err(BackupError::Validation(format!(
                    "Backup {} was taken from a {} database and cannot be restored onto {}",
                    backup_id, manifest.engine, connection.engine
                )));
            }
            if options.selective_restore {
                let missing: Vec<&str> = options
                    .items
                    .iter()
                    .filter(|item| !manifest.contains(item))
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(EngineError::MissingItem(format!(
                        "Items not present in backup {}: {}",
                        backup_id,
                        missing.join(", ")
                    ))
                    .into());
                }
            }
        } else if options.selective_restore {
            return Err(EngineError::MissingItem(format!(
                "Backup {} has no manifest; selective restore is unavailable",
                backup_id
            ))
            .into());
        }

        let lease = self
            .active
            .acquire(connection_id, JobOperation::Restore, backup_id)?;
        info!(
            "Restoring backup {} onto connection {} ({})",
            backup_id, connection.name, connection_id
        );

        let result = guarded(
            lease.token(),
            timeout.or(self.default_timeout),
            self.engine.perform_restore(&connection, &backup, &options),
        )
        .await;
        drop(lease);

        match result {
            Ok(()) => {
                info!("Backup {} restored onto {}", backup_id, connection_id);
                Ok(OperationOutcome::ok(RESTORE_OK_MESSAGE))
            }
            Err(e) => {
                warn!(
                    "Restore of backup {} onto {} failed: {}",
                    backup_id, connection_id, e
                );
                Err(e.into())
            }
        }
    }

    /// Signal the active backup with this id. Returns false when it is not
    /// running.
    pub fn cancel_backup(&self, backup_id: &str) -> bool {
        let jobs = self.active.lock();
        match jobs
            .values()
            .find(|job| job.operation == JobOperation::Backup && job.backup_id == backup_id)
        {
            Some(job) => {
                job.token.cancel();
                info!("Cancellation requested for backup {}", backup_id);
                true
            }
            None => false,
        }
    }

    /// Signal the restore running on the connection. Returns false when the
    /// connection is idle or busy with a backup.
    pub fn cancel_restore(&self, connection_id: &str) -> bool {
        match self.active.lock().get(connection_id) {
            Some(job) if job.operation == JobOperation::Restore => {
                job.token.cancel();
                info!(
                    "Cancellation requested for restore of {} on connection {}",
                    job.backup_id, connection_id
                );
                true
            }
            _ => false,
        }
    }

    pub fn is_backup_active(&self, backup_id: &str) -> bool {
        self.active
            .lock()
            .values()
            .any(|job| job.operation == JobOperation::Backup && job.backup_id == backup_id)
    }

    pub fn active_operation(&self, connection_id: &str) -> Option<JobOperation> {
        self.active.lock().get(connection_id).map(|job| job.operation)
    }
}

/// Drive an engine call under cancellation, an optional timeout and panic
/// containment. The engine future is dropped when either of the first two
/// fires.
async fn guarded<T, F>(
    token: CancellationToken,
    timeout: Option<Duration>,
    call: F,
) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let run = async move {
        let caught = AssertUnwindSafe(call).catch_unwind();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, caught).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(EngineError::Timeout),
            },
            None => caught.await,
        };
        match outcome {
            Ok(result) => result,
            Err(panic) => Err(EngineError::Internal(format!(
                "Engine panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(EngineError::Cancelled),
        result = run => result,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
