use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::registry::ConnectionRegistry;
use super::runner::{BackupHandle, JobRunner, RunOptions};
use super::scheduler::Scheduler;
use super::store::BackupStore;
use crate::engine::BackupEngine;
use crate::error::BackupError;
use crate::models::{
    Backup, BackupConfig, BackupFilter, ConnectionStats, ConnectionStatus, ConnectionUpdate,
    DatabaseConnection, NewConnection, OperationOutcome, RestoreOptions, ScheduledJob,
};

/// Entry point for every caller: HTTP handlers, the CLI and tests
pub struct BackupService {
    registry: ConnectionRegistry,
    store: Arc<dyn BackupStore>,
    runner: JobRunner,
    scheduler: Scheduler,
}

impl BackupService {
    /// `job_timeout` bounds each engine call unless a run sets its own
    pub fn new(
        engine: Arc<dyn BackupEngine>,
        store: Arc<dyn BackupStore>,
        job_timeout: Option<Duration>,
    ) -> Self {
        let registry = ConnectionRegistry::new(engine.clone());
        let mut runner = JobRunner::new(registry.clone(), store.clone(), engine);
        if let Some(timeout) = job_timeout {
            runner = runner.with_default_timeout(timeout);
        }
        let scheduler = Scheduler::new(registry.clone(), runner.clone());
        Self {
            registry,
            store,
            runner,
            scheduler,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // Connections

    pub async fn create_connection(
        &self,
        input: NewConnection,
    ) -> Result<DatabaseConnection, BackupError> {
        self.registry.create(input).await
    }

    pub fn list_connections(&self) -> Result<Vec<DatabaseConnection>, BackupError> {
        self.registry.list()
    }

    pub fn get_connection(&self, id: &str) -> Result<DatabaseConnection, BackupError> {
        self.registry.get(id)
    }

    pub fn update_connection(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<DatabaseConnection, BackupError> {
        self.registry.update(id, update)
    }

    /// Backups taken from the connection stay in the store
    pub fn delete_connection(&self, id: &str) -> Result<DatabaseConnection, BackupError> {
        self.registry.delete(id)
    }

    /// Test a stored connection and persist the resulting status
    pub async fn test_connection(&self, id: &str) -> Result<OperationOutcome, BackupError> {
        let connection = self.registry.get(id)?;
        let outcome = self.registry.test(&connection).await;
        if outcome.success {
            self.registry
                .set_status(id, ConnectionStatus::Connected, None)?;
        } else {
            self.registry.set_status(
                id,
                ConnectionStatus::Disconnected,
                Some(outcome.message.clone()),
            )?;
        }
        Ok(outcome)
    }

    /// Test connection details before registering them
    pub async fn test_connection_details(
        &self,
        input: NewConnection,
    ) -> Result<OperationOutcome, BackupError> {
        input.validate()?;
        let candidate = input.into_connection(String::new(), Utc::now());
        Ok(self.registry.test(&candidate).await)
    }

    pub async fn connection_stats(&self, id: &str) -> Result<ConnectionStats, BackupError> {
        self.registry.get(id)?;
        let backups = self.store.list(&BackupFilter::for_connection(id)).await?;
        Ok(ConnectionStats::from_backups(&backups))
    }

    // Backups

    pub async fn start_backup(
        &self,
        connection_id: &str,
        config: BackupConfig,
        timeout: Option<Duration>,
    ) -> Result<BackupHandle, BackupError> {
        self.runner
            .start(
                connection_id,
                config,
                RunOptions {
                    timeout,
                    schedule_id: None,
                },
            )
            .await
    }

    pub async fn get_backup(&self, id: &str) -> Result<Backup, BackupError> {
        self.store.get(id).await
    }

    pub async fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>, BackupError> {
        self.store.list(filter).await
    }

    /// Delete a finished backup record. Running backups must be cancelled
    /// first.
    pub async fn delete_backup(&self, id: &str) -> Result<Backup, BackupError> {
        if self.runner.is_backup_active(id) {
            return Err(BackupError::Conflict(format!(
                "Backup {} is still running; cancel it first",
                id
            )));
        }
        let removed = self.store.delete(id).await?;
        info!("Deleted backup {} ({})", removed.name, id);
        Ok(removed)
    }

    pub async fn cancel_backup(&self, id: &str) -> Result<(), BackupError> {
        let backup = self.store.get(id).await?;
        if self.runner.cancel_backup(id) {
            Ok(())
        } else {
            Err(BackupError::Conflict(format!(
                "Backup {} is not running (status: {})",
                id, backup.status
            )))
        }
    }

    /// Cancel the restore running on a connection
    pub async fn cancel_restore(&self, connection_id: &str) -> Result<(), BackupError> {
        let connection = self.registry.get(connection_id)?;
        if self.runner.cancel_restore(connection_id) {
            return Ok(());
        }
        let detail = match self.runner.active_operation(connection_id) {
            Some(operation) => format!("a {} is running", operation),
            None => "it is idle".to_string(),
        };
        Err(BackupError::Conflict(format!(
            "No restore is running on connection {} ({})",
            connection.name, detail
        )))
    }

    /// Restore a backup onto `connection_id`, defaulting to the connection
    /// it was taken from
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        connection_id: Option<&str>,
        options: RestoreOptions,
        timeout: Option<Duration>,
    ) -> Result<OperationOutcome, BackupError> {
        let target = match connection_id {
            Some(id) => id.to_string(),
            None => self.store.get(backup_id).await?.connection_id,
        };
        self.runner
            .restore(&target, backup_id, options, timeout)
            .await
    }

    /// Delete finished backups that started more than `retention_days` ago.
    /// Returns how many were removed.
    pub async fn cleanup_old_backups(&self, retention_days: u32) -> Result<usize, BackupError> {
        info!("Cleaning up backups older than {} days", retention_days);
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let expired: Vec<Backup> = self
            .store
            .list(&BackupFilter::default())
            .await?
            .into_iter()
            .filter(|b| b.status.is_terminal() && b.start_time < cutoff)
            .collect();

        let mut removed = 0;
        for backup in expired {
            match self.store.delete(&backup.id).await {
                Ok(_) => removed += 1,
                Err(e) => error!("Failed to delete old backup {}: {}", backup.id, e),
            }
        }
        Ok(removed)
    }

    // Schedules

    pub fn schedule_backup(
        &self,
        connection_id: &str,
        cron: Option<&str>,
        config: BackupConfig,
    ) -> Result<ScheduledJob, BackupError> {
        self.scheduler.schedule(connection_id, cron, config)
    }

    pub fn list_schedules(&self) -> Vec<ScheduledJob> {
        self.scheduler.list()
    }

    pub fn get_schedule(&self, id: u64) -> Result<ScheduledJob, BackupError> {
        self.scheduler.get(id)
    }

    pub fn unschedule(&self, id: u64) -> Result<ScheduledJob, BackupError> {
        self.scheduler.unschedule(id)
    }

    pub fn enable_schedule(&self, id: u64) -> Result<ScheduledJob, BackupError> {
        self.scheduler.set_enabled(id, true, Utc::now())
    }

    pub fn disable_schedule(&self, id: u64) -> Result<ScheduledJob, BackupError> {
        self.scheduler.set_enabled(id, false, Utc::now())
    }

    /// Run the scheduler loop until `token` is cancelled
    pub async fn start_backup_scheduler(&self, tick: Duration, token: CancellationToken) {
        self.scheduler.run(tick, token).await
    }
}
