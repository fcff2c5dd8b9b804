use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use guardian_core::UtcDateTime;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::ConnectionRegistry;
use super::runner::{BackupHandle, JobRunner, RunOptions};
use crate::cron::CronExpression;
use crate::error::BackupError;
use crate::models::{BackupConfig, Schedule, ScheduledJob};

struct JobEntry {
    job: ScheduledJob,
    cron: CronExpression,
}

/// A job that was due at `slot`
struct DueJob {
    id: u64,
    connection_id: String,
    config: BackupConfig,
    slot: UtcDateTime,
}

/// Recurring backup jobs and the loop that fires them
#[derive(Clone)]
pub struct Scheduler {
    jobs: Arc<Mutex<BTreeMap<u64, JobEntry>>>,
    next_id: Arc<AtomicU64>,
    registry: ConnectionRegistry,
    runner: JobRunner,
}

impl Scheduler {
    pub fn new(registry: ConnectionRegistry, runner: JobRunner) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            registry,
            runner,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, JobEntry>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schedule(
        &self,
        connection_id: &str,
        cron: Option<&str>,
        config: BackupConfig,
    ) -> Result<ScheduledJob, BackupError> {
        self.schedule_at(connection_id, cron, config, Utc::now())
    }

    /// Register a recurring backup.
    ///
    /// `cron`, when given, replaces `config.schedule` with a custom schedule;
    /// otherwise `config.schedule` is required.
    pub fn schedule_at(
        &self,
        connection_id: &str,
        cron: Option<&str>,
        mut config: BackupConfig,
        now: UtcDateTime,
    ) -> Result<ScheduledJob, BackupError> {
        if let Some(expression) = cron {
            config.schedule = Some(Schedule::custom(expression));
        }
        let schedule = config.schedule.clone().ok_or_else(|| {
            BackupError::Validation("A schedule or cron expression is required".to_string())
        })?;
        config.validate()?;
        let compiled = schedule.validate()?;
        self.registry.get(connection_id)?;

        let next_fire = compiled.next_after(now).ok_or_else(|| {
            BackupError::Validation(format!(
                "Schedule '{}' never fires",
                compiled.as_str()
            ))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = ScheduledJob {
            id,
            connection_id: connection_id.to_string(),
            cron: compiled.as_str().to_string(),
            description: schedule.describe(),
            config,
            next_fire: Some(next_fire),
            enabled: true,
            last_fired_at: None,
            last_error: None,
            created_at: now,
        };
        self.lock().insert(
            id,
            JobEntry {
                job: job.clone(),
                cron: compiled,
            },
        );
        info!(
            "Scheduled job {} for connection {} ({}), next run at {}",
            id, connection_id, job.description, next_fire
        );
        Ok(job)
    }

    /// All jobs in id order
    pub fn list(&self) -> Vec<ScheduledJob> {
        self.lock().values().map(|entry| entry.job.clone()).collect()
    }

    pub fn get(&self, id: u64) -> Result<ScheduledJob, BackupError> {
        self.lock()
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| BackupError::NotFound(format!("Scheduled job {} not found", id)))
    }

    pub fn unschedule(&self, id: u64) -> Result<ScheduledJob, BackupError> {
        let removed = self
            .lock()
            .remove(&id)
            .ok_or_else(|| BackupError::NotFound(format!("Scheduled job {} not found", id)))?;
        info!("Unscheduled job {}", id);
        Ok(removed.job)
    }

    /// Toggle a job. Enabling recomputes the next fire time from `now` so
    /// slots missed while disabled are not replayed.
    pub fn set_enabled(
        &self,
        id: u64,
        enabled: bool,
        now: UtcDateTime,
    ) -> Result<ScheduledJob, BackupError> {
        let mut jobs = self.lock();
        let entry = jobs
            .get_mut(&id)
            .ok_or_else(|| BackupError::NotFound(format!("Scheduled job {} not found", id)))?;
        if enabled && !entry.job.enabled {
            entry.job.next_fire = entry.cron.next_after(now);
        }
        entry.job.enabled = enabled;
        info!(
            "Scheduled job {} {}",
            id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(entry.job.clone())
    }

    /// Fire every enabled job due at `now` and return the started runs.
    ///
    /// A job's next fire time is computed from the slot that fired, skipping
    /// any further slots already in the past. Failures to start are logged
    /// and recorded on the job, never raised.
    pub async fn tick(&self, now: UtcDateTime) -> Vec<BackupHandle> {
        let due = self.collect_due(now);
        let mut started = Vec::with_capacity(due.len());

        for job in due {
            let outcome = match self.registry.exists(&job.connection_id) {
                Ok(true) => {
                    self.runner
                        .start(
                            &job.connection_id,
                            job.config.clone(),
                            RunOptions {
                                timeout: None,
                                schedule_id: Some(job.id),
                            },
                        )
                        .await
                }
                Ok(false) => Err(BackupError::NotFound(format!(
                    "Connection {} no longer exists",
                    job.connection_id
                ))),
                Err(e) => Err(e),
            };

            let last_error = match outcome {
                Ok(handle) => {
                    info!(
                        "Scheduled job {} started backup {} (slot {})",
                        job.id, handle.backup_id, job.slot
                    );
                    started.push(handle);
                    None
                }
                Err(BackupError::NotFound(msg)) => {
                    error!("Skipping scheduled job {}: {}", job.id, msg);
                    Some(msg)
                }
                Err(e) => {
                    warn!("Scheduled job {} could not start: {}", job.id, e);
                    Some(e.to_string())
                }
            };

            if let Some(entry) = self.lock().get_mut(&job.id) {
                entry.job.last_error = last_error;
            }
        }

        started
    }

    fn collect_due(&self, now: UtcDateTime) -> Vec<DueJob> {
        let mut jobs = self.lock();
        let mut due = Vec::new();
        for entry in jobs.values_mut() {
            let slot = match entry.job.next_fire {
                Some(slot) if entry.job.enabled && slot <= now => slot,
                _ => continue,
            };

            let mut next = entry.cron.next_after(slot);
            while let Some(candidate) = next {
                if candidate > now {
                    break;
                }
                next = entry.cron.next_after(candidate);
            }
            entry.job.next_fire = next;
            entry.job.last_fired_at = Some(slot);
            debug!(
                "Job {} due at {}, next run at {:?}",
                entry.job.id, slot, entry.job.next_fire
            );

            due.push(DueJob {
                id: entry.job.id,
                connection_id: entry.job.connection_id.clone(),
                config: entry.job.config.clone(),
                slot,
            });
        }
        due
    }

    /// Tick every `period` until `token` is cancelled
    pub async fn run(&self, period: Duration, token: CancellationToken) {
        info!("Backup scheduler started, tick every {:?}", period);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let started = self.tick(Utc::now()).await;
                    if !started.is_empty() {
                        debug!("Scheduler tick started {} backups", started.len());
                    }
                }
                _ = token.cancelled() => {
                    info!("Backup scheduler received cancellation signal");
                    break;
                }
            }
        }
    }
}
