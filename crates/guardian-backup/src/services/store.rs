use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::BackupError;
use crate::models::{Backup, BackupFilter, BackupStatus};

pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Persistence for backup records and their logs
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Insert or overwrite by id
    async fn save(&self, backup: &Backup) -> Result<(), BackupError>;

    /// Overwrite an existing record
    async fn update(&self, backup: &Backup) -> Result<(), BackupError>;

    async fn get(&self, id: &str) -> Result<Backup, BackupError>;

    /// Matching records, newest `start_time` first
    async fn list(&self, filter: &BackupFilter) -> Result<Vec<Backup>, BackupError>;

    /// Remove the record and its logs
    async fn delete(&self, id: &str) -> Result<Backup, BackupError>;
}

#[derive(Clone, Default)]
pub struct InMemoryBackupStore {
    backups: Arc<RwLock<HashMap<String, Backup>>>,
}

impl InMemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_backups(backups: Vec<Backup>) -> Self {
        let map = backups.into_iter().map(|b| (b.id.clone(), b)).collect();
        Self {
            backups: Arc::new(RwLock::new(map)),
        }
    }

    fn snapshot(&self) -> Result<Vec<Backup>, BackupError> {
        self.list_sync(&BackupFilter::default())
    }

    fn save_sync(&self, backup: &Backup) -> Result<(), BackupError> {
        self.backups
            .write()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire write lock: {}", e)))?
            .insert(backup.id.clone(), backup.clone());
        Ok(())
    }

    fn update_sync(&self, backup: &Backup) -> Result<(), BackupError> {
        let mut backups = self
            .backups
            .write()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        match backups.get_mut(&backup.id) {
            Some(existing) => {
                *existing = backup.clone();
                Ok(())
            }
            None => Err(BackupError::NotFound(format!(
                "Backup {} not found",
                backup.id
            ))),
        }
    }

    fn get_sync(&self, id: &str) -> Result<Backup, BackupError> {
        self.backups
            .read()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire read lock: {}", e)))?
            .get(id)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("Backup {} not found", id)))
    }

    fn list_sync(&self, filter: &BackupFilter) -> Result<Vec<Backup>, BackupError> {
        let mut matching: Vec<Backup> = self
            .backups
            .read()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire read lock: {}", e)))?
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(matching)
    }

    fn delete_sync(&self, id: &str) -> Result<Backup, BackupError> {
        self.backups
            .write()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire write lock: {}", e)))?
            .remove(id)
            .ok_or_else(|| BackupError::NotFound(format!("Backup {} not found", id)))
    }
}

#[async_trait]
impl BackupStore for InMemoryBackupStore {
    async fn save(&self, backup: &Backup) -> Result<(), BackupError> {
        self.save_sync(backup)
    }

    async fn update(&self, backup: &Backup) -> Result<(), BackupError> {
        self.update_sync(backup)
    }

    async fn get(&self, id: &str) -> Result<Backup, BackupError> {
        self.get_sync(id)
    }

    async fn list(&self, filter: &BackupFilter) -> Result<Vec<Backup>, BackupError> {
        self.list_sync(filter)
    }

    async fn delete(&self, id: &str) -> Result<Backup, BackupError> {
        self.delete_sync(id)
    }
}

/// Backup history kept in memory and mirrored to a JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and a
/// rename, so readers never observe a partial file.
pub struct FileBackupStore {
    inner: InMemoryBackupStore,
    path: PathBuf,
    persist_lock: Mutex<()>,
}

impl FileBackupStore {
    /// Load history from `path` (missing file means empty history).
    ///
    /// Records left `pending` or `in_progress` by a previous process are
    /// marked failed since nothing is running them any more.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BackupError> {
        let path = path.into();
        let mut backups: Vec<Backup> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                BackupError::Internal(format!(
                    "Failed to parse backup history {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(BackupError::Internal(format!(
                    "Failed to read backup history {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let mut recovered = 0;
        let now = Utc::now();
        for backup in backups.iter_mut().filter(|b| !b.status.is_terminal()) {
            if backup.status == BackupStatus::Pending {
                backup.transition(BackupStatus::InProgress)?;
            }
            backup.fail(INTERRUPTED_MESSAGE, now)?;
            recovered += 1;
        }
        if recovered > 0 {
            warn!(
                "Marked {} interrupted backups as failed in {}",
                recovered,
                path.display()
            );
        }

        info!(
            "Loaded {} backups from {}",
            backups.len(),
            path.display()
        );
        let store = Self {
            inner: InMemoryBackupStore::with_backups(backups),
            path,
            persist_lock: Mutex::new(()),
        };
        if recovered > 0 {
            store.persist().await?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), BackupError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.inner.snapshot()?;
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| BackupError::Internal(format!("Failed to serialize backups: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BackupError::Internal(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &json).await.map_err(|e| {
            BackupError::Internal(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            BackupError::Internal(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(
            "Persisted {} backups to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn save(&self, backup: &Backup) -> Result<(), BackupError> {
        self.inner.save_sync(backup)?;
        self.persist().await
    }

    async fn update(&self, backup: &Backup) -> Result<(), BackupError> {
        self.inner.update_sync(backup)?;
        self.persist().await
    }

    async fn get(&self, id: &str) -> Result<Backup, BackupError> {
        self.inner.get_sync(id)
    }

    async fn list(&self, filter: &BackupFilter) -> Result<Vec<Backup>, BackupError> {
        self.inner.list_sync(filter)
    }

    async fn delete(&self, id: &str) -> Result<Backup, BackupError> {
        let removed = self.inner.delete_sync(id)?;
        self.persist().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackupConfig, BackupKind, EngineType, NewConnection, StorageTarget};
    use chrono::{Duration, TimeZone};

    fn backup(id: &str, connection_id: &str, minute: u32) -> Backup {
        let conn = NewConnection {
            name: format!("db-{}", connection_id),
            engine: EngineType::Mysql,
            host: "localhost".to_string(),
            port: None,
            username: "root".to_string(),
            password: "pw".to_string(),
            database: "shop".to_string(),
        }
        .into_connection(connection_id.to_string(), Utc::now());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, minute, 0).unwrap();
        Backup::new_pending(
            id.to_string(),
            &conn,
            BackupConfig::new(BackupKind::Full, StorageTarget::Local, "/backups"),
            start,
        )
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = InMemoryBackupStore::new();
        store.save(&backup("a", "c1", 1)).await.unwrap();
        store.save(&backup("b", "c1", 3)).await.unwrap();
        let mut other = backup("c", "c2", 2);
        other.transition(BackupStatus::InProgress).unwrap();
        store.save(&other).await.unwrap();

        let all: Vec<String> = store
            .list(&BackupFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(all, vec!["b", "c", "a"]);

        let c1 = store.list(&BackupFilter::for_connection("c1")).await.unwrap();
        assert_eq!(c1.len(), 2);

        let running = store
            .list(&BackupFilter {
                status: Some(BackupStatus::InProgress),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "c");

        let by_name = store
            .list(&BackupFilter {
                name: Some("db-c2".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
    }

    #[tokio::test]
    async fn test_get_update_delete() {
        let store = InMemoryBackupStore::new();
        let mut record = backup("a", "c1", 1);
        assert!(matches!(store.update(&record).await, Err(BackupError::NotFound(_))));

        store.save(&record).await.unwrap();
        record.transition(BackupStatus::InProgress).unwrap();
        store.update(&record).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().status, BackupStatus::InProgress);

        store.delete("a").await.unwrap();
        assert!(matches!(store.get("a").await, Err(BackupError::NotFound(_))));
        assert!(matches!(store.delete("a").await, Err(BackupError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("backups.json");

        {
            let store = FileBackupStore::open(&path).await.unwrap();
            let mut done = backup("done", "c1", 1);
            done.transition(BackupStatus::InProgress).unwrap();
            done.fail("disk full", done.start_time + Duration::seconds(5))
                .unwrap();
            store.save(&done).await.unwrap();
            store.save(&backup("gone", "c1", 2)).await.unwrap();
            store.delete("gone").await.unwrap();
        }

        let reopened = FileBackupStore::open(&path).await.unwrap();
        let all = reopened.list(&BackupFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].error.as_deref(), Some("disk full"));
        assert!(!dir.path().join("state").join("backups.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_fails_interrupted_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backups.json");
        {
            let store = FileBackupStore::open(&path).await.unwrap();
            let mut running = backup("running", "c1", 1);
            running.transition(BackupStatus::InProgress).unwrap();
            store.save(&running).await.unwrap();
            store.save(&backup("queued", "c1", 2)).await.unwrap();
        }

        let reopened = FileBackupStore::open(&path).await.unwrap();
        for id in ["running", "queued"] {
            let record = reopened.get(id).await.unwrap();
            assert_eq!(record.status, BackupStatus::Failed);
            assert_eq!(record.error.as_deref(), Some(INTERRUPTED_MESSAGE));
        }
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backups.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert!(matches!(
            FileBackupStore::open(&path).await,
            Err(BackupError::Internal(_))
        ));
    }
}
