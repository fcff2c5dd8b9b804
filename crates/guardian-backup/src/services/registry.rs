use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use guardian_core::generate_id;
use tracing::{debug, info, warn};

use crate::engine::BackupEngine;
use crate::error::BackupError;
use crate::models::{
    Backup, BackupStatus, ConnectionStatus, ConnectionUpdate, DatabaseConnection, NewConnection,
    OperationOutcome,
};

pub const CONNECTION_OK_MESSAGE: &str = "Connection successful!";

/// In-memory registry of database connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<HashMap<String, DatabaseConnection>>>,
    engine: Arc<dyn BackupEngine>,
}

impl ConnectionRegistry {
    pub fn new(engine: Arc<dyn BackupEngine>) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            engine,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, DatabaseConnection>>, BackupError> {
        self.connections
            .read()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, DatabaseConnection>>, BackupError> {
        self.connections
            .write()
            .map_err(|e| BackupError::Internal(format!("Failed to acquire write lock: {}", e)))
    }

    /// Validate, test and register a connection.
    ///
    /// The connection is stored even when the test fails; it then starts out
    /// `disconnected` with the failure reason in `error`.
    pub async fn create(&self, input: NewConnection) -> Result<DatabaseConnection, BackupError> {
        input.validate()?;
        let mut connection = input.into_connection(generate_id().to_string(), Utc::now());

        match self.engine.test_connection(&connection).await {
            Ok(()) => connection.status = ConnectionStatus::Connected,
            Err(e) => {
                warn!(
                    "Connection test for {} ({}) failed: {}",
                    connection.name,
                    connection.address(),
                    e
                );
                connection.status = ConnectionStatus::Disconnected;
                connection.error = Some(e.to_string());
            }
        }

        self.write()?
            .insert(connection.id.clone(), connection.clone());
        info!(
            "Registered {} connection {} ({})",
            connection.engine, connection.name, connection.id
        );
        Ok(connection)
    }

    /// Try to reach the target engine. Stored state is left untouched.
    pub async fn test(&self, connection: &DatabaseConnection) -> OperationOutcome {
        match self.engine.test_connection(connection).await {
            Ok(()) => OperationOutcome::ok(CONNECTION_OK_MESSAGE),
            Err(e) => OperationOutcome::failed(e.to_string()),
        }
    }

    pub fn get(&self, id: &str) -> Result<DatabaseConnection, BackupError> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| BackupError::NotFound(format!("Connection {} not found", id)))
    }

    pub fn exists(&self, id: &str) -> Result<bool, BackupError> {
        Ok(self.read()?.contains_key(id))
    }

    /// All connections, oldest first
    pub fn list(&self) -> Result<Vec<DatabaseConnection>, BackupError> {
        let mut connections: Vec<DatabaseConnection> = self.read()?.values().cloned().collect();
        connections.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(connections)
    }

    pub fn update(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<DatabaseConnection, BackupError> {
        let mut connections = self.write()?;
        let current = connections
            .get(id)
            .ok_or_else(|| BackupError::NotFound(format!("Connection {} not found", id)))?;
        let merged = update.apply(current)?;
        connections.insert(id.to_string(), merged.clone());
        debug!("Updated connection {}", id);
        Ok(merged)
    }

    /// Remove a connection. Backups that reference it are kept.
    pub fn delete(&self, id: &str) -> Result<DatabaseConnection, BackupError> {
        let removed = self
            .write()?
            .remove(id)
            .ok_or_else(|| BackupError::NotFound(format!("Connection {} not found", id)))?;
        info!("Deleted connection {} ({})", removed.name, id);
        Ok(removed)
    }

    /// Persist a status. `error` requires a non-empty detail; `connected`
    /// clears any previous detail.
    pub fn set_status(
        &self,
        id: &str,
        status: ConnectionStatus,
        detail: Option<String>,
    ) -> Result<DatabaseConnection, BackupError> {
        let detail = detail.filter(|d| !d.trim().is_empty());
        if status == ConnectionStatus::Error && detail.is_none() {
            return Err(BackupError::Validation(
                "error status requires an error detail".to_string(),
            ));
        }

        let mut connections = self.write()?;
        let connection = connections
            .get_mut(id)
            .ok_or_else(|| BackupError::NotFound(format!("Connection {} not found", id)))?;
        connection.status = status;
        connection.error = match status {
            ConnectionStatus::Connected => None,
            _ => detail,
        };
        Ok(connection.clone())
    }

    /// Fold a finished backup into the connection's status.
    ///
    /// Non-terminal backups are ignored. Only completed runs move
    /// `last_backup_at`.
    pub fn record_backup_outcome(&self, id: &str, backup: &Backup) -> Result<(), BackupError> {
        match backup.status {
            BackupStatus::Completed => {
                let mut connections = self.write()?;
                let connection = connections
                    .get_mut(id)
                    .ok_or_else(|| BackupError::NotFound(format!("Connection {} not found", id)))?;
                connection.last_backup_at = backup.end_time;
                connection.status = ConnectionStatus::Connected;
                connection.error = None;
                Ok(())
            }
            BackupStatus::Failed => {
                let detail = backup
                    .error
                    .as_deref()
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .unwrap_or("backup failed")
                    .to_string();
                self.set_status(id, ConnectionStatus::Error, Some(detail))
                    .map(|_| ())
            }
            BackupStatus::Pending | BackupStatus::InProgress => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BackupArtifact;
    use crate::error::EngineError;
    use crate::models::{BackupConfig, BackupKind, BackupManifest, EngineType, RestoreOptions, StorageTarget};
    use async_trait::async_trait;

    struct FixedEngine {
        reachable: bool,
    }

    #[async_trait]
    impl BackupEngine for FixedEngine {
        async fn perform_backup(
            &self,
            _connection: &DatabaseConnection,
            _config: &BackupConfig,
        ) -> Result<BackupArtifact, EngineError> {
            Err(EngineError::Unsupported("not used".to_string()))
        }

        async fn perform_restore(
            &self,
            _connection: &DatabaseConnection,
            _backup: &Backup,
            _options: &RestoreOptions,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn test_connection(&self, _connection: &DatabaseConnection) -> Result<(), EngineError> {
            if self.reachable {
                Ok(())
            } else {
                Err(EngineError::Connection("Connection timeout.".to_string()))
            }
        }
    }

    fn registry(reachable: bool) -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(FixedEngine { reachable }))
    }

    fn input(name: &str) -> NewConnection {
        NewConnection {
            name: name.to_string(),
            engine: EngineType::Postgresql,
            host: "localhost".to_string(),
            port: None,
            username: "app".to_string(),
            password: "secret".to_string(),
            database: "orders".to_string(),
        }
    }

    fn finished(connection_id: &str, status: BackupStatus, error: Option<&str>) -> Backup {
        let conn = input("x").into_connection(connection_id.to_string(), Utc::now());
        let mut backup = Backup::new_pending(
            "b1".to_string(),
            &conn,
            BackupConfig::new(BackupKind::Full, StorageTarget::Local, "/backups"),
            Utc::now(),
        );
        backup.transition(BackupStatus::InProgress).unwrap();
        let at = Utc::now();
        match status {
            BackupStatus::Completed => backup
                .complete(
                    BackupArtifact {
                        size_bytes: 10,
                        storage_path: "/backups/x.dump".to_string(),
                        manifest: BackupManifest {
                            engine: EngineType::Postgresql,
                            database: "orders".to_string(),
                            compressed: true,
                            items: vec![],
                        },
                    },
                    at,
                )
                .unwrap(),
            BackupStatus::Failed => backup.fail(error.unwrap_or("boom"), at).unwrap(),
            _ => {}
        }
        backup
    }

    #[tokio::test]
    async fn test_create_reachable_connection() {
        let registry = registry(true);
        let conn = registry.create(input("orders")).await.unwrap();
        assert_eq!(conn.status, ConnectionStatus::Connected);
        assert_eq!(conn.port, Some(5432));
        assert!(conn.last_backup_at.is_none());
        assert_eq!(registry.get(&conn.id).unwrap().name, "orders");
    }

    #[tokio::test]
    async fn test_create_unreachable_connection_is_disconnected() {
        let registry = registry(false);
        let conn = registry.create(input("orders")).await.unwrap();
        assert_eq!(conn.status, ConnectionStatus::Disconnected);
        assert_eq!(conn.error.as_deref(), Some("Connection timeout."));
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields() {
        let registry = registry(true);
        let mut bad = input("orders");
        bad.database = String::new();
        assert!(matches!(
            registry.create(bad).await,
            Err(BackupError::Validation(_))
        ));
        assert!(registry.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_does_not_mutate() {
        let registry = registry(false);
        let conn = registry.create(input("orders")).await.unwrap();
        registry
            .set_status(&conn.id, ConnectionStatus::Connected, None)
            .unwrap();

        let outcome = registry.test(&conn).await;
        assert!(!outcome.success);
        assert_eq!(
            registry.get(&conn.id).unwrap().status,
            ConnectionStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let registry = registry(true);
        let conn = registry.create(input("orders")).await.unwrap();

        let updated = registry
            .update(
                &conn.id,
                ConnectionUpdate {
                    name: Some("orders-primary".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "orders-primary");
        assert_eq!(updated.created_at, conn.created_at);

        assert!(matches!(
            registry.update("missing", ConnectionUpdate::default()),
            Err(BackupError::NotFound(_))
        ));

        registry.delete(&conn.id).unwrap();
        assert!(matches!(
            registry.delete(&conn.id),
            Err(BackupError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_error_status_requires_detail() {
        let registry = registry(true);
        let conn = registry.create(input("orders")).await.unwrap();
        assert!(matches!(
            registry.set_status(&conn.id, ConnectionStatus::Error, Some("  ".to_string())),
            Err(BackupError::Validation(_))
        ));
        let errored = registry
            .set_status(&conn.id, ConnectionStatus::Error, Some("disk full".to_string()))
            .unwrap();
        assert_eq!(errored.error.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_record_backup_outcome() {
        let registry = registry(true);
        let conn = registry.create(input("orders")).await.unwrap();

        let failed = finished(&conn.id, BackupStatus::Failed, Some("disk full"));
        registry.record_backup_outcome(&conn.id, &failed).unwrap();
        let after_failure = registry.get(&conn.id).unwrap();
        assert_eq!(after_failure.status, ConnectionStatus::Error);
        assert_eq!(after_failure.error.as_deref(), Some("disk full"));
        assert!(after_failure.last_backup_at.is_none());

        let completed = finished(&conn.id, BackupStatus::Completed, None);
        registry.record_backup_outcome(&conn.id, &completed).unwrap();
        let after_success = registry.get(&conn.id).unwrap();
        assert_eq!(after_success.status, ConnectionStatus::Connected);
        assert_eq!(after_success.last_backup_at, completed.end_time);
        assert!(after_success.error.is_none());

        let running = finished(&conn.id, BackupStatus::InProgress, None);
        registry.record_backup_outcome(&conn.id, &running).unwrap();
        assert_eq!(
            registry.get(&conn.id).unwrap().last_backup_at,
            completed.end_time
        );
    }

    #[tokio::test]
    async fn test_failure_without_detail_still_marks_error() {
        let registry = registry(true);
        let conn = registry.create(input("orders")).await.unwrap();

        for detail in [None, Some(""), Some("   ")] {
            let mut failed = finished(&conn.id, BackupStatus::Failed, Some("boom"));
            failed.error = detail.map(str::to_string);
            registry.record_backup_outcome(&conn.id, &failed).unwrap();

            let after = registry.get(&conn.id).unwrap();
            assert_eq!(after.status, ConnectionStatus::Error);
            assert_eq!(after.error.as_deref(), Some("backup failed"));
        }
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_creation() {
        let registry = registry(true);
        let first = registry.create(input("a")).await.unwrap();
        let second = registry.create(input("b")).await.unwrap();
        let ids: Vec<String> = registry.list().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 2);
        if first.created_at != second.created_at {
            assert_eq!(ids, vec![first.id, second.id]);
        }
    }
}
