#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use guardian_backup::models::{
    Backup, BackupConfig, BackupKind, BackupManifest, DatabaseConnection, EngineType,
    NewConnection, RestoreOptions, StorageTarget,
};
use guardian_backup::{
    BackupArtifact, BackupEngine, BackupService, EngineError, InMemoryBackupStore,
};

pub const ARTIFACT_SIZE: u64 = 2048;

/// What the next backup call does
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    Fail(EngineError),
    /// Never finishes; only cancellation or a timeout ends the run
    Hang,
    Panic,
}

/// Engine double whose behaviour is switched per test
pub struct ScriptedEngine {
    reachable: AtomicBool,
    backup: Mutex<Script>,
    restore_error: Mutex<Option<EngineError>>,
    hang_restores: AtomicBool,
    items: Vec<String>,
    pub restores: Mutex<Vec<(String, RestoreOptions)>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            backup: Mutex::new(Script::Succeed),
            restore_error: Mutex::new(None),
            hang_restores: AtomicBool::new(false),
            items: vec!["public.customers".to_string(), "public.orders".to_string()],
            restores: Mutex::new(Vec::new()),
        }
    }

    pub fn set_backup(&self, script: Script) {
        *self.backup.lock().unwrap() = script;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn fail_restores_with(&self, error: EngineError) {
        *self.restore_error.lock().unwrap() = Some(error);
    }

    /// Restores block until cancelled or timed out
    pub fn hang_restores(&self, hang: bool) {
        self.hang_restores.store(hang, Ordering::SeqCst);
    }

    pub fn restore_count(&self) -> usize {
        self.restores.lock().unwrap().len()
    }
}

#[async_trait]
impl BackupEngine for ScriptedEngine {
    async fn perform_backup(
        &self,
        connection: &DatabaseConnection,
        config: &BackupConfig,
    ) -> Result<BackupArtifact, EngineError> {
        let script = self.backup.lock().unwrap().clone();
        match script {
            Script::Succeed => Ok(BackupArtifact {
                size_bytes: ARTIFACT_SIZE,
                storage_path: format!("{}/{}.dump", config.storage_location, connection.database),
                manifest: BackupManifest {
                    engine: connection.engine,
                    database: connection.database.clone(),
                    compressed: config.compress,
                    items: self.items.clone(),
                },
            }),
            Script::Fail(error) => Err(error),
            Script::Hang => std::future::pending().await,
            Script::Panic => panic!("engine exploded"),
        }
    }

    async fn perform_restore(
        &self,
        _connection: &DatabaseConnection,
        backup: &Backup,
        options: &RestoreOptions,
    ) -> Result<(), EngineError> {
        if let Some(error) = self.restore_error.lock().unwrap().clone() {
            return Err(error);
        }
        if self.hang_restores.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        self.restores
            .lock()
            .unwrap()
            .push((backup.id.clone(), options.clone()));
        Ok(())
    }

    async fn test_connection(&self, _connection: &DatabaseConnection) -> Result<(), EngineError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Connection(
                "Connection timeout. Please check if the host is reachable.".to_string(),
            ))
        }
    }
}

pub fn service() -> (BackupService, Arc<ScriptedEngine>) {
    let engine = Arc::new(ScriptedEngine::new());
    let service = BackupService::new(
        engine.clone(),
        Arc::new(InMemoryBackupStore::new()),
        Some(Duration::from_secs(30)),
    );
    (service, engine)
}

pub fn postgres(name: &str) -> NewConnection {
    NewConnection {
        name: name.to_string(),
        engine: EngineType::Postgresql,
        host: "db.internal".to_string(),
        port: None,
        username: "app".to_string(),
        password: "hunter2".to_string(),
        database: "orders".to_string(),
    }
}

pub fn local_config() -> BackupConfig {
    BackupConfig::new(BackupKind::Full, StorageTarget::Local, "/var/backups")
}
