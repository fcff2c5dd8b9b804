use std::sync::Arc;

use crate::services::BackupService;

pub struct BackupAppState {
    pub backup_service: Arc<BackupService>,
}

pub fn create_backup_app_state(backup_service: Arc<BackupService>) -> Arc<BackupAppState> {
    Arc::new(BackupAppState { backup_service })
}
