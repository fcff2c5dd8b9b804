pub(crate) mod backup_handler;
pub(crate) mod types;

pub use backup_handler::{configure_routes, BackupApiDoc};
pub use types::{create_backup_app_state, BackupAppState};
