mod backup;
mod registry;
mod runner;
mod scheduler;
mod store;

pub use backup::BackupService;
pub use registry::{ConnectionRegistry, CONNECTION_OK_MESSAGE};
pub use runner::{BackupHandle, ConnectionLease, JobOperation, JobRunner, RunOptions, RESTORE_OK_MESSAGE};
pub use scheduler::Scheduler;
pub use store::{BackupStore, FileBackupStore, InMemoryBackupStore, INTERRUPTED_MESSAGE};
