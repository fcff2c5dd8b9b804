mod backup;
mod connection;
mod cron;
mod restore;
mod serve;

pub use backup::BackupCommand;
pub use cron::CronCommand;
pub use restore::RestoreCommand;
pub use serve::ServeCommand;
