//! Runtime configuration assembled from `GUARDIAN_*` environment variables

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";
pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 6 * 60 * 60;
pub const BACKUP_HISTORY_FILE: &str = "backups.json";
pub const STAGING_DIR_NAME: &str = "staging";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {details}")]
    InvalidValue { key: String, details: String },

    #[error("Could not determine a data directory; set GUARDIAN_DATA_DIR")]
    MissingDataDir,
}

/// Credentials for the `aws_s3` storage target (AWS or any S3-compatible service)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Settings {
    pub region: String,
    /// Optional endpoint URL for S3-compatible services like MinIO
    pub endpoint: Option<String>,
    pub access_key_id: String,
    #[serde(skip_serializing, default)]
    pub secret_key: String,
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    pub address: String,
    pub data_dir: PathBuf,
    pub scheduler_tick_secs: u64,
    pub job_timeout_secs: u64,
    pub s3: Option<S3Settings>,
}

impl GuardianConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Unset keys fall back to defaults; set but unparsable numeric keys are
    /// rejected rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir = match get("GUARDIAN_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or(ConfigError::MissingDataDir)?
                .join(".guardian"),
        };

        let scheduler_tick_secs = parse_u64(&get, "GUARDIAN_SCHEDULER_TICK_SECS")?
            .unwrap_or(DEFAULT_TICK_SECS);
        if scheduler_tick_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "GUARDIAN_SCHEDULER_TICK_SECS".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }

        let job_timeout_secs = parse_u64(&get, "GUARDIAN_JOB_TIMEOUT_SECS")?
            .unwrap_or(DEFAULT_JOB_TIMEOUT_SECS);

        let s3 = match (get("GUARDIAN_S3_ACCESS_KEY_ID"), get("GUARDIAN_S3_SECRET_KEY")) {
            (Some(access_key_id), Some(secret_key)) => Some(S3Settings {
                region: get("GUARDIAN_S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: get("GUARDIAN_S3_ENDPOINT"),
                access_key_id,
                secret_key,
                force_path_style: match get("GUARDIAN_S3_FORCE_PATH_STYLE") {
                    Some(v) => parse_bool("GUARDIAN_S3_FORCE_PATH_STYLE", &v)?,
                    None => true,
                },
            }),
            _ => None,
        };

        Ok(Self {
            address: get("GUARDIAN_ADDRESS").unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            data_dir,
            scheduler_tick_secs,
            job_timeout_secs,
            s3,
        })
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn backup_history_path(&self) -> PathBuf {
        self.data_dir.join(BACKUP_HISTORY_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR_NAME)
    }
}

fn parse_u64<F>(get: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                details: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            details: format!("expected a boolean, got '{}'", other),
        }),
    }
}
