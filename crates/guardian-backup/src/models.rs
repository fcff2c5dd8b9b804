//! Connection, backup and schedule records shared by every service

use std::fmt;
use std::str::FromStr;

use chrono::SecondsFormat;
use guardian_core::{format_file_size, mask_sensitive, UtcDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cron::CronExpression;
use crate::engine::BackupArtifact;
use crate::error::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Mysql,
    Postgresql,
    Mongodb,
    Sqlite,
}

impl EngineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Mysql => "mysql",
            EngineType::Postgresql => "postgresql",
            EngineType::Mongodb => "mongodb",
            EngineType::Sqlite => "sqlite",
        }
    }

    /// Port used when a connection does not set one; SQLite is file based
    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineType::Mysql => Some(3306),
            EngineType::Postgresql => Some(5432),
            EngineType::Mongodb => Some(27017),
            EngineType::Sqlite => None,
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(EngineType::Mysql),
            "postgresql" | "postgres" => Ok(EngineType::Postgresql),
            "mongodb" | "mongo" => Ok(EngineType::Mongodb),
            "sqlite" => Ok(EngineType::Sqlite),
            other => Err(BackupError::Validation(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

#[derive(Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConnection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub engine: EngineType,
    pub host: String,
    /// Unset only for engines without a network port
    pub port: Option<u16>,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub database: String,
    #[schema(value_type = String)]
    pub created_at: UtcDateTime,
    #[schema(value_type = Option<String>)]
    pub last_backup_at: Option<UtcDateTime>,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &mask_sensitive(&self.password))
            .field("database", &self.database)
            .field("status", &self.status)
            .field("error", &self.error)
            .finish()
    }
}

impl DatabaseConnection {
    /// Port with the engine default applied
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.engine.default_port())
    }

    /// `host:port`, or just the host for file based engines
    pub fn address(&self) -> String {
        match self.effective_port() {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// Input for registering a connection
#[derive(Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewConnection {
    pub name: String,
    #[serde(rename = "type")]
    pub engine: EngineType,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl fmt::Debug for NewConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewConnection")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &mask_sensitive(&self.password))
            .field("database", &self.database)
            .finish()
    }
}

impl NewConnection {
    pub fn validate(&self) -> Result<(), BackupError> {
        validate_connection_fields(
            &self.name,
            &self.host,
            &self.username,
            &self.password,
            &self.database,
        )
    }

    /// Materialise a stored connection. Status starts as `disconnected`
    /// until a test succeeds.
    pub fn into_connection(self, id: String, created_at: UtcDateTime) -> DatabaseConnection {
        let port = self.port.or_else(|| self.engine.default_port());
        DatabaseConnection {
            id,
            name: self.name.trim().to_string(),
            engine: self.engine,
            host: self.host.trim().to_string(),
            port,
            username: self.username,
            password: self.password,
            database: self.database,
            created_at,
            last_backup_at: None,
            status: ConnectionStatus::Disconnected,
            error: None,
        }
    }
}

/// Partial update of a connection; unset fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub engine: Option<EngineType>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: Option<String>,
}

impl ConnectionUpdate {
    /// Merge into a copy of `current` and validate the result
    pub fn apply(self, current: &DatabaseConnection) -> Result<DatabaseConnection, BackupError> {
        let mut merged = current.clone();
        if let Some(name) = self.name {
            merged.name = name.trim().to_string();
        }
        if let Some(engine) = self.engine {
            if engine != merged.engine && self.port.is_none() {
                merged.port = engine.default_port();
            }
            merged.engine = engine;
        }
        if let Some(host) = self.host {
            merged.host = host.trim().to_string();
        }
        if let Some(port) = self.port {
            merged.port = Some(port);
        }
        if let Some(username) = self.username {
            merged.username = username;
        }
        if let Some(password) = self.password {
            merged.password = password;
        }
        if let Some(database) = self.database {
            merged.database = database;
        }

        validate_connection_fields(
            &merged.name,
            &merged.host,
            &merged.username,
            &merged.password,
            &merged.database,
        )?;
        Ok(merged)
    }
}

fn validate_connection_fields(
    name: &str,
    host: &str,
    username: &str,
    password: &str,
    database: &str,
) -> Result<(), BackupError> {
    let required = [
        ("name", name),
        ("host", host),
        ("username", username),
        ("password", password),
        ("database", database),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| *field)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(BackupError::Validation(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    Full,
    Incremental,
    Differential,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            "differential" => Ok(BackupKind::Differential),
            other => Err(BackupError::Validation(format!(
                "Unsupported backup type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StorageTarget {
    #[default]
    Local,
    AwsS3,
    GoogleCloud,
    AzureBlob,
}

impl StorageTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTarget::Local => "local",
            StorageTarget::AwsS3 => "aws_s3",
            StorageTarget::GoogleCloud => "google_cloud",
            StorageTarget::AzureBlob => "azure_blob",
        }
    }
}

impl fmt::Display for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageTarget {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageTarget::Local),
            "aws_s3" | "s3" => Ok(StorageTarget::AwsS3),
            "google_cloud" | "gcs" => Ok(StorageTarget::GoogleCloud),
            "azure_blob" | "azure" => Ok(StorageTarget::AzureBlob),
            other => Err(BackupError::Validation(format!(
                "Unsupported storage type: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Recurrence of a scheduled backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub frequency: Frequency,
    /// `HH:MM` in UTC, defaults to midnight
    #[schema(example = "02:00")]
    pub time: Option<String>,
    /// 0-6 (0 = Sunday) for weekly, 1-31 for monthly
    pub day: Option<u32>,
    /// Five-field cron expression, required for `custom`
    pub custom_expression: Option<String>,
}

impl Schedule {
    pub fn daily(time: &str) -> Self {
        Self {
            frequency: Frequency::Daily,
            time: Some(time.to_string()),
            day: None,
            custom_expression: None,
        }
    }

    pub fn custom(expression: &str) -> Self {
        Self {
            frequency: Frequency::Custom,
            time: None,
            day: None,
            custom_expression: Some(expression.to_string()),
        }
    }

    /// Validate and compile the schedule
    pub fn validate(&self) -> Result<CronExpression, BackupError> {
        let expression = self.cron_expression()?;
        Ok(CronExpression::parse(&expression)?)
    }

    /// The cron equivalent of this schedule
    pub fn cron_expression(&self) -> Result<String, BackupError> {
        match self.frequency {
            Frequency::Custom => match self.custom_expression.as_deref().map(str::trim) {
                Some(expr) if !expr.is_empty() => Ok(expr.to_string()),
                _ => Err(BackupError::Validation(
                    "customExpression is required for custom schedules".to_string(),
                )),
            },
            Frequency::Daily => {
                let (hour, minute) = self.time_of_day()?;
                Ok(format!("{} {} * * *", minute, hour))
            }
            Frequency::Weekly => {
                let day = self.required_day(0, 6)?;
                let (hour, minute) = self.time_of_day()?;
                Ok(format!("{} {} * * {}", minute, hour, day))
            }
            Frequency::Monthly => {
                let day = self.required_day(1, 31)?;
                let (hour, minute) = self.time_of_day()?;
                Ok(format!("{} {} {} * *", minute, hour, day))
            }
        }
    }

    /// Human readable summary, e.g. "Weekly on Monday at 02:00"
    pub fn describe(&self) -> String {
        let time = self
            .time_of_day()
            .map(|(h, m)| format!("{:02}:{:02}", h, m))
            .unwrap_or_else(|_| "00:00".to_string());
        match self.frequency {
            Frequency::Daily => format!("Daily at {}", time),
            Frequency::Weekly => {
                let day = self
                    .day
                    .and_then(|d| WEEKDAYS.get(d as usize))
                    .copied()
                    .unwrap_or("?");
                format!("Weekly on {} at {}", day, time)
            }
            Frequency::Monthly => match self.day {
                Some(day) => format!("Monthly on day {} at {}", day, time),
                None => format!("Monthly at {}", time),
            },
            Frequency::Custom => format!(
                "Custom: {}",
                self.custom_expression.as_deref().unwrap_or_default()
            ),
        }
    }

    fn time_of_day(&self) -> Result<(u32, u32), BackupError> {
        let raw = match self.time.as_deref().map(str::trim) {
            None | Some("") => return Ok((0, 0)),
            Some(raw) => raw,
        };
        let invalid = || BackupError::Validation(format!("Invalid time '{}', expected HH:MM", raw));

        let (hour, minute) = raw.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok((hour, minute))
    }

    fn required_day(&self, min: u32, max: u32) -> Result<u32, BackupError> {
        match self.day {
            Some(day) if (min..=max).contains(&day) => Ok(day),
            Some(day) => Err(BackupError::Validation(format!(
                "day {} is out of range {}-{} for {} schedules",
                day,
                min,
                max,
                self.frequency_name()
            ))),
            None => Err(BackupError::Validation(format!(
                "day is required for {} schedules",
                self.frequency_name()
            ))),
        }
    }

    fn frequency_name(&self) -> &'static str {
        match self.frequency {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
        }
    }
}

fn default_compress() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(rename = "type", default)]
    pub kind: BackupKind,
    #[serde(default = "default_compress")]
    pub compress: bool,
    #[serde(default)]
    pub storage_type: StorageTarget,
    /// Directory for `local`, `bucket[/prefix]` for object stores
    #[schema(example = "/backups")]
    pub storage_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

impl BackupConfig {
    pub fn new(kind: BackupKind, storage_type: StorageTarget, storage_location: &str) -> Self {
        Self {
            kind,
            compress: true,
            storage_type,
            storage_location: storage_location.to_string(),
            schedule: None,
        }
    }

    pub fn validate(&self) -> Result<(), BackupError> {
        if self.storage_location.trim().is_empty() {
            return Err(BackupError::Validation(
                "storageLocation is required".to_string(),
            ));
        }
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "pending",
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupStatus::Completed | BackupStatus::Failed)
    }

    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (BackupStatus::Pending, BackupStatus::InProgress)
                | (BackupStatus::InProgress, BackupStatus::Completed)
                | (BackupStatus::InProgress, BackupStatus::Failed)
        )
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackupStatus::Pending),
            "in_progress" => Ok(BackupStatus::InProgress),
            "completed" => Ok(BackupStatus::Completed),
            "failed" => Ok(BackupStatus::Failed),
            other => Err(BackupError::Validation(format!(
                "Unknown backup status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BackupLog {
    #[schema(value_type = String)]
    pub timestamp: UtcDateTime,
    pub level: LogLevel,
    pub message: String,
}

/// Restorable items inside a backup artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub engine: EngineType,
    pub database: String,
    pub compressed: bool,
    /// Tables or collections, sorted
    pub items: Vec<String>,
}

impl BackupManifest {
    pub fn contains(&self, item: &str) -> bool {
        self.items.iter().any(|i| i == item)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: String,
    pub connection_id: String,
    pub name: String,
    pub config: BackupConfig,
    pub status: BackupStatus,
    #[schema(value_type = String)]
    pub start_time: UtcDateTime,
    #[schema(value_type = Option<String>)]
    pub end_time: Option<UtcDateTime>,
    pub size: Option<u64>,
    pub path: Option<String>,
    pub error: Option<String>,
    pub logs: Vec<BackupLog>,
    /// Scheduled job that triggered the run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<BackupManifest>,
}

impl Backup {
    pub fn new_pending(
        id: String,
        connection: &DatabaseConnection,
        config: BackupConfig,
        now: UtcDateTime,
    ) -> Self {
        Self {
            id,
            connection_id: connection.id.clone(),
            name: backup_name(&connection.name, now),
            config,
            status: BackupStatus::Pending,
            start_time: now,
            end_time: None,
            size: None,
            path: None,
            error: None,
            logs: Vec::new(),
            schedule_id: None,
            manifest: None,
        }
    }

    pub fn transition(&mut self, next: BackupStatus) -> Result<(), BackupError> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::Internal(format!(
                "backup {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Append a log entry. Timestamps never go backwards.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, at: UtcDateTime) {
        let timestamp = match self.logs.last() {
            Some(last) if last.timestamp > at => last.timestamp,
            _ => at,
        };
        self.logs.push(BackupLog {
            timestamp,
            level,
            message: message.into(),
        });
    }

    pub fn complete(&mut self, artifact: BackupArtifact, at: UtcDateTime) -> Result<(), BackupError> {
        self.transition(BackupStatus::Completed)?;
        self.end_time = Some(at);
        self.size = Some(artifact.size_bytes);
        self.path = Some(artifact.storage_path);
        self.manifest = Some(artifact.manifest);
        self.log(
            LogLevel::Info,
            format!(
                "Backup completed successfully. Size: {}",
                format_file_size(artifact.size_bytes)
            ),
            at,
        );
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, at: UtcDateTime) -> Result<(), BackupError> {
        let message = message.into();
        self.transition(BackupStatus::Failed)?;
        self.end_time = Some(at);
        self.error = Some(message.clone());
        self.log(LogLevel::Error, message, at);
        Ok(())
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// `Backup_<connection>_<ISO-8601 start>` with colons replaced so the name is
/// usable as a file name
pub fn backup_name(connection_name: &str, at: UtcDateTime) -> String {
    format!(
        "Backup_{}_{}",
        connection_name,
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace(':', "-")
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOptions {
    /// Replace all existing data before restoring
    #[serde(default)]
    pub drop_existing: bool,
    #[serde(default)]
    pub selective_restore: bool,
    /// Items to restore when `selectiveRestore` is set
    #[serde(default)]
    pub items: Vec<String>,
}

impl RestoreOptions {
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.selective_restore && self.items.is_empty() {
            return Err(BackupError::Validation(
                "selective restore requires at least one item".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a connection test or restore as presented to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: u64,
    pub connection_id: String,
    pub config: BackupConfig,
    /// Effective cron expression
    pub cron: String,
    pub description: String,
    #[schema(value_type = Option<String>)]
    pub next_fire: Option<UtcDateTime>,
    pub enabled: bool,
    #[schema(value_type = Option<String>)]
    pub last_fired_at: Option<UtcDateTime>,
    /// Set when the last tick could not start a run
    pub last_error: Option<String>,
    #[schema(value_type = String)]
    pub created_at: UtcDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub total_backups: usize,
    #[schema(value_type = Option<String>)]
    pub last_backup_date: Option<UtcDateTime>,
    /// Bytes
    pub total_backup_size: u64,
    /// Bytes
    pub average_backup_size: u64,
    /// Seconds
    pub average_backup_time: u64,
}

impl ConnectionStats {
    /// Aggregate over the completed backups in `backups`
    pub fn from_backups<'a>(backups: impl IntoIterator<Item = &'a Backup>) -> Self {
        let completed: Vec<&Backup> = backups
            .into_iter()
            .filter(|b| b.status == BackupStatus::Completed)
            .collect();
        if completed.is_empty() {
            return Self::default();
        }

        let count = completed.len() as u64;
        let total_backup_size: u64 = completed.iter().filter_map(|b| b.size).sum();
        let total_secs: i64 = completed
            .iter()
            .filter_map(|b| b.duration())
            .map(|d| d.num_seconds().max(0))
            .sum();

        Self {
            total_backups: completed.len(),
            last_backup_date: completed.iter().filter_map(|b| b.end_time).max(),
            total_backup_size,
            average_backup_size: total_backup_size / count,
            average_backup_time: total_secs as u64 / count,
        }
    }
}

/// Criteria for listing backups; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFilter {
    pub status: Option<BackupStatus>,
    pub connection_id: Option<String>,
    /// Case-insensitive substring of the backup name
    pub name: Option<String>,
}

impl BackupFilter {
    pub fn for_connection(connection_id: &str) -> Self {
        Self {
            connection_id: Some(connection_id.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, backup: &Backup) -> bool {
        if let Some(status) = self.status {
            if backup.status != status {
                return false;
            }
        }
        if let Some(connection_id) = &self.connection_id {
            if &backup.connection_id != connection_id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !backup
                .name
                .to_lowercase()
                .contains(&name.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}
