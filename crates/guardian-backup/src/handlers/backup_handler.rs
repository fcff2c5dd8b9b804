use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use guardian_core::problemdetails;
use guardian_core::problemdetails::{Problem, ProblemDetails};
use serde::Deserialize;
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::error::{BackupError, EngineError};
use crate::handlers::types::BackupAppState;
use crate::models::{
    Backup, BackupConfig, BackupFilter, BackupKind, BackupLog, BackupManifest, BackupStatus,
    ConnectionStats, ConnectionStatus, ConnectionUpdate, DatabaseConnection, EngineType,
    Frequency, LogLevel, NewConnection, OperationOutcome, RestoreOptions, Schedule,
    ScheduledJob, StorageTarget,
};

impl From<BackupError> for Problem {
    fn from(error: BackupError) -> Self {
        let kind = error.kind();
        let problem = match &error {
            BackupError::Validation(_) => problemdetails::new(StatusCode::BAD_REQUEST)
                .with_title("Validation Error"),

            BackupError::NotFound(_) => problemdetails::new(StatusCode::NOT_FOUND)
                .with_title("Resource Not Found"),

            BackupError::Conflict(_) => problemdetails::new(StatusCode::CONFLICT)
                .with_title("Conflict"),

            BackupError::Engine(EngineError::Timeout) => {
                problemdetails::new(StatusCode::GATEWAY_TIMEOUT).with_title("Operation Timed Out")
            }

            BackupError::Engine(_) => {
                problemdetails::new(StatusCode::BAD_GATEWAY).with_title("Database Engine Error")
            }

            BackupError::Internal(msg) => {
                error!("Internal error: {}", msg);
                problemdetails::new(StatusCode::INTERNAL_SERVER_ERROR)
                    .with_title("Internal Server Error")
            }
        };
        problem.with_detail(error.message()).with_kind(kind.as_str())
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        list_connections,
        create_connection,
        get_connection,
        update_connection,
        delete_connection,
        test_connection,
        get_connection_stats,
        start_backup,
        list_backups,
        get_backup,
        delete_backup,
        cancel_backup,
        restore_backup,
        cancel_restore,
        list_schedules,
        create_schedule,
        get_schedule,
        delete_schedule,
        enable_schedule,
        disable_schedule
    ),
    components(
        schemas(
            DatabaseConnection,
            NewConnection,
            ConnectionUpdate,
            ConnectionStatus,
            ConnectionStats,
            EngineType,
            BackupConfig,
            BackupKind,
            StorageTarget,
            Schedule,
            Frequency,
            Backup,
            BackupStatus,
            BackupLog,
            LogLevel,
            BackupManifest,
            ScheduledJob,
            OperationOutcome,
            RestoreRequest,
            CreateScheduleRequest,
            ProblemDetails,
        )
    ),
    info(
        title = "Database Guardian API",
        description = "Manage database connections, run and restore backups, \
        and schedule recurring backups.",
        version = "1.0.0"
    ),
    tags(
        (name = "Connections", description = "Database connection management"),
        (name = "Backups", description = "Backup and restore operations"),
        (name = "Schedules", description = "Recurring backup schedules")
    )
)]
pub struct BackupApiDoc;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TimeoutQuery {
    /// Engine timeout for this run in seconds
    pub timeout_secs: Option<u64>,
}

/// `0` means no per-run limit, leaving the service default in place
fn run_timeout(timeout_secs: Option<u64>) -> Option<Duration> {
    timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListBackupsQuery {
    pub status: Option<BackupStatus>,
    pub connection_id: Option<String>,
    /// Substring of the backup name
    pub name: Option<String>,
}

impl From<ListBackupsQuery> for BackupFilter {
    fn from(query: ListBackupsQuery) -> Self {
        Self {
            status: query.status,
            connection_id: query.connection_id,
            name: query.name.filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    /// Target connection; defaults to the connection the backup was taken from
    pub connection_id: Option<String>,
    #[serde(default)]
    pub drop_existing: bool,
    #[serde(default)]
    pub selective_restore: bool,
    #[serde(default)]
    pub items: Vec<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateScheduleRequest {
    /// Five-field cron expression; overrides `config.schedule` when set
    #[schema(example = "0 2 * * *")]
    pub cron: Option<String>,
    pub connection_id: String,
    pub config: BackupConfig,
}

/// List all connections
#[utoipa::path(
    tag = "Connections",
    get,
    path = "/connections",
    responses(
        (status = 200, description = "All connections, oldest first", body = Vec<DatabaseConnection>),
        (status = 500, description = "Internal server error", body = ProblemDetails)
    )
)]
async fn list_connections(
    State(app_state): State<Arc<BackupAppState>>,
) -> Result<impl IntoResponse, Problem> {
    let connections = app_state.backup_service.list_connections()?;
    Ok(Json(connections))
}

/// Register a connection
///
/// The connection is tested once; it is stored as `connected` when the test
/// succeeds and `disconnected` otherwise.
#[utoipa::path(
    tag = "Connections",
    post,
    path = "/connections",
    request_body = NewConnection,
    responses(
        (status = 201, description = "Connection registered", body = DatabaseConnection),
        (status = 400, description = "Missing required fields", body = ProblemDetails)
    )
)]
async fn create_connection(
    State(app_state): State<Arc<BackupAppState>>,
    Json(request): Json<NewConnection>,
) -> Result<impl IntoResponse, Problem> {
    let connection = app_state.backup_service.create_connection(request).await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

/// Get a connection
#[utoipa::path(
    tag = "Connections",
    get,
    path = "/connections/{id}",
    params(("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "Connection details", body = DatabaseConnection),
        (status = 404, description = "Connection not found", body = ProblemDetails)
    )
)]
async fn get_connection(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let connection = app_state.backup_service.get_connection(&id)?;
    Ok(Json(connection))
}

/// Update a connection
#[utoipa::path(
    tag = "Connections",
    patch,
    path = "/connections/{id}",
    params(("id" = String, Path, description = "Connection ID")),
    request_body = ConnectionUpdate,
    responses(
        (status = 200, description = "Updated connection", body = DatabaseConnection),
        (status = 400, description = "Invalid update", body = ProblemDetails),
        (status = 404, description = "Connection not found", body = ProblemDetails)
    )
)]
async fn update_connection(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
    Json(request): Json<ConnectionUpdate>,
) -> Result<impl IntoResponse, Problem> {
    let connection = app_state.backup_service.update_connection(&id, request)?;
    Ok(Json(connection))
}

/// Delete a connection
///
/// Backups taken from the connection are kept.
#[utoipa::path(
    tag = "Connections",
    delete,
    path = "/connections/{id}",
    params(("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 204, description = "Connection deleted"),
        (status = 404, description = "Connection not found", body = ProblemDetails)
    )
)]
async fn delete_connection(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    app_state.backup_service.delete_connection(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Test a connection and store the resulting status
#[utoipa::path(
    tag = "Connections",
    post,
    path = "/connections/{id}/test",
    params(("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "Test outcome", body = OperationOutcome),
        (status = 404, description = "Connection not found", body = ProblemDetails)
    )
)]
async fn test_connection(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let outcome = app_state.backup_service.test_connection(&id).await?;
    Ok(Json(outcome))
}

/// Backup statistics for a connection
#[utoipa::path(
    tag = "Connections",
    get,
    path = "/connections/{id}/stats",
    params(("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "Statistics over completed backups", body = ConnectionStats),
        (status = 404, description = "Connection not found", body = ProblemDetails)
    )
)]
async fn get_connection_stats(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let stats = app_state.backup_service.connection_stats(&id).await?;
    Ok(Json(stats))
}

/// Start a backup
///
/// Returns as soon as the run is `in_progress`; poll the backup for its
/// terminal state.
#[utoipa::path(
    tag = "Backups",
    post,
    path = "/connections/{id}/backups",
    params(("id" = String, Path, description = "Connection ID"), TimeoutQuery),
    request_body = BackupConfig,
    responses(
        (status = 202, description = "Backup started", body = Backup),
        (status = 400, description = "Invalid configuration", body = ProblemDetails),
        (status = 404, description = "Connection not found", body = ProblemDetails),
        (status = 409, description = "Connection already has an active job", body = ProblemDetails)
    )
)]
async fn start_backup(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
    Query(query): Query<TimeoutQuery>,
    Json(config): Json<BackupConfig>,
) -> Result<impl IntoResponse, Problem> {
    let service = &app_state.backup_service;
    let handle = service
        .start_backup(&id, config, run_timeout(query.timeout_secs))
        .await?;
    let backup = service.get_backup(&handle.backup_id).await?;
    Ok((StatusCode::ACCEPTED, Json(backup)))
}

/// List backups
#[utoipa::path(
    tag = "Backups",
    get,
    path = "/backups",
    params(ListBackupsQuery),
    responses(
        (status = 200, description = "Matching backups, newest first", body = Vec<Backup>)
    )
)]
async fn list_backups(
    State(app_state): State<Arc<BackupAppState>>,
    Query(query): Query<ListBackupsQuery>,
) -> Result<impl IntoResponse, Problem> {
    let backups = app_state
        .backup_service
        .list_backups(&BackupFilter::from(query))
        .await?;
    Ok(Json(backups))
}

/// Get a backup with its log
#[utoipa::path(
    tag = "Backups",
    get,
    path = "/backups/{id}",
    params(("id" = String, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Backup details", body = Backup),
        (status = 404, description = "Backup not found", body = ProblemDetails)
    )
)]
async fn get_backup(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    let backup = app_state.backup_service.get_backup(&id).await?;
    Ok(Json(backup))
}

/// Delete a backup record
#[utoipa::path(
    tag = "Backups",
    delete,
    path = "/backups/{id}",
    params(("id" = String, Path, description = "Backup ID")),
    responses(
        (status = 204, description = "Backup deleted"),
        (status = 404, description = "Backup not found", body = ProblemDetails),
        (status = 409, description = "Backup is still running", body = ProblemDetails)
    )
)]
async fn delete_backup(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    app_state.backup_service.delete_backup(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cancel a running backup
#[utoipa::path(
    tag = "Backups",
    post,
    path = "/backups/{id}/cancel",
    params(("id" = String, Path, description = "Backup ID")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Backup not found", body = ProblemDetails),
        (status = 409, description = "Backup is not running", body = ProblemDetails)
    )
)]
async fn cancel_backup(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    app_state.backup_service.cancel_backup(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Restore a completed backup
#[utoipa::path(
    tag = "Backups",
    post,
    path = "/backups/{id}/restore",
    params(("id" = String, Path, description = "Backup ID")),
    request_body = RestoreRequest,
    responses(
        (status = 200, description = "Backup restored", body = OperationOutcome),
        (status = 400, description = "Backup cannot be restored with these options", body = ProblemDetails),
        (status = 404, description = "Backup or connection not found", body = ProblemDetails),
        (status = 409, description = "Connection already has an active job", body = ProblemDetails),
        (status = 502, description = "Restore failed in the database engine", body = ProblemDetails),
        (status = 504, description = "Restore timed out", body = ProblemDetails)
    )
)]
async fn restore_backup(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
    Json(request): Json<RestoreRequest>,
) -> Result<impl IntoResponse, Problem> {
    let options = RestoreOptions {
        drop_existing: request.drop_existing,
        selective_restore: request.selective_restore,
        items: request.items,
    };
    let outcome = app_state
        .backup_service
        .restore_backup(
            &id,
            request.connection_id.as_deref(),
            options,
            run_timeout(request.timeout_secs),
        )
        .await?;
    Ok(Json(outcome))
}

/// Cancel the restore running on a connection
#[utoipa::path(
    tag = "Backups",
    post,
    path = "/connections/{id}/restore/cancel",
    params(("id" = String, Path, description = "Connection ID")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Connection not found", body = ProblemDetails),
        (status = 409, description = "No restore is running on the connection", body = ProblemDetails)
    )
)]
async fn cancel_restore(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Problem> {
    app_state.backup_service.cancel_restore(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// List scheduled jobs
#[utoipa::path(
    tag = "Schedules",
    get,
    path = "/schedules",
    responses(
        (status = 200, description = "Scheduled jobs in creation order", body = Vec<ScheduledJob>)
    )
)]
async fn list_schedules(
    State(app_state): State<Arc<BackupAppState>>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.backup_service.list_schedules()))
}

/// Schedule a recurring backup
#[utoipa::path(
    tag = "Schedules",
    post,
    path = "/schedules",
    request_body = CreateScheduleRequest,
    responses(
        (status = 201, description = "Job scheduled", body = ScheduledJob),
        (status = 400, description = "Invalid schedule or cron expression", body = ProblemDetails),
        (status = 404, description = "Connection not found", body = ProblemDetails)
    )
)]
async fn create_schedule(
    State(app_state): State<Arc<BackupAppState>>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<impl IntoResponse, Problem> {
    let job = app_state.backup_service.schedule_backup(
        &request.connection_id,
        request.cron.as_deref(),
        request.config,
    )?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Get a scheduled job
#[utoipa::path(
    tag = "Schedules",
    get,
    path = "/schedules/{id}",
    params(("id" = u64, Path, description = "Scheduled job ID")),
    responses(
        (status = 200, description = "Scheduled job", body = ScheduledJob),
        (status = 404, description = "Job not found", body = ProblemDetails)
    )
)]
async fn get_schedule(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.backup_service.get_schedule(id)?))
}

/// Remove a scheduled job
#[utoipa::path(
    tag = "Schedules",
    delete,
    path = "/schedules/{id}",
    params(("id" = u64, Path, description = "Scheduled job ID")),
    responses(
        (status = 204, description = "Job removed"),
        (status = 404, description = "Job not found", body = ProblemDetails)
    )
)]
async fn delete_schedule(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, Problem> {
    app_state.backup_service.unschedule(id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Enable a scheduled job
#[utoipa::path(
    tag = "Schedules",
    patch,
    path = "/schedules/{id}/enable",
    params(("id" = u64, Path, description = "Scheduled job ID")),
    responses(
        (status = 200, description = "Job enabled", body = ScheduledJob),
        (status = 404, description = "Job not found", body = ProblemDetails)
    )
)]
async fn enable_schedule(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.backup_service.enable_schedule(id)?))
}

/// Disable a scheduled job
#[utoipa::path(
    tag = "Schedules",
    patch,
    path = "/schedules/{id}/disable",
    params(("id" = u64, Path, description = "Scheduled job ID")),
    responses(
        (status = 200, description = "Job disabled", body = ScheduledJob),
        (status = 404, description = "Job not found", body = ProblemDetails)
    )
)]
async fn disable_schedule(
    State(app_state): State<Arc<BackupAppState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, Problem> {
    Ok(Json(app_state.backup_service.disable_schedule(id)?))
}

async fn openapi_document() -> impl IntoResponse {
    Json(BackupApiDoc::openapi())
}

pub fn configure_routes() -> Router<Arc<BackupAppState>> {
    Router::new()
        .route(
            "/connections",
            get(list_connections).post(create_connection),
        )
        .route(
            "/connections/{id}",
            get(get_connection)
                .patch(update_connection)
                .delete(delete_connection),
        )
        .route("/connections/{id}/test", post(test_connection))
        .route("/connections/{id}/stats", get(get_connection_stats))
        .route("/connections/{id}/backups", post(start_backup))
        .route("/connections/{id}/restore/cancel", post(cancel_restore))
        .route("/backups", get(list_backups))
        .route("/backups/{id}", get(get_backup).delete(delete_backup))
        .route("/backups/{id}/cancel", post(cancel_backup))
        .route("/backups/{id}/restore", post(restore_backup))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/{id}", get(get_schedule).delete(delete_schedule))
        .route("/schedules/{id}/enable", patch(enable_schedule))
        .route("/schedules/{id}/disable", patch(disable_schedule))
        .route("/openapi.json", get(openapi_document))
}
