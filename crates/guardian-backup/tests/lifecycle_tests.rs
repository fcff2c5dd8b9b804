mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{local_config, postgres, service, Script, ARTIFACT_SIZE};
use guardian_backup::models::{
    BackupFilter, BackupStatus, ConnectionStatus, LogLevel, RestoreOptions,
};
use guardian_backup::services::{JobOperation, RESTORE_OK_MESSAGE};
use guardian_backup::{BackupError, BackupService, EngineError, ErrorKind};

#[tokio::test]
async fn test_backup_runs_to_completion() {
    let (service, _engine) = service();
    let conn = service.create_connection(postgres("orders-prod")).await.unwrap();
    assert_eq!(conn.status, ConnectionStatus::Connected);

    let handle = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    let backup = handle.wait().await.unwrap();

    assert_eq!(backup.status, BackupStatus::Completed);
    assert_eq!(backup.size, Some(ARTIFACT_SIZE));
    assert_eq!(backup.path.as_deref(), Some("/var/backups/orders.dump"));
    assert!(backup.name.starts_with("Backup_orders-prod_"));
    assert!(backup.end_time.unwrap() >= backup.start_time);
    assert!(backup.error.is_none());

    let messages: Vec<&str> = backup.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages[0], "Starting backup process...");
    assert_eq!(
        messages[1],
        "Connected to postgresql database at db.internal:5432"
    );
    assert!(messages
        .last()
        .unwrap()
        .starts_with("Backup completed successfully. Size: "));
    assert!(backup
        .logs
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));

    let stored = service.get_backup(&backup.id).await.unwrap();
    assert_eq!(stored, backup);

    let conn = service.get_connection(&conn.id).unwrap();
    assert_eq!(conn.last_backup_at, backup.end_time);
    assert_eq!(conn.status, ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_second_run_on_busy_connection_conflicts() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("busy")).await.unwrap();
    engine.set_backup(Script::Hang);

    let running = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    let in_flight = service.get_backup(&running.backup_id).await.unwrap();
    assert_eq!(in_flight.status, BackupStatus::InProgress);

    let err = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);

    let restore = service
        .restore_backup(&running.backup_id, None, RestoreOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(restore.kind(), ErrorKind::ValidationError);

    // Only the first run was recorded
    let all = service.list_backups(&BackupFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);

    running.cancel();
    running.wait().await.unwrap();
}

#[tokio::test]
async fn test_cancel_fails_run_and_frees_connection() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("cancel-me")).await.unwrap();
    engine.set_backup(Script::Hang);

    let handle = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    let backup_id = handle.backup_id.clone();

    let err = service.delete_backup(&backup_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);

    service.cancel_backup(&backup_id).await.unwrap();
    let backup = handle.wait().await.unwrap();
    assert_eq!(backup.status, BackupStatus::Failed);
    assert_eq!(backup.error.as_deref(), Some("cancelled by user"));
    let last = backup.logs.last().unwrap();
    assert_eq!(last.level, LogLevel::Error);
    assert_eq!(last.message, "cancelled by user");

    let conn_after = service.get_connection(&conn.id).unwrap();
    assert_eq!(conn_after.status, ConnectionStatus::Error);
    assert_eq!(conn_after.error.as_deref(), Some("cancelled by user"));
    assert!(conn_after.last_backup_at.is_none());

    let again = service.cancel_backup(&backup_id).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::ConflictError);

    engine.set_backup(Script::Succeed);
    let next = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    assert_eq!(next.wait().await.unwrap().status, BackupStatus::Completed);
}

#[tokio::test]
async fn test_timeout_fails_run() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("slow")).await.unwrap();
    engine.set_backup(Script::Hang);

    let handle = service
        .start_backup(&conn.id, local_config(), Some(Duration::from_millis(50)))
        .await
        .unwrap();
    let backup = handle.wait().await.unwrap();

    assert_eq!(backup.status, BackupStatus::Failed);
    assert_eq!(backup.error.as_deref(), Some("operation timed out"));
    assert!(service.runner().active_operation(&conn.id).is_none());
}

#[tokio::test]
async fn test_engine_failure_recorded_on_backup_and_connection() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("bad-auth")).await.unwrap();
    engine.set_backup(Script::Fail(EngineError::Authentication(
        "password authentication failed for user \"app\"".to_string(),
    )));

    let handle = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    let backup = handle.wait().await.unwrap();

    assert_eq!(backup.status, BackupStatus::Failed);
    assert_eq!(
        backup.error.as_deref(),
        Some("password authentication failed for user \"app\"")
    );
    assert!(backup.size.is_none());
    assert!(backup.path.is_none());

    let conn = service.get_connection(&conn.id).unwrap();
    assert_eq!(conn.status, ConnectionStatus::Error);
    assert!(conn.last_backup_at.is_none());
}

#[tokio::test]
async fn test_panicking_engine_fails_run() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("panics")).await.unwrap();
    engine.set_backup(Script::Panic);

    let handle = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    let backup = handle.wait().await.unwrap();

    assert_eq!(backup.status, BackupStatus::Failed);
    assert!(backup.error.unwrap().contains("engine exploded"));
    assert!(service.runner().active_operation(&conn.id).is_none());
}

#[tokio::test]
async fn test_start_rejects_invalid_requests() {
    let (service, _engine) = service();
    let missing = service
        .start_backup("nope", local_config(), None)
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFoundError);

    let conn = service.create_connection(postgres("x")).await.unwrap();
    let mut config = local_config();
    config.storage_location = "  ".to_string();
    let invalid = service
        .start_backup(&conn.id, config, None)
        .await
        .unwrap_err();
    assert_eq!(invalid.kind(), ErrorKind::ValidationError);

    assert!(service
        .list_backups(&BackupFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_restore_completed_backup() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("restore")).await.unwrap();
    let backup = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let options = RestoreOptions {
        drop_existing: true,
        selective_restore: true,
        items: vec!["public.orders".to_string()],
    };
    let outcome = service
        .restore_backup(&backup.id, None, options.clone(), None)
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.message, RESTORE_OK_MESSAGE);

    let restores = engine.restores.lock().unwrap().clone();
    assert_eq!(restores, vec![(backup.id.clone(), options)]);

    // The record itself is untouched by a restore
    assert_eq!(service.get_backup(&backup.id).await.unwrap(), backup);
}

#[tokio::test]
async fn test_restore_validation() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("restore")).await.unwrap();
    let backup = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let unknown = service
        .restore_backup("missing", Some(conn.id.as_str()), RestoreOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFoundError);

    let no_items = RestoreOptions {
        selective_restore: true,
        ..RestoreOptions::default()
    };
    let err = service
        .restore_backup(&backup.id, None, no_items, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let absent = RestoreOptions {
        selective_restore: true,
        items: vec!["public.orders".to_string(), "public.invoices".to_string()],
        ..RestoreOptions::default()
    };
    let err = service
        .restore_backup(&backup.id, None, absent, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineError);
    assert!(err.message().contains("public.invoices"));
    assert!(!err.message().contains("public.orders"));

    let mut mysql = postgres("other-engine");
    mysql.engine = guardian_backup::models::EngineType::Mysql;
    let other = service.create_connection(mysql).await.unwrap();
    let err = service
        .restore_backup(&backup.id, Some(other.id.as_str()), RestoreOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    assert_eq!(engine.restore_count(), 0);
}

#[tokio::test]
async fn test_restore_engine_failure_is_an_error() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("restore")).await.unwrap();
    let backup = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    engine.fail_restores_with(EngineError::Artifact(
        "Backup file not found: /var/backups/orders.dump".to_string(),
    ));

    let err = service
        .restore_backup(&backup.id, None, RestoreOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BackupError::Engine(EngineError::Artifact(
            "Backup file not found: /var/backups/orders.dump".to_string()
        ))
    );
    assert!(service.runner().active_operation(&conn.id).is_none());
}

async fn wait_for_operation(service: &BackupService, connection_id: &str, operation: JobOperation) {
    for _ in 0..200 {
        if service.runner().active_operation(connection_id) == Some(operation) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{} never started on {}", operation, connection_id);
}

#[tokio::test]
async fn test_running_restore_can_be_cancelled() {
    let (service, engine) = service();
    let service = Arc::new(service);
    let conn = service.create_connection(postgres("restore")).await.unwrap();
    let backup = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let idle = service.cancel_restore(&conn.id).await.unwrap_err();
    assert_eq!(idle.kind(), ErrorKind::ConflictError);
    let missing = service.cancel_restore("missing").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFoundError);

    engine.hang_restores(true);
    let restore = {
        let service = service.clone();
        let backup_id = backup.id.clone();
        tokio::spawn(async move {
            service
                .restore_backup(&backup_id, None, RestoreOptions::default(), None)
                .await
        })
    };
    wait_for_operation(&service, &conn.id, JobOperation::Restore).await;

    // The restore is not a backup run
    let err = service.cancel_backup(&backup.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);

    service.cancel_restore(&conn.id).await.unwrap();
    let err = restore.await.unwrap().unwrap_err();
    assert_eq!(err, BackupError::Engine(EngineError::Cancelled));
    assert_eq!(err.message(), "cancelled by user");
    assert!(service.runner().active_operation(&conn.id).is_none());

    // Restores never touch the backup record or the connection status
    assert_eq!(service.get_backup(&backup.id).await.unwrap(), backup);
    assert_eq!(
        service.get_connection(&conn.id).unwrap().status,
        ConnectionStatus::Connected
    );

    engine.hang_restores(false);
    let outcome = service
        .restore_backup(&backup.id, None, RestoreOptions::default(), None)
        .await
        .unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_backup_during_restore_conflicts() {
    let (service, engine) = service();
    let service = Arc::new(service);
    let conn = service.create_connection(postgres("restore")).await.unwrap();
    let backup = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    engine.hang_restores(true);
    let restore = {
        let service = service.clone();
        let backup_id = backup.id.clone();
        tokio::spawn(async move {
            service
                .restore_backup(&backup_id, None, RestoreOptions::default(), None)
                .await
        })
    };
    wait_for_operation(&service, &conn.id, JobOperation::Restore).await;

    let err = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);
    let all = service.list_backups(&BackupFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);

    service.cancel_restore(&conn.id).await.unwrap();
    assert!(restore.await.unwrap().is_err());
    assert!(service.runner().active_operation(&conn.id).is_none());
}

#[tokio::test]
async fn test_restore_during_backup_conflicts() {
    let (service, engine) = service();
    let conn = service.create_connection(postgres("restore")).await.unwrap();
    let completed = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    engine.set_backup(Script::Hang);
    let running = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap();
    assert_eq!(
        service.runner().active_operation(&conn.id),
        Some(JobOperation::Backup)
    );

    let err = service
        .restore_backup(&completed.id, None, RestoreOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);
    assert_eq!(engine.restore_count(), 0);

    // A backup run is not cancelled through the restore path
    let err = service.cancel_restore(&conn.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictError);

    running.cancel();
    assert_eq!(running.wait().await.unwrap().status, BackupStatus::Failed);
}

#[tokio::test]
async fn test_deleting_connection_keeps_backups() {
    let (service, _engine) = service();
    let conn = service.create_connection(postgres("retired")).await.unwrap();
    let backup = service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    service.delete_connection(&conn.id).unwrap();
    assert_eq!(
        service.get_connection(&conn.id).unwrap_err().kind(),
        ErrorKind::NotFoundError
    );

    let kept = service
        .list_backups(&BackupFilter::for_connection(&conn.id))
        .await
        .unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].id, backup.id);

    let err = service
        .restore_backup(&backup.id, None, RestoreOptions::default(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundError);
}

#[tokio::test]
async fn test_connection_test_updates_status() {
    let (service, engine) = service();
    engine.set_reachable(false);
    let conn = service.create_connection(postgres("flaky")).await.unwrap();
    assert_eq!(conn.status, ConnectionStatus::Disconnected);
    assert!(conn.error.is_some());

    engine.set_reachable(true);
    let outcome = service.test_connection(&conn.id).await.unwrap();
    assert!(outcome.success);
    let conn_now = service.get_connection(&conn.id).unwrap();
    assert_eq!(conn_now.status, ConnectionStatus::Connected);
    assert!(conn_now.error.is_none());

    engine.set_reachable(false);
    let outcome = service.test_connection(&conn.id).await.unwrap();
    assert!(!outcome.success);
    let conn_now = service.get_connection(&conn.id).unwrap();
    assert_eq!(conn_now.status, ConnectionStatus::Disconnected);
    assert_eq!(conn_now.error.as_deref(), Some(outcome.message.as_str()));
}

#[tokio::test]
async fn test_stats_and_filters() {
    let (service, engine) = service();
    let orders = service.create_connection(postgres("orders")).await.unwrap();
    let users = service.create_connection(postgres("users")).await.unwrap();

    for _ in 0..2 {
        service
            .start_backup(&orders.id, local_config(), None)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
    }
    engine.set_backup(Script::Fail(EngineError::Connection("refused".to_string())));
    service
        .start_backup(&orders.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    engine.set_backup(Script::Succeed);
    service
        .start_backup(&users.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let stats = service.connection_stats(&orders.id).await.unwrap();
    assert_eq!(stats.total_backups, 2);
    assert_eq!(stats.total_backup_size, 2 * ARTIFACT_SIZE);
    assert_eq!(stats.average_backup_size, ARTIFACT_SIZE);
    assert!(stats.last_backup_date.is_some());

    let failed = service
        .list_backups(&BackupFilter {
            status: Some(BackupStatus::Failed),
            ..BackupFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].connection_id, orders.id);

    let by_name = service
        .list_backups(&BackupFilter {
            name: Some("USERS".to_string()),
            ..BackupFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_name.len(), 1);

    let all = service.list_backups(&BackupFilter::default()).await.unwrap();
    assert_eq!(all.len(), 4);
    assert!(all
        .windows(2)
        .all(|pair| pair[0].start_time >= pair[1].start_time));
}

#[tokio::test]
async fn test_cleanup_removes_only_expired_backups() {
    let (service, _engine) = service();
    let conn = service.create_connection(postgres("cleanup")).await.unwrap();
    service
        .start_backup(&conn.id, local_config(), None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(service.cleanup_old_backups(30).await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(service.cleanup_old_backups(0).await.unwrap(), 1);
    assert!(service
        .list_backups(&BackupFilter::default())
        .await
        .unwrap()
        .is_empty());
}
