mod common;

use std::time::Duration;

use common::{harness, harness_with, test_settings, TestBehavior, ScriptedConnector};
use datasource_hub::models::{DataSourceStatus, SyncLog};
use datasource_hub::utils::datasource::ConnectorError;
use datasource_hub::AppError;

async fn run_sync(h: &common::Harness, id: uuid::Uuid) -> SyncLog {
    let ticket = h.service.start_sync(id).await.unwrap();
    ticket.handle.await.unwrap().expect("sync log written")
}

#[tokio::test]
async fn recovered_batch_failures_still_succeed() {
    let h = harness(ScriptedConnector::healthy(1000));
    let ds = h.connected("orders").await;
    h.connector.fail_next_reads([
        ConnectorError::Protocol("HTTP 503".into()),
        ConnectorError::Network("connection reset".into()),
    ]);

    let log = run_sync(&h, ds.id).await;
    assert!(log.success);
    assert_eq!(log.records_sync, 1000);
    assert_eq!(log.failed_batches, 0);
    assert!(log.error_message.is_none());

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.total_syncs, ds.total_syncs + 1);
    assert_eq!(after.failed_syncs, ds.failed_syncs);
    assert_eq!(after.total_records, 1000);
    assert_eq!(after.status, DataSourceStatus::Connected);
    assert!(after.last_successful_sync.is_some());
}

#[tokio::test]
async fn skipped_batch_is_reported_on_a_successful_run() {
    let h = harness(ScriptedConnector::healthy(300));
    let ds = h.connected("orders").await;
    h.connector
        .fail_next_reads([ConnectorError::Query("HTTP 400: bad page".into())]);

    let log = run_sync(&h, ds.id).await;
    assert!(log.success);
    assert_eq!(log.failed_batches, 1);
    assert_eq!(log.records_sync, 200);
    assert!(log.error_message.unwrap().contains("skipped"));
}

#[tokio::test]
async fn three_consecutive_failed_batches_abort_the_run() {
    let h = harness(ScriptedConnector::healthy(1000));
    let ds = h.connected("orders").await;
    h.connector.fail_next_reads([
        ConnectorError::Query("bad page".into()),
        ConnectorError::Query("bad page".into()),
        ConnectorError::Query("bad page".into()),
    ]);

    let log = run_sync(&h, ds.id).await;
    assert!(!log.success);
    assert_eq!(log.failed_batches, 3);
    assert_eq!(log.records_sync, 0);

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.failed_syncs, 1);
    assert_eq!(after.status, DataSourceStatus::Error);
    assert!(after.connection_error.unwrap().contains("consecutive"));
}

#[tokio::test]
async fn revoked_credentials_abort_immediately() {
    let h = harness(ScriptedConnector::healthy(1000));
    let ds = h.connected("orders").await;
    h.connector
        .fail_next_reads([ConnectorError::Auth("token revoked".into())]);

    let log = run_sync(&h, ds.id).await;
    assert!(!log.success);
    assert_eq!(h.connector.reads(), 1);

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.status, DataSourceStatus::Error);
    assert!(after.connection_error.unwrap().contains("auth"));
}

#[tokio::test]
async fn failed_preflight_test_fails_the_sync() {
    let h = harness(ScriptedConnector::healthy(100));
    let ds = h.connected("orders").await;
    h.connector
        .set_test_behavior(TestBehavior::Fail(ConnectorError::Auth("password expired".into())));

    let log = run_sync(&h, ds.id).await;
    assert!(!log.success);
    assert_eq!(log.records_sync, 0);
    assert_eq!(h.connector.reads(), 0);

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.status, DataSourceStatus::Error);
    assert_eq!(after.total_syncs, 1);
    assert_eq!(after.failed_syncs, 1);
}

#[tokio::test]
async fn run_timeout_keeps_partial_progress() {
    let mut settings = test_settings();
    settings.sync_timeout = Duration::from_millis(150);
    let h = harness_with(ScriptedConnector::healthy(100_000), settings);
    let ds = h.connected("orders").await;
    h.connector.set_batch_delay(Duration::from_millis(20));

    let log = run_sync(&h, ds.id).await;
    assert!(!log.success);
    assert_eq!(log.error_message.as_deref(), Some("timeout"));
    assert!(log.records_sync > 0);
    assert!(log.records_sync < 100_000);

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.total_records, log.records_sync);
}

#[tokio::test]
async fn next_run_resumes_from_the_cursor() {
    let h = harness(ScriptedConnector::healthy(150));
    let ds = h.connected("orders").await;

    let first = run_sync(&h, ds.id).await;
    assert_eq!(first.records_sync, 150);
    assert_eq!(first.cursor.as_ref().unwrap().position("records").offset, 150);

    let second = run_sync(&h, ds.id).await;
    assert!(second.success);
    assert_eq!(second.records_sync, 0);

    h.connector.set_total_records(250);
    let third = run_sync(&h, ds.id).await;
    assert_eq!(third.records_sync, 100);

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.total_syncs, 3);
    assert_eq!(after.total_records, 250);
}

#[tokio::test]
async fn sync_requires_a_connected_source() {
    let h = harness(ScriptedConnector::healthy(10));
    let ds = h.create("orders").await;

    let err = h.service.start_sync(ds.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn one_sync_per_source_and_no_delete_or_update_while_running() {
    let h = harness(ScriptedConnector::healthy(1000));
    let ds = h.connected("orders").await;
    h.connector.set_batch_delay(Duration::from_millis(30));

    let ticket = h.service.start_sync(ds.id).await.unwrap();
    assert!(matches!(h.service.start_sync(ds.id).await, Err(AppError::Conflict(_))));
    assert!(matches!(h.service.delete(ds.id).await, Err(AppError::Conflict(_))));
    let changes = datasource_hub::models::DataSourceChanges::from_body(serde_json::json!({
        "endpoint": "https://api.example.com/other"
    }))
    .unwrap();
    assert!(matches!(h.service.update(ds.id, changes).await, Err(AppError::Conflict(_))));

    let log = ticket.handle.await.unwrap().unwrap();
    assert!(log.success);
    h.service.delete(ds.id).await.unwrap();
}

#[tokio::test]
async fn test_during_a_sync_loses_no_counter_update() {
    let h = harness(ScriptedConnector::healthy(500));
    let ds = h.connected("orders").await;
    h.connector.set_batch_delay(Duration::from_millis(40));

    let ticket = h.service.start_sync(ds.id).await.unwrap();
    for _ in 0..200 {
        if h.connector.reads() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let result = h.service.test_connection(ds.id, None).await.unwrap();
    assert!(result.success);
    let log = ticket.handle.await.unwrap().unwrap();
    assert!(log.success);

    let after = h.service.get(ds.id).await.unwrap();
    // setup test, preflight test, manual test
    assert_eq!(after.successful_tests, 3);
    assert_eq!(after.total_syncs, 1);
    assert_eq!(after.total_records, 500);
    assert_eq!(after.status, DataSourceStatus::Connected);
}

#[tokio::test]
async fn delete_removes_sync_history() {
    let h = harness(ScriptedConnector::healthy(50));
    let ds = h.connected("orders").await;
    run_sync(&h, ds.id).await;
    run_sync(&h, ds.id).await;
    assert_eq!(h.service.sync_logs(ds.id, None).await.unwrap().len(), 2);

    h.service.delete(ds.id).await.unwrap();
    assert!(matches!(h.service.get(ds.id).await, Err(AppError::NotFound(_))));
    assert!(matches!(h.service.sync_logs(ds.id, None).await, Err(AppError::NotFound(_))));
    assert!(datasource_hub::DataSourceStore::sync_logs(&h.store, ds.id, None)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(h.service.delete(ds.id).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn sync_counters_match_the_log_history() {
    let h = harness(ScriptedConnector::healthy(120));
    let ds = h.connected("orders").await;

    run_sync(&h, ds.id).await;
    h.connector.set_test_behavior(TestBehavior::Fail(ConnectorError::Timeout));
    run_sync(&h, ds.id).await;

    let detail = h.service.detail(ds.id).await.unwrap();
    let logs = &detail.sync_logs;
    assert_eq!(detail.data_source.total_syncs, logs.len() as i64);
    assert_eq!(
        detail.data_source.failed_syncs,
        logs.iter().filter(|l| !l.success).count() as i64
    );
    assert_eq!(
        detail.data_source.total_records,
        logs.iter().map(|l| l.records_sync).sum::<i64>()
    );
    // newest first
    assert!(!logs[0].success);
    assert!(logs[1].success);
}

#[tokio::test]
async fn scheduler_tick_enqueues_connected_sources_only() {
    use datasource_hub::core::datasources::SyncScheduler;

    let h = harness(ScriptedConnector::healthy(10));
    let first = h.connected("orders").await;
    let second = h.connected("invoices").await;
    let draft = h.create("draft").await;

    let started = SyncScheduler::enqueue_due_syncs(&h.service).await.unwrap();
    assert_eq!(started, 2);

    for id in [first.id, second.id] {
        for _ in 0..200 {
            if h.service.jobs().running_sync(id).await.is_none()
                && !h.service.sync_logs(id, None).await.unwrap().is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.service.sync_logs(id, None).await.unwrap().len(), 1);
    }
    assert!(h.service.sync_logs(draft.id, None).await.unwrap().is_empty());
}
