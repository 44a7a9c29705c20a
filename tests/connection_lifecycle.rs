mod common;

use std::time::Duration;

use common::{harness, json_of, rest_source, TestBehavior, ScriptedConnector};
use datasource_hub::models::{DataSourceChanges, DataSourceFilter, DataSourceStatus};
use datasource_hub::utils::datasource::ConnectorError;
use datasource_hub::AppError;
use serde_json::json;

#[tokio::test]
async fn created_sources_start_configuring_without_plaintext_secrets() {
    let h = harness(ScriptedConnector::healthy(0));
    let ds = h.create("orders").await;

    assert_eq!(ds.status, DataSourceStatus::Configuring);
    assert_eq!(ds.credential_fields, vec!["apiKey".to_string()]);

    let body = json_of(&ds).to_string();
    assert!(!body.contains("secret-api-key"));
    assert!(body.contains("\"avgResponseTime\":null"));
    assert!(body.contains("\"type\":\"REST_API\""));
}

#[tokio::test]
async fn create_requires_name_and_required_fields_on_test() {
    let h = harness(ScriptedConnector::healthy(0));

    let mut unnamed = rest_source("x");
    unnamed.name = "   ".into();
    assert!(matches!(h.service.create(unnamed).await, Err(AppError::Validation(_))));

    // Incomplete configuration can be saved but not tested.
    let incomplete = datasource_hub::models::NewDataSource::from_body(json!({
        "type": "REST_API",
        "name": "draft"
    }))
    .unwrap();
    let ds = h.service.create(incomplete).await.unwrap();
    let err = h.service.test_connection(ds.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.status(ds.id).await, DataSourceStatus::Configuring);
}

#[tokio::test]
async fn successful_test_connects_and_tracks_average_latency() {
    let h = harness(ScriptedConnector::new(TestBehavior::Succeed { delay: Duration::from_millis(40) }, 0));
    let ds = h.create("orders").await;

    let result = h.service.test_connection(ds.id, None).await.unwrap();
    assert!(result.success);
    assert_eq!(result.message, "Connection successful");
    assert!(result.response_time.unwrap() >= 40);
    assert_eq!(result.server_info.unwrap()["server"], "scripted");

    let ds = h.service.get(ds.id).await.unwrap();
    assert_eq!(ds.status, DataSourceStatus::Connected);
    assert!(ds.connection_error.is_none());
    assert!(ds.last_connection_test.is_some());
    assert_eq!(ds.successful_tests, 1);
    assert!(ds.avg_response_time.unwrap() >= 40.0);
}

#[tokio::test]
async fn repeated_tests_against_a_healthy_endpoint_keep_succeeding() {
    let h = harness(ScriptedConnector::healthy(0));
    let ds = h.create("orders").await;

    for _ in 0..3 {
        let result = h.service.test_connection(ds.id, None).await.unwrap();
        assert!(result.success);
    }
    let ds = h.service.get(ds.id).await.unwrap();
    assert_eq!(ds.status, DataSourceStatus::Connected);
    assert_eq!(ds.successful_tests, 3);
}

#[tokio::test]
async fn rejected_credentials_move_to_error_with_auth_message() {
    let h = harness(ScriptedConnector::new(
        TestBehavior::Fail(ConnectorError::Auth("password authentication failed for user \"app\"".into())),
        0,
    ));
    let ds = h.create("orders").await;

    let result = h.service.test_connection(ds.id, None).await.unwrap();
    assert!(!result.success);

    let ds = h.service.get(ds.id).await.unwrap();
    assert_eq!(ds.status, DataSourceStatus::Error);
    assert!(ds.connection_error.unwrap().contains("auth"));
    assert!(ds.avg_response_time.is_none());
    assert!(ds.last_connection_test.is_some());
}

#[tokio::test]
async fn unreachable_endpoint_times_out() {
    let h = harness(ScriptedConnector::new(TestBehavior::Hang, 0));
    let ds = h.create("orders").await;

    let result = h
        .service
        .test_connection(ds.id, Some(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.message, "timeout");
    assert!(result.response_time.is_none());

    let ds = h.service.get(ds.id).await.unwrap();
    assert_eq!(ds.status, DataSourceStatus::Error);
    assert_eq!(ds.connection_error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn second_test_while_testing_is_a_conflict() {
    let h = harness(ScriptedConnector::new(TestBehavior::Hang, 0));
    let ds = h.create("orders").await;

    let service = h.service.clone();
    let id = ds.id;
    let first = tokio::spawn(async move { service.test_connection(id, Some(Duration::from_millis(300))).await });
    h.wait_for_status(ds.id, DataSourceStatus::Testing).await;

    let err = h.service.test_connection(ds.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.message, "timeout");
}

#[tokio::test]
async fn cancelled_test_restores_previous_status() {
    let h = harness(ScriptedConnector::healthy(0));
    let ds = h.connected("orders").await;
    let tests_before = ds.successful_tests;
    h.connector.set_test_behavior(TestBehavior::Hang);

    let service = h.service.clone();
    let id = ds.id;
    let pending = tokio::spawn(async move { service.test_connection(id, None).await });
    h.wait_for_status(ds.id, DataSourceStatus::Testing).await;

    assert!(h.service.cancel_test(ds.id).await.unwrap());
    let result = pending.await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.message, "cancelled");

    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.status, DataSourceStatus::Connected);
    assert_eq!(after.successful_tests, tests_before);
    assert!(after.last_connection_test > ds.last_connection_test);

    assert!(!h.service.cancel_test(ds.id).await.unwrap());
}

#[tokio::test]
async fn disconnect_during_a_test_wins() {
    let h = harness(ScriptedConnector::new(TestBehavior::Succeed { delay: Duration::from_millis(100) }, 0));
    let ds = h.create("orders").await;

    let service = h.service.clone();
    let id = ds.id;
    let pending = tokio::spawn(async move { service.test_connection(id, None).await });
    h.wait_for_status(ds.id, DataSourceStatus::Testing).await;

    let disconnected = h.service.disconnect(ds.id).await.unwrap();
    assert_eq!(disconnected.status, DataSourceStatus::Disconnected);

    let _ = pending.await.unwrap().unwrap();
    let after = h.service.get(ds.id).await.unwrap();
    assert_eq!(after.status, DataSourceStatus::Disconnected);
    assert_eq!(after.successful_tests, 0);
    assert!(after.avg_response_time.is_none());
}

#[tokio::test]
async fn dropped_caller_never_leaves_source_testing() {
    let h = harness(ScriptedConnector::new(TestBehavior::Succeed { delay: Duration::from_millis(50) }, 0));
    let ds = h.create("orders").await;

    let service = h.service.clone();
    let id = ds.id;
    let caller = tokio::spawn(async move { service.test_connection(id, None).await });
    h.wait_for_status(ds.id, DataSourceStatus::Testing).await;
    caller.abort();

    h.wait_for_status(ds.id, DataSourceStatus::Connected).await;
}

#[tokio::test]
async fn updating_connection_fields_returns_to_configuring() {
    let h = harness(ScriptedConnector::healthy(0));
    let ds = h.connected("orders").await;

    let renamed = h
        .service
        .update(ds.id, DataSourceChanges::from_body(json!({ "name": "orders v2" })).unwrap())
        .await
        .unwrap();
    assert_eq!(renamed.name, "orders v2");
    assert_eq!(renamed.status, DataSourceStatus::Connected);

    let moved = h
        .service
        .update(
            ds.id,
            DataSourceChanges::from_body(json!({ "endpoint": "https://api.example.com/v2/orders" })).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(moved.status, DataSourceStatus::Configuring);
    assert!(moved.connection_error.is_none());

    // The stored key survives an update that does not resend it.
    assert_eq!(moved.credential_fields, vec!["apiKey".to_string()]);
    assert!(h.service.test_connection(ds.id, None).await.unwrap().success);
}

#[tokio::test]
async fn type_cannot_change_on_update() {
    let err = DataSourceChanges::from_body(json!({ "type": "S3" })).unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn unsaved_configuration_test_persists_nothing() {
    let h = harness(ScriptedConnector::healthy(0));

    let result = h.service.test_unsaved(rest_source("scratch"), None).await.unwrap();
    assert!(result.success);
    assert!(h.service.list(&DataSourceFilter::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_filters_by_search_type_and_status() {
    let h = harness(ScriptedConnector::healthy(0));
    let connected = h.connected("Orders API").await;
    h.create("Billing API").await;

    let filter = DataSourceFilter {
        search: Some("orders".into()),
        ..Default::default()
    };
    let found = h.service.list(&filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, connected.id);

    let filter = DataSourceFilter {
        status: Some(DataSourceStatus::Configuring),
        ..Default::default()
    };
    assert_eq!(h.service.list(&filter).await.unwrap().len(), 1);

    let all = h.service.list(&DataSourceFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at >= all[1].created_at);
}

#[tokio::test]
async fn interrupted_tests_are_reset_on_startup() {
    let h = harness(ScriptedConnector::healthy(0));
    let mut ds = h.create("orders").await;
    ds.status = DataSourceStatus::Testing;
    datasource_hub::DataSourceStore::update(&h.store, &ds).await.unwrap();

    assert_eq!(h.service.recover_interrupted_tests().await.unwrap(), 1);
    let ds = h.service.get(ds.id).await.unwrap();
    assert_eq!(ds.status, DataSourceStatus::Error);
    assert!(ds.connection_error.unwrap().contains("interrupted"));
}

#[tokio::test]
async fn schema_of_a_source_without_schema_is_unsupported() {
    let h = harness(ScriptedConnector::healthy(0));
    let ds = h.connected("orders").await;

    let schema = serde_json::to_value(h.service.schema(ds.id).await.unwrap()).unwrap();
    assert_eq!(schema, json!({ "unsupported": true }));
}
