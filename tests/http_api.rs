mod common;

use salvo::prelude::*;
use salvo::test::{ResponseExt, TestClient};
use serde_json::{json, Value};

use common::{harness, Harness, TestBehavior, ScriptedConnector};
use datasource_hub::utils::datasource::ConnectorError;
use datasource_hub::{AppState, Config};

const BASE: &str = "http://127.0.0.1:5800";

fn service_for(h: &Harness) -> Service {
    let config = Config::in_memory(h.upload_dir.path().to_path_buf());
    let state = AppState::with_service(&config, h.service.clone());
    Service::new(datasource_hub::api::router(state))
}

async fn create(service: &Service, body: Value) -> (StatusCode, Value) {
    let mut res = TestClient::post(format!("{}/api/data-sources", BASE))
        .json(&body)
        .send(service)
        .await;
    let status = res.status_code.unwrap();
    (status, res.take_json::<Value>().await.unwrap())
}

fn orders_body() -> Value {
    json!({
        "type": "REST_API",
        "name": "Orders",
        "config": { "endpoint": "https://api.example.com/orders", "apiKey": "k-123" }
    })
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);

    let mut res = TestClient::get(format!("{}/health", BASE)).send(&service).await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_test_and_fetch_over_http() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);

    let (status, created) = create(&service, orders_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "CONFIGURING");
    assert_eq!(created["credentialFields"], json!(["apiKey"]));
    assert!(!created.to_string().contains("k-123"));
    let id = created["id"].as_str().unwrap().to_string();

    let mut res = TestClient::post(format!("{}/api/data-sources/{}/test", BASE, id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let result: Value = res.take_json().await.unwrap();
    assert_eq!(result["success"], true);
    assert!(result["responseTime"].is_u64());

    let mut res = TestClient::get(format!("{}/api/data-sources/{}", BASE, id))
        .send(&service)
        .await;
    let detail: Value = res.take_json().await.unwrap();
    assert_eq!(detail["status"], "CONNECTED");
    assert_eq!(detail["syncLogs"], json!([]));
    assert!(detail["avgResponseTime"].is_number());
}

#[tokio::test]
async fn failed_test_is_still_a_200() {
    let h = harness(ScriptedConnector::new(
        TestBehavior::Fail(ConnectorError::Auth("invalid api key".into())),
        0,
    ));
    let service = service_for(&h);
    let (_, created) = create(&service, orders_body()).await;
    let id = created["id"].as_str().unwrap();

    let mut res = TestClient::post(format!("{}/api/data-sources/{}/test", BASE, id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let result: Value = res.take_json().await.unwrap();
    assert_eq!(result["success"], false);
    assert!(result["message"].as_str().unwrap().contains("auth"));
}

#[tokio::test]
async fn validation_and_lookup_errors_map_to_status_codes() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);

    let (status, body) = create(&service, json!({ "name": "no type" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = create(&service, json!({ "type": "ORACLE", "name": "x" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = uuid::Uuid::new_v4();
    let res = TestClient::get(format!("{}/api/data-sources/{}", BASE, missing))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));

    let res = TestClient::get(format!("{}/api/data-sources/not-a-uuid", BASE))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

    let (_, created) = create(&service, orders_body()).await;
    let id = created["id"].as_str().unwrap();
    let res = TestClient::post(format!("{}/api/data-sources/{}/test?timeoutMs=0", BASE, id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));
}

#[tokio::test]
async fn sync_over_http_is_accepted_then_logged() {
    let h = harness(ScriptedConnector::healthy(120));
    let service = service_for(&h);
    let ds = h.connected("orders").await;

    let mut res = TestClient::post(format!("{}/api/data-sources/{}/sync", BASE, ds.id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::ACCEPTED));
    let accepted: Value = res.take_json().await.unwrap();
    assert_eq!(accepted["dataSourceId"], ds.id.to_string());
    let job_id = accepted["jobId"].as_str().unwrap().to_string();

    let mut logs = Value::Null;
    for _ in 0..200 {
        let mut res = TestClient::get(format!("{}/api/data-sources/{}/sync-logs?limit=5", BASE, ds.id))
            .send(&service)
            .await;
        logs = res.take_json().await.unwrap();
        if !logs.as_array().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(logs[0]["id"], job_id);
    assert_eq!(logs[0]["success"], true);
    assert_eq!(logs[0]["recordsSync"], 120);
}

#[tokio::test]
async fn sync_on_unconnected_source_is_a_conflict() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);
    let (_, created) = create(&service, orders_body()).await;
    let id = created["id"].as_str().unwrap();

    let mut res = TestClient::post(format!("{}/api/data-sources/{}/sync", BASE, id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::CONFLICT));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn delete_then_get_is_not_found() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);
    let (_, created) = create(&service, orders_body()).await;
    let id = created["id"].as_str().unwrap();

    let mut res = TestClient::delete(format!("{}/api/data-sources/{}", BASE, id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let body: Value = res.take_json().await.unwrap();
    assert_eq!(body["deleted"], true);

    let res = TestClient::get(format!("{}/api/data-sources/{}", BASE, id))
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test]
async fn list_filters_by_query_parameters() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);
    create(&service, orders_body()).await;
    create(
        &service,
        json!({ "type": "CSV_FILE", "name": "Leads", "uploadedFileRef": "leads.csv" }),
    )
    .await;

    let mut res = TestClient::get(format!("{}/api/data-sources?type=CSV_FILE", BASE))
        .send(&service)
        .await;
    let list: Value = res.take_json().await.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["name"], "Leads");

    let mut res = TestClient::get(format!("{}/api/data-sources?search=ord&status=CONFIGURING", BASE))
        .send(&service)
        .await;
    let list: Value = res.take_json().await.unwrap();
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["name"], "Orders");
}

#[tokio::test]
async fn unsaved_config_can_be_tested() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);

    let mut res = TestClient::post(format!("{}/api/test-connection", BASE))
        .json(&orders_body())
        .send(&service)
        .await;
    assert_eq!(res.status_code, Some(StatusCode::OK));
    let result: Value = res.take_json().await.unwrap();
    assert_eq!(result["success"], true);

    let mut res = TestClient::get(format!("{}/api/data-sources", BASE)).send(&service).await;
    let list: Value = res.take_json().await.unwrap();
    assert_eq!(list, json!([]));
}

async fn upload(service: &Service, file_name: &str, contents: &str) -> (StatusCode, Value) {
    let boundary = "datasourcehubboundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: text/plain\r\n\r\n{contents}\r\n--{b}--\r\n",
        b = boundary,
        name = file_name,
        contents = contents
    );
    let mut res = TestClient::post(format!("{}/api/uploads", BASE))
        .add_header(
            "content-type",
            format!("multipart/form-data; boundary={}", boundary),
            true,
        )
        .body(body)
        .send(service)
        .await;
    let status = res.status_code.unwrap();
    (status, res.take_json::<Value>().await.unwrap())
}

#[tokio::test]
async fn uploads_accept_csv_and_tsv_only() {
    let h = harness(ScriptedConnector::healthy(0));
    let service = service_for(&h);

    let (status, body) = upload(&service, "cities.tsv", "id\tcity\n1\tOslo\n").await;
    assert_eq!(status, StatusCode::CREATED);
    let file_ref = body["uploadedFileRef"].as_str().unwrap();
    assert!(file_ref.ends_with(".tsv"));
    assert!(h.upload_dir.path().join(file_ref).exists());

    let (status, body) = upload(&service, "notes.txt", "id,city\n").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}
