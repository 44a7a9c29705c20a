#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use datasource_hub::core::datasources::{DataSourceService, MemoryDataSourceStore, RetryPolicy};
use datasource_hub::models::{DataSource, DataSourceStatus, DataSourceType, NewDataSource, ResolvedConfig, StreamPosition};
use datasource_hub::utils::crypto::CredentialVault;
use datasource_hub::utils::datasource::{
    Batch, BatchFailure, BatchReader, ConnectorError, ConnectorRegistry, DataSourceConnector, LatencyTimer,
    ServerInfo,
};
use datasource_hub::utils::ConnectorSettings;

/// What the next connection test does.
#[derive(Debug, Clone)]
pub enum TestBehavior {
    Succeed { delay: Duration },
    Fail(ConnectorError),
    Hang,
}

/// Shared script for the readers a `ScriptedConnector` hands out.
#[derive(Default)]
pub struct ReadScript {
    pub total_records: AtomicU64,
    pub batch_delay_ms: AtomicU64,
    pub failures: Mutex<VecDeque<ConnectorError>>,
    pub reads: AtomicUsize,
}

/// Connector whose tests and reads follow a script instead of the network.
pub struct ScriptedConnector {
    behavior: Mutex<TestBehavior>,
    pub script: Arc<ReadScript>,
    pub test_calls: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(behavior: TestBehavior, total_records: u64) -> Self {
        let script = ReadScript::default();
        script.total_records.store(total_records, Ordering::SeqCst);
        ScriptedConnector {
            behavior: Mutex::new(behavior),
            script: Arc::new(script),
            test_calls: AtomicUsize::new(0),
        }
    }

    pub fn healthy(total_records: u64) -> Self {
        Self::new(TestBehavior::Succeed { delay: Duration::from_millis(5) }, total_records)
    }

    pub fn set_test_behavior(&self, behavior: TestBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_total_records(&self, total: u64) {
        self.script.total_records.store(total, Ordering::SeqCst);
    }

    pub fn set_batch_delay(&self, delay: Duration) {
        self.script.batch_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Queue errors returned by the next reads, in order.
    pub fn fail_next_reads(&self, errors: impl IntoIterator<Item = ConnectorError>) {
        self.script.failures.lock().unwrap().extend(errors);
    }

    pub fn reads(&self) -> usize {
        self.script.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSourceConnector for ScriptedConnector {
    async fn test_connection(&self, _config: &ResolvedConfig, timer: &LatencyTimer) -> Result<ServerInfo, ConnectorError> {
        self.test_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            TestBehavior::Succeed { delay } => {
                tokio::time::sleep(delay).await;
                timer.mark_round_trip();
                let mut info = Map::new();
                info.insert("server".to_string(), json!("scripted"));
                Ok(info)
            }
            TestBehavior::Fail(error) => Err(error),
            TestBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Map::new())
            }
        }
    }

    async fn open_reader(&self, _config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError> {
        Ok(Box::new(ScriptedReader {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedReader {
    script: Arc<ReadScript>,
}

#[async_trait]
impl BatchReader for ScriptedReader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        Ok(vec!["records".to_string()])
    }

    async fn read_batch(
        &mut self,
        _config: &ResolvedConfig,
        _stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure> {
        self.script.reads.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.batch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if let Some(error) = self.script.failures.lock().unwrap().pop_front() {
            return Err(error.into());
        }

        let total = self.script.total_records.load(Ordering::SeqCst);
        let start = position.offset.min(total);
        let end = (position.offset + limit as u64).min(total);
        Ok(Batch {
            records: (start..end).map(|i| json!({ "id": i })).collect(),
            next_token: None,
            exhausted: end >= total,
        })
    }
}

pub struct Harness {
    pub service: DataSourceService,
    pub store: MemoryDataSourceStore,
    pub connector: Arc<ScriptedConnector>,
    pub upload_dir: TempDir,
}

pub fn test_settings() -> ConnectorSettings {
    ConnectorSettings {
        test_timeout: Duration::from_secs(2),
        sync_batch_size: 100,
        sync_batch_timeout: Duration::from_secs(2),
        sync_timeout: Duration::from_secs(20),
        ..ConnectorSettings::default()
    }
}

pub fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_attempts: 5,
    }
}

/// Service over an in-memory store with `connector` standing in for REST_API sources.
pub fn harness_with(connector: ScriptedConnector, settings: ConnectorSettings) -> Harness {
    let upload_dir = TempDir::new().unwrap();
    let connector = Arc::new(connector);
    let registry = ConnectorRegistry::builtin(upload_dir.path().to_path_buf())
        .with_connector(DataSourceType::RestApi, connector.clone());
    let store = MemoryDataSourceStore::new();
    let service = DataSourceService::new(
        Arc::new(store.clone()),
        registry,
        CredentialVault::new(&[42u8; 32]),
        settings,
    )
    .with_retry_policy(fast_retries());

    Harness {
        service,
        store,
        connector,
        upload_dir,
    }
}

pub fn harness(connector: ScriptedConnector) -> Harness {
    harness_with(connector, test_settings())
}

pub fn rest_source(name: &str) -> NewDataSource {
    NewDataSource::from_body(json!({
        "type": "REST_API",
        "name": name,
        "endpoint": "https://api.example.com/orders",
        "apiKey": "secret-api-key"
    }))
    .unwrap()
}

impl Harness {
    pub async fn create(&self, name: &str) -> DataSource {
        self.service.create(rest_source(name)).await.unwrap()
    }

    /// Create a source and bring it to CONNECTED.
    pub async fn connected(&self, name: &str) -> DataSource {
        let ds = self.create(name).await;
        let result = self.service.test_connection(ds.id, None).await.unwrap();
        assert!(result.success, "setup test failed: {}", result.message);
        self.service.get(ds.id).await.unwrap()
    }

    pub async fn status(&self, id: Uuid) -> DataSourceStatus {
        self.service.get(id).await.unwrap().status
    }

    /// Poll until `id` reaches `status`, for at most two seconds.
    pub async fn wait_for_status(&self, id: Uuid, status: DataSourceStatus) {
        for _ in 0..200 {
            if self.status(id).await == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("data source {} never reached {}", id, status);
    }
}

pub fn json_of(ds: &DataSource) -> Value {
    serde_json::to_value(ds).unwrap()
}
