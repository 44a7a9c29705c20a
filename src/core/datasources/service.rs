use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::introspector::{SchemaIntrospector, SchemaResult};
use super::jobs::{JobManager, SyncJobHandle};
use super::locks::DataSourceLocks;
use super::state_machine;
use super::store::DataSourceStore;
use super::sync_engine::{RetryPolicy, SyncEngine, SyncReport};
use super::tester::{run_test, TestResult};
use crate::models::{
    extract_credentials, ConnectionConfig, Credentials, DataSource, DataSourceChanges, DataSourceDetail,
    DataSourceFilter, DataSourceStatus, NewDataSource, ResolvedConfig, SyncLog,
};
use crate::utils::crypto::CredentialVault;
use crate::utils::datasource::{ConnectorRegistry, IntrospectionLimits};
use crate::utils::{AppError, ConnectorSettings};

/// Sync logs embedded in `GET /data-sources/{id}`.
pub const DETAIL_SYNC_LOGS: i64 = 20;
pub const MAX_SYNC_LOG_PAGE: i64 = 500;

/// Accepted sync request. Awaiting `handle` yields the written log.
#[derive(Debug)]
pub struct SyncTicket {
    pub job_id: Uuid,
    pub data_source_id: Uuid,
    pub handle: JoinHandle<Option<SyncLog>>,
}

/// Every data source operation: CRUD, tests, introspection and syncs.
#[derive(Clone)]
pub struct DataSourceService {
    store: Arc<dyn DataSourceStore>,
    registry: ConnectorRegistry,
    vault: CredentialVault,
    settings: ConnectorSettings,
    locks: DataSourceLocks,
    jobs: JobManager,
    engine: SyncEngine,
    introspector: SchemaIntrospector,
}

impl DataSourceService {
    pub fn new(
        store: Arc<dyn DataSourceStore>,
        registry: ConnectorRegistry,
        vault: CredentialVault,
        settings: ConnectorSettings,
    ) -> Self {
        let limits = IntrospectionLimits {
            max_tables: settings.schema_max_tables,
            max_columns: settings.schema_max_columns,
        };
        DataSourceService {
            jobs: JobManager::new(settings.max_concurrent_jobs),
            engine: SyncEngine::new(&settings, RetryPolicy::default()),
            introspector: SchemaIntrospector::new(limits, settings.test_timeout.max(Duration::from_secs(30))),
            locks: DataSourceLocks::new(),
            store,
            registry,
            vault,
            settings,
        }
    }

    /// Replace the batch retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.engine = SyncEngine::new(&self.settings, retry);
        self
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.store.health_check().await
    }

    // ---- CRUD ----

    pub async fn create(&self, input: NewDataSource) -> Result<DataSource, AppError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }

        let config = ConnectionConfig::from_fields(input.source_type, &input.fields)?;
        let secrets = extract_credentials(input.source_type, &input.fields)?;

        let mut ds = DataSource::new(name, input.description, input.source_type, config);
        self.seal_credentials(&mut ds, secrets)?;
        self.store.insert(&ds).await?;

        info!("✅ Created {} data source '{}' ({})", ds.source_type, ds.name, ds.id);
        Ok(ds)
    }

    pub async fn list(&self, filter: &DataSourceFilter) -> Result<Vec<DataSource>, AppError> {
        self.store.list(filter).await
    }

    pub async fn get(&self, id: Uuid) -> Result<DataSource, AppError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Data source {} not found", id)))
    }

    pub async fn detail(&self, id: Uuid) -> Result<DataSourceDetail, AppError> {
        let data_source = self.get(id).await?;
        let sync_logs = self.store.sync_logs(id, Some(DETAIL_SYNC_LOGS)).await?;
        Ok(DataSourceDetail {
            data_source,
            sync_logs,
        })
    }

    pub async fn update(&self, id: Uuid, changes: DataSourceChanges) -> Result<DataSource, AppError> {
        let _guard = self.locks.acquire(id).await;
        let mut ds = self.get(id).await?;

        if self.jobs.running_sync(id).await.is_some() {
            return Err(AppError::Conflict(format!("Data source {} is syncing", id)));
        }
        if ds.status == DataSourceStatus::Testing {
            return Err(AppError::Conflict(format!("Data source {} is being tested", id)));
        }

        if let Some(name) = changes.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(AppError::Validation("name cannot be empty".to_string()));
            }
            ds.name = name;
        }
        if let Some(description) = changes.description {
            ds.description = Some(description).filter(|d| !d.is_empty());
        }

        if !changes.fields.is_empty() {
            let update = ConnectionConfig::from_fields(ds.source_type, &changes.fields)?;
            let secrets = extract_credentials(ds.source_type, &changes.fields)?;
            let settings_changed = update != ConnectionConfig::empty_for(ds.source_type);

            if settings_changed || !secrets.is_empty() {
                ds.config.merge(update);
                if !secrets.is_empty() {
                    let mut merged = match ds.encrypted_credentials.as_deref() {
                        Some(sealed) => self.vault.open_plain(sealed)?,
                        None => BTreeMap::new(),
                    };
                    merged.extend(secrets);
                    self.seal_credentials(&mut ds, merged)?;
                }
                state_machine::reconfigure(&mut ds, Utc::now());
            }
        }

        ds.updated_at = Utc::now();
        self.store.update(&ds).await?;
        info!("📝 Updated data source {}", id);
        Ok(ds)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        {
            let _guard = self.locks.acquire(id).await;
            self.get(id).await?;
            if self.jobs.running_sync(id).await.is_some() {
                return Err(AppError::Conflict(format!(
                    "Data source {} has a sync in progress",
                    id
                )));
            }
            self.jobs.cancel_test(id).await;
            if !self.store.delete(id).await? {
                return Err(AppError::NotFound(format!("Data source {} not found", id)));
            }
        }
        self.locks.forget(id).await;
        info!("🗑️ Deleted data source {}", id);
        Ok(())
    }

    pub async fn disconnect(&self, id: Uuid) -> Result<DataSource, AppError> {
        let _guard = self.locks.acquire(id).await;
        let mut ds = self.get(id).await?;
        self.jobs.cancel_test(id).await;
        state_machine::disconnect(&mut ds, Utc::now());
        self.store.update(&ds).await?;
        info!("🔌 Disconnected data source {}", id);
        Ok(ds)
    }

    // ---- Connection tests ----

    /// Test a stored data source. The test runs on its own task so a caller
    /// that goes away never leaves the data source in `TESTING`.
    pub async fn test_connection(&self, id: Uuid, timeout: Option<Duration>) -> Result<TestResult, AppError> {
        let (config, cancel) = {
            let _guard = self.locks.acquire(id).await;
            let mut ds = self.get(id).await?;
            let config = self.resolve(&ds)?;
            let restore = state_machine::begin_test(&mut ds, Utc::now())?;
            self.store.update(&ds).await?;
            let cancel = self.jobs.register_test(id, restore).await;
            (config, cancel)
        };

        let timeout = timeout.unwrap_or_else(|| self.settings.test_timeout_for(config.source_type));
        let service = self.clone();
        tokio::spawn(async move { service.complete_test(id, config, timeout, cancel).await })
            .await
            .map_err(|e| AppError::InternalServerError(format!("connection test task failed: {}", e)))?
    }

    async fn complete_test(
        &self,
        id: Uuid,
        config: ResolvedConfig,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<TestResult, AppError> {
        let connector = self.registry.connector(config.source_type);
        let outcome = run_test(connector.as_ref(), &config, timeout, &cancel).await;
        drop(config);

        let _guard = self.locks.acquire(id).await;
        let handle = self.jobs.finish_test(id).await;
        if let Some(mut ds) = self.store.get(id).await? {
            let restore = handle.map(|h| h.restore_status).unwrap_or(ds.status);
            state_machine::finish_test(&mut ds, &outcome, restore, Utc::now());
            self.store.update(&ds).await?;
            debug!("Data source {} is now {}", id, ds.status);
        }
        Ok(TestResult::from(&outcome))
    }

    /// Signal the in-flight test. Returns whether one was running.
    pub async fn cancel_test(&self, id: Uuid) -> Result<bool, AppError> {
        self.get(id).await?;
        Ok(self.jobs.cancel_test(id).await)
    }

    /// Test an unsaved configuration. Nothing is persisted.
    pub async fn test_unsaved(&self, input: NewDataSource, timeout: Option<Duration>) -> Result<TestResult, AppError> {
        let config = ConnectionConfig::from_fields(input.source_type, &input.fields)?;
        let credentials = Credentials::from_plain(extract_credentials(input.source_type, &input.fields)?);
        let resolved = ResolvedConfig::new(input.source_type, config, credentials);
        resolved.validate()?;

        let timeout = timeout.unwrap_or_else(|| self.settings.test_timeout_for(input.source_type));
        let connector = self.registry.connector(input.source_type);
        let outcome = run_test(connector.as_ref(), &resolved, timeout, &CancellationToken::new()).await;
        Ok(TestResult::from(&outcome))
    }

    // ---- Schema ----

    pub async fn schema(&self, id: Uuid) -> Result<SchemaResult, AppError> {
        let ds = self.get(id).await?;
        if !ds.source_type.supports_introspection() {
            return Ok(SchemaResult::unsupported());
        }
        let config = self.resolve(&ds)?;
        let connector = self.registry.connector(ds.source_type);
        Ok(self.introspector.introspect(connector.as_ref(), &config).await)
    }

    // ---- Sync ----

    /// Accept a sync request and run it on the worker pool.
    pub async fn start_sync(&self, id: Uuid) -> Result<SyncTicket, AppError> {
        let job = {
            let _guard = self.locks.acquire(id).await;
            let ds = self.get(id).await?;
            if ds.status != DataSourceStatus::Connected {
                return Err(AppError::Conflict(format!(
                    "Data source must be CONNECTED to sync (current status: {})",
                    ds.status
                )));
            }
            self.resolve(&ds)?;
            self.jobs.begin_sync(id).await?
        };

        info!("🚀 Sync job {} accepted for data source {}", job.job_id, id);
        let service = self.clone();
        let ticket_job = job.clone();
        let handle = self.jobs.spawn(async move { service.execute_sync(ticket_job).await });

        Ok(SyncTicket {
            job_id: job.job_id,
            data_source_id: id,
            handle,
        })
    }

    async fn execute_sync(&self, job: SyncJobHandle) -> Option<SyncLog> {
        let id = job.data_source_id;
        let result = self.run_sync(&job).await;
        self.jobs.finish_sync(id).await;

        match result {
            Ok(log) => Some(log),
            Err(e) => {
                error!("❌ Sync job {} for data source {} could not complete: {}", job.job_id, id, e);
                None
            }
        }
    }

    async fn run_sync(&self, job: &SyncJobHandle) -> Result<SyncLog, AppError> {
        let id = job.data_source_id;
        let started = Instant::now();

        match self.test_connection(id, None).await {
            Ok(result) if !result.success => {
                let report = SyncReport::aborted(
                    format!("connection test failed: {}", result.message),
                    Default::default(),
                    started.elapsed(),
                );
                return self.record_sync(job, report).await;
            }
            Ok(_) => {}
            Err(AppError::Conflict(_)) => debug!("Connection test already running for {}, skipping preflight", id),
            Err(e) => return Err(e),
        }

        let ds = self.get(id).await?;
        let config = self.resolve(&ds)?;
        let cursor = self.store.latest_cursor(id).await?.unwrap_or_default();
        let connector = self.registry.connector(ds.source_type);

        let report = self.engine.run(connector.as_ref(), &config, cursor).await;
        drop(config);
        self.record_sync(job, report).await
    }

    /// Write the sync log and the counters in one step.
    async fn record_sync(&self, job: &SyncJobHandle, report: SyncReport) -> Result<SyncLog, AppError> {
        let id = job.data_source_id;
        let _guard = self.locks.acquire(id).await;
        let mut ds = self.get(id).await?;

        let now = Utc::now();
        state_machine::finish_sync(&mut ds, &report, now);
        if !report.success && ds.status == DataSourceStatus::Testing {
            self.jobs.set_restore_status(id, DataSourceStatus::Error).await;
        }

        let log = SyncLog {
            id: job.job_id,
            data_source_id: id,
            success: report.success,
            records_sync: report.records as i64,
            duration: report.duration.as_millis() as i64,
            error_message: report.error_message.clone(),
            failed_batches: report.failed_batches as i32,
            cursor: Some(report.cursor).filter(|c| !c.streams.is_empty()),
            created_at: now,
        };
        self.store.record_sync(&ds, &log).await?;

        if log.success {
            info!(
                "✅ Sync {} for {} finished: {} records, {} failed batch(es), {}ms",
                log.id, id, log.records_sync, log.failed_batches, log.duration
            );
        } else {
            warn!(
                "❌ Sync {} for {} failed after {} records: {}",
                log.id,
                id,
                log.records_sync,
                log.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(log)
    }

    pub async fn sync_logs(&self, id: Uuid, limit: Option<i64>) -> Result<Vec<SyncLog>, AppError> {
        self.get(id).await?;
        let limit = limit.unwrap_or(DETAIL_SYNC_LOGS).clamp(1, MAX_SYNC_LOG_PAGE);
        self.store.sync_logs(id, Some(limit)).await
    }

    // ---- Startup ----

    /// Tests interrupted by a restart leave data sources in `TESTING`.
    pub async fn recover_interrupted_tests(&self) -> Result<usize, AppError> {
        let filter = DataSourceFilter {
            status: Some(DataSourceStatus::Testing),
            ..Default::default()
        };
        let stuck = self.store.list(&filter).await?;
        for ds in &stuck {
            let _guard = self.locks.acquire(ds.id).await;
            if let Some(mut current) = self.store.get(ds.id).await? {
                if current.status == DataSourceStatus::Testing && !self.jobs.is_testing(ds.id).await {
                    current.status = DataSourceStatus::Error;
                    current.connection_error = Some("connection test interrupted by restart".to_string());
                    current.updated_at = Utc::now();
                    self.store.update(&current).await?;
                }
            }
        }
        if !stuck.is_empty() {
            warn!("⚠️ Reset {} data source(s) left in TESTING", stuck.len());
        }
        Ok(stuck.len())
    }

    // ---- Helpers ----

    fn seal_credentials(&self, ds: &mut DataSource, secrets: BTreeMap<String, String>) -> Result<(), AppError> {
        if secrets.is_empty() {
            return Ok(());
        }
        ds.credential_fields = secrets.keys().cloned().collect();
        ds.encrypted_credentials = Some(self.vault.seal(&secrets)?);
        Ok(())
    }

    /// Decrypt credentials and validate. The result must be dropped as soon
    /// as the call that needs it returns.
    fn resolve(&self, ds: &DataSource) -> Result<ResolvedConfig, AppError> {
        let credentials = match ds.encrypted_credentials.as_deref() {
            Some(sealed) => self.vault.open(sealed)?,
            None => Credentials::default(),
        };
        let resolved = ResolvedConfig::new(ds.source_type, ds.config.clone(), credentials);
        resolved.validate()?;
        Ok(resolved)
    }
}
