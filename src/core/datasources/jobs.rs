use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::DataSourceStatus;
use crate::utils::AppError;

/// A sync run registered for a data source.
#[derive(Debug, Clone)]
pub struct SyncJobHandle {
    pub job_id: Uuid,
    pub data_source_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// A connection test in flight.
#[derive(Debug, Clone)]
pub struct TestHandle {
    pub cancel: CancellationToken,
    /// Status to go back to when the test is cancelled.
    pub restore_status: DataSourceStatus,
}

/// Tracks running syncs and tests and bounds how many syncs execute at once.
#[derive(Clone)]
pub struct JobManager {
    running_syncs: Arc<RwLock<HashMap<Uuid, SyncJobHandle>>>,
    running_tests: Arc<RwLock<HashMap<Uuid, TestHandle>>>,
    workers: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            running_syncs: Arc::new(RwLock::new(HashMap::new())),
            running_tests: Arc::new(RwLock::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    /// Reserve the sync slot of a data source. At most one sync per data source.
    pub async fn begin_sync(&self, data_source_id: Uuid) -> Result<SyncJobHandle, AppError> {
        let mut running = self.running_syncs.write().await;
        if running.contains_key(&data_source_id) {
            return Err(AppError::Conflict(format!(
                "A sync is already running for data source {}",
                data_source_id
            )));
        }
        let handle = SyncJobHandle {
            job_id: Uuid::new_v4(),
            data_source_id,
            started_at: Utc::now(),
        };
        running.insert(data_source_id, handle.clone());
        Ok(handle)
    }

    pub async fn finish_sync(&self, data_source_id: Uuid) {
        self.running_syncs.write().await.remove(&data_source_id);
    }

    pub async fn running_sync(&self, data_source_id: Uuid) -> Option<SyncJobHandle> {
        self.running_syncs.read().await.get(&data_source_id).cloned()
    }

    pub async fn running_sync_count(&self) -> usize {
        self.running_syncs.read().await.len()
    }

    /// Run `job` on the worker pool. The job waits for a free worker.
    pub fn spawn<F, T>(&self, job: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            // The semaphore is never closed, so acquiring only waits.
            let _permit = workers.acquire_owned().await.ok();
            job.await
        })
    }

    pub async fn register_test(&self, data_source_id: Uuid, restore_status: DataSourceStatus) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.running_tests.write().await.insert(
            data_source_id,
            TestHandle {
                cancel: cancel.clone(),
                restore_status,
            },
        );
        cancel
    }

    /// Deregister a finished test and hand back its handle.
    pub async fn finish_test(&self, data_source_id: Uuid) -> Option<TestHandle> {
        self.running_tests.write().await.remove(&data_source_id)
    }

    /// Signal the in-flight test, if any. Returns whether one was running.
    pub async fn cancel_test(&self, data_source_id: Uuid) -> bool {
        match self.running_tests.read().await.get(&data_source_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn is_testing(&self, data_source_id: Uuid) -> bool {
        self.running_tests.read().await.contains_key(&data_source_id)
    }

    /// Change what a cancelled test restores, e.g. after a sync failed meanwhile.
    pub async fn set_restore_status(&self, data_source_id: Uuid, status: DataSourceStatus) {
        if let Some(handle) = self.running_tests.write().await.get_mut(&data_source_id) {
            handle.restore_status = status;
        }
    }
}
