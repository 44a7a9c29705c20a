use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{DataSource, DataSourceFilter, SyncCursor, SyncLog};
use crate::utils::AppError;

/// Persistence for data sources and their sync history.
///
/// `record_sync` must append the log and write the data source's counters
/// in one atomic step: readers never observe one without the other.
#[async_trait]
pub trait DataSourceStore: Send + Sync {
    async fn insert(&self, data_source: &DataSource) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<DataSource>, AppError>;

    /// Newest first.
    async fn list(&self, filter: &DataSourceFilter) -> Result<Vec<DataSource>, AppError>;

    /// Overwrite an existing record. Fails with `NotFound` when it is gone.
    async fn update(&self, data_source: &DataSource) -> Result<(), AppError>;

    /// Remove a data source and its sync logs. Returns false when it did not exist.
    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn record_sync(&self, data_source: &DataSource, log: &SyncLog) -> Result<(), AppError>;

    /// Newest first, optionally capped.
    async fn sync_logs(&self, data_source_id: Uuid, limit: Option<i64>) -> Result<Vec<SyncLog>, AppError>;

    /// Cursor of the most recent sync that recorded one.
    async fn latest_cursor(&self, data_source_id: Uuid) -> Result<Option<SyncCursor>, AppError>;

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    data_sources: HashMap<Uuid, DataSource>,
    sync_logs: HashMap<Uuid, Vec<SyncLog>>,
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Clone, Default)]
pub struct MemoryDataSourceStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryDataSourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataSourceStore for MemoryDataSourceStore {
    async fn insert(&self, data_source: &DataSource) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        if state.data_sources.contains_key(&data_source.id) {
            return Err(AppError::Conflict(format!("Data source {} already exists", data_source.id)));
        }
        state.data_sources.insert(data_source.id, data_source.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DataSource>, AppError> {
        Ok(self.state.read().await.data_sources.get(&id).cloned())
    }

    async fn list(&self, filter: &DataSourceFilter) -> Result<Vec<DataSource>, AppError> {
        let state = self.state.read().await;
        let mut data_sources: Vec<DataSource> = state
            .data_sources
            .values()
            .filter(|ds| filter.matches(ds))
            .cloned()
            .collect();
        data_sources.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(data_sources)
    }

    async fn update(&self, data_source: &DataSource) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        match state.data_sources.get_mut(&data_source.id) {
            Some(existing) => {
                *existing = data_source.clone();
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Data source {} not found", data_source.id))),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        state.sync_logs.remove(&id);
        Ok(state.data_sources.remove(&id).is_some())
    }

    async fn record_sync(&self, data_source: &DataSource, log: &SyncLog) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        match state.data_sources.get_mut(&data_source.id) {
            Some(existing) => *existing = data_source.clone(),
            None => return Err(AppError::NotFound(format!("Data source {} not found", data_source.id))),
        }
        state.sync_logs.entry(data_source.id).or_default().push(log.clone());
        Ok(())
    }

    async fn sync_logs(&self, data_source_id: Uuid, limit: Option<i64>) -> Result<Vec<SyncLog>, AppError> {
        let state = self.state.read().await;
        let mut logs: Vec<SyncLog> = state
            .sync_logs
            .get(&data_source_id)
            .map(|logs| logs.iter().rev().cloned().collect())
            .unwrap_or_default();
        if let Some(limit) = limit {
            logs.truncate(limit.max(0) as usize);
        }
        Ok(logs)
    }

    async fn latest_cursor(&self, data_source_id: Uuid) -> Result<Option<SyncCursor>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .sync_logs
            .get(&data_source_id)
            .and_then(|logs| logs.iter().rev().find_map(|log| log.cursor.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionConfig, DataSourceType};
    use chrono::Utc;

    fn data_source(name: &str) -> DataSource {
        DataSource::new(
            name.to_string(),
            None,
            DataSourceType::RestApi,
            ConnectionConfig::empty_for(DataSourceType::RestApi),
        )
    }

    fn log(data_source_id: Uuid, offset: Option<u64>) -> SyncLog {
        SyncLog {
            id: Uuid::new_v4(),
            data_source_id,
            success: true,
            records_sync: 1,
            duration: 5,
            error_message: None,
            failed_batches: 0,
            cursor: offset.map(|offset| {
                let mut cursor = SyncCursor::default();
                cursor.set_position("records", crate::models::StreamPosition { offset, token: None });
                cursor
            }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_sync_writes_log_and_counters_together() {
        let store = MemoryDataSourceStore::new();
        let mut ds = data_source("api");
        store.insert(&ds).await.unwrap();

        ds.total_syncs = 1;
        store.record_sync(&ds, &log(ds.id, Some(10))).await.unwrap();

        assert_eq!(store.get(ds.id).await.unwrap().unwrap().total_syncs, 1);
        assert_eq!(store.sync_logs(ds.id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_cursor_skips_logs_without_one() {
        let store = MemoryDataSourceStore::new();
        let ds = data_source("api");
        store.insert(&ds).await.unwrap();
        store.record_sync(&ds, &log(ds.id, Some(40))).await.unwrap();
        store.record_sync(&ds, &log(ds.id, None)).await.unwrap();

        let cursor = store.latest_cursor(ds.id).await.unwrap().unwrap();
        assert_eq!(cursor.position("records").offset, 40);
    }

    #[tokio::test]
    async fn delete_removes_logs() {
        let store = MemoryDataSourceStore::new();
        let ds = data_source("api");
        store.insert(&ds).await.unwrap();
        store.record_sync(&ds, &log(ds.id, None)).await.unwrap();

        assert!(store.delete(ds.id).await.unwrap());
        assert!(store.sync_logs(ds.id, None).await.unwrap().is_empty());
        assert!(!store.delete(ds.id).await.unwrap());
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = MemoryDataSourceStore::new();
        let err = store.update(&data_source("ghost")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
