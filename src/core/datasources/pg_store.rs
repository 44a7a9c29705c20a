use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use super::store::DataSourceStore;
use crate::models::{
    ConnectionConfig, DataSource, DataSourceFilter, DataSourceStatus, DataSourceType, SyncCursor, SyncLog,
};
use crate::utils::AppError;

const DATA_SOURCE_COLUMNS: &str = "id, name, description, source_type, status, connection_config, \
     encrypted_credentials, credential_fields, connection_error, last_connection_test, \
     last_successful_sync, total_records, total_syncs, failed_syncs, successful_tests, \
     avg_response_time, created_at, updated_at";

const SYNC_LOG_COLUMNS: &str =
    "id, data_source_id, success, records_sync, duration_ms, error_message, failed_batches, cursor, created_at";

/// PostgreSQL-backed store. The schema is created by the `migration` crate.
#[derive(Clone)]
pub struct PgDataSourceStore {
    pool: PgPool,
}

impl PgDataSourceStore {
    pub fn new(pool: PgPool) -> Self {
        PgDataSourceStore { pool }
    }
}

fn row_to_data_source(row: &PgRow) -> Result<DataSource, AppError> {
    let source_type: String = row.try_get("source_type")?;
    let status: String = row.try_get("status")?;
    let Json(config): Json<ConnectionConfig> = row.try_get("connection_config")?;
    let Json(credential_fields): Json<Vec<String>> = row.try_get("credential_fields")?;

    Ok(DataSource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        source_type: source_type
            .parse::<DataSourceType>()
            .map_err(AppError::InternalServerError)?,
        status: status
            .parse::<DataSourceStatus>()
            .map_err(AppError::InternalServerError)?,
        config,
        credential_fields,
        encrypted_credentials: row.try_get("encrypted_credentials")?,
        connection_error: row.try_get("connection_error")?,
        last_connection_test: row.try_get("last_connection_test")?,
        last_successful_sync: row.try_get("last_successful_sync")?,
        total_records: row.try_get("total_records")?,
        total_syncs: row.try_get("total_syncs")?,
        failed_syncs: row.try_get("failed_syncs")?,
        successful_tests: row.try_get("successful_tests")?,
        avg_response_time: row.try_get("avg_response_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_sync_log(row: &PgRow) -> Result<SyncLog, AppError> {
    let cursor: Option<Json<SyncCursor>> = row.try_get("cursor")?;
    Ok(SyncLog {
        id: row.try_get("id")?,
        data_source_id: row.try_get("data_source_id")?,
        success: row.try_get("success")?,
        records_sync: row.try_get("records_sync")?,
        duration: row.try_get("duration_ms")?,
        error_message: row.try_get("error_message")?,
        failed_batches: row.try_get("failed_batches")?,
        cursor: cursor.map(|Json(cursor)| cursor),
        created_at: row.try_get("created_at")?,
    })
}

/// Overwrite every mutable column. Shared by plain updates and sync recording.
async fn write_data_source<'e, E>(executor: E, ds: &DataSource) -> Result<u64, AppError>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE data_sources SET
            name = $2, description = $3, status = $4, connection_config = $5,
            encrypted_credentials = $6, credential_fields = $7, connection_error = $8,
            last_connection_test = $9, last_successful_sync = $10, total_records = $11,
            total_syncs = $12, failed_syncs = $13, successful_tests = $14,
            avg_response_time = $15, updated_at = $16
        WHERE id = $1
        "#,
    )
    .bind(ds.id)
    .bind(&ds.name)
    .bind(&ds.description)
    .bind(ds.status.as_str())
    .bind(Json(&ds.config))
    .bind(&ds.encrypted_credentials)
    .bind(Json(&ds.credential_fields))
    .bind(&ds.connection_error)
    .bind(ds.last_connection_test)
    .bind(ds.last_successful_sync)
    .bind(ds.total_records)
    .bind(ds.total_syncs)
    .bind(ds.failed_syncs)
    .bind(ds.successful_tests)
    .bind(ds.avg_response_time)
    .bind(ds.updated_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Escape LIKE wildcards in user-supplied search text.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl DataSourceStore for PgDataSourceStore {
    async fn insert(&self, ds: &DataSource) -> Result<(), AppError> {
        sqlx::query(&format!(
            "INSERT INTO data_sources ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            DATA_SOURCE_COLUMNS
        ))
        .bind(ds.id)
        .bind(&ds.name)
        .bind(&ds.description)
        .bind(ds.source_type.as_str())
        .bind(ds.status.as_str())
        .bind(Json(&ds.config))
        .bind(&ds.encrypted_credentials)
        .bind(Json(&ds.credential_fields))
        .bind(&ds.connection_error)
        .bind(ds.last_connection_test)
        .bind(ds.last_successful_sync)
        .bind(ds.total_records)
        .bind(ds.total_syncs)
        .bind(ds.failed_syncs)
        .bind(ds.successful_tests)
        .bind(ds.avg_response_time)
        .bind(ds.created_at)
        .bind(ds.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DataSource>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM data_sources WHERE id = $1", DATA_SOURCE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_data_source).transpose()
    }

    async fn list(&self, filter: &DataSourceFilter) -> Result<Vec<DataSource>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM data_sources
            WHERE ($1::text IS NULL OR source_type = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR name ILIKE $3 OR description ILIKE $3)
            ORDER BY created_at DESC, name ASC
            "#,
            DATA_SOURCE_COLUMNS
        ))
        .bind(filter.source_type.map(|t| t.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_data_source).collect()
    }

    async fn update(&self, ds: &DataSource) -> Result<(), AppError> {
        if write_data_source(&self.pool, ds).await? == 0 {
            return Err(AppError::NotFound(format!("Data source {} not found", ds.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sync_logs WHERE data_source_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM data_sources WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_sync(&self, ds: &DataSource, log: &SyncLog) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        if write_data_source(&mut *tx, ds).await? == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("Data source {} not found", ds.id)));
        }

        sqlx::query(&format!(
            "INSERT INTO sync_logs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            SYNC_LOG_COLUMNS
        ))
        .bind(log.id)
        .bind(log.data_source_id)
        .bind(log.success)
        .bind(log.records_sync)
        .bind(log.duration)
        .bind(&log.error_message)
        .bind(log.failed_batches)
        .bind(log.cursor.as_ref().map(Json))
        .bind(log.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn sync_logs(&self, data_source_id: Uuid, limit: Option<i64>) -> Result<Vec<SyncLog>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sync_logs WHERE data_source_id = $1 ORDER BY created_at DESC LIMIT $2",
            SYNC_LOG_COLUMNS
        ))
        .bind(data_source_id)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_sync_log).collect()
    }

    async fn latest_cursor(&self, data_source_id: Uuid) -> Result<Option<SyncCursor>, AppError> {
        let cursor: Option<Json<SyncCursor>> = sqlx::query_scalar(
            "SELECT cursor FROM sync_logs WHERE data_source_id = $1 AND cursor IS NOT NULL \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(data_source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(cursor.map(|Json(cursor)| cursor))
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
