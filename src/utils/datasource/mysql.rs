use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{Column, Connection, Row};
use std::collections::HashMap;
use tracing::debug;

use super::base::{
    short_page, Batch, BatchFailure, BatchReader, ColumnInfo, DataSourceConnector, Introspection,
    IntrospectionLimits, LatencyTimer, ServerInfo, TableInfo,
};
use super::common::{order_by_columns, pick_unique_key, quote_mysql_ident, ConnectorError};
use crate::models::{required, CredentialField, ResolvedConfig, StreamPosition};

pub struct MySQLConnector;

fn connect_options(config: &ResolvedConfig) -> Result<MySqlConnectOptions, ConnectorError> {
    let db = config.database()?;
    let mut options = MySqlConnectOptions::new()
        .host(required(&db.host, "host")?)
        .port(db.port.unwrap_or(3306))
        .database(required(&db.database, "database")?)
        .username(required(&db.username, "username")?)
        .ssl_mode(if db.ssl == Some(true) {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        });

    if let Some(password) = config.secret(CredentialField::Password) {
        options = options.password(password);
    }
    Ok(options)
}

async fn connect(config: &ResolvedConfig) -> Result<MySqlConnection, ConnectorError> {
    let options = connect_options(config)?;
    Ok(MySqlConnection::connect_with(&options).await?)
}

async fn list_tables(
    conn: &mut MySqlConnection,
    limit: Option<usize>,
) -> Result<Vec<(String, Option<i64>)>, ConnectorError> {
    let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
    let rows = sqlx::query(
        r#"
        SELECT CAST(TABLE_NAME AS CHAR) AS table_name, CAST(TABLE_ROWS AS SIGNED) AS estimate
        FROM information_schema.TABLES
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get("table_name")?;
        let estimate: Option<i64> = row.try_get("estimate")?;
        tables.push((name, estimate));
    }
    Ok(tables)
}

/// Convert a row of unknown shape to a JSON object, trying the common
/// column types in turn.
fn row_to_json(row: &MySqlRow) -> Value {
    let mut record = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if let Ok(val) = row.try_get::<Option<i64>, _>(i) {
            json!(val)
        } else if let Ok(val) = row.try_get::<Option<u64>, _>(i) {
            json!(val)
        } else if let Ok(val) = row.try_get::<Option<f64>, _>(i) {
            json!(val)
        } else if let Ok(val) = row.try_get::<Option<bool>, _>(i) {
            json!(val)
        } else if let Ok(val) = row.try_get::<Option<String>, _>(i) {
            json!(val)
        } else if let Ok(val) = row.try_get::<Option<chrono::NaiveDateTime>, _>(i) {
            json!(val.map(|v| v.to_string()))
        } else if let Ok(val) = row.try_get::<Option<chrono::NaiveDate>, _>(i) {
            json!(val.map(|v| v.to_string()))
        } else if let Ok(val) = row.try_get::<Option<Value>, _>(i) {
            val.unwrap_or(Value::Null)
        } else if let Ok(val) = row.try_get::<Option<Vec<u8>>, _>(i) {
            json!(val.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
        } else {
            Value::Null
        };
        record.insert(column.name().to_string(), value);
    }
    Value::Object(record)
}

#[async_trait]
impl DataSourceConnector for MySQLConnector {
    async fn test_connection(
        &self,
        config: &ResolvedConfig,
        timer: &LatencyTimer,
    ) -> Result<ServerInfo, ConnectorError> {
        let mut conn = connect(config).await?;
        sqlx::query("SELECT 1").execute(&mut conn).await?;
        timer.mark_round_trip();

        let mut info = ServerInfo::new();
        let details = sqlx::query(
            "SELECT CAST(VERSION() AS CHAR) AS version, CAST(DATABASE() AS CHAR) AS db, \
             CAST(CURRENT_USER() AS CHAR) AS username, CAST(@@time_zone AS CHAR) AS timezone",
        )
        .fetch_one(&mut conn)
        .await;

        match details {
            Ok(row) => {
                for (column, key) in [
                    ("version", "version"),
                    ("db", "database"),
                    ("username", "user"),
                    ("timezone", "timezone"),
                ] {
                    if let Ok(Some(value)) = row.try_get::<Option<String>, _>(column) {
                        info.insert(key.to_string(), json!(value));
                    }
                }
            }
            Err(e) => debug!("MySQL server details unavailable: {}", e),
        }

        let _ = conn.close().await;
        Ok(info)
    }

    async fn introspect_schema(
        &self,
        config: &ResolvedConfig,
        limits: &IntrospectionLimits,
    ) -> Result<Introspection, ConnectorError> {
        let mut conn = connect(config).await?;
        let tables = list_tables(&mut conn, Some(limits.fetch_tables())).await?;

        // MySQL cannot bind a list, so fetch the schema's columns and keep the selected tables.
        let column_rows = sqlx::query(
            r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS table_name,
                   CAST(COLUMN_NAME AS CHAR) AS column_name,
                   CAST(COLUMN_TYPE AS CHAR) AS data_type
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME, ORDINAL_POSITION
            "#,
        )
        .fetch_all(&mut conn)
        .await?;

        let mut columns: HashMap<String, Vec<ColumnInfo>> =
            tables.iter().map(|(name, _)| (name.clone(), Vec::new())).collect();
        for row in &column_rows {
            let table: String = row.try_get("table_name")?;
            if let Some(list) = columns.get_mut(&table) {
                list.push(ColumnInfo {
                    name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                });
            }
        }

        let _ = conn.close().await;

        Ok(Introspection::Tables(
            tables
                .into_iter()
                .map(|(name, estimate)| TableInfo {
                    columns: columns.remove(&name).unwrap_or_default(),
                    row_count: estimate,
                    ..TableInfo::new(name)
                })
                .collect(),
        ))
    }

    async fn open_reader(&self, config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError> {
        let conn = connect(config).await?;
        Ok(Box::new(MySqlReader {
            conn,
            order: HashMap::new(),
        }))
    }
}

/// Columns giving a stable row order for offset paging: the primary key, else
/// the first unique index, else every column.
async fn paging_order(conn: &mut MySqlConnection, table: &str) -> Result<Vec<String>, ConnectorError> {
    let index_rows = sqlx::query(
        r#"
        SELECT CAST(INDEX_NAME AS CHAR) AS index_name,
               CAST(COLUMN_NAME AS CHAR) AS column_name
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND NON_UNIQUE = 0
        ORDER BY INDEX_NAME = 'PRIMARY' DESC, INDEX_NAME, SEQ_IN_INDEX
        "#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    let keyed = index_rows
        .iter()
        .map(|row| -> Result<(String, Option<String>), sqlx::Error> {
            Ok((row.try_get("index_name")?, row.try_get("column_name")?))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(key) = pick_unique_key(keyed) {
        return Ok(key);
    }

    let columns = sqlx::query(
        r#"
        SELECT CAST(COLUMN_NAME AS CHAR) AS column_name
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    debug!("Table '{}' has no unique key, paging ordered by all columns", table);
    Ok(columns
        .iter()
        .map(|row| row.try_get("column_name"))
        .collect::<Result<Vec<String>, _>>()?)
}

struct MySqlReader {
    conn: MySqlConnection,
    /// ORDER BY list per table, resolved on first read.
    order: HashMap<String, String>,
}

#[async_trait]
impl BatchReader for MySqlReader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        let tables = list_tables(&mut self.conn, None).await?;
        Ok(tables.into_iter().map(|(name, _)| name).collect())
    }

    async fn read_batch(
        &mut self,
        _config: &ResolvedConfig,
        stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure> {
        if !self.order.contains_key(stream) {
            let columns = paging_order(&mut self.conn, stream).await?;
            self.order
                .insert(stream.to_string(), order_by_columns(&columns, quote_mysql_ident));
        }
        let order = self.order.get(stream).map(String::as_str).unwrap_or_default();
        let sql = if order.is_empty() {
            format!("SELECT * FROM {} LIMIT ? OFFSET ?", quote_mysql_ident(stream))
        } else {
            format!(
                "SELECT * FROM {} ORDER BY {} LIMIT ? OFFSET ?",
                quote_mysql_ident(stream),
                order
            )
        };
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .bind(position.offset as i64)
            .fetch_all(&mut self.conn)
            .await
            .map_err(ConnectorError::from)?;

        let records: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(Batch {
            exhausted: short_page(&records, limit),
            records,
            next_token: None,
        })
    }
}
