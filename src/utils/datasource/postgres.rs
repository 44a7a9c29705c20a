use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection, Row};
use std::collections::HashMap;
use tracing::debug;

use super::base::{
    short_page, Batch, BatchFailure, BatchReader, ColumnInfo, DataSourceConnector, Introspection,
    IntrospectionLimits, LatencyTimer, ServerInfo, TableInfo,
};
use super::common::{order_by_columns, pick_unique_key, quote_pg_ident, ConnectorError};
use crate::models::{required, CredentialField, ResolvedConfig, StreamPosition};

const DEFAULT_SCHEMA: &str = "public";

pub struct PostgreSQLConnector;

fn connect_options(config: &ResolvedConfig) -> Result<PgConnectOptions, ConnectorError> {
    let db = config.database()?;
    let mut options = PgConnectOptions::new()
        .host(required(&db.host, "host")?)
        .port(db.port.unwrap_or(5432))
        .database(required(&db.database, "database")?)
        .username(required(&db.username, "username")?)
        .application_name("datasource-hub")
        .ssl_mode(if db.ssl == Some(true) {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        });

    if let Some(password) = config.secret(CredentialField::Password) {
        options = options.password(password);
    }
    Ok(options)
}

fn schema_name(config: &ResolvedConfig) -> Result<String, ConnectorError> {
    Ok(config
        .database()?
        .schema
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()))
}

async fn connect(config: &ResolvedConfig) -> Result<PgConnection, ConnectorError> {
    let options = connect_options(config)?;
    Ok(PgConnection::connect_with(&options).await?)
}

async fn list_tables(
    conn: &mut PgConnection,
    schema: &str,
    limit: Option<usize>,
) -> Result<Vec<(String, Option<i64>)>, ConnectorError> {
    let limit = limit.map(|l| l as i64).unwrap_or(i64::MAX);
    let rows = sqlx::query(
        r#"
        SELECT c.relname::text AS table_name, c.reltuples::bigint AS estimate
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relkind IN ('r', 'p')
        ORDER BY c.relname
        LIMIT $2
        "#,
    )
    .bind(schema)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let name: String = row.try_get("table_name")?;
            let estimate: Option<i64> = row.try_get("estimate")?;
            // reltuples is -1 for tables that were never analyzed
            Ok((name, estimate.filter(|e| *e >= 0)))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(ConnectorError::from)
}

#[async_trait]
impl DataSourceConnector for PostgreSQLConnector {
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
            "SELECT version() AS version, current_database()::text AS database, \
             current_user::text AS username, current_setting('TimeZone') AS timezone",
        )
        .fetch_one(&mut conn)
        .await;

        match details {
            Ok(row) => {
                for (column, key) in [
                    ("version", "version"),
                    ("database", "database"),
                    ("username", "user"),
                    ("timezone", "timezone"),
                ] {
                    if let Ok(value) = row.try_get::<String, _>(column) {
                        info.insert(key.to_string(), json!(value));
                    }
                }
            }
            Err(e) => debug!("PostgreSQL server details unavailable: {}", e),
        }

        let _ = conn.close().await;
        Ok(info)
    }

    async fn introspect_schema(
        &self,
        config: &ResolvedConfig,
        limits: &IntrospectionLimits,
    ) -> Result<Introspection, ConnectorError> {
        let schema = schema_name(config)?;
        let mut conn = connect(config).await?;

        let tables = list_tables(&mut conn, &schema, Some(limits.fetch_tables())).await?;
        let names: Vec<String> = tables.iter().map(|(name, _)| name.clone()).collect();

        let column_rows = sqlx::query(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name, data_type::text AS data_type
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = ANY($2)
            ORDER BY table_name, ordinal_position
            "#,
        )
        .bind(&schema)
        .bind(&names)
        .fetch_all(&mut conn)
        .await?;

        let mut columns: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
        for row in &column_rows {
            let table: String = row.try_get("table_name")?;
            columns.entry(table).or_default().push(ColumnInfo {
                name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
            });
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
        let schema = schema_name(config)?;
        let conn = connect(config).await?;
        Ok(Box::new(PostgresReader {
            conn,
            schema,
            order: HashMap::new(),
        }))
    }
}

/// ORDER BY list giving a stable row order for offset paging: the primary key,
/// else the first non-partial unique index, else the whole row's text form.
async fn paging_order(conn: &mut PgConnection, schema: &str, table: &str) -> Result<String, ConnectorError> {
    let index_rows = sqlx::query(
        r#"
        SELECT i.indexrelid::bigint::text AS index_name,
               a.attname::text AS column_name
        FROM pg_index i
        JOIN pg_class c ON c.oid = i.indrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        CROSS JOIN LATERAL unnest(i.indkey::smallint[]) WITH ORDINALITY AS k(attnum, ord)
        LEFT JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum AND k.attnum > 0
        WHERE n.nspname = $1 AND c.relname = $2
          AND i.indisunique AND i.indpred IS NULL
        ORDER BY i.indisprimary DESC, i.indexrelid, k.ord
        "#,
    )
    .bind(schema)
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;

    let keyed = index_rows
        .iter()
        .map(|row| -> Result<(String, Option<String>), sqlx::Error> {
            Ok((row.try_get("index_name")?, row.try_get("column_name")?))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match pick_unique_key(keyed) {
        Some(key) => order_by_columns(&key, |c| format!("t.{}", quote_pg_ident(c))),
        None => {
            debug!("Table '{}.{}' has no unique key, paging ordered by row text", schema, table);
            "t::text".to_string()
        }
    })
}

struct PostgresReader {
    conn: PgConnection,
    schema: String,
    /// ORDER BY list per table, resolved on first read.
    order: HashMap<String, String>,
}

#[async_trait]
impl BatchReader for PostgresReader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        let tables = list_tables(&mut self.conn, &self.schema, None).await?;
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
            let order = paging_order(&mut self.conn, &self.schema, stream).await?;
            self.order.insert(stream.to_string(), order);
        }
        let order = self.order.get(stream).map(String::as_str).unwrap_or("t::text");
        let sql = format!(
            "SELECT row_to_json(t) AS record FROM {}.{} t ORDER BY {} OFFSET $1 LIMIT $2",
            quote_pg_ident(&self.schema),
            quote_pg_ident(stream),
            order
        );
        let rows = sqlx::query(&sql)
            .bind(position.offset as i64)
            .bind(limit as i64)
            .fetch_all(&mut self.conn)
            .await
            .map_err(ConnectorError::from)?;

        let records = rows
            .iter()
            .map(|row| row.try_get::<Value, _>("record"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConnectorError::from)?;

        Ok(Batch {
            exhausted: short_page(&records, limit),
            records,
            next_token: None,
        })
    }
}
