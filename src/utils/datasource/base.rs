use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use super::common::ConnectorError;
use crate::models::{ResolvedConfig, StreamPosition};

/// Best-effort facts about the remote end (version, database, user, ...).
pub type ServerInfo = Map<String, Value>;

/// Measures connection establishment plus the first round trip. The
/// connector marks the point where the first response arrived; anything
/// after that (metadata queries, closing) is not part of the latency.
#[derive(Debug)]
pub struct LatencyTimer {
    started: Instant,
    round_trip: OnceLock<Duration>,
}

impl LatencyTimer {
    pub fn start() -> Self {
        LatencyTimer {
            started: Instant::now(),
            round_trip: OnceLock::new(),
        }
    }

    /// Record the first round trip. Later calls are ignored.
    pub fn mark_round_trip(&self) {
        let _ = self.round_trip.set(self.started.elapsed());
    }

    /// Marked latency, or the elapsed time when the connector never marked one.
    pub fn latency(&self) -> Duration {
        self.round_trip
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// Planner or catalog estimate. Omitted when the source has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub columns_truncated: bool,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        TableInfo {
            name: name.into(),
            columns: Vec::new(),
            row_count: None,
            columns_truncated: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IntrospectionLimits {
    pub max_tables: usize,
    pub max_columns: usize,
}

impl IntrospectionLimits {
    /// Connectors fetch one extra row so truncation can be detected.
    pub fn fetch_tables(&self) -> usize {
        self.max_tables.saturating_add(1)
    }
}

pub enum Introspection {
    Tables(Vec<TableInfo>),
    Unsupported,
}

/// One page of records read from a stream.
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<Value>,
    /// Continuation token for sources that page by key rather than offset.
    pub next_token: Option<String>,
    pub exhausted: bool,
}

/// A batch that failed after `ingested` records had already been accepted.
#[derive(Debug)]
pub struct BatchFailure {
    pub error: ConnectorError,
    pub ingested: u64,
}

impl From<ConnectorError> for BatchFailure {
    fn from(error: ConnectorError) -> Self {
        BatchFailure { error, ingested: 0 }
    }
}

/// Reads a source stream by stream, page by page. Credentials are passed in
/// on every call so a reader never keeps its own copy.
#[async_trait]
pub trait BatchReader: Send {
    async fn streams(&mut self, config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError>;

    async fn read_batch(
        &mut self,
        config: &ResolvedConfig,
        stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure>;
}

#[async_trait]
pub trait DataSourceConnector: Send + Sync {
    /// Open a connection, perform one round trip and describe the server.
    async fn test_connection(
        &self,
        config: &ResolvedConfig,
        timer: &LatencyTimer,
    ) -> Result<ServerInfo, ConnectorError>;

    /// List tables or collections with their columns. Sources without a
    /// schema keep the default.
    async fn introspect_schema(
        &self,
        _config: &ResolvedConfig,
        _limits: &IntrospectionLimits,
    ) -> Result<Introspection, ConnectorError> {
        Ok(Introspection::Unsupported)
    }

    async fn open_reader(&self, config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError>;
}

/// Records from a page are exhausted when the source returned a short page.
pub fn short_page(records: &[Value], limit: usize) -> bool {
    records.len() < limit
}
