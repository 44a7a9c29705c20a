use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Immutable record of one synchronization attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub id: Uuid,
    pub data_source_id: Uuid,
    pub success: bool,
    pub records_sync: i64,
    /// Wall-clock duration of the run in milliseconds.
    pub duration: i64,
    pub error_message: Option<String>,
    pub failed_batches: i32,
    pub cursor: Option<SyncCursor>,
    pub created_at: DateTime<Utc>,
}

/// Position reached inside one stream (table, collection, sheet tab, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Per-stream watermark carried from one sync run to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub streams: BTreeMap<String, StreamPosition>,
}

impl SyncCursor {
    pub fn position(&self, stream: &str) -> StreamPosition {
        self.streams.get(stream).cloned().unwrap_or_default()
    }

    pub fn set_position(&mut self, stream: &str, position: StreamPosition) {
        self.streams.insert(stream.to_string(), position);
    }
}
