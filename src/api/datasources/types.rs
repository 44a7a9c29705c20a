use salvo::prelude::*;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{DataSourceFilter, DataSourceStatus, DataSourceType};
use crate::utils::AppError;

/// Upper bound of the `timeoutMs` override on connection tests.
pub const MAX_TEST_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelTestResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    pub job_id: Uuid,
    pub data_source_id: Uuid,
}

pub fn data_source_id(req: &Request) -> Result<Uuid, AppError> {
    let raw = req
        .param::<String>("id")
        .ok_or_else(|| AppError::BadRequest("Missing data source id".to_string()))?;
    Uuid::parse_str(&raw).map_err(|_| AppError::BadRequest(format!("Invalid data source id '{}'", raw)))
}

pub fn list_filter(req: &Request) -> Result<DataSourceFilter, AppError> {
    let search = req
        .query::<String>("search")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let source_type = match req.query::<String>("type").filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<DataSourceType>().map_err(AppError::Validation)?),
        None => None,
    };
    let status = match req.query::<String>("status").filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<DataSourceStatus>().map_err(AppError::Validation)?),
        None => None,
    };
    Ok(DataSourceFilter {
        search,
        source_type,
        status,
    })
}

/// `?timeoutMs=` override, bounded to 1..=120000.
pub fn test_timeout(req: &Request) -> Result<Option<Duration>, AppError> {
    match req.query::<String>("timeoutMs") {
        None => Ok(None),
        Some(raw) => {
            let ms = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| AppError::Validation(format!("timeoutMs must be a number, got '{}'", raw)))?;
            if ms == 0 || ms > MAX_TEST_TIMEOUT_MS {
                return Err(AppError::Validation(format!(
                    "timeoutMs must be between 1 and {}",
                    MAX_TEST_TIMEOUT_MS
                )));
            }
            Ok(Some(Duration::from_millis(ms)))
        }
    }
}
