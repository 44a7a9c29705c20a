use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Component, Path, PathBuf};

use super::base::{
    short_page, Batch, BatchFailure, BatchReader, DataSourceConnector, LatencyTimer, ServerInfo,
};
use super::common::{format_bytes, ConnectorError};
use crate::models::{required, ResolvedConfig, StreamPosition};

/// CSV files previously uploaded into the upload directory.
pub struct CsvConnector {
    upload_dir: PathBuf,
}

impl CsvConnector {
    pub fn new(upload_dir: PathBuf) -> Self {
        CsvConnector { upload_dir }
    }

    fn file_path(&self, config: &ResolvedConfig) -> Result<PathBuf, ConnectorError> {
        let reference = required(&config.csv()?.uploaded_file_ref, "uploadedFileRef")?;
        resolve_upload(&self.upload_dir, reference)
    }
}

/// Resolve an upload reference inside `upload_dir`. Absolute paths and `..`
/// components are rejected.
pub fn resolve_upload(upload_dir: &Path, reference: &str) -> Result<PathBuf, ConnectorError> {
    let relative = Path::new(reference);
    let is_plain = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if reference.trim().is_empty() || !is_plain {
        return Err(ConnectorError::Config(format!(
            "uploadedFileRef '{}' must be a file name inside the upload directory",
            reference
        )));
    }
    Ok(upload_dir.join(relative))
}

/// Field delimiter implied by the upload's extension.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

fn open_csv(path: &Path) -> Result<csv::Reader<std::fs::File>, ConnectorError> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .delimiter(delimiter_for(path))
        .from_path(path)
        .map_err(|e| match e.kind() {
            csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                ConnectorError::Query(format!("uploaded file {} not found", path.display()))
            }
            _ => ConnectorError::Query(format!("cannot open {}: {}", path.display(), e)),
        })
}

fn headers(reader: &mut csv::Reader<std::fs::File>) -> Result<Vec<String>, ConnectorError> {
    Ok(reader
        .headers()
        .map_err(|e| ConnectorError::Query(format!("invalid CSV header: {}", e)))?
        .iter()
        .map(String::from)
        .collect())
}

fn record_to_json(headers: &[String], record: &csv::StringRecord) -> Value {
    let mut object = Map::new();
    for (i, value) in record.iter().enumerate() {
        let key = headers
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("column_{}", i + 1));
        object.insert(key, json!(value));
    }
    Value::Object(object)
}

/// Read rows `offset .. offset+limit`. A malformed row fails the batch after
/// the rows before it were accepted.
fn read_rows(path: &Path, offset: u64, limit: usize) -> Result<Vec<Value>, BatchFailure> {
    let mut reader = open_csv(path)?;
    let headers = headers(&mut reader)?;

    let mut records = Vec::with_capacity(limit);
    for result in reader.records().skip(offset as usize).take(limit) {
        match result {
            Ok(record) => records.push(record_to_json(&headers, &record)),
            Err(e) => {
                return Err(BatchFailure {
                    error: ConnectorError::Query(format!("malformed CSV row: {}", e)),
                    ingested: records.len() as u64,
                })
            }
        }
    }
    Ok(records)
}

async fn blocking<T, F>(task: F) -> Result<T, ConnectorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ConnectorError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ConnectorError::Query(format!("CSV reader task failed: {}", e)))?
}

#[async_trait]
impl DataSourceConnector for CsvConnector {
    async fn test_connection(
        &self,
        config: &ResolvedConfig,
        timer: &LatencyTimer,
    ) -> Result<ServerInfo, ConnectorError> {
        let path = self.file_path(config)?;
        let (columns, size) = blocking(move || {
            let mut reader = open_csv(&path)?;
            let columns = headers(&mut reader)?;
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            Ok((columns, size))
        })
        .await?;
        timer.mark_round_trip();

        let mut info = ServerInfo::new();
        info.insert("columns".to_string(), json!(columns));
        info.insert("sizeBytes".to_string(), json!(size));
        info.insert("size".to_string(), json!(format_bytes(size)));
        Ok(info)
    }

    async fn open_reader(&self, config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError> {
        let path = self.file_path(config)?;
        Ok(Box::new(CsvReader { path }))
    }
}

struct CsvReader {
    path: PathBuf,
}

#[async_trait]
impl BatchReader for CsvReader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        let stream = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("rows")
            .to_string();
        Ok(vec![stream])
    }

    async fn read_batch(
        &mut self,
        _config: &ResolvedConfig,
        _stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure> {
        let path = self.path.clone();
        let offset = position.offset;
        let records = tokio::task::spawn_blocking(move || read_rows(&path, offset, limit))
            .await
            .map_err(|e| ConnectorError::Query(format!("CSV reader task failed: {}", e)))??;

        Ok(Batch {
            exhausted: short_page(&records, limit),
            records,
            next_token: None,
        })
    }
}
