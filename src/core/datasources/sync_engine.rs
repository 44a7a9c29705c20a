use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::models::{ResolvedConfig, StreamPosition, SyncCursor};
use crate::utils::datasource::{BatchFailure, BatchReader, ConnectorError, DataSourceConnector};
use crate::utils::ConnectorSettings;

/// A run aborts after this many batches in a row failed.
pub const MAX_CONSECUTIVE_BATCH_FAILURES: u32 = 3;

/// Exponential backoff for retryable batch errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` already failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Result of one sync run, written to exactly one `SyncLog`.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub success: bool,
    pub records: u64,
    pub failed_batches: u32,
    pub duration: Duration,
    pub error_message: Option<String>,
    pub cursor: SyncCursor,
}

impl SyncReport {
    /// A run that never reached the source.
    pub fn aborted(message: String, cursor: SyncCursor, duration: Duration) -> Self {
        SyncReport {
            success: false,
            records: 0,
            failed_batches: 0,
            duration,
            error_message: Some(message),
            cursor,
        }
    }
}

/// Progress survives the run future being dropped on timeout.
struct SyncProgress {
    records: u64,
    failed_batches: u32,
    consecutive_failures: u32,
    last_error: Option<ConnectorError>,
    cursor: SyncCursor,
}

enum BatchOutcome {
    Read { exhausted: bool },
    Failed(ConnectorError),
    Fatal(ConnectorError),
}

#[derive(Debug, Clone)]
pub struct SyncEngine {
    retry: RetryPolicy,
    batch_size: usize,
    batch_timeout: Duration,
    run_timeout: Duration,
}

impl SyncEngine {
    pub fn new(settings: &ConnectorSettings, retry: RetryPolicy) -> Self {
        SyncEngine {
            retry,
            batch_size: settings.sync_batch_size.max(1),
            batch_timeout: settings.sync_batch_timeout,
            run_timeout: settings.sync_timeout,
        }
    }

    /// Pull every stream from its cursor position to the end.
    pub async fn run(
        &self,
        connector: &dyn DataSourceConnector,
        config: &ResolvedConfig,
        cursor: SyncCursor,
    ) -> SyncReport {
        let started = Instant::now();
        let mut progress = SyncProgress {
            records: 0,
            failed_batches: 0,
            consecutive_failures: 0,
            last_error: None,
            cursor,
        };

        let result = tokio::time::timeout(self.run_timeout, self.drive(connector, config, &mut progress)).await;

        let (success, error_message) = match result {
            Ok(Ok(())) => {
                let message = progress.last_error.as_ref().map(|e| {
                    format!(
                        "{} batch(es) skipped after retries; last error: {}",
                        progress.failed_batches, e
                    )
                });
                (true, message)
            }
            Ok(Err(fatal)) => (false, Some(fatal)),
            Err(_) => (false, Some(ConnectorError::Timeout.to_string())),
        };

        SyncReport {
            success,
            records: progress.records,
            failed_batches: progress.failed_batches,
            duration: started.elapsed(),
            error_message,
            cursor: progress.cursor,
        }
    }

    async fn drive(
        &self,
        connector: &dyn DataSourceConnector,
        config: &ResolvedConfig,
        progress: &mut SyncProgress,
    ) -> Result<(), String> {
        let mut reader = self.open_with_retry(connector, config).await?;
        let streams = self.streams_with_retry(reader.as_mut(), config).await?;
        info!("🔄 Syncing {} stream(s) from {}", streams.len(), config.source_type);

        for stream in streams {
            let mut position = progress.cursor.position(&stream);
            debug!("Stream '{}' resumes at offset {}", stream, position.offset);

            loop {
                let batch_start = position.offset;
                match self
                    .read_with_retry(reader.as_mut(), config, &stream, &mut position, progress)
                    .await
                {
                    BatchOutcome::Read { exhausted } => {
                        progress.consecutive_failures = 0;
                        progress.cursor.set_position(&stream, position.clone());
                        if exhausted {
                            break;
                        }
                    }
                    BatchOutcome::Failed(error) => {
                        progress.failed_batches += 1;
                        progress.consecutive_failures += 1;
                        warn!(
                            "⚠️ Batch at offset {} of '{}' failed, skipping: {}",
                            batch_start, stream, error
                        );
                        if progress.consecutive_failures >= MAX_CONSECUTIVE_BATCH_FAILURES {
                            progress.cursor.set_position(&stream, position.clone());
                            return Err(format!(
                                "aborted after {} consecutive failed batches: {}",
                                progress.consecutive_failures, error
                            ));
                        }
                        progress.last_error = Some(error);
                        // Skip to the next batch boundary. Records accepted before the
                        // failure already moved the offset part of the way.
                        position.offset = position.offset.max(batch_start + self.batch_size as u64);
                        progress.cursor.set_position(&stream, position.clone());
                    }
                    BatchOutcome::Fatal(error) => {
                        progress.cursor.set_position(&stream, position.clone());
                        return Err(error.to_string());
                    }
                }
            }
        }
        Ok(())
    }

    async fn open_with_retry(
        &self,
        connector: &dyn DataSourceConnector,
        config: &ResolvedConfig,
    ) -> Result<Box<dyn BatchReader>, String> {
        let mut attempt = 1;
        loop {
            match connector.open_reader(config).await {
                Ok(reader) => return Ok(reader),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!("⏳ Opening {} reader failed (attempt {}): {}", config.source_type, attempt, error);
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.to_string()),
            }
        }
    }

    async fn streams_with_retry(
        &self,
        reader: &mut dyn BatchReader,
        config: &ResolvedConfig,
    ) -> Result<Vec<String>, String> {
        let mut attempt = 1;
        loop {
            match reader.streams(config).await {
                Ok(streams) => return Ok(streams),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(error) => return Err(error.to_string()),
            }
        }
    }

    async fn read_with_retry(
        &self,
        reader: &mut dyn BatchReader,
        config: &ResolvedConfig,
        stream: &str,
        position: &mut StreamPosition,
        progress: &mut SyncProgress,
    ) -> BatchOutcome {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(
                self.batch_timeout,
                reader.read_batch(config, stream, position, self.batch_size),
            )
            .await;

            let failure = match result {
                Ok(Ok(batch)) => {
                    let count = batch.records.len() as u64;
                    progress.records += count;
                    position.offset += count;
                    if batch.next_token.is_some() {
                        position.token = batch.next_token;
                    }
                    return BatchOutcome::Read {
                        exhausted: batch.exhausted || count == 0,
                    };
                }
                Ok(Err(failure)) => failure,
                Err(_) => BatchFailure::from(ConnectorError::Timeout),
            };

            // Records accepted before the failure count, and are not re-read.
            if failure.ingested > 0 {
                progress.records += failure.ingested;
                position.offset += failure.ingested;
                progress.cursor.set_position(stream, position.clone());
            }

            if failure.error.is_fatal() {
                return BatchOutcome::Fatal(failure.error);
            }
            if !failure.error.is_retryable() || attempt >= self.retry.max_attempts {
                return BatchOutcome::Failed(failure.error);
            }

            debug!(
                "Retrying batch at offset {} of '{}' (attempt {}): {}",
                position.offset, stream, attempt, failure.error
            );
            tokio::time::sleep(self.retry.delay_after(attempt)).await;
            attempt += 1;
        }
    }
}
