//! Status transitions and metric updates. Every function here mutates a
//! `DataSource` in memory and must run under that data source's lock.

use chrono::{DateTime, Utc};

use super::sync_engine::SyncReport;
use super::tester::TestOutcome;
use crate::models::{DataSource, DataSourceStatus};
use crate::utils::AppError;

/// Move to `TESTING`, returning the status to restore if the test is cancelled.
pub fn begin_test(ds: &mut DataSource, now: DateTime<Utc>) -> Result<DataSourceStatus, AppError> {
    if ds.status == DataSourceStatus::Testing {
        return Err(AppError::Conflict(format!(
            "A connection test is already running for data source {}",
            ds.id
        )));
    }
    let previous = ds.status;
    ds.status = DataSourceStatus::Testing;
    ds.updated_at = now;
    Ok(previous)
}

/// Apply the outcome of a connection test.
///
/// The status only moves when the data source is still `TESTING`: an explicit
/// disconnect during the test wins, and an overridden test feeds no metrics.
/// `lastConnectionTest` is always stamped.
pub fn finish_test(ds: &mut DataSource, outcome: &TestOutcome, restore: DataSourceStatus, now: DateTime<Utc>) {
    let testing = ds.status == DataSourceStatus::Testing;
    ds.last_connection_test = Some(now);
    ds.updated_at = now;

    match outcome {
        TestOutcome::Success { latency, .. } => {
            if testing {
                record_test_latency(ds, latency.as_secs_f64() * 1000.0);
                ds.status = DataSourceStatus::Connected;
                ds.connection_error = None;
            }
        }
        TestOutcome::Failed { error, .. } => {
            if testing {
                ds.status = DataSourceStatus::Error;
                ds.connection_error = Some(error.to_string());
            }
        }
        TestOutcome::Cancelled => {
            if testing {
                ds.status = restore;
            }
        }
    }
}

/// Running mean over successful tests: `avg += (x - avg) / n`.
pub fn record_test_latency(ds: &mut DataSource, latency_ms: f64) {
    ds.successful_tests += 1;
    let n = ds.successful_tests as f64;
    let avg = ds.avg_response_time.unwrap_or(0.0);
    ds.avg_response_time = Some(avg + (latency_ms - avg) / n);
}

/// Fold a finished sync run into the counters. A failed run moves the data
/// source to `ERROR`, unless a test is in flight (that test decides instead)
/// or it was explicitly disconnected.
pub fn finish_sync(ds: &mut DataSource, report: &SyncReport, now: DateTime<Utc>) {
    ds.total_syncs += 1;
    ds.total_records += report.records as i64;
    ds.updated_at = now;

    if report.success {
        ds.last_successful_sync = Some(now);
    } else {
        ds.failed_syncs += 1;
        let message = report
            .error_message
            .clone()
            .unwrap_or_else(|| "sync failed".to_string());
        if !matches!(ds.status, DataSourceStatus::Testing | DataSourceStatus::Disconnected) {
            ds.status = DataSourceStatus::Error;
        }
        ds.connection_error = Some(message);
    }
}

pub fn disconnect(ds: &mut DataSource, now: DateTime<Utc>) {
    ds.status = DataSourceStatus::Disconnected;
    ds.updated_at = now;
}

/// Connection fields changed: the last test result no longer applies.
pub fn reconfigure(ds: &mut DataSource, now: DateTime<Utc>) {
    ds.status = DataSourceStatus::Configuring;
    ds.connection_error = None;
    ds.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionConfig, DataSourceType, SyncCursor};
    use crate::utils::datasource::ConnectorError;
    use std::time::Duration;

    fn data_source() -> DataSource {
        DataSource::new(
            "warehouse".into(),
            None,
            DataSourceType::Postgresql,
            ConnectionConfig::empty_for(DataSourceType::Postgresql),
        )
    }

    fn success(ms: u64) -> TestOutcome {
        TestOutcome::Success {
            latency: Duration::from_millis(ms),
            server_info: Default::default(),
        }
    }

    fn report(success: bool, records: u64) -> SyncReport {
        SyncReport {
            success,
            records,
            failed_batches: 0,
            duration: Duration::from_millis(10),
            error_message: (!success).then(|| "authentication failed: revoked".to_string()),
            cursor: SyncCursor::default(),
        }
    }

    #[test]
    fn successful_test_connects_and_updates_mean() {
        let mut ds = data_source();
        let now = Utc::now();

        let restore = begin_test(&mut ds, now).unwrap();
        assert_eq!(restore, DataSourceStatus::Configuring);
        finish_test(&mut ds, &success(100), restore, now);
        begin_test(&mut ds, now).unwrap();
        finish_test(&mut ds, &success(200), restore, now);

        assert_eq!(ds.status, DataSourceStatus::Connected);
        assert_eq!(ds.successful_tests, 2);
        assert!((ds.avg_response_time.unwrap() - 150.0).abs() < 1e-9);
        assert_eq!(ds.last_connection_test, Some(now));
    }

    #[test]
    fn failed_test_records_error_and_keeps_metrics() {
        let mut ds = data_source();
        let restore = begin_test(&mut ds, Utc::now()).unwrap();
        let outcome = TestOutcome::Failed {
            error: ConnectorError::Timeout,
            latency: None,
        };
        finish_test(&mut ds, &outcome, restore, Utc::now());

        assert_eq!(ds.status, DataSourceStatus::Error);
        assert_eq!(ds.connection_error.as_deref(), Some("timeout"));
        assert_eq!(ds.successful_tests, 0);
        assert!(ds.avg_response_time.is_none());
        assert!(ds.last_connection_test.is_some());
    }

    #[test]
    fn cancelled_test_restores_previous_status() {
        let mut ds = data_source();
        ds.status = DataSourceStatus::Connected;
        let restore = begin_test(&mut ds, Utc::now()).unwrap();
        finish_test(&mut ds, &TestOutcome::Cancelled, restore, Utc::now());
        assert_eq!(ds.status, DataSourceStatus::Connected);
        assert_eq!(ds.successful_tests, 0);
    }

    #[test]
    fn second_test_while_testing_conflicts() {
        let mut ds = data_source();
        begin_test(&mut ds, Utc::now()).unwrap();
        assert!(matches!(begin_test(&mut ds, Utc::now()), Err(AppError::Conflict(_))));
    }

    #[test]
    fn disconnect_during_test_is_not_overridden() {
        let mut ds = data_source();
        let restore = begin_test(&mut ds, Utc::now()).unwrap();
        disconnect(&mut ds, Utc::now());
        finish_test(&mut ds, &success(40), restore, Utc::now());
        assert_eq!(ds.status, DataSourceStatus::Disconnected);
        assert_eq!(ds.successful_tests, 0);
        assert!(ds.avg_response_time.is_none());
        assert!(ds.last_connection_test.is_some());
    }

    #[test]
    fn failed_sync_moves_to_error() {
        let mut ds = data_source();
        ds.status = DataSourceStatus::Connected;

        finish_sync(&mut ds, &report(true, 300), Utc::now());
        assert_eq!(ds.status, DataSourceStatus::Connected);
        assert!(ds.last_successful_sync.is_some());

        finish_sync(&mut ds, &report(false, 20), Utc::now());
        assert_eq!(ds.status, DataSourceStatus::Error);
        assert_eq!(ds.total_syncs, 2);
        assert_eq!(ds.failed_syncs, 1);
        assert_eq!(ds.total_records, 320);
        assert!(ds.connection_error.unwrap().contains("auth"));
    }
}
