use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::ResolvedConfig;
use crate::utils::datasource::{ConnectorError, DataSourceConnector, LatencyTimer, ServerInfo};

/// What happened to one connection attempt.
#[derive(Debug)]
pub enum TestOutcome {
    Success {
        latency: Duration,
        server_info: ServerInfo,
    },
    Failed {
        error: ConnectorError,
        /// Only set when the server answered before failing.
        latency: Option<Duration>,
    },
    Cancelled,
}

/// Response body of the test endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    pub message: String,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

impl From<&TestOutcome> for TestResult {
    fn from(outcome: &TestOutcome) -> Self {
        match outcome {
            TestOutcome::Success { latency, server_info } => TestResult {
                success: true,
                message: "Connection successful".to_string(),
                response_time: Some(latency.as_millis() as u64),
                server_info: Some(server_info.clone()),
            },
            TestOutcome::Failed { error, latency } => TestResult {
                success: false,
                message: error.to_string(),
                response_time: latency.map(|l| l.as_millis() as u64),
                server_info: None,
            },
            TestOutcome::Cancelled => TestResult {
                success: false,
                message: "cancelled".to_string(),
                response_time: None,
                server_info: None,
            },
        }
    }
}

/// Run one connection attempt bounded by `timeout` and `cancel`. Pure: the
/// caller owns every state change.
pub async fn run_test(
    connector: &dyn DataSourceConnector,
    config: &ResolvedConfig,
    timeout: Duration,
    cancel: &CancellationToken,
) -> TestOutcome {
    let timer = LatencyTimer::start();

    let attempt = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(timeout, connector.test_connection(config, &timer)) => Some(result),
    };

    match attempt {
        None => {
            debug!("🛑 Connection test for {} cancelled", config.source_type);
            TestOutcome::Cancelled
        }
        Some(Ok(Ok(server_info))) => TestOutcome::Success {
            latency: timer.latency(),
            server_info,
        },
        Some(Ok(Err(error))) => {
            warn!("❌ Connection test for {} failed: {}", config.source_type, error);
            let latency = error.implies_round_trip().then(|| timer.latency());
            TestOutcome::Failed { error, latency }
        }
        Some(Err(_)) => {
            warn!(
                "⏱️ Connection test for {} timed out after {:?}",
                config.source_type, timeout
            );
            TestOutcome::Failed {
                error: ConnectorError::Timeout,
                latency: None,
            }
        }
    }
}
