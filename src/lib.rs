// Datasource Hub Backend Library
// Exposes the connector layer, the data source service and the HTTP router

pub mod api;
pub mod core;
pub mod models;
pub mod utils;

// Re-export commonly used types for convenience
pub use crate::core::datasources::{DataSourceService, DataSourceStore, MemoryDataSourceStore, RetryPolicy, TestResult};
pub use crate::utils::datasource::{ConnectorError, ConnectorRegistry, DataSourceConnector};
pub use crate::utils::{AppError, AppState, Config};
