use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::base::DataSourceConnector;
use super::csv_file::CsvConnector;
use super::google_sheets::GoogleSheetsConnector;
use super::mongo::MongoConnector;
use super::mysql::MySQLConnector;
use super::postgres::PostgreSQLConnector;
use super::rest::{ApiFlavor, HttpApiConnector};
use super::s3::S3Connector;
use crate::models::DataSourceType;

/// Resolves the connector for a data source type. Built-in connectors are
/// created on demand; tests can register replacements per type.
#[derive(Clone)]
pub struct ConnectorRegistry {
    http: reqwest::Client,
    upload_dir: PathBuf,
    overrides: HashMap<DataSourceType, Arc<dyn DataSourceConnector>>,
}

impl ConnectorRegistry {
    pub fn builtin(upload_dir: PathBuf) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("datasource-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        ConnectorRegistry {
            http,
            upload_dir,
            overrides: HashMap::new(),
        }
    }

    /// Replace the connector used for one type.
    pub fn with_connector(mut self, source_type: DataSourceType, connector: Arc<dyn DataSourceConnector>) -> Self {
        self.overrides.insert(source_type, connector);
        self
    }

    pub fn connector(&self, source_type: DataSourceType) -> Arc<dyn DataSourceConnector> {
        match self.overrides.get(&source_type) {
            Some(connector) => connector.clone(),
            None => create_connector(source_type, &self.http, &self.upload_dir),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}

pub fn create_connector(
    source_type: DataSourceType,
    http: &reqwest::Client,
    upload_dir: &Path,
) -> Arc<dyn DataSourceConnector> {
    match source_type {
        DataSourceType::Postgresql => Arc::new(PostgreSQLConnector),
        DataSourceType::Mysql => Arc::new(MySQLConnector),
        DataSourceType::Mongodb => Arc::new(MongoConnector),
        DataSourceType::RestApi => Arc::new(HttpApiConnector::new(http.clone(), ApiFlavor::Rest)),
        DataSourceType::Graphql => Arc::new(HttpApiConnector::new(http.clone(), ApiFlavor::Graphql)),
        DataSourceType::S3 => Arc::new(S3Connector),
        DataSourceType::GoogleSheets => Arc::new(GoogleSheetsConnector::new(http.clone())),
        DataSourceType::CsvFile => Arc::new(CsvConnector::new(upload_dir.to_path_buf())),
    }
}
