use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::connection_config::ConnectionConfig;
use super::sync_log::SyncLog;

/// The closed set of external systems a data source can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceType {
    Postgresql,
    Mysql,
    Mongodb,
    RestApi,
    Graphql,
    S3,
    GoogleSheets,
    CsvFile,
}

impl DataSourceType {
    pub const ALL: [DataSourceType; 8] = [
        DataSourceType::Postgresql,
        DataSourceType::Mysql,
        DataSourceType::Mongodb,
        DataSourceType::RestApi,
        DataSourceType::Graphql,
        DataSourceType::S3,
        DataSourceType::GoogleSheets,
        DataSourceType::CsvFile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceType::Postgresql => "POSTGRESQL",
            DataSourceType::Mysql => "MYSQL",
            DataSourceType::Mongodb => "MONGODB",
            DataSourceType::RestApi => "REST_API",
            DataSourceType::Graphql => "GRAPHQL",
            DataSourceType::S3 => "S3",
            DataSourceType::GoogleSheets => "GOOGLE_SHEETS",
            DataSourceType::CsvFile => "CSV_FILE",
        }
    }

    /// Tabular and collection-oriented sources expose a schema.
    pub fn supports_introspection(&self) -> bool {
        matches!(
            self,
            DataSourceType::Postgresql | DataSourceType::Mysql | DataSourceType::Mongodb
        )
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            DataSourceType::Postgresql => Some(5432),
            DataSourceType::Mysql => Some(3306),
            DataSourceType::Mongodb => Some(27017),
            _ => None,
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceType {
    type Err = String;

    /// Accepts the canonical names plus the common spellings users type
    /// into forms ("postgres", "mongo", "rest", "sheets", "csv", ...).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input
            .to_lowercase()
            .replace([' ', '-', '_'], "");

        match normalized.as_str() {
            "postgresql" | "postgres" | "pgsql" | "pg" => Ok(DataSourceType::Postgresql),
            "mysql" | "mariadb" => Ok(DataSourceType::Mysql),
            "mongodb" | "mongo" => Ok(DataSourceType::Mongodb),
            "restapi" | "rest" | "http" => Ok(DataSourceType::RestApi),
            "graphql" | "gql" => Ok(DataSourceType::Graphql),
            "s3" | "amazons3" => Ok(DataSourceType::S3),
            "googlesheets" | "sheets" | "gsheets" => Ok(DataSourceType::GoogleSheets),
            "csvfile" | "csv" => Ok(DataSourceType::CsvFile),
            _ => Err(format!(
                "Invalid type '{}'. Must be one of: {}",
                input,
                DataSourceType::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSourceStatus {
    Configuring,
    Testing,
    Connected,
    Error,
    Disconnected,
}

impl DataSourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceStatus::Configuring => "CONFIGURING",
            DataSourceStatus::Testing => "TESTING",
            DataSourceStatus::Connected => "CONNECTED",
            DataSourceStatus::Error => "ERROR",
            DataSourceStatus::Disconnected => "DISCONNECTED",
        }
    }
}

impl fmt::Display for DataSourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_uppercase().as_str() {
            "CONFIGURING" => Ok(DataSourceStatus::Configuring),
            "TESTING" => Ok(DataSourceStatus::Testing),
            "CONNECTED" => Ok(DataSourceStatus::Connected),
            "ERROR" => Ok(DataSourceStatus::Error),
            "DISCONNECTED" => Ok(DataSourceStatus::Disconnected),
            other => Err(format!("Invalid status '{}'", other)),
        }
    }
}

/// A configured external connection with its lifecycle status and metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub source_type: DataSourceType,
    pub status: DataSourceStatus,
    pub config: ConnectionConfig,
    /// Names of the credential fields held in the vault. Values never leave it.
    pub credential_fields: Vec<String>,
    #[serde(skip)]
    pub encrypted_credentials: Option<String>,
    pub connection_error: Option<String>,
    pub last_connection_test: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub total_records: i64,
    pub total_syncs: i64,
    pub failed_syncs: i64,
    pub successful_tests: i64,
    /// Running mean of successful test latencies, in milliseconds.
    pub avg_response_time: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DataSource {
    pub fn new(
        name: String,
        description: Option<String>,
        source_type: DataSourceType,
        config: ConnectionConfig,
    ) -> Self {
        let now = Utc::now();
        DataSource {
            id: Uuid::new_v4(),
            name,
            description,
            source_type,
            status: DataSourceStatus::Configuring,
            config,
            credential_fields: Vec::new(),
            encrypted_credentials: None,
            connection_error: None,
            last_connection_test: None,
            last_successful_sync: None,
            total_records: 0,
            total_syncs: 0,
            failed_syncs: 0,
            successful_tests: 0,
            avg_response_time: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// `GET /api/data-sources/:id` payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceDetail {
    #[serde(flatten)]
    pub data_source: DataSource,
    pub sync_logs: Vec<SyncLog>,
}

/// List filter; every field narrows the result when present.
#[derive(Debug, Clone, Default)]
pub struct DataSourceFilter {
    pub search: Option<String>,
    pub source_type: Option<DataSourceType>,
    pub status: Option<DataSourceStatus>,
}

impl DataSourceFilter {
    pub fn matches(&self, data_source: &DataSource) -> bool {
        if let Some(source_type) = self.source_type {
            if data_source.source_type != source_type {
                return false;
            }
        }
        if let Some(status) = self.status {
            if data_source.status != status {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref() {
            let needle = search.to_lowercase();
            let in_name = data_source.name.to_lowercase().contains(&needle);
            let in_description = data_source
                .description
                .as_deref()
                .map(|d| d.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !in_name && !in_description {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_type_spellings() {
        assert_eq!("postgres".parse::<DataSourceType>().unwrap(), DataSourceType::Postgresql);
        assert_eq!("REST_API".parse::<DataSourceType>().unwrap(), DataSourceType::RestApi);
        assert_eq!("Google Sheets".parse::<DataSourceType>().unwrap(), DataSourceType::GoogleSheets);
        assert_eq!("csv".parse::<DataSourceType>().unwrap(), DataSourceType::CsvFile);
        assert!("oracle".parse::<DataSourceType>().is_err());
    }

    #[test]
    fn type_serializes_to_canonical_name() {
        for source_type in DataSourceType::ALL {
            let json = serde_json::to_value(source_type).unwrap();
            assert_eq!(json, serde_json::Value::String(source_type.as_str().to_string()));
        }
    }

    #[test]
    fn filter_matches_search_in_name_or_description() {
        let mut ds = DataSource::new(
            "Orders DB".to_string(),
            Some("primary warehouse".to_string()),
            DataSourceType::Postgresql,
            ConnectionConfig::empty_for(DataSourceType::Postgresql),
        );
        ds.status = DataSourceStatus::Connected;

        let by_name = DataSourceFilter { search: Some("orders".into()), ..Default::default() };
        let by_description = DataSourceFilter { search: Some("WAREHOUSE".into()), ..Default::default() };
        let wrong_status = DataSourceFilter {
            status: Some(DataSourceStatus::Error),
            ..Default::default()
        };

        assert!(by_name.matches(&ds));
        assert!(by_description.matches(&ds));
        assert!(!wrong_status.matches(&ds));
    }
}
