use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::data_source::DataSourceType;
use crate::utils::datasource::common::ConnectorError;
use crate::utils::AppError;

/// Credential fields are split off at submission time and only ever stored sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Password,
    ApiKey,
    AccessKey,
    SecretKey,
    ServiceAccountJson,
}

impl CredentialField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialField::Password => "password",
            CredentialField::ApiKey => "apiKey",
            CredentialField::AccessKey => "accessKey",
            CredentialField::SecretKey => "secretKey",
            CredentialField::ServiceAccountJson => "serviceAccountJson",
        }
    }

    pub fn for_type(source_type: DataSourceType) -> &'static [CredentialField] {
        match source_type {
            DataSourceType::Postgresql | DataSourceType::Mysql | DataSourceType::Mongodb => {
                &[CredentialField::Password]
            }
            DataSourceType::RestApi | DataSourceType::Graphql => &[CredentialField::ApiKey],
            DataSourceType::S3 => &[CredentialField::AccessKey, CredentialField::SecretKey],
            DataSourceType::GoogleSheets => &[CredentialField::ServiceAccountJson],
            DataSourceType::CsvFile => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    pub host: Option<String>,
    #[serde(default, deserialize_with = "lenient_port")]
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub ssl: Option<bool>,
    /// PostgreSQL schema to introspect and sync, `public` when unset.
    pub schema: Option<String>,
    /// MongoDB authentication database, `admin` when unset.
    pub auth_database: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    pub endpoint: Option<String>,
    /// GraphQL only: query taking `$offset` and `$limit` used during sync.
    pub sync_query: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Settings {
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// S3-compatible endpoint override (MinIO, R2, ...).
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetsSettings {
    pub sheet_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSettings {
    pub uploaded_file_ref: Option<String>,
}

/// Non-secret, per-protocol connection settings. Fields are optional so a
/// partially filled wizard can be persisted in `CONFIGURING`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConnectionConfig {
    Database(DatabaseSettings),
    Http(HttpSettings),
    S3(S3Settings),
    GoogleSheets(SheetsSettings),
    CsvFile(CsvSettings),
}

impl ConnectionConfig {
    pub fn empty_for(source_type: DataSourceType) -> Self {
        match source_type {
            DataSourceType::Postgresql | DataSourceType::Mysql | DataSourceType::Mongodb => {
                ConnectionConfig::Database(DatabaseSettings::default())
            }
            DataSourceType::RestApi | DataSourceType::Graphql => {
                ConnectionConfig::Http(HttpSettings::default())
            }
            DataSourceType::S3 => ConnectionConfig::S3(S3Settings::default()),
            DataSourceType::GoogleSheets => ConnectionConfig::GoogleSheets(SheetsSettings::default()),
            DataSourceType::CsvFile => ConnectionConfig::CsvFile(CsvSettings::default()),
        }
    }

    /// Parse the type-specific option set out of a flat request body.
    /// Unknown keys are ignored; malformed values are a validation error.
    pub fn from_fields(source_type: DataSourceType, fields: &Map<String, Value>) -> Result<Self, AppError> {
        let value = Value::Object(fields.clone());
        let invalid =
            |e: serde_json::Error| AppError::Validation(format!("Invalid {} configuration: {}", source_type, e));

        let config = match source_type {
            DataSourceType::Postgresql | DataSourceType::Mysql | DataSourceType::Mongodb => {
                ConnectionConfig::Database(serde_json::from_value(value).map_err(invalid)?)
            }
            DataSourceType::RestApi | DataSourceType::Graphql => {
                ConnectionConfig::Http(serde_json::from_value(value).map_err(invalid)?)
            }
            DataSourceType::S3 => ConnectionConfig::S3(serde_json::from_value(value).map_err(invalid)?),
            DataSourceType::GoogleSheets => {
                ConnectionConfig::GoogleSheets(serde_json::from_value(value).map_err(invalid)?)
            }
            DataSourceType::CsvFile => ConnectionConfig::CsvFile(serde_json::from_value(value).map_err(invalid)?),
        };
        Ok(config)
    }

    /// Overlay every field that `update` sets onto `self`.
    pub fn merge(&mut self, update: ConnectionConfig) {
        match (self, update) {
            (ConnectionConfig::Database(current), ConnectionConfig::Database(update)) => {
                merge_field(&mut current.host, update.host);
                merge_field(&mut current.port, update.port);
                merge_field(&mut current.database, update.database);
                merge_field(&mut current.username, update.username);
                merge_field(&mut current.ssl, update.ssl);
                merge_field(&mut current.schema, update.schema);
                merge_field(&mut current.auth_database, update.auth_database);
            }
            (ConnectionConfig::Http(current), ConnectionConfig::Http(update)) => {
                merge_field(&mut current.endpoint, update.endpoint);
                merge_field(&mut current.sync_query, update.sync_query);
            }
            (ConnectionConfig::S3(current), ConnectionConfig::S3(update)) => {
                merge_field(&mut current.bucket, update.bucket);
                merge_field(&mut current.region, update.region);
                merge_field(&mut current.endpoint, update.endpoint);
            }
            (ConnectionConfig::GoogleSheets(current), ConnectionConfig::GoogleSheets(update)) => {
                merge_field(&mut current.sheet_id, update.sheet_id);
            }
            (ConnectionConfig::CsvFile(current), ConnectionConfig::CsvFile(update)) => {
                merge_field(&mut current.uploaded_file_ref, update.uploaded_file_ref);
            }
            (current, update) => *current = update,
        }
    }
}

fn merge_field<T>(current: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *current = update;
    }
}

fn lenient_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("port {} is out of range", n))),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("port '{}' is not a number", s))),
        Some(other) => Err(D::Error::custom(format!("port must be a number, got {}", other))),
    }
}

/// Pull the plaintext credential fields the type accepts out of a request body.
/// The returned map must be sealed by the vault right away.
pub fn extract_credentials(
    source_type: DataSourceType,
    fields: &Map<String, Value>,
) -> Result<BTreeMap<String, String>, AppError> {
    let mut secrets = BTreeMap::new();
    for field in CredentialField::for_type(source_type) {
        match fields.get(field.as_str()) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) if s.is_empty() => {}
            Some(Value::String(s)) => {
                secrets.insert(field.as_str().to_string(), s.clone());
            }
            // Service account keys are often pasted as a JSON object.
            Some(obj @ Value::Object(_)) if *field == CredentialField::ServiceAccountJson => {
                secrets.insert(field.as_str().to_string(), obj.to_string());
            }
            Some(_) => {
                return Err(AppError::Validation(format!("{} must be a string", field.as_str())));
            }
        }
    }
    Ok(secrets)
}

/// Decrypted credentials. Only ever constructed for the duration of one call.
#[derive(Debug, Default)]
pub struct Credentials {
    values: BTreeMap<String, SecretString>,
}

impl Credentials {
    pub fn from_plain(values: BTreeMap<String, String>) -> Self {
        Credentials {
            values: values
                .into_iter()
                .map(|(k, v)| (k, SecretString::from(v)))
                .collect(),
        }
    }

    pub fn get(&self, field: CredentialField) -> Option<&str> {
        self.values.get(field.as_str()).map(|s| s.expose_secret())
    }

    pub fn contains(&self, field: CredentialField) -> bool {
        self.values.contains_key(field.as_str())
    }
}

/// Connection settings plus decrypted credentials, handed to a connector.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub source_type: DataSourceType,
    pub config: ConnectionConfig,
    pub credentials: Credentials,
}

impl ResolvedConfig {
    pub fn new(source_type: DataSourceType, config: ConnectionConfig, credentials: Credentials) -> Self {
        ResolvedConfig { source_type, config, credentials }
    }

    /// Names of required fields that are still unset.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let mut require = |present: bool, name: &'static str| {
            if !present {
                missing.push(name);
            }
        };

        match (&self.config, self.source_type) {
            (ConnectionConfig::Database(db), DataSourceType::Mongodb) => {
                require(non_empty(&db.host), "host");
                require(non_empty(&db.database), "database");
                if non_empty(&db.username) {
                    require(self.credentials.contains(CredentialField::Password), "password");
                }
            }
            (ConnectionConfig::Database(db), _) => {
                require(non_empty(&db.host), "host");
                require(non_empty(&db.database), "database");
                require(non_empty(&db.username), "username");
            }
            (ConnectionConfig::Http(http), _) => {
                require(non_empty(&http.endpoint), "endpoint");
            }
            (ConnectionConfig::S3(s3), _) => {
                require(non_empty(&s3.bucket), "bucket");
                require(non_empty(&s3.region), "region");
                require(self.credentials.contains(CredentialField::AccessKey), "accessKey");
                require(self.credentials.contains(CredentialField::SecretKey), "secretKey");
            }
            (ConnectionConfig::GoogleSheets(sheets), _) => {
                require(non_empty(&sheets.sheet_id), "sheetId");
                require(
                    self.credentials.contains(CredentialField::ServiceAccountJson),
                    "serviceAccountJson",
                );
            }
            (ConnectionConfig::CsvFile(csv), _) => {
                require(non_empty(&csv.uploaded_file_ref), "uploadedFileRef");
            }
        }
        missing
    }

    /// Reject incomplete or malformed configuration before any network call.
    pub fn validate(&self) -> Result<(), AppError> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            return Err(AppError::Validation(format!(
                "Missing required field(s) for {}: {}",
                self.source_type,
                missing.join(", ")
            )));
        }

        match &self.config {
            ConnectionConfig::Http(http) => {
                let endpoint = http.endpoint.as_deref().unwrap_or_default();
                let url = url::Url::parse(endpoint)
                    .map_err(|e| AppError::Validation(format!("endpoint is not a valid URL: {}", e)))?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(AppError::Validation("endpoint must use http or https".to_string()));
                }
            }
            ConnectionConfig::S3(s3) => {
                if let Some(endpoint) = s3.endpoint.as_deref() {
                    url::Url::parse(endpoint)
                        .map_err(|e| AppError::Validation(format!("endpoint is not a valid URL: {}", e)))?;
                }
            }
            ConnectionConfig::GoogleSheets(_) => {
                let raw = self
                    .credentials
                    .get(CredentialField::ServiceAccountJson)
                    .unwrap_or_default();
                let parsed: Value = serde_json::from_str(raw).map_err(|_| {
                    AppError::Validation("serviceAccountJson is not valid JSON".to_string())
                })?;
                for key in ["client_email", "private_key"] {
                    if parsed.get(key).and_then(|v| v.as_str()).is_none() {
                        return Err(AppError::Validation(format!(
                            "serviceAccountJson is missing '{}'",
                            key
                        )));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn database(&self) -> Result<&DatabaseSettings, ConnectorError> {
        match &self.config {
            ConnectionConfig::Database(db) => Ok(db),
            _ => Err(self.mismatch()),
        }
    }

    pub fn http(&self) -> Result<&HttpSettings, ConnectorError> {
        match &self.config {
            ConnectionConfig::Http(http) => Ok(http),
            _ => Err(self.mismatch()),
        }
    }

    pub fn s3(&self) -> Result<&S3Settings, ConnectorError> {
        match &self.config {
            ConnectionConfig::S3(s3) => Ok(s3),
            _ => Err(self.mismatch()),
        }
    }

    pub fn sheets(&self) -> Result<&SheetsSettings, ConnectorError> {
        match &self.config {
            ConnectionConfig::GoogleSheets(sheets) => Ok(sheets),
            _ => Err(self.mismatch()),
        }
    }

    pub fn csv(&self) -> Result<&CsvSettings, ConnectorError> {
        match &self.config {
            ConnectionConfig::CsvFile(csv) => Ok(csv),
            _ => Err(self.mismatch()),
        }
    }

    pub fn secret(&self, field: CredentialField) -> Option<&str> {
        self.credentials.get(field)
    }

    pub fn require_secret(&self, field: CredentialField) -> Result<&str, ConnectorError> {
        self.secret(field)
            .ok_or_else(|| ConnectorError::Config(format!("{} is not set", field.as_str())))
    }

    fn mismatch(&self) -> ConnectorError {
        ConnectorError::Config(format!("configuration does not match type {}", self.source_type))
    }
}

/// Required string field accessor used by the connectors.
pub fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ConnectorError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConnectorError::Config(format!("{} is not set", name)))
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false)
}
