use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Database};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::base::{
    short_page, Batch, BatchFailure, BatchReader, ColumnInfo, DataSourceConnector, Introspection,
    IntrospectionLimits, LatencyTimer, ServerInfo, TableInfo,
};
use super::common::ConnectorError;
use crate::models::{required, CredentialField, ResolvedConfig, StreamPosition};

const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MongoConnector;

impl From<MongoError> for ConnectorError {
    fn from(err: MongoError) -> Self {
        let message = err.to_string();
        match err.kind.as_ref() {
            ErrorKind::Authentication { .. } => ConnectorError::Auth(message),
            // Unauthorized / AuthenticationFailed
            ErrorKind::Command(command) if command.code == 13 || command.code == 18 => {
                ConnectorError::Auth(message)
            }
            ErrorKind::Command(_) => ConnectorError::Query(message),
            ErrorKind::InvalidArgument { .. } => ConnectorError::Config(message),
            ErrorKind::ServerSelection { .. } if message.to_lowercase().contains("auth") => {
                ConnectorError::Auth(message)
            }
            ErrorKind::Io(_) | ErrorKind::DnsResolve { .. } | ErrorKind::ServerSelection { .. } => {
                ConnectorError::Network(message)
            }
            _ => ConnectorError::Query(message),
        }
    }
}

fn client_options(config: &ResolvedConfig) -> Result<ClientOptions, ConnectorError> {
    let db = config.database()?;
    let host = required(&db.host, "host")?;
    let address = ServerAddress::parse(format!("{}:{}", host, db.port.unwrap_or(27017)))
        .map_err(|e| ConnectorError::Config(format!("invalid host: {}", e)))?;

    let mut options = ClientOptions::default();
    options.hosts = vec![address];
    options.app_name = Some("datasource-hub".to_string());
    options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
    options.connect_timeout = Some(SERVER_SELECTION_TIMEOUT);

    if let Some(username) = db.username.as_deref().filter(|u| !u.is_empty()) {
        let mut credential = Credential::default();
        credential.username = Some(username.to_string());
        credential.password = config.secret(CredentialField::Password).map(String::from);
        credential.source = Some(db.auth_database.clone().unwrap_or_else(|| "admin".to_string()));
        options.credential = Some(credential);
    }

    if db.ssl == Some(true) {
        options.tls = Some(Tls::Enabled(TlsOptions::default()));
    }
    Ok(options)
}

fn database(config: &ResolvedConfig) -> Result<Database, ConnectorError> {
    let db_name = required(&config.database()?.database, "database")?.to_string();
    let client = Client::with_options(client_options(config)?)?;
    Ok(client.database(&db_name))
}

async fn sorted_collections(db: &Database) -> Result<Vec<String>, ConnectorError> {
    let mut names = db.list_collection_names().await?;
    names.retain(|name| !name.starts_with("system."));
    names.sort();
    Ok(names)
}

fn bson_type_name(value: &Bson) -> String {
    format!("{:?}", value.element_type())
}

#[async_trait]
impl DataSourceConnector for MongoConnector {
    async fn test_connection(
        &self,
        config: &ResolvedConfig,
        timer: &LatencyTimer,
    ) -> Result<ServerInfo, ConnectorError> {
        let db = database(config)?;
        db.run_command(doc! { "ping": 1 }).await?;
        timer.mark_round_trip();

        let mut info = ServerInfo::new();
        info.insert("database".to_string(), json!(db.name()));
        match db.run_command(doc! { "buildInfo": 1 }).await {
            Ok(build) => {
                if let Ok(version) = build.get_str("version") {
                    info.insert("version".to_string(), json!(version));
                }
            }
            Err(e) => debug!("MongoDB buildInfo unavailable: {}", e),
        }
        Ok(info)
    }

    async fn introspect_schema(
        &self,
        config: &ResolvedConfig,
        limits: &IntrospectionLimits,
    ) -> Result<Introspection, ConnectorError> {
        let db = database(config)?;
        let names = sorted_collections(&db).await?;

        let mut tables = Vec::new();
        for name in names.into_iter().take(limits.fetch_tables()) {
            let collection = db.collection::<Document>(&name);
            let estimate = collection.estimated_document_count().await.ok();

            // Collections have no fixed schema; sample the first document.
            let columns = match collection.find_one(doc! {}).await? {
                Some(sample) => sample
                    .iter()
                    .map(|(key, value)| ColumnInfo {
                        name: key.clone(),
                        data_type: bson_type_name(value),
                    })
                    .collect(),
                None => Vec::new(),
            };

            tables.push(TableInfo {
                columns,
                row_count: estimate.map(|count| count as i64),
                ..TableInfo::new(name)
            });
        }
        Ok(Introspection::Tables(tables))
    }

    async fn open_reader(&self, config: &ResolvedConfig) -> Result<Box<dyn BatchReader>, ConnectorError> {
        Ok(Box::new(MongoReader { db: database(config)? }))
    }
}

struct MongoReader {
    db: Database,
}

#[async_trait]
impl BatchReader for MongoReader {
    async fn streams(&mut self, _config: &ResolvedConfig) -> Result<Vec<String>, ConnectorError> {
        sorted_collections(&self.db).await
    }

    async fn read_batch(
        &mut self,
        _config: &ResolvedConfig,
        stream: &str,
        position: &StreamPosition,
        limit: usize,
    ) -> Result<Batch, BatchFailure> {
        let collection = self.db.collection::<Document>(stream);
        let cursor = collection
            .find(doc! {})
            .sort(doc! { "_id": 1 })
            .skip(position.offset)
            .limit(limit as i64)
            .await
            .map_err(ConnectorError::from)?;

        let documents: Vec<Document> = cursor.try_collect().await.map_err(ConnectorError::from)?;
        let records: Vec<_> = documents
            .into_iter()
            .map(|document| Bson::Document(document).into_relaxed_extjson())
            .collect();

        Ok(Batch {
            exhausted: short_page(&records, limit),
            records,
            next_token: None,
        })
    }
}
