use anyhow::{Context, Result};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::DataSourceType;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL. When unset the service keeps state in memory.
    pub database_url: Option<String>,
    pub server_address: String,
    /// Base64 encoded 32-byte AES-256-GCM key for the credential vault.
    pub credential_key: Option<String>,
    pub is_production: bool,
    pub upload_dir: PathBuf,
    pub connectors: ConnectorSettings,
}

/// Timeouts, batch sizes and caps shared by the tester, introspector and sync engine.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub test_timeout: Duration,
    pub test_timeouts: HashMap<DataSourceType, Duration>,
    pub sync_batch_size: usize,
    pub sync_batch_timeout: Duration,
    pub sync_timeout: Duration,
    pub sync_interval: Option<Duration>,
    pub max_concurrent_jobs: usize,
    pub schema_max_tables: usize,
    pub schema_max_columns: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        ConnectorSettings {
            test_timeout: Duration::from_secs(10),
            test_timeouts: HashMap::new(),
            sync_batch_size: 500,
            sync_batch_timeout: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(3600),
            sync_interval: None,
            max_concurrent_jobs: 8,
            schema_max_tables: 100,
            schema_max_columns: 200,
        }
    }
}

impl ConnectorSettings {
    pub fn test_timeout_for(&self, source_type: DataSourceType) -> Duration {
        self.test_timeouts
            .get(&source_type)
            .copied()
            .unwrap_or(self.test_timeout)
    }

    fn from_env() -> Result<Self> {
        let defaults = ConnectorSettings::default();

        let mut test_timeouts = HashMap::new();
        for source_type in DataSourceType::ALL {
            let key = format!("TEST_TIMEOUT_{}_SECS", source_type.as_str());
            if let Some(secs) = env_parse::<u64>(&key)? {
                test_timeouts.insert(source_type, Duration::from_secs(secs));
            }
        }

        Ok(ConnectorSettings {
            test_timeout: env_parse::<u64>("TEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.test_timeout),
            test_timeouts,
            sync_batch_size: env_parse("SYNC_BATCH_SIZE")?
                .unwrap_or(defaults.sync_batch_size)
                .max(1),
            sync_batch_timeout: env_parse::<u64>("SYNC_BATCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_batch_timeout),
            sync_timeout: env_parse::<u64>("SYNC_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sync_timeout),
            sync_interval: env_parse::<u64>("SYNC_INTERVAL_SECS")?
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS")?
                .unwrap_or(defaults.max_concurrent_jobs)
                .max(1),
            schema_max_tables: env_parse("SCHEMA_MAX_TABLES")?.unwrap_or(defaults.schema_max_tables),
            schema_max_columns: env_parse("SCHEMA_MAX_COLUMNS")?
                .unwrap_or(defaults.schema_max_columns),
        })
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Check if we're in production mode
        let is_production = env::var("RUST_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            == "production";

        let credential_key = env::var("CREDENTIAL_KEY").ok().filter(|k| !k.is_empty());
        if is_production && credential_key.is_none() {
            anyhow::bail!("CREDENTIAL_KEY must be set in production");
        }

        Ok(Config {
            database_url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            server_address: env::var("SERVER_ADDRESS").unwrap_or_else(|_| {
                if is_production {
                    "0.0.0.0:7680".to_string()
                } else {
                    "127.0.0.1:7680".to_string()
                }
            }),
            credential_key,
            is_production,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./uploads")),
            connectors: ConnectorSettings::from_env()?,
        })
    }

    /// Configuration for tests and local experiments: in-memory store, dev key.
    pub fn in_memory(upload_dir: PathBuf) -> Self {
        Config {
            database_url: None,
            server_address: "127.0.0.1:0".to_string(),
            credential_key: None,
            is_production: false,
            upload_dir,
            connectors: ConnectorSettings::default(),
        }
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(None),
    }
}
