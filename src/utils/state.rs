use salvo::Depot;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::datasources::{DataSourceService, DataSourceStore, MemoryDataSourceStore, PgDataSourceStore};
use crate::utils::crypto::CredentialVault;
use crate::utils::datasource::ConnectorRegistry;
use crate::utils::{db, Config};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub datasources: DataSourceService,
}

impl AppState {
    pub async fn new(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let vault = CredentialVault::from_config(config.credential_key.as_deref())?;

        tokio::fs::create_dir_all(&config.upload_dir).await?;
        let registry = ConnectorRegistry::builtin(config.upload_dir.clone());

        let store: Arc<dyn DataSourceStore> = match config.database_url.as_deref() {
            Some(database_url) => {
                db::migrate(database_url).await?;
                let pool = db::create_pool(database_url).await?;
                info!("🗄️  Data sources are stored in PostgreSQL");
                Arc::new(PgDataSourceStore::new(pool))
            }
            None => {
                warn!("⚠️  DATABASE_URL not set, data sources are kept in memory and lost on restart");
                Arc::new(MemoryDataSourceStore::new())
            }
        };

        let datasources = DataSourceService::new(store, registry, vault, config.connectors.clone());
        Ok(AppState {
            config: Arc::new(config.clone()),
            datasources,
        })
    }

    /// State around an already assembled service, without a database.
    pub fn with_service(config: &Config, datasources: DataSourceService) -> Self {
        AppState {
            config: Arc::new(config.clone()),
            datasources,
        }
    }
}

/// Helper function to safely extract AppState from Depot
pub fn get_app_state(depot: &Depot) -> Result<&AppState, salvo::http::StatusError> {
    depot
        .obtain::<AppState>()
        .map_err(|_| salvo::http::StatusError::internal_server_error())
}
