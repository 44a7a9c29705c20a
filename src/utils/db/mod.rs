use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u8 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Run `attempt` until it succeeds or `MAX_ATTEMPTS` is reached.
async fn with_retries<T, E, F, Fut>(what: &str, mut attempt: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let hint = diagnose(&e.to_string()).unwrap_or("see error above");
                error!("❌ {} attempt {}/{} failed: {} ({})", what, attempts, MAX_ATTEMPTS, e, hint);
                if attempts >= MAX_ATTEMPTS {
                    return Err(e);
                }
                warn!("⏳ Retrying {} in {}s", what, RETRY_DELAY.as_secs());
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// Bring the `data_sources` / `sync_logs` schema up to date. The SeaORM
/// connection only lives for the migration run.
pub async fn migrate(database_url: &str) -> Result<(), sea_orm::DbErr> {
    info!("🔌 Migrating {}", mask_database_url(database_url));

    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = with_retries("database connection", || Database::connect(options.clone())).await?;
    migration::Migrator::up(&db, None).await?;
    info!("✅ Database schema is up to date");
    db.close().await
}

/// The sqlx pool the data source store runs its queries on.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let options = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Some(Duration::from_secs(300)))
        .max_lifetime(Some(Duration::from_secs(900)));

    let pool = with_retries("pool creation", || options.clone().connect(database_url)).await?;
    sqlx::query("SELECT 1").execute(&pool).await?;
    info!("✅ Store pool ready ({} connections)", pool.size());
    Ok(pool)
}

/// Likely cause of a failed connection to the service's own database.
fn diagnose(error_msg: &str) -> Option<&'static str> {
    let lower = error_msg.to_lowercase();
    if lower.contains("connection refused") {
        Some("database server is down or unreachable")
    } else if lower.contains("password") || lower.contains("authentication") {
        Some("credentials in DATABASE_URL were rejected")
    } else if lower.contains("does not exist") {
        Some("target database does not exist")
    } else if lower.contains("timed out") || lower.contains("timeout") {
        Some("connection timed out")
    } else {
        None
    }
}

/// Hide the password of a database URL before it reaches a log line.
pub fn mask_database_url(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        Ok(_) => database_url.to_string(),
        Err(_) => "<unparseable database url>".to_string(),
    }
}
