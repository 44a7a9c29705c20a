use dotenv::dotenv;
use salvo::conn::tcp::TcpAcceptor;
use salvo::prelude::*;
use std::time::Duration;
use tokio::signal;

use datasource_hub::api;
use datasource_hub::core::datasources::SyncScheduler;
use datasource_hub::utils::{AppState, Config};

/// Bind the listener, retrying while a previous instance still holds the port.
async fn bind_with_retry(address: &str, max_attempts: u32) -> Result<TcpAcceptor, Box<dyn std::error::Error>> {
    let mut attempt = 1;
    loop {
        match TcpListener::new(address.to_string()).try_bind().await {
            Ok(acceptor) => return Ok(acceptor),
            Err(e) if attempt < max_attempts => {
                tracing::warn!("⚠️  Cannot bind {} yet ({}/{}): {}", address, attempt, max_attempts, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                attempt += 1;
            }
            Err(e) => return Err(format!("failed to bind {}: {}", address, e).into()),
        }
    }
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("datasource_hub=info".parse()?)
                .add_directive("datasource_hub_backend=info".parse()?)
                .add_directive("salvo=info".parse()?)
                .add_directive("sea_orm=warn".parse()?)
                .add_directive("sqlx=warn".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let state = AppState::new(&config).await?;

    // Tests cut short by the previous shutdown
    state.datasources.recover_interrupted_tests().await?;

    let scheduler = match config.connectors.sync_interval {
        Some(period) => {
            let scheduler = SyncScheduler::new(state.datasources.clone(), period);
            scheduler.start().await?;
            Some(scheduler)
        }
        None => None,
    };

    let router = api::router(state);

    let acceptor = bind_with_retry(&config.server_address, 5).await?;
    tracing::info!("🚀 Datasource hub listening on {}", config.server_address);
    let service = Service::new(router);
    let server = Server::new(acceptor);

    tokio::select! {
        _ = server.serve(service) => {}
        _ = shutdown_signal() => {
            tracing::info!("🛑 Shutting down");
        }
    }

    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    Ok(())
}
