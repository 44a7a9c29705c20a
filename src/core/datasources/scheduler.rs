use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};

use super::service::DataSourceService;
use crate::models::{DataSourceFilter, DataSourceStatus};
use crate::utils::AppError;

/// Periodically enqueues a sync for every `CONNECTED` data source that has
/// no sync running.
pub struct SyncScheduler {
    service: DataSourceService,
    period: Duration,
    is_running: Arc<RwLock<bool>>,
}

impl SyncScheduler {
    pub fn new(service: DataSourceService, period: Duration) -> Self {
        Self {
            service,
            period,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                return Ok(());
            }
            *is_running = true;
        }

        let service = self.service.clone();
        let is_running = Arc::clone(&self.is_running);
        let period = self.period;

        tokio::spawn(async move {
            let mut interval_timer = interval(period);
            interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; syncs start one period after boot.
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;

                if !*is_running.read().await {
                    break;
                }

                match Self::enqueue_due_syncs(&service).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!("⏰ Scheduled {} sync(s)", count),
                    Err(e) => tracing::error!("Error scheduling syncs: {}", e),
                }
            }

            tracing::info!("Sync scheduler stopped");
        });

        tracing::info!("Sync scheduler started (every {}s)", period.as_secs());
        Ok(())
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    /// One scheduler tick. Returns how many syncs were accepted.
    pub async fn enqueue_due_syncs(service: &DataSourceService) -> Result<usize, AppError> {
        let filter = DataSourceFilter {
            status: Some(DataSourceStatus::Connected),
            ..Default::default()
        };

        let mut started = 0;
        for ds in service.list(&filter).await? {
            if service.jobs().running_sync(ds.id).await.is_some() {
                continue;
            }
            match service.start_sync(ds.id).await {
                Ok(ticket) => {
                    tracing::debug!("Scheduled sync job {} for {}", ticket.job_id, ds.id);
                    started += 1;
                }
                // Status changed or a manual sync won the race.
                Err(AppError::Conflict(_)) | Err(AppError::NotFound(_)) => {}
                Err(e) => tracing::warn!("Could not schedule sync for {}: {}", ds.id, e),
            }
        }
        Ok(started)
    }
}
