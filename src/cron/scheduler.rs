//! Cron scheduler for periodic background tasks.
//!
//! Runs jobs like:
//! - Refreshing holder balances that went stale

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::{config::RefreshSettings, db::LedgerStore, worker::Reconciler};

use super::jobs;

/// Cron scheduler that manages periodic background jobs.
pub struct CronScheduler {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn LedgerStore>,
    settings: Arc<RefreshSettings>,
}

impl CronScheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn LedgerStore>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            reconciler,
            store,
            settings: Arc::new(settings),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        if !self.settings.enabled {
            info!("Stale balance refresh disabled, cron scheduler not started");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;

        self.register_refresh_balances_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 1);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_refresh_balances_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let reconciler = self.reconciler.clone();
        let store = self.store.clone();
        let settings = self.settings.clone();
        let interval = settings.interval_secs;

        let job = Job::new_repeated_async(
            std::time::Duration::from_secs(interval),
            move |_uuid, _lock| {
                let reconciler = reconciler.clone();
                let store = store.clone();
                let settings = settings.clone();
                Box::pin(async move {
                    if let Err(e) =
                        jobs::refresh_balances::run(&reconciler, store.as_ref(), &settings).await
                    {
                        error!("Failed to refresh stale balances: {:#}", e);
                    }
                })
            },
        )?;

        scheduler.add(job).await?;
        info!("Registered refresh_balances job (every {}s)", interval);
        Ok(())
    }
}
