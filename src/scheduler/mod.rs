//! Background maintenance jobs
//!
//! Cron-driven housekeeping that stays off the hot path: a proactive URL
//! refresh sweep for expiring resolutions, and a nightly prune of consumed
//! playout items.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::channel::ChannelManager;
use crate::config::Config;
use crate::playout::PlayoutQueue;
use crate::resolver::ResolverRegistry;

/// Error types for scheduler operations
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<JobSchedulerError> for SchedulerError {
    fn from(err: JobSchedulerError) -> Self {
        SchedulerError::Scheduler(err.to_string())
    }
}

/// Owns the cron scheduler and its maintenance jobs.
#[derive(Clone)]
pub struct MaintenanceScheduler {
    scheduler: Arc<RwLock<Option<JobScheduler>>>,
    config: Arc<Config>,
    resolver: Arc<ResolverRegistry>,
    queue: Arc<PlayoutQueue>,
    channels: Arc<ChannelManager>,
}

impl MaintenanceScheduler {
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<ResolverRegistry>,
        queue: Arc<PlayoutQueue>,
        channels: Arc<ChannelManager>,
    ) -> Self {
        Self {
            scheduler: Arc::new(RwLock::new(None)),
            config,
            resolver,
            queue,
            channels,
        }
    }

    /// Start the scheduler and register both jobs.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let sched = JobScheduler::new().await?;

        // Proactive URL refresh sweep, every 10 minutes
        {
            let this = self.clone();
            let job = Job::new_async("0 */10 * * * *", move |_uuid, _lock| {
                let this = this.clone();
                Box::pin(async move {
                    this.refresh_sweep().await;
                })
            })
            .map_err(SchedulerError::from)?;
            sched.add(job).await?;
        }

        // Nightly playout-window prune at 04:30
        {
            let this = self.clone();
            let job = Job::new_async("0 30 4 * * *", move |_uuid, _lock| {
                let this = this.clone();
                Box::pin(async move {
                    this.prune_playout_window();
                })
            })
            .map_err(SchedulerError::from)?;
            sched.add(job).await?;
        }

        sched.start().await?;
        let mut scheduler = self.scheduler.write().await;
        *scheduler = Some(sched);

        tracing::info!("Maintenance scheduler started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if let Some(ref mut sched) = *self.scheduler.write().await {
            sched.shutdown().await?;
        }
        let mut scheduler = self.scheduler.write().await;
        *scheduler = None;

        tracing::info!("Maintenance scheduler stopped");
        Ok(())
    }

    /// Re-resolve URLs for upcoming items whose cached resolutions are
    /// expired or inside the refresh threshold.
    pub async fn refresh_sweep(&self) {
        let threshold = Duration::minutes(self.config.refresh_threshold_mins);
        let expiring = self.resolver.expiring_entries(threshold).len();
        if expiring > 0 {
            tracing::info!("{} cached URLs due for proactive refresh", expiring);
        }

        let now = Utc::now();
        let horizon = now + Duration::hours(2);
        let mut refreshed = 0usize;
        let mut failed = 0usize;

        for channel in self.channels.load_channels() {
            let items = match self.queue.window(channel.id, now, horizon) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!("Refresh sweep skipping channel {}: {}", channel.number, e);
                    continue;
                }
            };

            for item in items {
                match self.resolver.refresh_if_expiring(&item.media, threshold).await {
                    Ok(Some(_)) => refreshed += 1,
                    Ok(None) => {}
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(
                            "Refresh failed for media {} on channel {}: {}",
                            item.media.id,
                            channel.number,
                            e
                        );
                    }
                }
            }
        }

        if refreshed > 0 || failed > 0 {
            tracing::info!("URL refresh sweep: {} refreshed, {} failed", refreshed, failed);
        }
    }

    /// Drop consumed playout rows older than a day.
    pub fn prune_playout_window(&self) {
        let cutoff = Utc::now() - Duration::days(1);
        match self.queue.prune_consumed_before(cutoff) {
            Ok(0) => {}
            Ok(pruned) => tracing::info!("Pruned {} consumed playout items", pruned),
            Err(e) => tracing::warn!("Playout prune failed: {}", e),
        }
    }
}
