//! Timer-driven harvesting.
//!
//! Thin trigger over the coordinator: fire a batch for every enabled chain
//! for "today", sleep, repeat. The first tick fires immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::config::Config;
use crate::coordinator::{ChainRequest, DownloadCoordinator};

pub struct Scheduler {
    config: Arc<Config>,
    coordinator: Arc<DownloadCoordinator>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        coordinator: Arc<DownloadCoordinator>,
        interval: Duration,
    ) -> Self {
        Self {
            config,
            coordinator,
            interval,
        }
    }

    /// Run batches until `stop` flips to true. A stop between batches ends
    /// the loop immediately; a stop mid-batch is the coordinator's business
    /// (its own cancellation signal).
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let today = Local::now().date_naive();
                    let requests: Vec<ChainRequest> = self
                        .config
                        .active_chains()
                        .map(|chain| ChainRequest::for_date(&chain.id, today))
                        .collect();

                    info!(chains = requests.len(), date = %today, "Scheduled batch firing");
                    let result = self.coordinator.run_batch(requests).await;
                    info!(
                        succeeded = result.succeeded(),
                        failed = result.failed(),
                        files = result.total_files(),
                        "Scheduled batch finished"
                    );
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("Scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}
