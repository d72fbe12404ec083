//! Batch coordination of chain downloads.
//!
//! The coordinator owns a pending queue and a bounded set of running tasks.
//! Chains complete in any order; callers read `CoordinatorResult.results`
//! as an unordered map keyed by chain. A batch always returns a result —
//! partial failure is a normal outcome, and nothing escapes the coordinator
//! boundary as a panic or error.

mod events;
mod task;

pub use events::{NullSink, ProgressSink, TaskEvent, TracingSink};
pub use task::{ChainRequest, CoordinatorResult, DownloadTask, StatusSnapshot, TaskState};

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DownloadsConfig;
use crate::downloader::{DownloaderProvider, run_chain};
use crate::throttle::RequestThrottle;

pub struct DownloadCoordinator {
    factory: Arc<dyn DownloaderProvider>,
    max_concurrent: usize,
    shutdown_grace: Duration,
    sink: Arc<dyn ProgressSink>,
    status: Mutex<StatusSnapshot>,
    cancel: watch::Sender<bool>,
    /// When present, cancellation also halts the shared throttle so no new
    /// HTTP call starts anywhere once the signal is raised.
    throttle: Option<Arc<RequestThrottle>>,
}

impl DownloadCoordinator {
    pub fn new(
        factory: Arc<dyn DownloaderProvider>,
        downloads: &DownloadsConfig,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            factory,
            max_concurrent: downloads.max_concurrent.max(1),
            shutdown_grace: downloads.shutdown_grace.into(),
            sink,
            status: Mutex::new(StatusSnapshot::default()),
            cancel,
            throttle: None,
        }
    }

    /// Bind the shared throttle so cancellation can refuse new HTTP calls.
    pub fn with_throttle(mut self, throttle: Arc<RequestThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Raise the batch's cancellation signal: no new task admissions, no new
    /// HTTP calls; running tasks get a bounded drain window.
    pub fn cancel(&self) {
        if let Some(throttle) = &self.throttle {
            throttle.halt();
        }
        // send_replace updates the value even with no live receivers.
        self.cancel.send_replace(true);
    }

    /// Point-in-time counts for the batch currently running.
    pub fn status(&self) -> StatusSnapshot {
        *self.status.lock().expect("status lock poisoned")
    }

    fn set_status(&self, pending: usize, active: usize, completed: usize) {
        *self.status.lock().expect("status lock poisoned") = StatusSnapshot {
            pending,
            active,
            completed,
        };
    }

    /// Run one batch of chain requests under the concurrency limit.
    pub async fn run_batch(&self, requests: Vec<ChainRequest>) -> CoordinatorResult {
        let started = Instant::now();

        // The signal is per batch; a leftover cancel from the previous batch
        // must not kill this one.
        self.cancel.send_replace(false);
        if let Some(throttle) = &self.throttle {
            throttle.resume();
        }
        let mut cancel_rx = self.cancel.subscribe();

        let mut pending: VecDeque<DownloadTask> =
            requests.into_iter().map(DownloadTask::new).collect();
        let mut finished: Vec<DownloadTask> = Vec::new();
        let mut running: JoinSet<DownloadTask> = JoinSet::new();
        let mut in_flight: HashMap<Uuid, String> = HashMap::new();
        let mut cancelled = false;

        info!(chains = pending.len(), limit = self.max_concurrent, "Batch starting");
        self.set_status(pending.len(), 0, 0);

        loop {
            // Admit while the active set has room and the batch is alive.
            while !cancelled && running.len() < self.max_concurrent {
                let Some(mut task) = pending.pop_front() else {
                    break;
                };

                match self.factory.provide(&task.chain_id) {
                    Ok(downloader) => {
                        task.start();
                        in_flight.insert(task.id, task.chain_id.clone());
                        self.sink.on_event(&TaskEvent::TaskStarted {
                            task_id: task.id,
                            chain_id: task.chain_id.clone(),
                        });
                        running.spawn(async move {
                            let result =
                                run_chain(downloader.as_ref(), task.date, task.filter).await;
                            task.finish(result);
                            task
                        });
                    }
                    Err(e) => {
                        task.fail_unstarted(e.to_string());
                        self.emit_finished(&task);
                        finished.push(task);
                    }
                }
            }

            self.set_status(pending.len(), running.len(), finished.len());

            if running.is_empty() && (pending.is_empty() || cancelled) {
                break;
            }

            tokio::select! {
                joined = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Some(Ok(task)) => {
                            in_flight.remove(&task.id);
                            self.emit_finished(&task);
                            finished.push(task);
                        }
                        Some(Err(join_error)) => {
                            // A panicked chain pass; its synthetic result is
                            // produced from the in-flight ledger below.
                            warn!(error = %join_error, "Chain task aborted abnormally");
                        }
                        None => {}
                    }
                }
                changed = cancel_rx.changed(), if !cancelled => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        info!("Batch cancellation requested");
                        cancelled = true;
                        // Out of the admission loop; the bounded drain below
                        // owns the remaining running tasks.
                        break;
                    }
                }
            }
        }

        if cancelled {
            self.drain_cancelled(&mut running, &mut in_flight, &mut finished)
                .await;

            for mut task in pending.drain(..) {
                task.fail_unstarted("batch cancelled before start");
                self.emit_finished(&task);
                finished.push(task);
            }
        }

        // Anything still in the in-flight ledger finished without handing
        // its task back (panic or forced abort).
        for (task_id, chain_id) in in_flight.drain() {
            let request = ChainRequest::for_date(chain_id, chrono::Utc::now().date_naive());
            let mut task = DownloadTask::new(request);
            task.id = task_id;
            task.fail_unstarted("task did not finish");
            self.emit_finished(&task);
            finished.push(task);
        }

        self.set_status(0, 0, finished.len());

        let mut results = BTreeMap::new();
        for task in finished {
            if let Some(result) = task.result {
                results.insert(task.chain_id.clone(), result);
            }
        }

        let batch = CoordinatorResult {
            results,
            cancelled,
            duration: started.elapsed(),
        };

        self.sink.on_event(&TaskEvent::BatchFinished {
            succeeded: batch.succeeded(),
            failed: batch.failed(),
            cancelled,
        });

        batch
    }

    /// Give running tasks the configured grace window, then abort what is
    /// left. In-flight HTTP calls finish or time out on their own; nothing
    /// tears sockets down mid-request before the grace expires.
    async fn drain_cancelled(
        &self,
        running: &mut JoinSet<DownloadTask>,
        in_flight: &mut HashMap<Uuid, String>,
        finished: &mut Vec<DownloadTask>,
    ) {
        let drained = timeout(self.shutdown_grace, async {
            while let Some(joined) = running.join_next().await {
                if let Ok(task) = joined {
                    in_flight.remove(&task.id);
                    self.emit_finished(&task);
                    finished.push(task);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "Shutdown grace expired, aborting remaining tasks"
            );
            running.abort_all();
            while running.join_next().await.is_some() {}
        }
    }

    fn emit_finished(&self, task: &DownloadTask) {
        let (success, files, error) = match &task.result {
            Some(result) => (
                result.success,
                result.total_files(),
                result.error.clone(),
            ),
            None => (false, 0, None),
        };
        self.sink.on_event(&TaskEvent::TaskFinished {
            task_id: task.id,
            chain_id: task.chain_id.clone(),
            success,
            files,
            error,
        });
    }

    /// Cheap availability probe: discovery only, no fetching. One entry per
    /// enabled chain with the number of files its portal lists for `date`.
    pub async fn check_availability(
        &self,
        date: NaiveDate,
    ) -> BTreeMap<String, std::result::Result<usize, String>> {
        let mut report = BTreeMap::new();

        let downloaders = match self.factory.provide_all_active() {
            Ok(downloaders) => downloaders,
            Err(e) => {
                warn!(error = %e, "Availability check could not build downloaders");
                return report;
            }
        };

        for downloader in downloaders {
            let chain_id = downloader.chain().id.clone();
            let entry = match downloader.discover_files(date).await {
                Ok(descriptors) => Ok(descriptors.len()),
                Err(e) => Err(e.to_string()),
            };
            report.insert(chain_id, entry);
        }

        report
    }
}
