//! Integration tests for the download coordinator.
//!
//! The coordinator is driven end-to-end with scripted downloaders injected
//! through the provider seam — no network involved. Covered here:
//! bounded concurrency, result aggregation across mixed outcomes,
//! cancellation semantics, and the progress event stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use pricebox::catalog::{DownloadRef, FileCategory, FileDescriptor};
use pricebox::config::{ChainConfig, DownloadsConfig, ProtocolFamily};
use pricebox::coordinator::{
    ChainRequest, DownloadCoordinator, ProgressSink, TaskEvent,
};
use pricebox::downloader::{
    ChainDownloader, DownloadError, DownloaderProvider, FetchOutcome,
};
use pricebox::humanize::HumanDuration;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn chain_config(id: &str) -> ChainConfig {
    ChainConfig {
        id: id.to_string(),
        display_name: id.to_string(),
        protocol: ProtocolFamily::Polling,
        base_url: format!("https://{id}.example"),
        credentials: None,
        enabled: true,
        max_pages: 90,
        retry_limit: 3,
        store_failure_cutoff: 5,
        login_markers: vec![],
        csrf_pattern: None,
        row_pattern: None,
    }
}

fn downloads_config(max_concurrent: usize) -> DownloadsConfig {
    DownloadsConfig {
        max_concurrent,
        shutdown_grace: HumanDuration::from_millis(200),
        ..DownloadsConfig::default()
    }
}

#[derive(Clone, Copy)]
enum Script {
    /// Discovery lists one Stores + `price_stores` Price files; fetches work.
    Succeed { price_stores: usize },
    /// Discovery fails chain-level.
    FailDiscovery,
    /// Discovery blocks for the given time, then succeeds with one file.
    Slow(Duration),
}

/// Scripted strategy with a shared concurrency gauge.
struct ScriptedChain {
    chain: ChainConfig,
    script: Script,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

#[async_trait]
impl ChainDownloader for ScriptedChain {
    fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    async fn discover_files(&self, _date: NaiveDate) -> Result<Vec<FileDescriptor>, DownloadError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = match self.script {
            Script::FailDiscovery => {
                Err(DownloadError::Authentication("login rejected".to_string()))
            }
            Script::Succeed { price_stores } => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let mut files = vec!["Stores729-000-202501010700.xml".to_string()];
                for store in 1..=price_stores {
                    files.push(format!("Price729-{store:03}-202501010800.gz"));
                }
                Ok(parse_all(&files))
            }
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(parse_all(&["Price729-001-202501010800.gz".to_string()]))
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn fetch_and_extract(
        &self,
        _descriptor: &FileDescriptor,
        _category: FileCategory,
    ) -> Result<FetchOutcome, DownloadError> {
        Ok(FetchOutcome {
            saved: 1,
            skipped: 0,
        })
    }
}

fn parse_all(names: &[String]) -> Vec<FileDescriptor> {
    names
        .iter()
        .filter_map(|n| FileDescriptor::parse_name(n, DownloadRef::Token(n.clone())))
        .collect()
}

/// Provider handing out the scripted chains.
struct ScriptedProvider {
    chains: BTreeMap<String, Arc<ScriptedChain>>,
}

impl ScriptedProvider {
    fn new(scripts: Vec<(&str, Script)>) -> Self {
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let chains = scripts
            .into_iter()
            .map(|(id, script)| {
                let chain = Arc::new(ScriptedChain {
                    chain: chain_config(id),
                    script,
                    active: active.clone(),
                    max_active: max_active.clone(),
                });
                (id.to_string(), chain)
            })
            .collect();

        Self { chains }
    }

    fn max_active(&self) -> usize {
        self.chains
            .values()
            .next()
            .map(|c| c.max_active.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn requests(&self) -> Vec<ChainRequest> {
        self.chains
            .keys()
            .map(|id| ChainRequest::for_date(id.clone(), day()))
            .collect()
    }
}

impl DownloaderProvider for ScriptedProvider {
    fn provide(&self, chain_id: &str) -> Result<Arc<dyn ChainDownloader>, DownloadError> {
        self.chains
            .get(chain_id)
            .cloned()
            .map(|c| c as Arc<dyn ChainDownloader>)
            .ok_or_else(|| DownloadError::Configuration(format!("unknown chain '{chain_id}'")))
    }

    fn provide_all_active(&self) -> Result<Vec<Arc<dyn ChainDownloader>>, DownloadError> {
        Ok(self
            .chains
            .values()
            .cloned()
            .map(|c| c as Arc<dyn ChainDownloader>)
            .collect())
    }
}

/// Sink collecting every event for assertions.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl ProgressSink for RecordingSink {
    fn on_event(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn test_bounded_concurrency_never_exceeds_limit() {
    let scripts: Vec<(String, Script)> = (0..10)
        .map(|i| (format!("chain-{i}"), Script::Slow(Duration::from_millis(40))))
        .collect();
    let provider = Arc::new(ScriptedProvider::new(
        scripts.iter().map(|(id, s)| (id.as_str(), *s)).collect(),
    ));

    let coordinator = Arc::new(DownloadCoordinator::new(
        provider.clone(),
        &downloads_config(2),
        Arc::new(RecordingSink::default()),
    ));

    // Sample the public status while the batch runs.
    let sampler = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            let mut max_seen = 0usize;
            for _ in 0..100 {
                max_seen = max_seen.max(coordinator.status().active);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            max_seen
        })
    };

    let result = coordinator.run_batch(provider.requests()).await;

    assert_eq!(result.results.len(), 10);
    assert_eq!(result.succeeded(), 10);
    assert!(
        provider.max_active() <= 2,
        "downloader-side gauge saw {} concurrent chains",
        provider.max_active()
    );
    assert!(sampler.await.unwrap() <= 2);
}

#[tokio::test]
async fn test_batch_aggregates_mixed_outcomes() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ("good-a", Script::Succeed { price_stores: 2 }),
        ("bad", Script::FailDiscovery),
        ("good-b", Script::Succeed { price_stores: 1 }),
    ]));

    let coordinator = DownloadCoordinator::new(
        provider.clone(),
        &downloads_config(3),
        Arc::new(RecordingSink::default()),
    );

    let result = coordinator.run_batch(provider.requests()).await;

    assert!(!result.cancelled);
    assert_eq!(result.results.len(), 3);
    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.failed(), 1);

    let good = &result.results["good-a"];
    assert_eq!(good.stores_files, 1);
    assert_eq!(good.price_files, 2);

    let bad = &result.results["bad"];
    assert!(!bad.success);
    assert!(bad.error.as_deref().unwrap().contains("login rejected"));
}

#[tokio::test]
async fn test_unknown_chain_fails_only_that_task() {
    let provider = Arc::new(ScriptedProvider::new(vec![(
        "known",
        Script::Succeed { price_stores: 1 },
    )]));

    let coordinator = DownloadCoordinator::new(
        provider.clone(),
        &downloads_config(2),
        Arc::new(RecordingSink::default()),
    );

    let mut requests = provider.requests();
    requests.push(ChainRequest::for_date("ghost", day()));

    let result = coordinator.run_batch(requests).await;

    assert_eq!(result.results.len(), 2);
    assert!(result.results["known"].success);
    assert!(!result.results["ghost"].success);
}

#[tokio::test]
async fn test_cancellation_stops_admissions_and_returns() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ("slow-a", Script::Slow(Duration::from_secs(30))),
        ("slow-b", Script::Slow(Duration::from_secs(30))),
        ("never-a", Script::Slow(Duration::from_secs(30))),
        ("never-b", Script::Slow(Duration::from_secs(30))),
    ]));

    let coordinator = Arc::new(DownloadCoordinator::new(
        provider.clone(),
        &downloads_config(2),
        Arc::new(RecordingSink::default()),
    ));

    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            coordinator.cancel();
        });
    }

    let started = std::time::Instant::now();
    let result = coordinator.run_batch(provider.requests()).await;

    assert!(result.cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancelled batch must not wait for 30s sleeps"
    );
    // Every requested chain reports a result even though none finished.
    assert_eq!(result.results.len(), 4);
    assert_eq!(result.succeeded(), 0);

    let unstarted: Vec<_> = result
        .results
        .values()
        .filter(|r| {
            r.error
                .as_deref()
                .is_some_and(|e| e.contains("cancelled before start"))
        })
        .collect();
    assert_eq!(unstarted.len(), 2, "two admissions should have been blocked");
}

#[tokio::test]
async fn test_progress_events_cover_every_task() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ("a", Script::Succeed { price_stores: 1 }),
        ("b", Script::FailDiscovery),
    ]));
    let sink = Arc::new(RecordingSink::default());

    let coordinator =
        DownloadCoordinator::new(provider.clone(), &downloads_config(2), sink.clone());
    coordinator.run_batch(provider.requests()).await;

    let events = sink.events.lock().unwrap();

    let started = events
        .iter()
        .filter(|e| matches!(e, TaskEvent::TaskStarted { .. }))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, TaskEvent::TaskFinished { .. }))
        .count();
    let batches = events
        .iter()
        .filter(|e| matches!(e, TaskEvent::BatchFinished { .. }))
        .count();

    assert_eq!(started, 2);
    assert_eq!(finished, 2);
    assert_eq!(batches, 1);

    let batch = events.last().unwrap();
    match batch {
        TaskEvent::BatchFinished {
            succeeded,
            failed,
            cancelled,
        } => {
            assert_eq!(*succeeded, 1);
            assert_eq!(*failed, 1);
            assert!(!cancelled);
        }
        other => panic!("last event should close the batch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_availability_probe_reports_per_chain() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ("up", Script::Succeed { price_stores: 3 }),
        ("down", Script::FailDiscovery),
    ]));

    let coordinator = DownloadCoordinator::new(
        provider.clone(),
        &downloads_config(2),
        Arc::new(RecordingSink::default()),
    );

    let report = coordinator.check_availability(day()).await;

    assert_eq!(report.len(), 2);
    assert_eq!(report["up"], Ok(4)); // 1 Stores + 3 Price
    assert!(report["down"].is_err());
}
