//! Config-driven construction of chain downloaders.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::authenticated::AuthenticatedCatalogDownloader;
use super::paginated::PaginatedCatalogDownloader;
use super::polling::PollingApiDownloader;
use super::{ChainDownloader, DownloadError, Result};
use crate::config::{Config, ProtocolFamily};
use crate::observability::Metrics;
use crate::storage::DownloadStore;
use crate::throttle::RequestThrottle;

/// Source of downloader instances, as the coordinator sees it. The
/// concrete factory below is the production implementation; tests inject
/// scripted downloaders through the same seam.
pub trait DownloaderProvider: Send + Sync {
    fn provide(&self, chain_id: &str) -> Result<Arc<dyn ChainDownloader>>;
    fn provide_all_active(&self) -> Result<Vec<Arc<dyn ChainDownloader>>>;
}

/// Maps chain ids to strategy instances. Instances are cached per id: a
/// chain's session (cookies, login state) must survive across calls within
/// a run, and must never be shared with another chain.
pub struct DownloaderFactory {
    config: Arc<Config>,
    throttle: Arc<RequestThrottle>,
    store: DownloadStore,
    metrics: Arc<Metrics>,
    cache: Mutex<BTreeMap<String, Arc<dyn ChainDownloader>>>,
}

impl DownloaderFactory {
    pub fn new(
        config: Arc<Config>,
        throttle: Arc<RequestThrottle>,
        store: DownloadStore,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            throttle,
            store,
            metrics,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Build (or reuse) the downloader for one chain id.
    pub fn create(&self, chain_id: &str) -> Result<Arc<dyn ChainDownloader>> {
        if let Some(cached) = self.cache.lock().expect("factory cache poisoned").get(chain_id) {
            return Ok(cached.clone());
        }

        let chain = self.config.chain(chain_id).ok_or_else(|| {
            DownloadError::Configuration(format!("unknown chain '{chain_id}'"))
        })?;

        if !chain.enabled {
            return Err(DownloadError::Configuration(format!(
                "chain '{chain_id}' is disabled"
            )));
        }

        let downloads = &self.config.downloads;
        let downloader: Arc<dyn ChainDownloader> = match chain.protocol {
            ProtocolFamily::Polling => Arc::new(PollingApiDownloader::new(
                chain.clone(),
                downloads,
                self.throttle.clone(),
                self.store.clone(),
                self.metrics.clone(),
            )?),
            ProtocolFamily::Authenticated => Arc::new(AuthenticatedCatalogDownloader::new(
                chain.clone(),
                downloads,
                self.throttle.clone(),
                self.store.clone(),
                self.metrics.clone(),
            )?),
            ProtocolFamily::Paginated => Arc::new(PaginatedCatalogDownloader::new(
                chain.clone(),
                downloads,
                self.throttle.clone(),
                self.store.clone(),
                self.metrics.clone(),
            )?),
        };

        debug_assert!(downloader.supports(chain_id));
        debug!(chain = chain_id, protocol = ?chain.protocol, "Downloader created");

        self.cache
            .lock()
            .expect("factory cache poisoned")
            .insert(chain_id.to_string(), downloader.clone());

        Ok(downloader)
    }

    /// Downloaders for every enabled chain, in config order.
    pub fn create_all_active(&self) -> Result<Vec<Arc<dyn ChainDownloader>>> {
        self.config
            .active_chains()
            .map(|chain| self.create(&chain.id))
            .collect()
    }

    /// Downloaders for an explicit subset of chain ids. Unknown or disabled
    /// ids fail the whole call; a partial batch would hide operator typos.
    pub fn create_subset(&self, chain_ids: &[String]) -> Result<Vec<Arc<dyn ChainDownloader>>> {
        chain_ids.iter().map(|id| self.create(id)).collect()
    }
}

impl DownloaderProvider for DownloaderFactory {
    fn provide(&self, chain_id: &str) -> Result<Arc<dyn ChainDownloader>> {
        self.create(chain_id)
    }

    fn provide_all_active(&self) -> Result<Vec<Arc<dyn ChainDownloader>>> {
        self.create_all_active()
    }
}
