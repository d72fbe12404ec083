//! The per-chain download pass: discover, select, fetch, extract.
//!
//! Failure containment rules: a file failure is recorded and costs nothing
//! else; a store that keeps failing is cut off after a configured number of
//! consecutive errors, abandoning the *rest of that category only*; a chain
//! fails as a whole only when authentication fails or discovery yields
//! nothing. A pass always produces a result, never a panic or an early
//! bail-out that loses the files already fetched.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use super::{ChainDownloader, FetchOutcome};
use crate::catalog::{FileCategory, FileDescriptor, Selection, select};

/// Which categories a request wants. Default: everything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CategoryFilter {
    pub stores: bool,
    pub prices: bool,
    pub promos: bool,
}

impl Default for CategoryFilter {
    fn default() -> Self {
        Self {
            stores: true,
            prices: true,
            promos: true,
        }
    }
}

impl CategoryFilter {
    pub fn only(category: FileCategory) -> Self {
        let mut filter = Self {
            stores: false,
            prices: false,
            promos: false,
        };
        match category.base() {
            FileCategory::Stores => filter.stores = true,
            FileCategory::Price => filter.prices = true,
            FileCategory::Promo => filter.promos = true,
            _ => {}
        }
        filter
    }
}

/// Per-chain outcome of one pass. Read-only once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub chain_id: String,
    pub success: bool,
    pub stores_files: usize,
    pub price_files: usize,
    pub promo_files: usize,
    /// A few fetched file names for the operator's eyes.
    pub sample_files: Vec<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl DownloadResult {
    fn failed(chain_id: &str, error: String, duration: Duration) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            success: false,
            stores_files: 0,
            price_files: 0,
            promo_files: 0,
            sample_files: Vec::new(),
            error: Some(error),
            duration,
        }
    }

    pub fn total_files(&self) -> usize {
        self.stores_files + self.price_files + self.promo_files
    }
}

const SAMPLE_LIMIT: usize = 5;

/// Run one chain's full pass for `date`.
pub async fn run_chain(
    downloader: &dyn ChainDownloader,
    date: NaiveDate,
    filter: CategoryFilter,
) -> DownloadResult {
    let chain_id = downloader.chain().id.clone();
    let cutoff = downloader.chain().store_failure_cutoff;
    let started = Instant::now();

    // Chain-level failures end the pass here.
    let descriptors = match downloader.discover_files(date).await {
        Ok(descriptors) => descriptors,
        Err(e) => {
            warn!(chain = %chain_id, error = %e, "Discovery failed");
            return DownloadResult::failed(&chain_id, e.to_string(), started.elapsed());
        }
    };

    if descriptors.is_empty() {
        return DownloadResult::failed(
            &chain_id,
            "no files discovered for the target date".to_string(),
            started.elapsed(),
        );
    }

    let selection = select(descriptors, date);
    info!(
        chain = %chain_id,
        selected = selection.len(),
        stores = selection.store_ids().len(),
        "Selection finished"
    );

    let mut tally = Tally::default();

    // The Stores catalog comes first: store identifiers for the rest of the
    // pass derive from it.
    if filter.stores {
        if let Some(descriptor) = &selection.stores {
            match downloader
                .fetch_and_extract(descriptor, FileCategory::Stores)
                .await
            {
                Ok(outcome) => tally.record(FileCategory::Stores, descriptor, &outcome),
                Err(e) => {
                    warn!(chain = %chain_id, file = %descriptor.name, error = %e, "Stores fetch failed");
                    tally.errors.push(format!("{}: {e}", descriptor.name));
                }
            }
        }
    }

    if filter.prices {
        fetch_category(downloader, &selection, FileCategory::Price, cutoff, &mut tally).await;
    }
    if filter.promos {
        fetch_category(downloader, &selection, FileCategory::Promo, cutoff, &mut tally).await;
    }

    let success = tally.total() > 0;
    let error = if tally.errors.is_empty() {
        None
    } else {
        Some(tally.errors.join("; "))
    };

    DownloadResult {
        chain_id,
        success,
        stores_files: tally.stores,
        price_files: tally.prices,
        promo_files: tally.promos,
        sample_files: tally.samples,
        error,
        duration: started.elapsed(),
    }
}

#[derive(Default)]
struct Tally {
    stores: usize,
    prices: usize,
    promos: usize,
    samples: Vec<String>,
    errors: Vec<String>,
}

impl Tally {
    fn record(&mut self, category: FileCategory, descriptor: &FileDescriptor, outcome: &FetchOutcome) {
        let count = outcome.saved + outcome.skipped;
        match category.base() {
            FileCategory::Stores => self.stores += count,
            FileCategory::Price => self.prices += count,
            FileCategory::Promo => self.promos += count,
            _ => {}
        }
        if self.samples.len() < SAMPLE_LIMIT {
            self.samples.push(descriptor.name.clone());
        }
    }

    fn total(&self) -> usize {
        self.stores + self.prices + self.promos
    }
}

/// Fetch every selected file of one category. Failures are contained per
/// store; `cutoff` consecutive failures abandon the category's remaining
/// stores without touching the other category or the files already saved.
async fn fetch_category(
    downloader: &dyn ChainDownloader,
    selection: &Selection,
    category: FileCategory,
    cutoff: u32,
    tally: &mut Tally,
) {
    let chain_id = &downloader.chain().id;
    let slots = match category {
        FileCategory::Price => &selection.prices,
        FileCategory::Promo => &selection.promos,
        _ => return,
    };

    let mut consecutive_failures: u32 = 0;

    for (store, descriptor) in slots {
        // The descriptor knows whether it is the Full variant; the selected
        // category decides the destination folder.
        match downloader
            .fetch_and_extract(descriptor, descriptor.category)
            .await
        {
            Ok(outcome) => {
                consecutive_failures = 0;
                tally.record(category, descriptor, &outcome);
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    chain = %chain_id,
                    store = %store,
                    file = %descriptor.name,
                    error = %e,
                    "Store fetch failed"
                );
                tally.errors.push(format!("{}: {e}", descriptor.name));

                if consecutive_failures >= cutoff {
                    warn!(
                        chain = %chain_id,
                        category = %category,
                        cutoff,
                        "Consecutive failures hit the cutoff, abandoning category"
                    );
                    break;
                }
            }
        }
    }
}
