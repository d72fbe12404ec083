//! Chain downloaders: one strategy per portal protocol family.
//!
//! Every chain portal publishes the same categories of files but hides them
//! behind a different, anti-automation-hardened protocol. Only protocol
//! *families* get code; per-chain differences (endpoints, patterns, caps)
//! live in configuration.

mod authenticated;
mod factory;
mod paginated;
mod pipeline;
mod polling;
mod session;

pub use authenticated::AuthenticatedCatalogDownloader;
pub use factory::{DownloaderFactory, DownloaderProvider};
pub use paginated::PaginatedCatalogDownloader;
pub use pipeline::{CategoryFilter, DownloadResult, run_chain};
pub use polling::PollingApiDownloader;
pub use session::HttpSession;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::catalog::{FileCategory, FileDescriptor};
use crate::config::ChainConfig;

/// Failure taxonomy for a chain run.
///
/// File- and store-level failures are contained by the pipeline and recorded
/// in the chain's result; chain-level failures (authentication, nothing
/// discovered) abort one chain's task; only configuration errors may be
/// fatal to startup.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Bot challenge: {0}")]
    BotChallenge(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] crate::extract::ExtractError),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StoreError),
}

impl DownloadError {
    /// Whether retrying the same request can help. Bot challenges retry
    /// with escalated backoff; network errors with standard backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::BotChallenge(_) | DownloadError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Outcome of fetching and extracting one selected file.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// XML documents written to the output tree.
    pub saved: usize,
    /// Documents skipped because they already existed on disk.
    pub skipped: usize,
}

/// One chain portal's download strategy.
#[async_trait]
pub trait ChainDownloader: Send + Sync {
    /// The chain this instance is bound to.
    fn chain(&self) -> &ChainConfig;

    /// Capability check used by the factory.
    fn supports(&self, chain_id: &str) -> bool {
        self.chain().id == chain_id
    }

    /// List every candidate file the portal publishes for `date`.
    async fn discover_files(&self, date: NaiveDate) -> Result<Vec<FileDescriptor>>;

    /// Download one selected file, extract its XML and persist it under
    /// `category`'s folder of the chain's output subtree.
    async fn fetch_and_extract(
        &self,
        descriptor: &FileDescriptor,
        category: FileCategory,
    ) -> Result<FetchOutcome>;
}

/// Default extraction pattern for server-rendered file tables: an anchor
/// cell (link + file name) followed by a date cell. Overridable per chain;
/// these patterns are the protocol contract and break silently when portal
/// markup drifts, so keep the recorded fixtures in the tests current.
pub const DEFAULT_ROW_PATTERN: &str = concat!(
    r#"<tr[^>]*>\s*<td[^>]*>\s*<a[^>]+href="([^"]+)"[^>]*>\s*([^<]+?)\s*</a>\s*</td>"#,
    r#"\s*<td[^>]*>\s*([^<]*?)\s*</td>"#,
);

/// Default pattern for the hidden csrf field on login pages.
pub const DEFAULT_CSRF_PATTERN: &str = r#"name="csrftoken"[^>]*value="([^"]+)""#;
