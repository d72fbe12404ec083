//! Downloader for chains exposing one public paginated HTML catalog.
//!
//! No login, no API: just a table-based listing served page by page. The
//! crawl walks pages until one yields no rows or loses its next-page link,
//! capped by the chain's configured page limit, with a short randomized
//! delay between pages so the crawl does not read as a burst.

use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::HttpSession;
use super::{ChainDownloader, DEFAULT_ROW_PATTERN, DownloadError, FetchOutcome, Result};
use crate::catalog::parse_listing_date;
use crate::catalog::{DownloadRef, FileCategory, FileDescriptor};
use crate::config::{ChainConfig, DownloadsConfig};
use crate::observability::Metrics;
use crate::storage::DownloadStore;
use crate::throttle::RequestThrottle;

const CATALOG_PATH: &str = "/catalog";
/// Marker for a live next-page link in the pagination markup.
const NEXT_PAGE_MARKER: &str = r#"rel="next""#;

pub struct PaginatedCatalogDownloader {
    chain: ChainConfig,
    session: HttpSession,
    store: DownloadStore,
    metrics: Arc<Metrics>,
    row_re: Regex,
    page_delay: Duration,
}

impl PaginatedCatalogDownloader {
    pub fn new(
        chain: ChainConfig,
        downloads: &DownloadsConfig,
        throttle: Arc<RequestThrottle>,
        store: DownloadStore,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let session = HttpSession::new(
            &chain.base_url,
            downloads.http_timeout.into(),
            throttle,
            metrics.clone(),
        )?;

        let pattern = chain.row_pattern.as_deref().unwrap_or(DEFAULT_ROW_PATTERN);
        let row_re = Regex::new(pattern)
            .map_err(|e| DownloadError::Configuration(format!("invalid pattern '{pattern}': {e}")))?;

        Ok(Self {
            chain,
            session,
            store,
            metrics,
            row_re,
            page_delay: downloads.page_delay.into(),
        })
    }

    fn page_url(&self, page: u32) -> Result<reqwest::Url> {
        let mut url = self.session.join(CATALOG_PATH)?;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        Ok(url)
    }

    fn parse_page(&self, html: &str) -> Vec<FileDescriptor> {
        let mut descriptors = Vec::new();

        for captures in self.row_re.captures_iter(html) {
            let (Some(link), Some(name)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let date_cell = captures.get(3).map(|m| m.as_str()).unwrap_or("");

            let name = name.as_str().trim();
            let Some(mut descriptor) =
                FileDescriptor::parse_name(name, DownloadRef::Url(link.as_str().to_string()))
            else {
                debug!(chain = %self.chain.id, file = name, "Unrecognized row, skipping");
                continue;
            };

            if descriptor.timestamp.is_none() {
                descriptor.timestamp = parse_listing_date(date_cell);
                descriptor.raw_date = date_cell.trim().to_string();
            }

            descriptors.push(descriptor);
        }

        descriptors
    }

    /// Short randomized gap between pages, on top of the global throttle.
    async fn page_pause(&self) {
        let base = self.page_delay.as_millis() as u64;
        if base == 0 {
            return;
        }
        let jittered = rand::thread_rng().gen_range(base / 2..=base + base / 2);
        tokio::time::sleep(Duration::from_millis(jittered)).await;
    }
}

#[async_trait]
impl ChainDownloader for PaginatedCatalogDownloader {
    fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    async fn discover_files(&self, date: NaiveDate) -> Result<Vec<FileDescriptor>> {
        // Dedup by file name across pages; portals repeat rows at page
        // boundaries. The most recent duplicate wins.
        let mut by_name: HashMap<String, FileDescriptor> = HashMap::new();
        let mut pages_walked = 0;

        for page in 1..=self.chain.max_pages {
            let html = self.session.get_text(self.page_url(page)?).await?;
            pages_walked = page;

            let rows = self.parse_page(&html);
            if rows.is_empty() {
                debug!(chain = %self.chain.id, page, "Empty page, stopping crawl");
                break;
            }

            for descriptor in rows {
                match by_name.get(&descriptor.name) {
                    Some(existing)
                        if existing.timestamp.is_some()
                            && descriptor.timestamp <= existing.timestamp => {}
                    _ => {
                        by_name.insert(descriptor.name.clone(), descriptor);
                    }
                }
            }

            if !html.contains(NEXT_PAGE_MARKER) {
                debug!(chain = %self.chain.id, page, "No next-page link, stopping crawl");
                break;
            }

            self.page_pause().await;
        }

        if pages_walked == self.chain.max_pages {
            warn!(
                chain = %self.chain.id,
                cap = self.chain.max_pages,
                "Crawl hit the page cap; the listing may be longer"
            );
        }

        // Only files dated on the target day are worth selecting.
        let descriptors: Vec<FileDescriptor> = by_name
            .into_values()
            .filter(|d| d.timestamp.map(|ts| ts.date() == date).unwrap_or(false))
            .collect();

        info!(
            chain = %self.chain.id,
            pages = pages_walked,
            files = descriptors.len(),
            "Discovery finished"
        );

        Ok(descriptors)
    }

    async fn fetch_and_extract(
        &self,
        descriptor: &FileDescriptor,
        category: FileCategory,
    ) -> Result<FetchOutcome> {
        let url = match &descriptor.link {
            DownloadRef::Url(link) => self.session.join(link)?,
            DownloadRef::Token(token) => {
                return Err(DownloadError::Parse(format!(
                    "paginated catalog rows carry direct links, got token '{token}'"
                )));
            }
        };

        let bytes = self.session.get_bytes(url).await?;
        let payloads = crate::extract::extract(&bytes)?;

        let mut saved = 0;
        let mut skipped = 0;
        for payload in &payloads {
            let outcome = self.store.save(
                &self.chain.id,
                category,
                descriptor.store.as_deref(),
                &descriptor.raw_date,
                payload,
            )?;
            if outcome.written {
                saved += 1;
                self.metrics.file_fetched();
            } else {
                skipped += 1;
            }
        }

        Ok(FetchOutcome { saved, skipped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolFamily;
    use crate::throttle::ThrottleSettings;
    use tempfile::TempDir;

    /// Recorded page shape, pagination included.
    const CATALOG_PAGE_FIXTURE: &str = r#"
        <table>
          <tr>
            <td><a href="/get/Price729-001-202501010800.gz">Price729-001-202501010800.gz</a></td>
            <td>01/01/2025 08:00</td>
          </tr>
          <tr>
            <td><a href="/get/Price729-002-202501010805.gz">Price729-002-202501010805.gz</a></td>
            <td>01/01/2025 08:05</td>
          </tr>
        </table>
        <nav><a rel="next" href="/catalog?page=2">&raquo;</a></nav>
    "#;

    fn downloader(temp: &TempDir) -> PaginatedCatalogDownloader {
        let chain = ChainConfig {
            id: "family".to_string(),
            display_name: "Family Grocer".to_string(),
            protocol: ProtocolFamily::Paginated,
            base_url: "https://files.family.example".to_string(),
            credentials: None,
            enabled: true,
            max_pages: 90,
            retry_limit: 3,
            store_failure_cutoff: 5,
            login_markers: vec![],
            csrf_pattern: None,
            row_pattern: None,
        };

        PaginatedCatalogDownloader::new(
            chain,
            &DownloadsConfig::default(),
            Arc::new(RequestThrottle::new(ThrottleSettings::default())),
            DownloadStore::new(temp.path(), false),
            Arc::new(Metrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_page_fixture() {
        let temp = TempDir::new().unwrap();
        let d = downloader(&temp);

        let rows = d.parse_page(CATALOG_PAGE_FIXTURE);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].store.as_deref(), Some("1"));
        assert_eq!(rows[1].store.as_deref(), Some("2"));
    }

    #[test]
    fn test_next_page_marker_detection() {
        assert!(CATALOG_PAGE_FIXTURE.contains(NEXT_PAGE_MARKER));
        let last_page = CATALOG_PAGE_FIXTURE.replace(r#"rel="next" "#, "");
        assert!(!last_page.contains(NEXT_PAGE_MARKER));
    }

    #[test]
    fn test_page_url_carries_page_number() {
        let temp = TempDir::new().unwrap();
        let d = downloader(&temp);

        let url = d.page_url(7).unwrap();
        assert_eq!(url.as_str(), "https://files.family.example/catalog?page=7");
    }
}
