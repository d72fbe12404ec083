//! Downloader for chains exposing a form-POST JSON listing endpoint.
//!
//! Discovery issues one POST per file-type slot (a small fixed enumeration)
//! with an empty store filter and the target date; each answers a JSON array
//! of file records. Bot detection on these portals replies with HTTP 418 or
//! an HTML challenge page where JSON is expected; both trigger the escalated
//! backoff and a bounded retry of that slot only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::session::{HttpSession, looks_like_challenge_page};
use super::{ChainDownloader, DownloadError, FetchOutcome, Result};
use crate::catalog::{DownloadRef, FileCategory, FileDescriptor};
use crate::catalog::parse_listing_date;
use crate::config::{ChainConfig, DownloadsConfig};
use crate::observability::Metrics;
use crate::storage::DownloadStore;
use crate::throttle::RequestThrottle;

/// Listing endpoint, relative to the chain base URL.
const LIST_PATH: &str = "/files/json/list";
/// Link-resolution endpoint; POST keyed by file name.
const LINK_PATH: &str = "/files/json/link";
/// File-type slots the listing endpoint distinguishes.
const FILE_TYPE_SLOTS: std::ops::RangeInclusive<u8> = 0..=5;

/// One record of the listing response. The field spelling is the protocol
/// contract for this family.
#[derive(Debug, Deserialize)]
struct PollingRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    store: String,
    #[serde(rename = "type", default)]
    type_label: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    path: String,
}

#[derive(Debug, Deserialize)]
struct LinkRecord {
    #[serde(default)]
    path: String,
}

pub struct PollingApiDownloader {
    chain: ChainConfig,
    session: HttpSession,
    throttle: Arc<RequestThrottle>,
    store: DownloadStore,
    metrics: Arc<Metrics>,
}

impl PollingApiDownloader {
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
            throttle.clone(),
            metrics.clone(),
        )?;

        Ok(Self {
            chain,
            session,
            throttle,
            store,
            metrics,
        })
    }

    /// Query one file-type slot, retrying challenged requests with the
    /// escalated backoff, bounded by the chain's retry limit. Giving up
    /// skips this slot, never the whole chain.
    async fn query_slot(&self, slot: u8, date_str: &str) -> Result<Vec<FileDescriptor>> {
        let url = self.session.join(LIST_PATH)?;
        let slot_str = slot.to_string();
        let form = [
            ("store", ""),
            ("date", date_str),
            ("type", slot_str.as_str()),
        ];

        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = match self.session.post_form(url.clone(), &form).await {
                Ok(body) if looks_like_challenge_page(&body) => {
                    self.metrics.bot_challenge();
                    Err(DownloadError::BotChallenge(
                        "challenge page where JSON was expected".to_string(),
                    ))
                }
                other => other,
            };

            match outcome {
                Ok(body) => return Ok(self.parse_listing(&body)?),
                Err(e) if e.is_retryable() && attempt < self.chain.retry_limit => {
                    warn!(
                        chain = %self.chain.id,
                        slot,
                        attempt,
                        error = %e,
                        "Slot query failed, backing off"
                    );
                    if matches!(e, DownloadError::BotChallenge(_)) {
                        self.throttle.after_challenge().await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Parse a listing body. Individual malformed records are logged and
    /// skipped; only an unparseable envelope fails the slot.
    fn parse_listing(&self, body: &str) -> Result<Vec<FileDescriptor>> {
        let records: Vec<serde_json::Value> = serde_json::from_str(body)
            .map_err(|e| DownloadError::Parse(format!("listing envelope: {e}")))?;

        let mut descriptors = Vec::with_capacity(records.len());
        for value in records {
            let record: PollingRecord = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!(chain = %self.chain.id, error = %e, "Skipping malformed record");
                    continue;
                }
            };
            if record.name.is_empty() {
                continue;
            }
            if let Some(descriptor) = self.to_descriptor(record) {
                descriptors.push(descriptor);
            }
        }

        Ok(descriptors)
    }

    fn to_descriptor(&self, record: PollingRecord) -> Option<FileDescriptor> {
        // The file is fetched through the link endpoint keyed by name; the
        // listing's path field is only a hint.
        let link = DownloadRef::Token(record.name.clone());

        let mut descriptor = match FileDescriptor::parse_name(&record.name, link.clone()) {
            Some(d) => d,
            None => FileDescriptor {
                name: record.name.clone(),
                store: None,
                category: FileCategory::from_label(&record.type_label)?,
                raw_date: record.date.clone(),
                timestamp: None,
                link,
            },
        };

        // Listing metadata fills whatever the name itself did not carry.
        if descriptor.store.is_none() && !record.store.is_empty() && record.store != "000" {
            descriptor.store = Some(record.store.trim_start_matches('0').to_string())
                .filter(|s| !s.is_empty());
        }
        if descriptor.timestamp.is_none() {
            descriptor.timestamp = parse_listing_date(&record.date);
            if descriptor.raw_date.is_empty() {
                descriptor.raw_date = record.date;
            }
        }

        Some(descriptor)
    }

    /// Resolve the real download URL for a file name via the link endpoint.
    async fn resolve_link(&self, file_name: &str) -> Result<reqwest::Url> {
        let url = self.session.join(LINK_PATH)?;
        let body = self
            .session
            .post_form(url, &[("fileName", file_name)])
            .await?;

        if looks_like_challenge_page(&body) {
            self.metrics.bot_challenge();
            return Err(DownloadError::BotChallenge(
                "challenge page on link resolution".to_string(),
            ));
        }

        let records: Vec<LinkRecord> = serde_json::from_str(&body)
            .map_err(|e| DownloadError::Parse(format!("link response: {e}")))?;
        let path = records
            .first()
            .filter(|r| !r.path.is_empty())
            .map(|r| r.path.clone())
            .ok_or_else(|| {
                DownloadError::Parse(format!("no download path returned for '{file_name}'"))
            })?;

        self.session.join(&path)
    }
}

#[async_trait]
impl ChainDownloader for PollingApiDownloader {
    fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    async fn discover_files(&self, date: NaiveDate) -> Result<Vec<FileDescriptor>> {
        let date_str = date.format("%d/%m/%Y").to_string();
        let mut all = Vec::new();

        for slot in FILE_TYPE_SLOTS {
            match self.query_slot(slot, &date_str).await {
                Ok(descriptors) => {
                    debug!(chain = %self.chain.id, slot, count = descriptors.len(), "Slot listed");
                    all.extend(descriptors);
                }
                Err(e) => {
                    // A dead slot costs its file types, not the chain.
                    warn!(chain = %self.chain.id, slot, error = %e, "Giving up on slot");
                }
            }
        }

        info!(chain = %self.chain.id, files = all.len(), "Discovery finished");
        Ok(all)
    }

    async fn fetch_and_extract(
        &self,
        descriptor: &FileDescriptor,
        category: FileCategory,
    ) -> Result<FetchOutcome> {
        let url = match &descriptor.link {
            DownloadRef::Token(name) => self.resolve_link(name).await?,
            DownloadRef::Url(link) => self.session.join(link)?,
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
