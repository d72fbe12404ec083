//! Downloader for chains that gate their file list behind a login form.
//!
//! The portal offers no API: an initial GET seeds the session cookies, a
//! csrf-like token is pulled out of the login page by pattern search, and
//! credentials go back in a form POST. The portal never signals login
//! success explicitly — success is judged by the *absence* of login-page
//! markers in the response, a deliberately preserved heuristic whose marker
//! list is per-chain configuration.

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::HttpSession;
use super::{
    ChainDownloader, DEFAULT_CSRF_PATTERN, DEFAULT_ROW_PATTERN, DownloadError, FetchOutcome,
    Result,
};
use crate::catalog::parse_listing_date;
use crate::catalog::{DownloadRef, FileCategory, FileDescriptor};
use crate::config::{ChainConfig, DownloadsConfig};
use crate::observability::Metrics;
use crate::storage::DownloadStore;
use crate::throttle::RequestThrottle;

const LOGIN_PATH: &str = "/login";
const FILES_PATH: &str = "/files";

pub struct AuthenticatedCatalogDownloader {
    chain: ChainConfig,
    session: HttpSession,
    store: DownloadStore,
    metrics: Arc<Metrics>,
    csrf_re: Regex,
    row_re: Regex,
    /// Login happens once per instance; discovery calls re-use the cookies.
    logged_in: Mutex<bool>,
}

impl AuthenticatedCatalogDownloader {
    pub fn new(
        chain: ChainConfig,
        downloads: &DownloadsConfig,
        throttle: Arc<RequestThrottle>,
        store: DownloadStore,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        if chain.credentials.is_none() {
            return Err(DownloadError::Configuration(format!(
                "chain '{}' needs credentials for the authenticated protocol",
                chain.id
            )));
        }

        let session = HttpSession::new(
            &chain.base_url,
            downloads.http_timeout.into(),
            throttle,
            metrics.clone(),
        )?;

        let csrf_re = compile_pattern(chain.csrf_pattern.as_deref(), DEFAULT_CSRF_PATTERN)?;
        let row_re = compile_pattern(chain.row_pattern.as_deref(), DEFAULT_ROW_PATTERN)?;

        Ok(Self {
            chain,
            session,
            store,
            metrics,
            csrf_re,
            row_re,
            logged_in: Mutex::new(false),
        })
    }

    /// Seed cookies, extract the csrf token, post credentials. Holding the
    /// lock across the whole exchange keeps concurrent discovery calls from
    /// racing the login.
    async fn ensure_logged_in(&self) -> Result<()> {
        let mut logged_in = self.logged_in.lock().await;
        if *logged_in {
            return Ok(());
        }

        let login_url = self.session.join(LOGIN_PATH)?;
        let page = self.session.get_text(login_url.clone()).await?;

        let token = self
            .csrf_re
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                DownloadError::Authentication("login page carried no csrf token".to_string())
            })?;

        // Validated at construction.
        let credentials = self.chain.credentials.as_ref().ok_or_else(|| {
            DownloadError::Configuration("credentials disappeared after validation".to_string())
        })?;
        let password = credentials.password.as_deref().ok_or_else(|| {
            DownloadError::Configuration(format!(
                "no password in environment for chain '{}'",
                self.chain.id
            ))
        })?;

        let body = self
            .session
            .post_form(
                login_url,
                &[
                    ("username", credentials.username.as_str()),
                    ("password", password),
                    ("csrftoken", token.as_str()),
                ],
            )
            .await?;

        // No explicit success flag exists; the login page disappearing is
        // the only signal this protocol gives us.
        if let Some(marker) = self
            .chain
            .login_markers
            .iter()
            .find(|marker| body.contains(marker.as_str()))
        {
            return Err(DownloadError::Authentication(format!(
                "login response still contains '{marker}'"
            )));
        }

        info!(chain = %self.chain.id, "Logged in");
        *logged_in = true;
        Ok(())
    }

    /// Parse the server-rendered file table. Rows that do not match the
    /// pattern are skipped; the patterns are the protocol contract.
    fn parse_table(&self, html: &str) -> Vec<FileDescriptor> {
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
}

fn compile_pattern(override_pattern: Option<&str>, default: &str) -> Result<Regex> {
    let pattern = override_pattern.unwrap_or(default);
    Regex::new(pattern)
        .map_err(|e| DownloadError::Configuration(format!("invalid pattern '{pattern}': {e}")))
}

#[async_trait]
impl ChainDownloader for AuthenticatedCatalogDownloader {
    fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    async fn discover_files(&self, date: NaiveDate) -> Result<Vec<FileDescriptor>> {
        self.ensure_logged_in().await?;

        let files_url = self.session.join(FILES_PATH)?;
        let html = self.session.get_text(files_url).await?;

        let descriptors: Vec<FileDescriptor> = self
            .parse_table(&html)
            .into_iter()
            .filter(|d| d.matches_date(date))
            .collect();

        if descriptors.is_empty() {
            warn!(chain = %self.chain.id, "File table yielded no rows for the target date");
        }
        info!(chain = %self.chain.id, files = descriptors.len(), "Discovery finished");

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
                    "authenticated catalog rows carry direct links, got token '{token}'"
                )));
            }
        };

        // The payload may or may not be compressed; extraction decides.
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
    use crate::config::{Credentials, ProtocolFamily};
    use crate::throttle::ThrottleSettings;
    use tempfile::TempDir;

    /// Recorded shape of the portal's file table; the fixture is the
    /// contract the default row pattern is tested against.
    const FILE_TABLE_FIXTURE: &str = r#"
        <table class="file-list">
          <tr>
            <td><a href="/dl/PriceFull729-001-202501010830.gz">PriceFull729-001-202501010830.gz</a></td>
            <td>01/01/2025 08:30</td>
          </tr>
          <tr>
            <td><a href="/dl/Stores729-000-202501010700.xml">Stores729-000-202501010700.xml</a></td>
            <td>01/01/2025 07:00</td>
          </tr>
          <tr>
            <td><a href="/dl/readme.pdf">readme.pdf</a></td>
            <td>01/01/2025 06:00</td>
          </tr>
        </table>
    "#;

    fn downloader(temp: &TempDir) -> AuthenticatedCatalogDownloader {
        let chain = ChainConfig {
            id: "city".to_string(),
            display_name: "City Market".to_string(),
            protocol: ProtocolFamily::Authenticated,
            base_url: "https://portal.city.example".to_string(),
            credentials: Some(Credentials {
                username: "city".to_string(),
                password: Some("secret".to_string()),
            }),
            enabled: true,
            max_pages: 90,
            retry_limit: 3,
            store_failure_cutoff: 5,
            login_markers: vec!["id=\"login-form\"".to_string()],
            csrf_pattern: None,
            row_pattern: None,
        };

        AuthenticatedCatalogDownloader::new(
            chain,
            &DownloadsConfig::default(),
            Arc::new(RequestThrottle::new(ThrottleSettings::default())),
            DownloadStore::new(temp.path(), false),
            Arc::new(Metrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_table_fixture() {
        let temp = TempDir::new().unwrap();
        let d = downloader(&temp);

        let descriptors = d.parse_table(FILE_TABLE_FIXTURE);
        assert_eq!(descriptors.len(), 2, "non-catalog rows must be skipped");

        assert_eq!(descriptors[0].category, FileCategory::PriceFull);
        assert_eq!(
            descriptors[0].link,
            DownloadRef::Url("/dl/PriceFull729-001-202501010830.gz".to_string())
        );
        assert_eq!(descriptors[1].category, FileCategory::Stores);
    }

    #[test]
    fn test_csrf_pattern_extracts_token() {
        let re = Regex::new(DEFAULT_CSRF_PATTERN).unwrap();
        let page = r#"<form><input type="hidden" name="csrftoken" value="abc123"/></form>"#;
        let token = re.captures(page).unwrap().get(1).unwrap().as_str();
        assert_eq!(token, "abc123");
    }

    #[test]
    fn test_missing_credentials_rejected_at_construction() {
        let temp = TempDir::new().unwrap();
        let chain = ChainConfig {
            credentials: None,
            ..downloader(&temp).chain.clone()
        };

        let result = AuthenticatedCatalogDownloader::new(
            chain,
            &DownloadsConfig::default(),
            Arc::new(RequestThrottle::new(ThrottleSettings::default())),
            DownloadStore::new(temp.path(), false),
            Arc::new(Metrics::new()),
        );
        assert!(matches!(result, Err(DownloadError::Configuration(_))));
    }

    #[test]
    fn test_custom_row_pattern_override() {
        let temp = TempDir::new().unwrap();
        let mut chain = downloader(&temp).chain.clone();
        chain.row_pattern =
            Some(r#"data-file="([^"]+)" data-name="([^"]+)" data-date="([^"]*)""#.to_string());

        let d = AuthenticatedCatalogDownloader::new(
            chain,
            &DownloadsConfig::default(),
            Arc::new(RequestThrottle::new(ThrottleSettings::default())),
            DownloadStore::new(temp.path(), false),
            Arc::new(Metrics::new()),
        )
        .unwrap();

        let html = r#"<div data-file="/dl/x.gz" data-name="Promo729-002-202501011000.gz" data-date="01/01/2025"></div>"#;
        let descriptors = d.parse_table(html);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].category, FileCategory::Promo);
    }
}
