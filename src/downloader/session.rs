//! Per-chain HTTP session.
//!
//! Owns the reqwest client (cookie jar included) for exactly one chain;
//! sessions are never shared across chains. Every call funnels through the
//! shared throttle before touching the network and maps bot-challenge
//! responses (HTTP 418) into their own error class.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use super::{DownloadError, Result};
use crate::observability::Metrics;
use crate::throttle::RequestThrottle;

/// Browser User-Agent pool; rotated per request so a chain's traffic does
/// not carry one constant fingerprint.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

pub struct HttpSession {
    client: Client,
    base_url: Url,
    throttle: Arc<RequestThrottle>,
    metrics: Arc<Metrics>,
}

impl HttpSession {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        throttle: Arc<RequestThrottle>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DownloadError::Configuration(format!("invalid base url: {e}")))?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.8,*/*;q=0.7"
                .parse()
                .map_err(|_| DownloadError::Configuration("invalid default header".into()))?,
        );
        headers.insert(
            "Accept-Language",
            "en-US,en;q=0.9"
                .parse()
                .map_err(|_| DownloadError::Configuration("invalid default header".into()))?,
        );

        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .gzip(true)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| DownloadError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            throttle,
            metrics,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a possibly site-relative link against the chain base.
    pub fn join(&self, link: &str) -> Result<Url> {
        if let Ok(absolute) = Url::parse(link) {
            return Ok(absolute);
        }
        self.base_url
            .join(link)
            .map_err(|e| DownloadError::Parse(format!("unresolvable link '{link}': {e}")))
    }

    /// GET returning the response body as text.
    pub async fn get_text(&self, url: Url) -> Result<String> {
        let response = self.send(self.client.get(url.clone())).await?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::Network(format!("read body from {url}: {e}")))
    }

    /// GET returning the raw response bytes (archive downloads).
    pub async fn get_bytes(&self, url: Url) -> Result<Bytes> {
        let response = self.send(self.client.get(url.clone())).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Network(format!("read body from {url}: {e}")))?;
        debug!(url = %url, size = bytes.len(), "Download completed");
        Ok(bytes)
    }

    /// Form-encoded POST returning the response body as text.
    pub async fn post_form(&self, url: Url, form: &[(&str, &str)]) -> Result<String> {
        let response = self.send(self.client.post(url.clone()).form(form)).await?;
        response
            .text()
            .await
            .map_err(|e| DownloadError::Network(format!("read body from {url}: {e}")))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        if self.throttle.is_halted() {
            return Err(DownloadError::Network(
                "batch cancelled before request".to_string(),
            ));
        }
        self.throttle.before_request().await;
        self.metrics.request_sent();

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let response = request
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DownloadError::Network("request timed out".to_string())
                } else {
                    DownloadError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::IM_A_TEAPOT {
            // The portals' bot detection answers 418 instead of 403.
            self.metrics.bot_challenge();
            warn!(url = %response.url(), "Bot challenge response");
            return Err(DownloadError::BotChallenge(format!(
                "HTTP 418 from {}",
                response.url()
            )));
        }
        if !status.is_success() {
            return Err(DownloadError::Network(format!(
                "HTTP {} from {}",
                status.as_u16(),
                response.url()
            )));
        }

        Ok(response)
    }
}

/// Challenge pages come back as HTML with a 200 status from endpoints that
/// normally answer JSON; treat such bodies as bot challenges, not parse bugs.
pub(crate) fn looks_like_challenge_page(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with("<!DOCTYPE") || head.starts_with("<html") || head.starts_with("<HTML")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::ThrottleSettings;

    fn session() -> HttpSession {
        HttpSession::new(
            "https://prices.example.com/portal/",
            Duration::from_secs(5),
            Arc::new(RequestThrottle::new(ThrottleSettings::default())),
            Arc::new(Metrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_join_relative_link() {
        let s = session();
        let url = s.join("/files/PriceFull729-001-202501010830.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://prices.example.com/files/PriceFull729-001-202501010830.gz"
        );
    }

    #[test]
    fn test_join_absolute_link() {
        let s = session();
        let url = s.join("https://cdn.example.net/x.zip").unwrap();
        assert_eq!(url.as_str(), "https://cdn.example.net/x.zip");
    }

    #[test]
    fn test_invalid_base_url_is_configuration_error() {
        let result = HttpSession::new(
            "not a url",
            Duration::from_secs(5),
            Arc::new(RequestThrottle::new(ThrottleSettings::default())),
            Arc::new(Metrics::new()),
        );
        assert!(matches!(result, Err(DownloadError::Configuration(_))));
    }

    #[test]
    fn test_challenge_page_heuristic() {
        assert!(looks_like_challenge_page("<!DOCTYPE html><html>..."));
        assert!(looks_like_challenge_page("  <html><body>Checking your browser"));
        assert!(!looks_like_challenge_page("[{\"name\":\"x\"}]"));
        assert!(!looks_like_challenge_page(""));
    }
}
