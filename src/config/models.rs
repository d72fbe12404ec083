use crate::humanize::HumanDuration;
use crate::throttle::ThrottleSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

/// Global download/coordination settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Max chains downloading at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Single generous per-HTTP-call ceiling; large archives on slow portals.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: HumanDuration,
    /// Bounded wait for in-flight tasks when a batch is cancelled.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: HumanDuration,
    /// Short randomized delay between catalog pages of one listing.
    #[serde(default = "default_page_delay")]
    pub page_delay: HumanDuration,
    /// Overwrite already-extracted files instead of skipping them.
    #[serde(default)]
    pub overwrite: bool,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            max_concurrent: default_max_concurrent(),
            http_timeout: default_http_timeout(),
            shutdown_grace: default_shutdown_grace(),
            page_delay: default_page_delay(),
            overwrite: false,
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("data/downloads")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_http_timeout() -> HumanDuration {
    HumanDuration::from_secs(12 * 60)
}

fn default_shutdown_grace() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_page_delay() -> HumanDuration {
    HumanDuration::from_millis(300)
}

/// Request pacing settings; see `throttle` for the semantics.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_base_delay_min")]
    pub base_delay_min: HumanDuration,
    #[serde(default = "default_base_delay_max")]
    pub base_delay_max: HumanDuration,
    #[serde(default = "default_challenge_delay_min")]
    pub challenge_delay_min: HumanDuration,
    #[serde(default = "default_challenge_delay_max")]
    pub challenge_delay_max: HumanDuration,
    #[serde(default = "default_min_delay")]
    pub min_delay: HumanDuration,
    #[serde(default = "default_rapid_threshold")]
    pub rapid_threshold: HumanDuration,
    #[serde(default = "default_cooldown_every")]
    pub cooldown_every: u64,
    #[serde(default = "default_gate_permits")]
    pub gate_permits: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_delay_min: default_base_delay_min(),
            base_delay_max: default_base_delay_max(),
            challenge_delay_min: default_challenge_delay_min(),
            challenge_delay_max: default_challenge_delay_max(),
            min_delay: default_min_delay(),
            rapid_threshold: default_rapid_threshold(),
            cooldown_every: default_cooldown_every(),
            gate_permits: default_gate_permits(),
        }
    }
}

impl ThrottleConfig {
    pub fn to_settings(&self) -> ThrottleSettings {
        ThrottleSettings {
            base_delay_min: self.base_delay_min.into(),
            base_delay_max: self.base_delay_max.into(),
            challenge_delay_min: self.challenge_delay_min.into(),
            challenge_delay_max: self.challenge_delay_max.into(),
            min_delay: self.min_delay.into(),
            rapid_threshold: self.rapid_threshold.into(),
            cooldown_every: self.cooldown_every,
            gate_permits: self.gate_permits,
        }
    }
}

fn default_base_delay_min() -> HumanDuration {
    HumanDuration::from_millis(500)
}

fn default_base_delay_max() -> HumanDuration {
    HumanDuration::from_millis(1500)
}

fn default_challenge_delay_min() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_challenge_delay_max() -> HumanDuration {
    HumanDuration::from_secs(12)
}

fn default_min_delay() -> HumanDuration {
    HumanDuration::from_millis(250)
}

fn default_rapid_threshold() -> HumanDuration {
    HumanDuration::from_secs(2)
}

fn default_cooldown_every() -> u64 {
    10
}

fn default_gate_permits() -> usize {
    2
}

/// Protocol family a chain portal speaks. Only families get distinct code;
/// per-chain differences are configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// Form-POST JSON listing endpoint with per-slot queries.
    Polling,
    /// Login-gated HTML file list.
    Authenticated,
    /// Public paginated HTML table.
    Paginated,
}

/// One chain portal entry. Immutable after load.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    pub id: String,
    pub display_name: String,
    pub protocol: ProtocolFamily,
    pub base_url: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Page cap for paginated catalogs (observed portals stop near 90).
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Bounded retries for bot-challenged or failed requests.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Consecutive per-store fetch failures before the rest of that
    /// category is abandoned for the chain.
    #[serde(default = "default_store_failure_cutoff")]
    pub store_failure_cutoff: u32,
    /// Login-page markers whose absence means the login succeeded.
    #[serde(default = "default_login_markers")]
    pub login_markers: Vec<String>,
    /// Override for the csrf-token extraction pattern.
    #[serde(default)]
    pub csrf_pattern: Option<String>,
    /// Override for the file-table row extraction pattern.
    #[serde(default)]
    pub row_pattern: Option<String>,
}

/// Portal credentials. The password is never read from the TOML file;
/// `sources` fills it from the environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_pages() -> u32 {
    90
}

fn default_retry_limit() -> u32 {
    3
}

fn default_store_failure_cutoff() -> u32 {
    5
}

fn default_login_markers() -> Vec<String> {
    vec![
        "id=\"login-form\"".to_string(),
        "name=\"password\"".to_string(),
    ]
}

impl Config {
    /// Enabled chains in config order.
    pub fn active_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }

    pub fn chain(&self, id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == id)
    }
}
