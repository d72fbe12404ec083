use super::models::Config;
use config::{Environment, File};
use std::env;
use std::path::{Path, PathBuf};

use super::ConfigError;

const CONFIG_ENV_VAR: &str = "PRICEBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/pricebox.toml";
const ENV_PREFIX: &str = "PRICEBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
///
/// A missing configuration file is an operator error, not a silent
/// fall-back to "no chains": a documented sample is written next to the
/// expected path and loading fails.
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and the environment.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    if !config_path.exists() {
        let sample_path = write_sample_next_to(&config_path)?;
        return Err(ConfigError::MissingFile {
            path: config_path,
            sample: sample_path,
        });
    }

    tracing::info!("Loading configuration from: {}", config_path.display());

    let builder = config::Config::builder()
        .add_source(File::from(config_path))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

    let mut config: Config = builder.build()?.try_deserialize()?;
    load_secrets(&mut config);

    Ok(config)
}

/// Fill chain passwords from the environment. Passwords never live in the
/// TOML file; the lookup key is `PRICEBOX_PASSWORD_<CHAIN_ID>` with the id
/// uppercased and dashes mapped to underscores.
fn load_secrets(config: &mut Config) {
    for chain in &mut config.chains {
        let Some(credentials) = chain.credentials.as_mut() else {
            continue;
        };
        if credentials.password.is_some() {
            continue;
        }

        let var = password_var(&chain.id);
        if let Ok(password) = env::var(&var) {
            credentials.password = Some(password);
        }
    }
}

pub(crate) fn password_var(chain_id: &str) -> String {
    format!(
        "PRICEBOX_PASSWORD_{}",
        chain_id.to_uppercase().replace('-', "_")
    )
}

/// Write the documented sample beside the missing config path.
fn write_sample_next_to(config_path: &Path) -> Result<PathBuf, ConfigError> {
    let sample_path = config_path.with_file_name("pricebox.sample.toml");

    if let Some(parent) = sample_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::SampleWrite(sample_path.clone(), e))?;
        }
    }

    std::fs::write(&sample_path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError::SampleWrite(sample_path.clone(), e))?;

    Ok(sample_path)
}

/// Write the documented sample to an explicit path (the `init` command).
pub fn write_sample(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::SampleWrite(path.to_path_buf(), e))?;
        }
    }
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError::SampleWrite(path.to_path_buf(), e))
}

pub(crate) const SAMPLE_CONFIG: &str = r#"# pricebox configuration sample.
# Copy to pricebox.toml (or point PRICEBOX_CONFIG at it) and adjust.
#
# Any value can be overridden from the environment:
#   PRICEBOX__DOWNLOADS__MAX_CONCURRENT=2
# Chain passwords are environment-only:
#   PRICEBOX_PASSWORD_<CHAIN_ID>=secret

[downloads]
# Extracted XML lands under <base_dir>/<chain>/<Stores|Price|PriceFull|Promo|PromoFull>/
base_dir = "data/downloads"
# Chains downloading at once.
max_concurrent = 4
# One generous ceiling per HTTP call; large archives on slow portals.
http_timeout = "12m"
# Wait for in-flight chains when a batch is cancelled.
shutdown_grace = "30s"
# Extra randomized delay between catalog pages of one listing.
page_delay = "300ms"
# Re-extract files that already exist on disk.
overwrite = false

[throttle]
# Normal inter-request delay range; jitter stays inside the range spread.
base_delay_min = "500ms"
base_delay_max = "1500ms"
# Escalated range after a bot-challenge response (HTTP 418 / challenge page).
challenge_delay_min = "5s"
challenge_delay_max = "12s"
# Hard floor after all multipliers and jitter.
min_delay = "250ms"
# Requests spaced closer than this double the delay.
rapid_threshold = "2s"
# Every Nth request triples the delay.
cooldown_every = 10
# Concurrent callers allowed inside the throttle.
gate_permits = 2

# One [[chains]] entry per portal. Protocol families:
#   polling       - form-POST JSON listing (fields: store, date dd/MM/yyyy,
#                   file-type slot 0-5; records carry name/store/type/date/path;
#                   a second POST keyed by file name resolves the real link)
#   authenticated - login-gated HTML file list (regex-scraped)
#   paginated     - public paginated HTML table, crawled until empty

[[chains]]
id = "mega-retail"
display_name = "Mega Retail"
protocol = "polling"
base_url = "https://prices.mega-retail.example"

[[chains]]
id = "city-market"
display_name = "City Market"
protocol = "authenticated"
base_url = "https://portal.city-market.example"
# Password comes from PRICEBOX_PASSWORD_CITY_MARKET.
credentials = { username = "citymarket" }
# Login success = none of these markers in the response body. The markers and
# the extraction patterns below are the per-chain protocol contract; portal
# markup changes break them silently, so keep fixture tests current.
login_markers = ["id=\"login-form\"", "name=\"password\""]
# csrf_pattern = 'name="csrftoken"\s+value="([^"]+)"'
# row_pattern = '<tr>.*?</tr>'

[[chains]]
id = "family-grocer"
display_name = "Family Grocer"
protocol = "paginated"
base_url = "https://files.family-grocer.example"
# Observed portals stop listing near page 90.
max_pages = 90
enabled = true
"#;
