//! Configuration management for pricebox
//!
//! Layered configuration: defaults embedded in the structs, a TOML file,
//! then environment variables (highest priority, `PRICEBOX__<section>__<key>`).
//! Chain passwords are environment-only (`PRICEBOX_PASSWORD_<CHAIN_ID>`).
//!
//! A missing configuration file is fatal at startup: a documented sample is
//! generated next to the expected path and the error tells the operator so.

mod models;
mod sources;
mod validation;

pub use models::{
    ChainConfig, Config, Credentials, DownloadsConfig, ProtocolFamily, ThrottleConfig,
};
pub use sources::write_sample;
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "Configuration file not found at {path}; a documented sample was written to {sample}"
    )]
    MissingFile { path: PathBuf, sample: PathBuf },

    #[error("Failed to write sample configuration to {0}: {1}")]
    SampleWrite(PathBuf, #[source] std::io::Error),

    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing (after writing a sample),
    /// malformed, or fails validation. Configuration errors are the only
    /// errors allowed to be fatal to the process.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
