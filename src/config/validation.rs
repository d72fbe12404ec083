use super::models::{Config, ProtocolFamily};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No chains configured (at least one [[chains]] entry is required)")]
    NoChainsConfigured,

    #[error("Duplicate chain id '{id}'")]
    DuplicateChainId { id: String },

    #[error("Chain '{chain}' has an invalid base_url '{url}'")]
    InvalidBaseUrl { chain: String, url: String },

    #[error("Chain '{chain}' uses the authenticated protocol but has no credentials")]
    MissingCredentials { chain: String },

    #[error("Chain '{chain}' has an invalid {field} pattern: {source}")]
    InvalidPattern {
        chain: String,
        field: &'static str,
        source: regex::Error,
    },

    #[error("Chain '{chain}' page cap must be positive")]
    ZeroPageCap { chain: String },

    #[error("downloads.max_concurrent must be positive")]
    ZeroConcurrency,

    #[error("Throttle delay range is inverted ({section}: min > max)")]
    InvertedDelayRange { section: &'static str },

    #[error("throttle.gate_permits must be positive")]
    ZeroGatePermits,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_chains(config)?;
    validate_downloads(config)?;
    validate_throttle(config)?;
    Ok(())
}

fn validate_chains(config: &Config) -> Result<(), ValidationError> {
    if config.chains.is_empty() {
        return Err(ValidationError::NoChainsConfigured);
    }

    let mut seen = HashSet::new();
    for chain in &config.chains {
        if !seen.insert(chain.id.as_str()) {
            return Err(ValidationError::DuplicateChainId {
                id: chain.id.clone(),
            });
        }

        if reqwest::Url::parse(&chain.base_url).is_err() {
            return Err(ValidationError::InvalidBaseUrl {
                chain: chain.id.clone(),
                url: chain.base_url.clone(),
            });
        }

        if chain.protocol == ProtocolFamily::Authenticated && chain.credentials.is_none() {
            return Err(ValidationError::MissingCredentials {
                chain: chain.id.clone(),
            });
        }

        if chain.max_pages == 0 {
            return Err(ValidationError::ZeroPageCap {
                chain: chain.id.clone(),
            });
        }

        // Pattern overrides must compile at startup, not mid-crawl.
        for (field, pattern) in [
            ("csrf_pattern", chain.csrf_pattern.as_deref()),
            ("row_pattern", chain.row_pattern.as_deref()),
        ] {
            if let Some(pattern) = pattern {
                if let Err(source) = regex::Regex::new(pattern) {
                    return Err(ValidationError::InvalidPattern {
                        chain: chain.id.clone(),
                        field,
                        source,
                    });
                }
            }
        }
    }

    Ok(())
}

fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    if config.downloads.max_concurrent == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    Ok(())
}

fn validate_throttle(config: &Config) -> Result<(), ValidationError> {
    let throttle = &config.throttle;

    if throttle.base_delay_min > throttle.base_delay_max {
        return Err(ValidationError::InvertedDelayRange { section: "base" });
    }
    if throttle.challenge_delay_min > throttle.challenge_delay_max {
        return Err(ValidationError::InvertedDelayRange {
            section: "challenge",
        });
    }
    if throttle.gate_permits == 0 {
        return Err(ValidationError::ZeroGatePermits);
    }

    Ok(())
}
