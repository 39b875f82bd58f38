//! Engine configuration.
//!
//! Recognized options mirror the politeness and pagination knobs; unknown
//! keys in a config file are ignored rather than rejected, so site-specific
//! sections can live in the same file. Validation happens at construction,
//! before any network activity.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Default politeness window lower bound.
pub const DEFAULT_MIN_DELAY_MS: u64 = 5_000;
/// Default politeness window upper bound.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
/// Default consecutive-empty-page streak that terminates pagination.
pub const DEFAULT_MAX_CONSECUTIVE_EMPTY_PAGES: u32 = 3;
/// Default domain cache bound.
pub const DEFAULT_CACHE_CAPACITY: usize = 1_000;
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minimum inter-request delay in milliseconds.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Maximum inter-request delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Consecutive empty pages tolerated before pagination gives up.
    #[serde(default = "default_max_consecutive_empty_pages")]
    pub max_consecutive_empty_pages: u32,
    /// Hard page ceiling per target (None = unlimited). Intended for bounded
    /// test and debug runs.
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Maximum entries in the domain result cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Per-request timeout in seconds; expiry is treated as a network error.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Local retries for transient network/server errors before the failure
    /// is escalated to the scheduler's block path.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    /// Long cooldowns tolerated per target before the traversal abandons it.
    #[serde(default = "default_max_cooldowns")]
    pub max_cooldowns: u32,
}

fn default_min_delay_ms() -> u64 {
    DEFAULT_MIN_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_max_consecutive_empty_pages() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_EMPTY_PAGES
}
fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_transient_retries() -> u32 {
    2
}
fn default_max_cooldowns() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_consecutive_empty_pages: default_max_consecutive_empty_pages(),
            max_pages: None,
            cache_capacity: default_cache_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            transient_retries: default_transient_retries(),
            max_cooldowns: default_max_cooldowns(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file. Unknown keys are ignored.
    pub fn from_file(path: &Path) -> Result<Self, ScrapeError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration. Fails fast, before any network activity.
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.max_delay_ms == 0 {
            return Err(ScrapeError::InvalidConfig(
                "politeness delay window must be non-zero".to_string(),
            ));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ScrapeError::InvalidConfig(format!(
                "min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_consecutive_empty_pages == 0 {
            return Err(ScrapeError::InvalidConfig(
                "max_consecutive_empty_pages must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ScrapeError::InvalidConfig(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ScrapeError::InvalidConfig(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(0) = self.max_pages {
            return Err(ScrapeError::InvalidConfig(
                "max_pages of 0 would fetch nothing; omit it instead".to_string(),
            ));
        }
        Ok(())
    }
}
