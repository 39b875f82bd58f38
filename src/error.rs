//! Error taxonomy for the scraping engine.
//!
//! Failures here are target-scoped: a traversal that hits one of these moves
//! on to the next target instead of aborting the run. Rate limiting is
//! deliberately absent - it is retry guidance from the scheduler, never an
//! error.

use thiserror::Error;

/// Errors that can occur while driving a traversal.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The first response of a workflow did not carry a required continuity
    /// token, so the multi-step form chain cannot start.
    #[error("missing continuity token '{token}' in first response from {target}")]
    MissingContinuityState { target: String, token: String },

    /// Configuration rejected before any network activity.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read a configuration file.
    #[error("failed to load configuration: {0}")]
    ConfigRead(#[from] std::io::Error),

    /// Configuration file was not valid TOML.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
