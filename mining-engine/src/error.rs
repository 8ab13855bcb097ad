//! Common error types for mining-engine.
//!
//! This module provides a centralized Error enum using thiserror. Upstream
//! fetch failures have their own type, [`UpstreamError`], because the live
//! data aggregator recovers from them locally and never lets one escape.
//! Only a total outage with nothing cached surfaces, as
//! [`Error::ServiceUnavailable`].

use thiserror::Error;

use crate::upstream::Resource;

/// Main error type for mining-engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Request input outside its accepted range
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Unknown miner id or assumptions version
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Every upstream call failed and nothing is cached yet
    #[error("live data unavailable: {0}")]
    ServiceUnavailable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Failure to fetch one upstream resource.
#[derive(Error, Debug)]
#[error("failed to fetch {resource}: {cause}")]
pub struct UpstreamError {
    /// Which resource failed
    pub resource: Resource,
    /// What went wrong
    pub cause: UpstreamCause,
}

impl UpstreamError {
    pub fn new(resource: Resource, cause: UpstreamCause) -> Self {
        Self { resource, cause }
    }
}

/// Reason an upstream fetch failed.
#[derive(Error, Debug)]
pub enum UpstreamCause {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result of a single upstream fetch.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
