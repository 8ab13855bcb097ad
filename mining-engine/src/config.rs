//! Configuration management for mining-engine.
//!
//! Configuration comes from environment variables, each with a default.
//! Everything is validated once at startup by [`Config::from_env`] and then
//! handed to the components as plain values.

use std::{net::SocketAddr, time::Duration};

use crate::error::{Error, Result};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
pub const DEFAULT_MEMPOOL_BASE_URL: &str = "https://mempool.space";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60;
pub const DEFAULT_FEE_WINDOW_BLOCKS: usize = 24;
pub const MAX_FEE_WINDOW_BLOCKS: usize = 144;
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 3;

/// Main configuration structure for the service.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Upstream blockchain-data API configuration
    pub upstream: UpstreamConfig,

    /// Live data cache configuration
    pub live: LiveConfig,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen address
    pub listen: SocketAddr,
}

/// Upstream client configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the mempool.space-compatible API, without trailing slash
    pub base_url: String,

    /// Per-call timeout
    pub timeout: Duration,
}

/// Live data aggregation settings.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// How long an aggregated payload is served without refreshing
    pub cache_ttl: Duration,

    /// Number of recent blocks averaged for the fee estimate
    pub fee_window_blocks: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_MEMPOOL_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            fee_window_blocks: DEFAULT_FEE_WINDOW_BLOCKS,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_raw = lookup("MINING_ENGINE_LISTEN").unwrap_or_else(|| DEFAULT_LISTEN.into());
        let listen = listen_raw.trim().parse::<SocketAddr>().map_err(|e| {
            Error::Config(format!("MINING_ENGINE_LISTEN '{}': {}", listen_raw, e))
        })?;

        let base_url = normalize_base_url(
            &lookup("MEMPOOL_BASE_URL").unwrap_or_else(|| DEFAULT_MEMPOOL_BASE_URL.into()),
        )?;

        let cache_ttl_secs = parse_var(&lookup, "LIVE_CACHE_TTL_SECONDS", DEFAULT_CACHE_TTL_SECS)?;

        let fee_window_blocks =
            parse_var(&lookup, "LIVE_FEE_WINDOW_BLOCKS", DEFAULT_FEE_WINDOW_BLOCKS)?;
        if !(1..=MAX_FEE_WINDOW_BLOCKS).contains(&fee_window_blocks) {
            return Err(Error::Config(format!(
                "LIVE_FEE_WINDOW_BLOCKS must be between 1 and {}, got {}",
                MAX_FEE_WINDOW_BLOCKS, fee_window_blocks
            )));
        }

        let timeout_secs =
            parse_var(&lookup, "UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(Error::Config("UPSTREAM_TIMEOUT_SECS must be positive".into()));
        }

        Ok(Self {
            api: ApiConfig { listen },
            upstream: UpstreamConfig {
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            live: LiveConfig {
                cache_ttl: Duration::from_secs(cache_ttl_secs),
                fee_window_blocks,
            },
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::Config(format!("{} '{}': {}", key, raw, e))),
    }
}

/// Trim whitespace and trailing slashes, and insist on an http(s) scheme.
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let base_url = raw.trim().trim_end_matches('/').to_string();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(Error::Config(format!(
            "Invalid base_url: must start with http:// or https://, got: '{}'",
            base_url
        )));
    }
    Ok(base_url)
}
