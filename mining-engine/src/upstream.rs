//! Client for the upstream blockchain-data API.
//!
//! The live data aggregator talks to the network through the [`Upstream`]
//! trait, one method per resource. [`MempoolClient`] implements it against a
//! mempool.space-compatible REST API. Each method runs under its own timeout
//! and reports any failure as an [`UpstreamError`] naming the resource, so
//! one bad endpoint never takes the others down with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use strum::{Display, EnumCount, EnumIter};

use crate::{
    config::UpstreamConfig,
    error::{Error, Result, UpstreamCause, UpstreamError, UpstreamResult},
    tracing::prelude::*,
};

/// Identifies one upstream resource.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumCount,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    Prices,
    Difficulty,
    TipHeight,
    RecommendedFees,
    RecentBlocks,
}

/// Current BTC prices. Either currency may be missing from a response.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Prices {
    #[serde(rename = "USD", default)]
    pub usd: Option<f64>,
    #[serde(rename = "EUR", default)]
    pub eur: Option<f64>,
}

/// Recommended fee rates in sat/vB.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RecommendedFees {
    #[serde(alias = "fastestFee")]
    pub fastest_fee: Option<f64>,
    #[serde(alias = "halfHourFee")]
    pub half_hour_fee: Option<f64>,
    #[serde(alias = "hourFee")]
    pub hour_fee: Option<f64>,
    #[serde(alias = "economyFee")]
    pub economy_fee: Option<f64>,
    #[serde(alias = "minimumFee")]
    pub minimum_fee: Option<f64>,
}

/// The parts of a block the aggregator uses.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSummary {
    pub height: Option<u64>,
    pub difficulty: f64,
    /// Total transaction fees in satoshis, when the API reports them
    pub total_fees_sats: Option<u64>,
}

// Wire format of an entry in /api/v1/blocks.
#[derive(Debug, Deserialize)]
struct BlockWire {
    #[serde(default)]
    height: Option<u64>,
    difficulty: f64,
    #[serde(default)]
    fee: Option<u64>,
    #[serde(default)]
    extras: Option<BlockExtrasWire>,
}

#[derive(Debug, Deserialize)]
struct BlockExtrasWire {
    #[serde(rename = "totalFees", default)]
    total_fees: Option<u64>,
}

impl From<BlockWire> for BlockSummary {
    fn from(wire: BlockWire) -> Self {
        let total_fees_sats = wire
            .extras
            .and_then(|extras| extras.total_fees)
            .or(wire.fee);
        Self {
            height: wire.height,
            difficulty: wire.difficulty,
            total_fees_sats,
        }
    }
}

/// Source of live network and market data.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Name reported as the payload source.
    fn source(&self) -> &str;

    async fn fetch_prices(&self) -> UpstreamResult<Prices>;

    /// Difficulty of the most recent block.
    async fn fetch_difficulty(&self) -> UpstreamResult<f64>;

    async fn fetch_tip_height(&self) -> UpstreamResult<u64>;

    async fn fetch_recommended_fees(&self) -> UpstreamResult<RecommendedFees>;

    /// Up to `count` most recent blocks, newest first.
    async fn fetch_recent_blocks(&self, count: usize) -> UpstreamResult<Vec<BlockSummary>>;
}

/// [`Upstream`] over the mempool.space REST API.
pub struct MempoolClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl MempoolClient {
    pub const SOURCE: &'static str = "mempool.space";

    /// Create a client from validated configuration.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mining-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            timeout = ?config.timeout,
            "Created upstream client"
        );

        Ok(Self {
            base_url: config.base_url.clone(),
            timeout: config.timeout,
            client,
        })
    }

    /// Run one resource fetch under the per-call timeout.
    async fn bounded<T, F>(&self, resource: Resource, fetch: F) -> UpstreamResult<T>
    where
        F: Future<Output = std::result::Result<T, UpstreamCause>>,
    {
        let result = match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamCause::Timeout(self.timeout)),
        };
        result.map_err(|cause| {
            warn!(resource = %resource, error = %cause, "Upstream fetch failed");
            UpstreamError::new(resource, cause)
        })
    }

    async fn get_body(&self, path: &str) -> std::result::Result<bytes::Bytes, UpstreamCause> {
        let url = format!("{}{}", self.base_url, path);
        trace!(url = %url, "GET");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamCause::Status(status));
        }
        Ok(response.bytes().await?)
    }

    async fn get_json<T>(&self, path: &str) -> std::result::Result<T, UpstreamCause>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = self.get_body(path).await?;
        serde_json::from_slice(&body).map_err(|e| UpstreamCause::Malformed(e.to_string()))
    }

    async fn get_blocks_page(
        &self,
        start_height: Option<u64>,
    ) -> std::result::Result<Vec<BlockSummary>, UpstreamCause> {
        let path = match start_height {
            Some(height) => format!("/api/v1/blocks/{}", height),
            None => "/api/v1/blocks".to_string(),
        };
        let page: Vec<BlockWire> = self.get_json(&path).await?;
        Ok(page.into_iter().map(BlockSummary::from).collect())
    }
}

#[async_trait]
impl Upstream for MempoolClient {
    fn source(&self) -> &str {
        Self::SOURCE
    }

    async fn fetch_prices(&self) -> UpstreamResult<Prices> {
        self.bounded(Resource::Prices, self.get_json("/api/v1/prices"))
            .await
    }

    async fn fetch_difficulty(&self) -> UpstreamResult<f64> {
        self.bounded(Resource::Difficulty, async {
            let page = self.get_blocks_page(None).await?;
            page.first()
                .map(|block| block.difficulty)
                .ok_or_else(|| UpstreamCause::Malformed("empty block list".into()))
        })
        .await
    }

    async fn fetch_tip_height(&self) -> UpstreamResult<u64> {
        self.bounded(Resource::TipHeight, async {
            let body = self.get_body("/api/blocks/tip/height").await?;
            let text = String::from_utf8_lossy(&body);
            text.trim().parse::<u64>().map_err(|e| {
                UpstreamCause::Malformed(format!("tip height '{}': {}", text.trim(), e))
            })
        })
        .await
    }

    async fn fetch_recommended_fees(&self) -> UpstreamResult<RecommendedFees> {
        self.bounded(
            Resource::RecommendedFees,
            self.get_json("/api/v1/fees/recommended"),
        )
        .await
    }

    async fn fetch_recent_blocks(&self, count: usize) -> UpstreamResult<Vec<BlockSummary>> {
        self.bounded(Resource::RecentBlocks, async {
            let mut blocks = self.get_blocks_page(None).await?;
            // Each page ends just above the next page's start height.
            while blocks.len() < count {
                let next = match blocks.last().and_then(|b| b.height) {
                    Some(height) if height > 0 => height - 1,
                    _ => break,
                };
                let page = self.get_blocks_page(Some(next)).await?;
                if page.is_empty() {
                    break;
                }
                blocks.extend(page);
            }
            blocks.truncate(count);
            debug!(blocks = blocks.len(), "Fetched recent blocks");
            Ok(blocks)
        })
        .await
    }
}
