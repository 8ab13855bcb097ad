//! Live network and market data aggregation.
//!
//! [`LiveDataAggregator::get_live_data`] serves a cached payload while it is
//! younger than the TTL. Otherwise it fetches every upstream resource
//! concurrently, fills failed resources from the last cache entry, derives
//! subsidy, hashrate, average fees and hashprice, and caches the merged
//! result.
//!
//! Refreshes are single-flight: the whole check-refresh-write sequence runs
//! under one async mutex, so requests that miss the cache while a refresh is
//! running wait for it and are then served from the cache it wrote.
//!
//! Provenance is tracked per resource with [`Sourced`]:
//!
//! ```text
//!   fetch ok ───────────────────────────► Fresh(value)
//!   fetch failed ─┬─ cache has value ───► Cached(value + original fetch time)
//!                 └─ nothing cached ────► Missing
//! ```
//!
//! A cached value keeps the time it was actually fetched, however many
//! refreshes it survives.

use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use strum::EnumCount;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::{
    assumptions::{self, Assumptions},
    cache::{CacheEntry, CacheStore},
    config::LiveConfig,
    error::{Error, Result, UpstreamResult},
    tracing::prelude::*,
    upstream::{BlockSummary, Prices, RecommendedFees, Resource, Upstream},
};

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Subsidy of the first era, in satoshis.
pub const INITIAL_SUBSIDY_SATS: u64 = 50 * 100_000_000;

/// Where a live value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Fresh,
    Cached,
    Missing,
}

/// A resource value and when it was fetched from upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub value: T,
    pub fetched_at: OffsetDateTime,
}

/// A resource value together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub enum Sourced<T> {
    /// Fetched during this refresh
    Fresh(T),
    /// Fetch failed; value taken from the cache
    Cached(Stamped<T>),
    /// Fetch failed and nothing was cached
    Missing,
}

impl<T> Sourced<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Sourced::Fresh(v) => Some(v),
            Sourced::Cached(stamped) => Some(&stamped.value),
            Sourced::Missing => None,
        }
    }

    /// The value stamped for caching; fresh values get `now`.
    fn stamped(&self, now: OffsetDateTime) -> Option<Stamped<T>>
    where
        T: Clone,
    {
        match self {
            Sourced::Fresh(v) => Some(Stamped {
                value: v.clone(),
                fetched_at: now,
            }),
            Sourced::Cached(stamped) => Some(stamped.clone()),
            Sourced::Missing => None,
        }
    }

    pub fn provenance(&self) -> Provenance {
        match self {
            Sourced::Fresh(_) => Provenance::Fresh,
            Sourced::Cached(_) => Provenance::Cached,
            Sourced::Missing => Provenance::Missing,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Sourced::Fresh(_))
    }
}

/// Last known raw value of each resource, with its fetch time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceValues {
    pub prices: Option<Stamped<Prices>>,
    pub difficulty: Option<Stamped<f64>>,
    pub tip_height: Option<Stamped<u64>>,
    pub recommended_fees: Option<Stamped<RecommendedFees>>,
    pub recent_blocks: Option<Stamped<Vec<BlockSummary>>>,
}

/// Every resource after merging fresh results with the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedResources {
    pub prices: Sourced<Prices>,
    pub difficulty: Sourced<f64>,
    pub tip_height: Sourced<u64>,
    pub recommended_fees: Sourced<RecommendedFees>,
    pub recent_blocks: Sourced<Vec<BlockSummary>>,
}

impl MergedResources {
    fn provenance(&self) -> BTreeMap<Resource, Provenance> {
        BTreeMap::from([
            (Resource::Prices, self.prices.provenance()),
            (Resource::Difficulty, self.difficulty.provenance()),
            (Resource::TipHeight, self.tip_height.provenance()),
            (Resource::RecommendedFees, self.recommended_fees.provenance()),
            (Resource::RecentBlocks, self.recent_blocks.provenance()),
        ])
    }

    fn fresh_count(&self) -> usize {
        [
            self.prices.is_fresh(),
            self.difficulty.is_fresh(),
            self.tip_height.is_fresh(),
            self.recommended_fees.is_fresh(),
            self.recent_blocks.is_fresh(),
        ]
        .into_iter()
        .filter(|fresh| *fresh)
        .count()
    }

    fn values(&self, now: OffsetDateTime) -> ResourceValues {
        ResourceValues {
            prices: self.prices.stamped(now),
            difficulty: self.difficulty.stamped(now),
            tip_height: self.tip_height.stamped(now),
            recommended_fees: self.recommended_fees.stamped(now),
            recent_blocks: self.recent_blocks.stamped(now),
        }
    }
}

/// Live data as served by `GET /v1/live`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDataPayload {
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub btc_price_usd: Option<f64>,
    pub btc_price_eur: Option<f64>,
    pub block_height: Option<u64>,
    pub block_subsidy_btc: Option<f64>,
    pub fees_recommended: RecommendedFees,
    pub difficulty: Option<f64>,
    pub network_hashrate_eh_s: Option<f64>,
    pub avg_fees_btc_per_block: Option<f64>,
    pub fee_window_blocks: Option<usize>,
    pub hashprice_usd_per_th_day: Option<f64>,
    pub hashprice_eur_per_th_day: Option<f64>,
    pub notes: Vec<String>,
    /// True only when every resource was fetched by this refresh
    pub fresh: bool,
    pub provenance: BTreeMap<Resource, Provenance>,
}

/// Block subsidy at `height`.
///
/// Closed form: the initial 50 BTC shifted right once per halving, exactly as
/// consensus computes it. Reaches zero after 33 halvings and stays there.
pub fn block_subsidy(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return Amount::ZERO;
    }
    Amount::from_sat(INITIAL_SUBSIDY_SATS >> halvings)
}

/// Network hashrate in EH/s implied by `difficulty`.
pub fn hashrate_eh_s(difficulty: f64, seconds_per_block: u32) -> f64 {
    difficulty * 2f64.powi(32) / f64::from(seconds_per_block) / 1e18
}

/// Average fee per block in BTC over the blocks that report fees, and how
/// many blocks that was.
///
/// None when no block reports fees, or when the reported totals do not fit
/// in an [`Amount`].
pub fn average_fees_btc(blocks: &[BlockSummary]) -> Option<(f64, usize)> {
    let fees: Vec<Amount> = blocks
        .iter()
        .filter_map(|b| b.total_fees_sats)
        .map(Amount::from_sat)
        .collect();
    if fees.is_empty() {
        return None;
    }
    let total = fees
        .iter()
        .try_fold(Amount::ZERO, |sum, fee| sum.checked_add(*fee))?;
    Some((total.to_btc() / fees.len() as f64, fees.len()))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Build a payload from merged resources. Pure apart from the notes it
/// appends.
pub fn build_payload(
    source: &str,
    updated_at: OffsetDateTime,
    merged: &MergedResources,
    assumptions: &Assumptions,
    mut notes: Vec<String>,
) -> LiveDataPayload {
    let prices = merged.prices.value().copied().unwrap_or_default();
    if merged.prices.value().is_some() {
        if prices.usd.is_none() {
            notes.push("USD price not available from upstream".into());
        }
        if prices.eur.is_none() {
            notes.push("EUR price not available from upstream".into());
        }
    }

    let height = merged.tip_height.value().copied();
    let subsidy_btc = height.map(|h| block_subsidy(h).to_btc());
    if subsidy_btc.is_some() {
        notes.push("Block subsidy computed from current block height".into());
    }

    let difficulty = merged.difficulty.value().copied();
    let hashrate = difficulty.map(|d| hashrate_eh_s(d, assumptions.seconds_per_block));

    let blocks = merged.recent_blocks.value().map(Vec::as_slice).unwrap_or_default();
    let avg_fees = average_fees_btc(blocks);
    if avg_fees.is_some() {
        notes.push("Converted fees from satoshis to BTC".into());
    } else if blocks.iter().any(|b| b.total_fees_sats.is_some()) {
        warn!(blocks = blocks.len(), "Block fee totals overflow, ignoring fee data");
        notes.push("Ignored block fee totals out of range".into());
    }

    let mut hashprice_usd = None;
    let mut hashprice_eur = None;
    if let (Some(subsidy), Some(hashrate)) = (subsidy_btc, hashrate) {
        if hashrate > 0.0 {
            let fee_btc = match avg_fees {
                Some((avg, blocks)) => {
                    notes.push(format!("Hashprice includes avg tx fees over {} blocks", blocks));
                    avg
                }
                None => {
                    notes.push("Hashprice excludes tx fees (fees=0)".into());
                    0.0
                }
            };
            let network_th_s = hashrate * 1e6;
            let btc_per_th_day = (subsidy + fee_btc) * assumptions.blocks_per_day() / network_th_s;
            hashprice_usd = prices.usd.map(|p| round_to(btc_per_th_day * p, 4));
            hashprice_eur = prices.eur.map(|p| round_to(btc_per_th_day * p, 4));
        }
    }

    LiveDataPayload {
        source: source.to_string(),
        updated_at,
        btc_price_usd: prices.usd,
        btc_price_eur: prices.eur,
        block_height: height,
        block_subsidy_btc: subsidy_btc,
        fees_recommended: merged.recommended_fees.value().copied().unwrap_or_default(),
        difficulty,
        network_hashrate_eh_s: hashrate.map(|h| round_to(h, 2)),
        avg_fees_btc_per_block: avg_fees.map(|(avg, _)| round_to(avg, 8)),
        fee_window_blocks: avg_fees.map(|(_, blocks)| blocks),
        hashprice_usd_per_th_day: hashprice_usd,
        hashprice_eur_per_th_day: hashprice_eur,
        notes,
        fresh: merged.fresh_count() == Resource::COUNT,
        provenance: merged.provenance(),
    }
}

// Merge one fetch result with its cached value.
fn merge<T: Clone>(
    resource: Resource,
    fetched: UpstreamResult<T>,
    cached: Option<&Stamped<T>>,
    notes: &mut Vec<String>,
) -> Sourced<T> {
    match fetched {
        Ok(value) => Sourced::Fresh(value),
        Err(e) => {
            debug!(resource = %resource, error = %e, "Falling back for resource");
            notes.push(format!("Failed to fetch {}", resource));
            match cached {
                Some(stamped) => {
                    notes.push(format!(
                        "Using cached {} from {}",
                        resource,
                        format_ts(stamped.fetched_at)
                    ));
                    Sourced::Cached(stamped.clone())
                }
                None => {
                    notes.push(format!("No cached {} available", resource));
                    Sourced::Missing
                }
            }
        }
    }
}

fn format_ts(at: OffsetDateTime) -> String {
    at.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| at.to_string())
}

/// Aggregates upstream resources into cached live data.
pub struct LiveDataAggregator {
    upstream: Arc<dyn Upstream>,
    assumptions: &'static Assumptions,
    config: LiveConfig,
    cache: CacheStore,
    refresh_lock: Mutex<()>,
}

impl LiveDataAggregator {
    pub fn new(upstream: Arc<dyn Upstream>, config: LiveConfig) -> Self {
        Self {
            upstream,
            assumptions: assumptions::current(),
            config,
            cache: CacheStore::new(),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Current live data, from cache when young enough.
    pub async fn get_live_data(&self) -> Result<Arc<LiveDataPayload>> {
        if let Some(payload) = self.cached_if_young() {
            return Ok(payload);
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have refreshed while we waited.
        if let Some(payload) = self.cached_if_young() {
            debug!("Served refresh performed by a concurrent request");
            return Ok(payload);
        }
        self.refresh().await
    }

    fn cached_if_young(&self) -> Option<Arc<LiveDataPayload>> {
        let entry = self.cache.get()?;
        let age = entry.age();
        if age < entry.ttl {
            trace!(age = ?age, "Live data cache hit");
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    async fn refresh(&self) -> Result<Arc<LiveDataPayload>> {
        let previous = self.cache.get();
        let cached = previous.as_ref().map(|entry| &entry.resources);

        let upstream = self.upstream.as_ref();
        let (prices, difficulty, tip_height, fees, blocks) = futures::join!(
            upstream.fetch_prices(),
            upstream.fetch_difficulty(),
            upstream.fetch_tip_height(),
            upstream.fetch_recommended_fees(),
            upstream.fetch_recent_blocks(self.config.fee_window_blocks),
        );
        let now = OffsetDateTime::now_utc();

        let mut notes = Vec::new();
        let merged = MergedResources {
            prices: merge(
                Resource::Prices,
                prices,
                cached.and_then(|c| c.prices.as_ref()),
                &mut notes,
            ),
            difficulty: merge(
                Resource::Difficulty,
                difficulty,
                cached.and_then(|c| c.difficulty.as_ref()),
                &mut notes,
            ),
            tip_height: merge(
                Resource::TipHeight,
                tip_height,
                cached.and_then(|c| c.tip_height.as_ref()),
                &mut notes,
            ),
            recommended_fees: merge(
                Resource::RecommendedFees,
                fees,
                cached.and_then(|c| c.recommended_fees.as_ref()),
                &mut notes,
            ),
            recent_blocks: merge(
                Resource::RecentBlocks,
                blocks,
                cached.and_then(|c| c.recent_blocks.as_ref()),
                &mut notes,
            ),
        };

        let fresh = merged.fresh_count();
        if fresh == 0 {
            return match previous {
                None => {
                    warn!("All upstream requests failed and nothing is cached");
                    Err(Error::ServiceUnavailable(
                        "upstream unreachable and no cached data available".into(),
                    ))
                }
                Some(entry) => {
                    warn!(
                        cached_at = %format_ts(entry.captured_at_utc),
                        "All upstream requests failed, serving cached data"
                    );
                    notes.push(format!(
                        "Using cached data from {} (upstream temporarily unavailable)",
                        format_ts(entry.captured_at_utc)
                    ));
                    let payload = build_payload(
                        self.upstream.source(),
                        entry.captured_at_utc,
                        &merged,
                        self.assumptions,
                        notes,
                    );
                    Ok(Arc::new(payload))
                }
            };
        }

        let payload = Arc::new(build_payload(
            self.upstream.source(),
            now,
            &merged,
            self.assumptions,
            notes,
        ));
        debug!(
            fresh_resources = fresh,
            fully_fresh = payload.fresh,
            "Refreshed live data"
        );
        self.cache.put(CacheEntry::new(
            payload.clone(),
            merged.values(now),
            self.config.cache_ttl,
        ));
        Ok(payload)
    }
}
