//! In-process [`Upstream`] for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};
use strum::IntoEnumIterator;
use time::OffsetDateTime;

use crate::{
    error::{UpstreamCause, UpstreamError, UpstreamResult},
    live::LiveDataPayload,
    upstream::{BlockSummary, Prices, RecommendedFees, Resource, Upstream},
};

/// A payload with no data at all.
pub(crate) fn empty_payload(updated_at: OffsetDateTime) -> LiveDataPayload {
    LiveDataPayload {
        source: "test".into(),
        updated_at,
        btc_price_usd: None,
        btc_price_eur: None,
        block_height: None,
        block_subsidy_btc: None,
        fees_recommended: RecommendedFees::default(),
        difficulty: None,
        network_hashrate_eh_s: None,
        avg_fees_btc_per_block: None,
        fee_window_blocks: None,
        hashprice_usd_per_th_day: None,
        hashprice_eur_per_th_day: None,
        notes: Vec::new(),
        fresh: false,
        provenance: BTreeMap::new(),
    }
}

/// Scriptable upstream that counts calls per resource.
pub(crate) struct FakeUpstream {
    prices: Mutex<Prices>,
    tip_height: Mutex<u64>,
    fees: Mutex<RecommendedFees>,
    blocks: Mutex<Vec<BlockSummary>>,
    failing: Mutex<HashSet<Resource>>,
    calls: Mutex<HashMap<Resource, usize>>,
    last_block_window: Mutex<Option<usize>>,
    delay: Duration,
}

impl FakeUpstream {
    pub(crate) const DIFFICULTY: f64 = 75_502_165_623_893.72;

    pub(crate) fn new() -> Self {
        Self {
            prices: Mutex::new(Prices {
                usd: Some(95_000.5),
                eur: Some(88_000.25),
            }),
            tip_height: Mutex::new(825_000),
            fees: Mutex::new(RecommendedFees {
                fastest_fee: Some(20.0),
                half_hour_fee: Some(15.0),
                hour_fee: Some(10.0),
                economy_fee: Some(5.0),
                minimum_fee: Some(1.0),
            }),
            blocks: Mutex::new(Self::default_blocks()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
            last_block_window: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    /// Make every fetch take `delay` before answering.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn default_blocks() -> Vec<BlockSummary> {
        [25_000_000, 30_000_000, 28_000_000]
            .into_iter()
            .enumerate()
            .map(|(i, fees)| BlockSummary {
                height: Some(825_000 - i as u64),
                difficulty: Self::DIFFICULTY,
                total_fees_sats: Some(fees),
            })
            .collect()
    }

    pub(crate) fn set_prices(&self, prices: Prices) {
        *self.prices.lock() = prices;
    }

    pub(crate) fn set_tip_height(&self, height: u64) {
        *self.tip_height.lock() = height;
    }

    pub(crate) fn set_blocks(&self, blocks: Vec<BlockSummary>) {
        *self.blocks.lock() = blocks;
    }

    pub(crate) fn fail(&self, resource: Resource) {
        self.failing.lock().insert(resource);
    }

    pub(crate) fn fail_all(&self) {
        self.failing.lock().extend(Resource::iter());
    }

    pub(crate) fn calls(&self, resource: Resource) -> usize {
        self.calls.lock().get(&resource).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub(crate) fn last_block_window(&self) -> Option<usize> {
        *self.last_block_window.lock()
    }

    async fn answer<T>(
        &self,
        resource: Resource,
        value: impl FnOnce() -> T,
    ) -> UpstreamResult<T> {
        *self.calls.lock().entry(resource).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.lock().contains(&resource) {
            return Err(UpstreamError::new(
                resource,
                UpstreamCause::Malformed("simulated outage".into()),
            ));
        }
        Ok(value())
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    fn source(&self) -> &str {
        "fake"
    }

    async fn fetch_prices(&self) -> UpstreamResult<Prices> {
        self.answer(Resource::Prices, || *self.prices.lock()).await
    }

    async fn fetch_difficulty(&self) -> UpstreamResult<f64> {
        self.answer(Resource::Difficulty, || Self::DIFFICULTY).await
    }

    async fn fetch_tip_height(&self) -> UpstreamResult<u64> {
        self.answer(Resource::TipHeight, || *self.tip_height.lock())
            .await
    }

    async fn fetch_recommended_fees(&self) -> UpstreamResult<RecommendedFees> {
        self.answer(Resource::RecommendedFees, || *self.fees.lock())
            .await
    }

    async fn fetch_recent_blocks(&self, count: usize) -> UpstreamResult<Vec<BlockSummary>> {
        *self.last_block_window.lock() = Some(count);
        self.answer(Resource::RecentBlocks, || {
            let mut blocks = self.blocks.lock().clone();
            blocks.truncate(count);
            blocks
        })
        .await
    }
}
