//! Single-slot store for the last aggregated live data.
//!
//! The store only holds and replaces entries. Deciding whether an entry is
//! still young enough to serve is the aggregator's job.

use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::live::{LiveDataPayload, ResourceValues};

/// One aggregated payload plus what it was derived from.
#[derive(Debug)]
pub struct CacheEntry {
    /// Payload served on cache hits, shared with every caller
    pub payload: Arc<LiveDataPayload>,
    /// Last known value of every resource, used for per-field fallback
    pub resources: ResourceValues,
    /// Monotonic capture time, for age checks
    pub captured_at: Instant,
    /// Wall-clock capture time, for notes
    pub captured_at_utc: OffsetDateTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(payload: Arc<LiveDataPayload>, resources: ResourceValues, ttl: Duration) -> Self {
        Self {
            captured_at_utc: payload.updated_at,
            payload,
            resources,
            captured_at: Instant::now(),
            ttl,
        }
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Holder of at most one [`CacheEntry`].
#[derive(Debug, Default)]
pub struct CacheStore {
    slot: Mutex<Option<Arc<CacheEntry>>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<CacheEntry>> {
        self.slot.lock().clone()
    }

    /// Replace the entry, whole.
    pub fn put(&self, entry: CacheEntry) {
        *self.slot.lock() = Some(Arc::new(entry));
    }

    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{live::Stamped, testing::empty_payload};

    fn entry(height: u64) -> CacheEntry {
        let mut payload = empty_payload(OffsetDateTime::UNIX_EPOCH);
        payload.block_height = Some(height);
        let resources = ResourceValues {
            tip_height: Some(Stamped {
                value: height,
                fetched_at: OffsetDateTime::UNIX_EPOCH,
            }),
            ..Default::default()
        };
        CacheEntry::new(Arc::new(payload), resources, Duration::from_secs(60))
    }

    fn tip_height(entry: &CacheEntry) -> Option<u64> {
        entry.resources.tip_height.as_ref().map(|s| s.value)
    }

    #[test]
    fn test_empty_until_put() {
        let store = CacheStore::new();
        assert!(store.get().is_none());
        store.put(entry(1));
        assert_eq!(store.get().unwrap().payload.block_height, Some(1));
    }

    #[test]
    fn test_put_overwrites() {
        let store = CacheStore::new();
        store.put(entry(1));
        let first = store.get().unwrap();
        store.put(entry(2));
        assert_eq!(tip_height(&store.get().unwrap()), Some(2));
        // Readers holding the old entry keep a consistent view.
        assert_eq!(tip_height(&first), Some(1));
    }

    #[test]
    fn test_clear() {
        let store = CacheStore::new();
        store.put(entry(1));
        store.clear();
        assert!(store.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_age_tracks_time() {
        let cached = entry(1);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cached.age(), Duration::from_secs(30));
        assert_eq!(cached.captured_at_utc, OffsetDateTime::UNIX_EPOCH);
    }
}
