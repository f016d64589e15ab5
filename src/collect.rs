//! Scan-time collection: one sequential pass per shard.
//!
//! The collector is fed (raw timestamp, value) tuples by the host's
//! value source, rounds timestamps to bucket keys through a
//! query-scoped [`RoundingCache`], and updates its shard-local map.
//! Documents without a timestamp are skipped and counted, never an
//! error. No locking: each shard scan owns its collector exclusively.

use hashbrown::HashMap;
use tracing::debug;

use crate::bucket::{BucketKey, BucketMap, SlicedBucketMap};
use crate::config::EstimatorConfig;

/// Calendar rounding seam: maps a raw timestamp to its interval
/// boundary. How intervals are defined (timezone, calendar) is the
/// host's business.
pub trait KeyRounder {
    fn round(&self, raw: i64) -> i64;
}

impl<F> KeyRounder for F
where
    F: Fn(i64) -> i64,
{
    #[inline]
    fn round(&self, raw: i64) -> i64 {
        self(raw)
    }
}

/// Memoizes raw-timestamp → bucket-key lookups for one query.
///
/// Scanned documents are usually time-clustered, so a last-hit fast
/// path answers most lookups; the memo map covers re-visited
/// timestamps. The cache lives and dies with its collector.
#[derive(Debug)]
pub struct RoundingCache<R> {
    rounder: R,
    last: Option<(i64, BucketKey)>,
    memo: HashMap<i64, BucketKey>,
}

impl<R: KeyRounder> RoundingCache<R> {
    pub fn new(rounder: R) -> Self {
        Self {
            rounder,
            last: None,
            memo: HashMap::new(),
        }
    }

    /// Bucket key for `raw`, consulting the rounder at most once per
    /// distinct raw timestamp.
    #[inline]
    pub fn key_for(&mut self, raw: i64) -> BucketKey {
        if let Some((last_raw, key)) = self.last {
            if last_raw == raw {
                return key;
            }
        }
        let rounder = &self.rounder;
        let key = *self
            .memo
            .entry(raw)
            .or_insert_with(|| BucketKey(rounder.round(raw)));
        self.last = Some((raw, key));
        key
    }
}

/// Shard-local collector for the flat (bucket-only) aggregation.
#[derive(Debug)]
pub struct HistogramCollector<R> {
    map: BucketMap,
    cache: RoundingCache<R>,
    skipped: u64,
}

impl<R: KeyRounder> HistogramCollector<R> {
    pub fn new(config: EstimatorConfig, rounder: R) -> Self {
        Self {
            map: BucketMap::new(config),
            cache: RoundingCache::new(rounder),
            skipped: 0,
        }
    }

    /// Record one value; a document without a timestamp is skipped.
    #[inline]
    pub fn collect(&mut self, raw_key: Option<i64>, value: &[u8]) {
        let Some(raw) = raw_key else {
            self.skipped += 1;
            return;
        };
        let key = self.cache.key_for(raw);
        self.map.update(key, value);
    }

    /// Documents skipped for lack of a bucket key.
    #[inline]
    pub fn skipped_documents(&self) -> u64 {
        self.skipped
    }

    /// End the scan and hand over the shard's map.
    pub fn finish(self) -> BucketMap {
        debug!(
            buckets = self.map.len(),
            skipped = self.skipped,
            "shard scan finished"
        );
        self.map
    }
}

/// Shard-local collector for the sliced (bucket + label) aggregation.
#[derive(Debug)]
pub struct SlicedHistogramCollector<R> {
    map: SlicedBucketMap,
    cache: RoundingCache<R>,
    skipped: u64,
}

impl<R: KeyRounder> SlicedHistogramCollector<R> {
    pub fn new(config: EstimatorConfig, rounder: R) -> Self {
        Self {
            map: SlicedBucketMap::new(config),
            cache: RoundingCache::new(rounder),
            skipped: 0,
        }
    }

    /// Record one value under its slice label.
    ///
    /// The label buffer is only copied when the slice is first seen;
    /// the source may overwrite it on the next call.
    #[inline]
    pub fn collect(&mut self, raw_key: Option<i64>, label: &[u8], value: &[u8]) {
        let Some(raw) = raw_key else {
            self.skipped += 1;
            return;
        };
        let key = self.cache.key_for(raw);
        self.map.update(key, label, value);
    }

    /// Documents skipped for lack of a bucket key.
    #[inline]
    pub fn skipped_documents(&self) -> u64 {
        self.skipped
    }

    /// End the scan and hand over the shard's map.
    pub fn finish(self) -> SlicedBucketMap {
        debug!(
            buckets = self.map.len(),
            skipped = self.skipped,
            "shard scan finished"
        );
        self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SketchSpec;
    use std::cell::Cell;

    fn config() -> EstimatorConfig {
        EstimatorConfig::new()
            .with_tipping_point(100)
            .with_sketch(SketchSpec::with_precision(14))
    }

    #[test]
    fn test_collect_rounds_and_buckets() {
        let mut collector = HistogramCollector::new(config(), |raw: i64| raw / 100 * 100);
        collector.collect(Some(105), b"x");
        collector.collect(Some(199), b"y");
        collector.collect(Some(230), b"x");

        let map = collector.finish();
        assert_eq!(map.len(), 2);
        let buckets: Vec<i64> = map.iter().map(|(key, _)| key.0).collect();
        assert!(buckets.contains(&100) && buckets.contains(&200));
    }

    #[test]
    fn test_missing_key_is_skipped_not_counted() {
        let mut collector = HistogramCollector::new(config(), |raw: i64| raw);
        collector.collect(None, b"x");
        collector.collect(Some(1), b"x");
        collector.collect(None, b"y");

        assert_eq!(collector.skipped_documents(), 2);
        let map = collector.finish();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_cache_consults_rounder_once_per_timestamp() {
        let calls = Cell::new(0u32);
        let rounder = |raw: i64| {
            calls.set(calls.get() + 1);
            raw / 1000 * 1000
        };
        let mut cache = RoundingCache::new(rounder);
        assert_eq!(cache.key_for(1500), BucketKey(1000));
        assert_eq!(cache.key_for(1500), BucketKey(1000));
        assert_eq!(cache.key_for(2500), BucketKey(2000));
        // Re-visiting an older timestamp hits the memo, not the rounder.
        assert_eq!(cache.key_for(1500), BucketKey(1000));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_sliced_collect() {
        let mut collector = SlicedHistogramCollector::new(config(), |raw: i64| raw / 100 * 100);
        collector.collect(Some(110), b"api", b"x");
        collector.collect(Some(120), b"web", b"x");
        collector.collect(None, b"api", b"y");

        assert_eq!(collector.skipped_documents(), 1);
        let map = collector.finish();
        assert_eq!(map.len(), 1);
        let (_, slices) = map.iter().next().unwrap();
        assert_eq!(slices.len(), 2);
    }
}
