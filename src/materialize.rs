//! Final step: flatten a merged map into a sorted, cached result.
//!
//! Per-bucket totals and distinct counts are read off the payloads; the
//! overall distinct count is the cardinality of the union of every
//! bucket's (and slice's) estimator, accumulated while entries are
//! visited, never the sum of per-bucket counts, since one value may
//! appear in many buckets. The map is drained on the first call and the
//! result cached; repeated calls return the cache untouched.

use tracing::debug;

use crate::bucket::{BucketKey, BucketMap, SliceLabel, SlicedBucketMap};
use crate::error::MergeError;
use crate::estimator::DistinctCountEstimator;

/// One finalized bucket of the flat aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MaterializedEntry {
    pub key: BucketKey,
    pub total: u64,
    pub distinct: u64,
}

/// One finalized slice within a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SliceEntry {
    pub label: SliceLabel,
    pub total: u64,
    pub distinct: u64,
}

/// One finalized bucket of the sliced aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlicedMaterializedEntry {
    pub key: BucketKey,
    pub total: u64,
    pub distinct: u64,
    /// Slices ordered by label bytes.
    pub slices: Vec<SliceEntry>,
}

/// Finalized flat aggregation: overall totals plus buckets ascending by
/// key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MergedResult {
    pub total: u64,
    pub distinct: u64,
    pub entries: Vec<MaterializedEntry>,
}

/// Finalized sliced aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlicedMergedResult {
    pub total: u64,
    pub distinct: u64,
    pub entries: Vec<SlicedMaterializedEntry>,
}

/// Materializes a merged [`BucketMap`] once and caches the result.
#[derive(Debug)]
pub struct Materializer {
    pending: Option<BucketMap>,
    cached: Option<MergedResult>,
}

impl Materializer {
    pub fn new(map: BucketMap) -> Self {
        Self {
            pending: Some(map),
            cached: None,
        }
    }

    /// Compute the result, or return the cached one.
    pub fn result(&mut self) -> Result<&MergedResult, MergeError> {
        if self.cached.is_none() {
            let map = self.pending.take().unwrap_or_default();
            self.cached = Some(compute_flat(map)?);
        }
        Ok(self.cached.as_ref().expect("result cached above"))
    }
}

fn compute_flat(map: BucketMap) -> Result<MergedResult, MergeError> {
    let mut entries = Vec::with_capacity(map.len());
    let mut total = 0u64;
    let mut overall: Option<DistinctCountEstimator> = None;

    for (key, payload) in map.drain() {
        let distinct = payload.distinct();
        let (bucket_total, estimator) = payload.into_parts();
        entries.push(MaterializedEntry {
            key,
            total: bucket_total,
            distinct,
        });
        total += bucket_total;
        overall = Some(match overall {
            None => estimator,
            Some(acc) => acc.merge(estimator)?,
        });
    }
    entries.sort_unstable_by_key(|entry| entry.key);

    let distinct = overall
        .map(|estimator| estimator.cardinality() as u64)
        .unwrap_or(0)
        .min(total);
    debug!(buckets = entries.len(), total, distinct, "materialized");
    Ok(MergedResult {
        total,
        distinct,
        entries,
    })
}

/// Materializes a merged [`SlicedBucketMap`] once and caches the result.
#[derive(Debug)]
pub struct SlicedMaterializer {
    pending: Option<SlicedBucketMap>,
    cached: Option<SlicedMergedResult>,
}

impl SlicedMaterializer {
    pub fn new(map: SlicedBucketMap) -> Self {
        Self {
            pending: Some(map),
            cached: None,
        }
    }

    /// Compute the result, or return the cached one.
    pub fn result(&mut self) -> Result<&SlicedMergedResult, MergeError> {
        if self.cached.is_none() {
            let map = self.pending.take().unwrap_or_default();
            self.cached = Some(compute_sliced(map)?);
        }
        Ok(self.cached.as_ref().expect("result cached above"))
    }
}

fn compute_sliced(map: SlicedBucketMap) -> Result<SlicedMergedResult, MergeError> {
    let mut entries = Vec::with_capacity(map.len());
    let mut total = 0u64;
    let mut overall: Option<DistinctCountEstimator> = None;

    for (key, slices) in map.drain() {
        let mut slice_entries = Vec::with_capacity(slices.len());
        let mut bucket_total = 0u64;
        let mut bucket_union: Option<DistinctCountEstimator> = None;

        for (label, payload) in slices {
            let distinct = payload.distinct();
            let (slice_total, estimator) = payload.into_parts();
            slice_entries.push(SliceEntry {
                label,
                total: slice_total,
                distinct,
            });
            bucket_total += slice_total;
            bucket_union = Some(match bucket_union {
                None => estimator,
                Some(acc) => acc.merge(estimator)?,
            });
        }
        slice_entries.sort_unstable_by(|a, b| a.label.cmp(&b.label));

        let bucket_distinct = bucket_union
            .as_ref()
            .map(|estimator| estimator.cardinality() as u64)
            .unwrap_or(0)
            .min(bucket_total);
        entries.push(SlicedMaterializedEntry {
            key,
            total: bucket_total,
            distinct: bucket_distinct,
            slices: slice_entries,
        });
        total += bucket_total;

        if let Some(estimator) = bucket_union {
            overall = Some(match overall {
                None => estimator,
                Some(acc) => acc.merge(estimator)?,
            });
        }
    }
    entries.sort_unstable_by_key(|entry| entry.key);

    let distinct = overall
        .map(|estimator| estimator.cardinality() as u64)
        .unwrap_or(0)
        .min(total);
    debug!(buckets = entries.len(), total, distinct, "materialized");
    Ok(SlicedMergedResult {
        total,
        distinct,
        entries,
    })
}
