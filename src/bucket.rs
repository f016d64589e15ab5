//! Bucket maps filled during one shard scan, and the cross-shard fold.
//!
//! A map is created fresh per shard, owns its payloads exclusively, and
//! is consumed either by the reduce fold (its entries are absorbed into
//! the accumulator) or by the materializer. Keys are rounded epoch
//! milliseconds; documents without a key never reach a map (the
//! collector skips them), so the key order is total.

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use tracing::debug;

use crate::config::EstimatorConfig;
use crate::error::MergeError;
use crate::payload::DistinctCountPayload;

/// Bucket identifier: an interval boundary in epoch milliseconds,
/// derived externally by calendar rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BucketKey(pub i64);

/// Label of a sub-grouping nested inside a bucket.
pub type SliceLabel = Box<[u8]>;

/// One shard's bucket → payload accumulation.
#[derive(Debug, Default)]
pub struct BucketMap {
    config: EstimatorConfig,
    buckets: HashMap<BucketKey, DistinctCountPayload>,
}

impl BucketMap {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
        }
    }

    /// Record one `value` occurrence in `key`'s bucket, creating the
    /// payload on first sight.
    #[inline]
    pub fn update(&mut self, key: BucketKey, value: &[u8]) {
        let config = self.config;
        self.buckets
            .entry(key)
            .or_insert_with(|| DistinctCountPayload::new(&config))
            .update(value);
    }

    /// Move `payload` into the map: inserted as-is when `key` is new,
    /// otherwise merged with the stored payload.
    pub fn absorb(
        &mut self,
        key: BucketKey,
        payload: DistinctCountPayload,
    ) -> Result<(), MergeError> {
        match self.buckets.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(payload);
            }
            Entry::Occupied(slot) => {
                let stored = slot.remove();
                self.buckets.insert(key, stored.merge(payload)?);
            }
        }
        Ok(())
    }

    /// Absorb every entry of `other`, consuming it.
    pub fn merge_from(&mut self, other: BucketMap) -> Result<(), MergeError> {
        for (key, payload) in other.buckets {
            self.absorb(key, payload)?;
        }
        Ok(())
    }

    /// Left-fold shard maps into one: the first shard is the
    /// accumulator, every later shard is consumed into it. No shards
    /// yield an empty map.
    pub fn reduce<I>(shards: I) -> Result<BucketMap, MergeError>
    where
        I: IntoIterator<Item = BucketMap>,
    {
        let mut shards = shards.into_iter();
        let Some(mut acc) = shards.next() else {
            return Ok(BucketMap::default());
        };
        let mut folded = 1usize;
        for shard in shards {
            acc.merge_from(shard)?;
            folded += 1;
        }
        debug!(shards = folded, buckets = acc.len(), "reduced shard maps");
        Ok(acc)
    }

    /// Number of buckets collected.
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[inline]
    pub fn config(&self) -> EstimatorConfig {
        self.config
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&BucketKey, &DistinctCountPayload)> {
        self.buckets.iter()
    }

    pub(crate) fn drain(self) -> impl Iterator<Item = (BucketKey, DistinctCountPayload)> {
        self.buckets.into_iter()
    }

    /// Plain insert, for rebuilding a map from the wire; encoded maps
    /// carry each key at most once.
    pub(crate) fn insert(&mut self, key: BucketKey, payload: DistinctCountPayload) {
        self.buckets.insert(key, payload);
    }
}

/// One shard's bucket → slice label → payload accumulation.
#[derive(Debug, Default)]
pub struct SlicedBucketMap {
    config: EstimatorConfig,
    buckets: HashMap<BucketKey, HashMap<SliceLabel, DistinctCountPayload>>,
}

impl SlicedBucketMap {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            buckets: HashMap::new(),
        }
    }

    /// Record one `value` occurrence under (`key`, `label`).
    ///
    /// The label is copied only when the slice is first seen; callers
    /// may reuse the label buffer between calls.
    #[inline]
    pub fn update(&mut self, key: BucketKey, label: &[u8], value: &[u8]) {
        let config = self.config;
        let slices = self.buckets.entry(key).or_default();
        if let Some(payload) = slices.get_mut(label) {
            payload.update(value);
        } else {
            let mut payload = DistinctCountPayload::new(&config);
            payload.update(value);
            slices.insert(SliceLabel::from(label), payload);
        }
    }

    /// Move `payload` into the slice at (`key`, `label`), creating the
    /// inner map when the bucket is new.
    pub fn absorb(
        &mut self,
        key: BucketKey,
        label: SliceLabel,
        payload: DistinctCountPayload,
    ) -> Result<(), MergeError> {
        absorb_slice(self.buckets.entry(key).or_default(), label, payload)
    }

    /// Absorb every slice of every bucket of `other`, consuming it.
    pub fn merge_from(&mut self, other: SlicedBucketMap) -> Result<(), MergeError> {
        for (key, slices) in other.buckets {
            let target = self.buckets.entry(key).or_default();
            if target.is_empty() {
                *target = slices;
                continue;
            }
            for (label, payload) in slices {
                absorb_slice(target, label, payload)?;
            }
        }
        Ok(())
    }

    /// Left-fold shard maps into one; no shards yield an empty map.
    pub fn reduce<I>(shards: I) -> Result<SlicedBucketMap, MergeError>
    where
        I: IntoIterator<Item = SlicedBucketMap>,
    {
        let mut shards = shards.into_iter();
        let Some(mut acc) = shards.next() else {
            return Ok(SlicedBucketMap::default());
        };
        let mut folded = 1usize;
        for shard in shards {
            acc.merge_from(shard)?;
            folded += 1;
        }
        debug!(shards = folded, buckets = acc.len(), "reduced shard maps");
        Ok(acc)
    }

    /// Number of buckets collected.
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[inline]
    pub fn config(&self) -> EstimatorConfig {
        self.config
    }

    pub(crate) fn iter(
        &self,
    ) -> impl Iterator<Item = (&BucketKey, &HashMap<SliceLabel, DistinctCountPayload>)> {
        self.buckets.iter()
    }

    pub(crate) fn drain(
        self,
    ) -> impl Iterator<Item = (BucketKey, HashMap<SliceLabel, DistinctCountPayload>)> {
        self.buckets.into_iter()
    }

    /// Plain insert, for rebuilding a map from the wire; encoded maps
    /// carry each (key, label) pair at most once.
    pub(crate) fn insert(
        &mut self,
        key: BucketKey,
        label: SliceLabel,
        payload: DistinctCountPayload,
    ) {
        self.buckets.entry(key).or_default().insert(label, payload);
    }
}

/// Insert-or-merge one payload into a bucket's slice map.
fn absorb_slice(
    slices: &mut HashMap<SliceLabel, DistinctCountPayload>,
    label: SliceLabel,
    payload: DistinctCountPayload,
) -> Result<(), MergeError> {
    match slices.entry(label) {
        Entry::Vacant(slot) => {
            slot.insert(payload);
        }
        Entry::Occupied(slot) => {
            let (label, stored) = slot.remove_entry();
            slices.insert(label, stored.merge(payload)?);
        }
    }
    Ok(())
}
