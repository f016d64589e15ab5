//! `distinct-histogram` computes, per discrete time bucket (and
//! optionally per sub-label "slice"), an approximate count of distinct
//! values seen during a single pass over a shard-partitioned dataset,
//! together with exact occurrence totals.
//!
//! # Design
//!
//! - **Count-then-estimate**: every per-bucket estimator starts exact,
//!   deduplicating raw values in a set, and tips irreversibly into a
//!   HyperLogLog sketch once it outgrows the configured tipping point.
//!   Below the threshold counts are exact; above it they carry the
//!   sketch's standard relative error (~1.04/sqrt(2^precision)).
//! - **One pass per shard**: a [`collect::HistogramCollector`] feeds a
//!   shard-local [`bucket::BucketMap`] with no locking; shard maps are
//!   folded into one by [`bucket::BucketMap::reduce`] and flattened
//!   into a sorted, cached [`materialize::MergedResult`].
//! - **Consuming merges**: merging transfers ownership, so a merged-away
//!   operand cannot be accidentally reused, and a merge-triggered tip
//!   unions raw values before switching so none are lost.
//! - **Strict wire format**: partial shard results travel as a compact
//!   tagged binary encoding; corrupt input is an error, never an empty
//!   contribution.

mod beta;
pub mod bucket;
pub mod collect;
pub mod config;
pub mod error;
mod exact;
pub mod estimator;
pub mod materialize;
pub mod payload;
mod representation;
mod sketch;
mod wire;

pub use bucket::{BucketKey, BucketMap, SliceLabel, SlicedBucketMap};
pub use collect::{HistogramCollector, KeyRounder, RoundingCache, SlicedHistogramCollector};
pub use config::{EstimatorConfig, SketchKind, SketchSpec};
pub use error::{DecodeError, MergeError};
pub use estimator::DistinctCountEstimator;
pub use materialize::{
    MaterializedEntry, Materializer, MergedResult, SliceEntry, SlicedMaterializedEntry,
    SlicedMaterializer, SlicedMergedResult,
};
pub use payload::DistinctCountPayload;
