//! Error types surfaced by merge and wire-decode operations.
//!
//! Both kinds are fatal for the operation that raised them and propagate
//! unchanged to the caller: a failed merge must not produce a silently
//! wrong count, and a failed decode must not be mistaken for an empty
//! shard contribution.

use thiserror::Error;

use crate::config::SketchSpec;

/// Merging two estimators whose sketches are structurally incompatible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// The operands were built from different sketch specs.
    #[error("cannot merge sketches built with different parameters: {lhs} vs {rhs}")]
    SketchMismatch { lhs: SketchSpec, rhs: SketchSpec },
}

/// Decoding a wire buffer failed; the shard contribution is unusable.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown sketch kind tag {0:#04x}")]
    UnknownSketchKind(u8),

    #[error("invalid estimator mode byte {0:#04x}")]
    InvalidMode(u8),

    #[error("sketch precision {0} outside supported range")]
    InvalidPrecision(u8),

    #[error("negative count field: {0}")]
    NegativeCount(i32),

    #[error("length field out of range: {0}")]
    LengthOutOfRange(u64),

    #[error("varint wider than 64 bits")]
    VarintOverflow,

    #[error("sketch state length {actual} does not match precision (expected {expected})")]
    StateLengthMismatch { expected: usize, actual: usize },

    #[error("truncated or unreadable input: {0}")]
    Io(#[from] std::io::Error),
}
