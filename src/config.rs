//! Configuration of the count-then-estimate pipeline.
//!
//! [`SketchSpec`] describes which probabilistic sketch an estimator builds
//! when it tips; two estimators can only be merged in approximate mode
//! when their specs are identical. [`EstimatorConfig`] bundles the spec
//! with the tipping point and is shared by every payload created during
//! one query.

use std::fmt;

use crate::sketch::HllSketch;

/// Lowest supported sketch precision.
pub const MIN_PRECISION: u8 = 4;
/// Highest supported sketch precision.
pub const MAX_PRECISION: u8 = 18;

/// Default sketch precision (~0.8% standard relative error).
pub const DEFAULT_PRECISION: u8 = 14;
/// Default number of distinct raw values counted exactly before tipping.
pub const DEFAULT_TIPPING_POINT: usize = 10_000;

/// Kind of probabilistic sketch backing the approximate mode.
///
/// The discriminant doubles as the wire tag, so variants must keep their
/// values once released.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SketchKind {
    HyperLogLog = 0,
}

impl SketchKind {
    /// Return the wire tag of this kind.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve a wire tag back to a kind.
    #[inline]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(SketchKind::HyperLogLog),
            _ => None,
        }
    }
}

/// Description of the sketch an estimator switches to when it tips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SketchSpec {
    kind: SketchKind,
    precision: u8,
}

impl SketchSpec {
    /// Create a HyperLogLog spec with the given `precision`.
    ///
    /// # Panics
    /// Panics when `precision` is outside `[MIN_PRECISION, MAX_PRECISION]`.
    pub fn with_precision(precision: u8) -> Self {
        assert!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            "sketch precision must be within [{MIN_PRECISION}, {MAX_PRECISION}], got {precision}"
        );
        Self {
            kind: SketchKind::HyperLogLog,
            precision,
        }
    }

    /// Kind of sketch this spec builds.
    #[inline]
    pub fn kind(&self) -> SketchKind {
        self.kind
    }

    /// Sketch precision (number of index bits).
    #[inline]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Build an empty sketch described by this spec.
    pub(crate) fn build(&self) -> HllSketch {
        match self.kind {
            SketchKind::HyperLogLog => HllSketch::with_precision(self.precision),
        }
    }
}

impl Default for SketchSpec {
    fn default() -> Self {
        Self::with_precision(DEFAULT_PRECISION)
    }
}

impl fmt::Display for SketchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SketchKind::HyperLogLog => write!(f, "hll/p{}", self.precision),
        }
    }
}

/// Per-query configuration shared by all payloads of one aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "with_serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EstimatorConfig {
    /// Maximum number of distinct raw values counted exactly; exceeding
    /// it switches the estimator to its sketch. Zero starts estimators
    /// in approximate mode directly.
    pub tipping_point: usize,
    /// Sketch built when an estimator tips.
    pub sketch: SketchSpec,
}

impl EstimatorConfig {
    /// Create a config with default tipping point and sketch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tipping point.
    pub fn with_tipping_point(mut self, tipping_point: usize) -> Self {
        self.tipping_point = tipping_point;
        self
    }

    /// Set the sketch spec.
    pub fn with_sketch(mut self, sketch: SketchSpec) -> Self {
        self.sketch = sketch;
        self
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            tipping_point: DEFAULT_TIPPING_POINT,
            sketch: SketchSpec::default(),
        }
    }
}
