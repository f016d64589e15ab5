//! Count-then-estimate distinct counter.
//!
//! An estimator starts in exact mode, deduplicating raw byte values in a
//! set. The first time the set grows past the configured tipping point
//! the estimator *tips*: it builds the sketch described by its
//! [`SketchSpec`], feeds the hash of every collected value into it,
//! drops the raw values and continues approximately. The transition is
//! irreversible.
//!
//! Merging consumes both operands and returns the union. Two estimators
//! can always be merged while both are exact; as soon as a sketch is
//! involved their specs must be identical, otherwise the merge fails
//! with [`MergeError::SketchMismatch`] rather than producing a wrong
//! number.

use crate::config::{EstimatorConfig, SketchSpec};
use crate::error::MergeError;
use crate::exact::ExactSet;
use crate::representation::{Representation, RepresentationTrait};
use crate::sketch::HllSketch;

/// Distinct counter over raw byte values, exact until it tips.
#[derive(Debug, Clone, PartialEq)]
pub struct DistinctCountEstimator {
    repr: Representation,
    tipping_point: usize,
    spec: SketchSpec,
}

impl DistinctCountEstimator {
    /// Create an estimator; a zero tipping point starts it approximate.
    pub fn new(config: &EstimatorConfig) -> Self {
        let repr = if config.tipping_point == 0 {
            Representation::Approximate(config.sketch.build())
        } else {
            Representation::Exact(ExactSet::new())
        };
        Self {
            repr,
            tipping_point: config.tipping_point,
            spec: config.sketch,
        }
    }

    /// Rebuild an untipped estimator, e.g. from the wire.
    pub(crate) fn from_exact(tipping_point: usize, spec: SketchSpec, set: ExactSet) -> Self {
        let mut estimator = Self {
            repr: Representation::Exact(set),
            tipping_point,
            spec,
        };
        // A corrupt or hand-built set may already exceed the threshold.
        estimator.tip_if_needed();
        estimator
    }

    /// Rebuild a tipped estimator from its sketch.
    pub(crate) fn from_sketch(spec: SketchSpec, sketch: HllSketch) -> Self {
        Self {
            repr: Representation::Approximate(sketch),
            tipping_point: 0,
            spec,
        }
    }

    /// Offer one raw value.
    ///
    /// Returns true if the value was new (exact mode) or changed the
    /// sketch state (approximate mode).
    #[inline]
    pub fn offer(&mut self, value: &[u8]) -> bool {
        let changed = self.repr.offer(value);
        self.tip_if_needed();
        changed
    }

    /// Current distinct count: the set size, or the sketch estimate.
    #[inline]
    pub fn cardinality(&self) -> usize {
        self.repr.cardinality()
    }

    /// Whether the estimator has switched to its sketch.
    #[inline]
    pub fn is_approximate(&self) -> bool {
        matches!(self.repr, Representation::Approximate(_))
    }

    /// Sketch spec this estimator tips into (or already uses).
    #[inline]
    pub fn spec(&self) -> SketchSpec {
        self.spec
    }

    #[inline]
    pub(crate) fn tipping_point(&self) -> usize {
        self.tipping_point
    }

    #[inline]
    pub(crate) fn repr(&self) -> &Representation {
        &self.repr
    }

    /// Union with `other`, consuming both operands.
    pub fn merge(mut self, other: Self) -> Result<Self, MergeError> {
        // Two exact operands merge freely; once a sketch is involved
        // the specs must agree.
        if self.is_approximate() || other.is_approximate() {
            self.check_spec(other.spec)?;
        }
        let lhs = std::mem::replace(&mut self.repr, Representation::Exact(ExactSet::new()));
        self.repr = match (lhs, other.repr) {
            (Representation::Exact(mut lhs), Representation::Exact(rhs)) => {
                // Union the raw values first, then check the threshold
                // below: a merge-triggered tip sees every value of
                // every operand, none can be lost.
                lhs.absorb(rhs);
                Representation::Exact(lhs)
            }
            (Representation::Exact(set), Representation::Approximate(mut sketch))
            | (Representation::Approximate(mut sketch), Representation::Exact(set)) => {
                for value in set.iter() {
                    sketch.offer(value);
                }
                Representation::Approximate(sketch)
            }
            (Representation::Approximate(mut lhs), Representation::Approximate(rhs)) => {
                lhs.merge(&rhs);
                Representation::Approximate(lhs)
            }
        };
        self.tip_if_needed();
        Ok(self)
    }

    /// Return memory occupied by the estimator, including heap state.
    pub fn size_of(&self) -> usize {
        self.repr.size_of()
    }

    fn check_spec(&self, other: SketchSpec) -> Result<(), MergeError> {
        if self.spec == other {
            Ok(())
        } else {
            Err(MergeError::SketchMismatch {
                lhs: self.spec,
                rhs: other,
            })
        }
    }

    /// Switch to the sketch once the exact set outgrows the threshold.
    #[inline]
    fn tip_if_needed(&mut self) {
        let Representation::Exact(set) = &mut self.repr else {
            return;
        };
        if set.len() <= self.tipping_point {
            return;
        }
        let set = std::mem::take(set);
        let mut sketch = self.spec.build();
        for value in set.iter() {
            sketch.offer(value);
        }
        self.repr = Representation::Approximate(sketch);
    }
}
