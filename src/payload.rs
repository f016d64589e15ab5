//! Per-bucket payload: exact occurrence total plus distinct estimator.

use crate::config::EstimatorConfig;
use crate::error::MergeError;
use crate::estimator::DistinctCountEstimator;

/// Pairs the exact number of observed occurrences with the distinct
/// counter fed from the same values.
#[derive(Debug, Clone, PartialEq)]
pub struct DistinctCountPayload {
    total: u64,
    estimator: DistinctCountEstimator,
}

impl DistinctCountPayload {
    /// Create an empty payload.
    pub fn new(config: &EstimatorConfig) -> Self {
        Self {
            total: 0,
            estimator: DistinctCountEstimator::new(config),
        }
    }

    pub(crate) fn from_parts(total: u64, estimator: DistinctCountEstimator) -> Self {
        Self { total, estimator }
    }

    /// Record one occurrence of `value`.
    #[inline]
    pub fn update(&mut self, value: &[u8]) {
        self.total += 1;
        self.estimator.offer(value);
    }

    /// Exact number of occurrences recorded.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Distinct count, clamped to the total so the estimate can never
    /// exceed the number of occurrences actually seen.
    #[inline]
    pub fn distinct(&self) -> u64 {
        (self.estimator.cardinality() as u64).min(self.total)
    }

    #[inline]
    pub(crate) fn estimator(&self) -> &DistinctCountEstimator {
        &self.estimator
    }

    /// Combine with another payload, consuming both.
    pub fn merge(self, other: Self) -> Result<Self, MergeError> {
        Ok(Self {
            total: self.total + other.total,
            estimator: self.estimator.merge(other.estimator)?,
        })
    }

    pub(crate) fn into_parts(self) -> (u64, DistinctCountEstimator) {
        (self.total, self.estimator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SketchSpec;

    fn config(tipping_point: usize) -> EstimatorConfig {
        EstimatorConfig::new()
            .with_tipping_point(tipping_point)
            .with_sketch(SketchSpec::with_precision(14))
    }

    #[test]
    fn test_update_tracks_total_and_distinct() {
        let mut payload = DistinctCountPayload::new(&config(100));
        for value in [b"x", b"y", b"x", b"x", b"y"] {
            payload.update(value);
        }
        assert_eq!(payload.total(), 5);
        assert_eq!(payload.distinct(), 2);
    }

    #[test]
    fn test_merge_adds_totals_and_unions_distincts() {
        let cfg = config(100);
        let mut lhs = DistinctCountPayload::new(&cfg);
        for value in [b"x", b"y", b"x", b"x", b"y"] {
            lhs.update(value);
        }
        let mut rhs = DistinctCountPayload::new(&cfg);
        for value in [b"y", b"z", b"z"] {
            rhs.update(value);
        }

        let merged = lhs.merge(rhs).unwrap();
        assert_eq!(merged.total(), 8);
        assert_eq!(merged.distinct(), 3);
    }

    #[test]
    fn test_total_never_below_distinct() {
        // Approximate from the start: the sketch may overestimate, the
        // reported distinct count must not.
        let mut payload = DistinctCountPayload::new(&config(0));
        for i in 0u32..2_000 {
            payload.update(&i.to_le_bytes());
        }
        assert!(payload.distinct() <= payload.total());
    }
}
