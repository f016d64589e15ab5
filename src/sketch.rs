//! Approximate counting mode: a fixed-size HyperLogLog sketch.
//!
//! One byte register per substream, `m = 1 << precision` registers.
//! The number of zero registers and the harmonic sum of all registers
//! are maintained incrementally on every update, so `estimate` runs in
//! constant time. Estimates use the LogLog-Beta corrected formula.
//!
//! [Original HyperLogLog++ paper](https://static.googleusercontent.com/media/research.google.com/en//pubs/archive/40671.pdf)

use crate::beta::beta_horner;
use crate::config::{MAX_PRECISION, MIN_PRECISION};
use crate::error::DecodeError;

/// Seed for hashing offered values; fixed so that hashes agree across
/// shards and processes.
const HASH_SEED: u64 = 0;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HllSketch {
    precision: u8,
    /// One rank per substream; `registers.len() == 1 << precision`.
    registers: Box<[u8]>,
    /// Number of registers still at rank zero.
    zeros: u32,
    /// Harmonic sum over all registers: sum of 2^-rank.
    harmonic_sum: f64,
}

impl HllSketch {
    /// Create an empty sketch with `precision` index bits.
    pub(crate) fn with_precision(precision: u8) -> Self {
        debug_assert!((MIN_PRECISION..=MAX_PRECISION).contains(&precision));
        let m = 1usize << precision;
        Self {
            precision,
            registers: vec![0u8; m].into_boxed_slice(),
            zeros: m as u32,
            harmonic_sum: m as f64,
        }
    }

    /// Rebuild a sketch from wire state, recomputing the cached zero
    /// count and harmonic sum from the registers.
    pub(crate) fn from_registers(
        precision: u8,
        registers: Box<[u8]>,
    ) -> Result<Self, DecodeError> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(DecodeError::InvalidPrecision(precision));
        }
        let m = 1usize << precision;
        if registers.len() != m {
            return Err(DecodeError::StateLengthMismatch {
                expected: m,
                actual: registers.len(),
            });
        }
        let mut zeros = 0u32;
        let mut harmonic_sum = 0.0;
        for &rank in registers.iter() {
            if rank == 0 {
                zeros += 1;
            }
            harmonic_sum += 1.0 / (1u64 << u32::from(rank)) as f64;
        }
        Ok(Self {
            precision,
            registers,
            zeros,
            harmonic_sum,
        })
    }

    #[inline]
    pub(crate) fn precision(&self) -> u8 {
        self.precision
    }

    #[inline]
    pub(crate) fn registers(&self) -> &[u8] {
        &self.registers
    }

    /// Offer a raw value; hashes it and updates the matching register.
    /// Returns true if the sketch state changed.
    #[inline]
    pub(crate) fn offer(&mut self, value: &[u8]) -> bool {
        self.offer_hash(wyhash::wyhash(value, HASH_SEED))
    }

    /// Offer a 64-bit hash directly.
    #[inline]
    pub(crate) fn offer_hash(&mut self, hash: u64) -> bool {
        let idx = (hash >> (64 - u32::from(self.precision))) as usize;
        // Rank of the first set bit in the remaining stream bits.
        let tail = hash << self.precision;
        let rank_bits = 64 - u32::from(self.precision);
        let rank = (tail.leading_zeros().min(rank_bits) + 1) as u8;
        self.bump_register(idx, rank)
    }

    /// Raise register `idx` to `rank` if larger, maintaining the cached
    /// zero count and harmonic sum.
    #[inline]
    fn bump_register(&mut self, idx: usize, rank: u8) -> bool {
        let old = self.registers[idx];
        if rank <= old {
            return false;
        }
        self.registers[idx] = rank;
        if old == 0 {
            self.zeros -= 1;
        }
        self.harmonic_sum -= 1.0 / (1u64 << u32::from(old)) as f64;
        self.harmonic_sum += 1.0 / (1u64 << u32::from(rank)) as f64;
        true
    }

    /// Union another sketch into this one by register-wise maximum.
    ///
    /// Both sketches must have the same precision; callers check spec
    /// compatibility before getting here.
    pub(crate) fn merge(&mut self, other: &HllSketch) {
        debug_assert_eq!(self.precision, other.precision);
        for idx in 0..self.registers.len() {
            let rank = other.registers[idx];
            if rank > self.registers[idx] {
                self.bump_register(idx, rank);
            }
        }
    }

    /// Cardinality estimate with LogLog-Beta bias correction.
    pub(crate) fn estimate(&self) -> usize {
        let m = self.registers.len();
        let zeros = self.zeros as usize;
        let estimate = alpha(m) * ((m * (m - zeros)) as f64)
            / (self.harmonic_sum + beta_horner(f64::from(self.zeros), self.precision));
        (estimate + 0.5) as usize
    }

    /// Return memory occupied by the sketch.
    pub(crate) fn size_of(&self) -> usize {
        std::mem::size_of::<Self>() + self.registers.len()
    }
}

/// Parameter for bias correction.
#[inline]
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (m as f64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(precision: u8, n: usize, tag: u8) -> HllSketch {
        let mut sketch = HllSketch::with_precision(precision);
        let mut buf = [0u8; 9];
        buf[8] = tag;
        for i in 0..n {
            buf[..8].copy_from_slice(&(i as u64).to_le_bytes());
            sketch.offer(&buf);
        }
        sketch
    }

    #[test]
    fn test_empty_sketch_estimates_zero() {
        let sketch = HllSketch::with_precision(14);
        assert_eq!(sketch.estimate(), 0);
    }

    #[test]
    fn test_repeated_offer_does_not_change_state() {
        let mut sketch = HllSketch::with_precision(14);
        assert!(sketch.offer(b"value"));
        assert!(!sketch.offer(b"value"));
        assert_eq!(sketch.estimate(), 1);
    }

    #[test]
    fn test_estimate_within_error_bound() {
        let sketch = filled(14, 100_000, 0);
        let estimate = sketch.estimate() as f64;
        let err = (estimate - 100_000.0).abs() / 100_000.0;
        assert!(err < 0.05, "relative error {err} too large");
    }

    #[test]
    fn test_merge_is_union() {
        let mut lhs = filled(12, 5_000, 1);
        let rhs = filled(12, 5_000, 2);
        lhs.merge(&rhs);
        let estimate = lhs.estimate() as f64;
        let err = (estimate - 10_000.0).abs() / 10_000.0;
        assert!(err < 0.1, "relative error {err} too large");
    }

    #[test]
    fn test_merge_keeps_cached_stats_consistent() {
        let mut lhs = filled(10, 2_000, 1);
        let rhs = filled(10, 2_000, 2);
        lhs.merge(&rhs);
        let rebuilt = HllSketch::from_registers(10, lhs.registers.clone()).unwrap();
        assert_eq!(lhs.estimate(), rebuilt.estimate());
        assert_eq!(lhs.zeros, rebuilt.zeros);
    }

    #[test]
    fn test_from_registers_validates() {
        assert!(matches!(
            HllSketch::from_registers(3, vec![0u8; 8].into_boxed_slice()),
            Err(DecodeError::InvalidPrecision(3))
        ));
        assert!(matches!(
            HllSketch::from_registers(10, vec![0u8; 7].into_boxed_slice()),
            Err(DecodeError::StateLengthMismatch { .. })
        ));
    }
}
