//! Binary wire format for shipping partial shard results.
//!
//! Layout, all multi-byte integers little-endian:
//!
//! - Estimator: `u8` mode; tipped (`1`) is followed by a `u8` sketch
//!   kind tag, a `u32` state length and the sketch state (`u8` precision
//!   plus one byte per register); untipped (`0`) is followed by an `i32`
//!   tipping point, the factory descriptor (`u8` kind + `u8` precision),
//!   an `i32` raw value count and `i32`-length-prefixed raw values.
//! - Payload: varint total, then an estimator.
//! - Flat map: varint bucket count, then `i64` key + payload per bucket.
//! - Sliced map: per bucket additionally a varint slice count, then
//!   varint-length-prefixed label + payload per slice.
//!
//! Decoding is strict: unknown tags, negative counts, out-of-range
//! lengths and truncation are all errors; a corrupt shard contribution
//! must never pass for an empty one.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::bucket::{BucketKey, BucketMap, SliceLabel, SlicedBucketMap};
use crate::config::{EstimatorConfig, SketchKind, SketchSpec, MAX_PRECISION, MIN_PRECISION};
use crate::error::DecodeError;
use crate::estimator::DistinctCountEstimator;
use crate::exact::ExactSet;
use crate::payload::DistinctCountPayload;
use crate::representation::Representation;
use crate::sketch::HllSketch;

const MODE_EXACT: u8 = 0;
const MODE_TIPPED: u8 = 1;

/// Upper bound for any decoded count or length field.
const MAX_LEN: u64 = 1 << 24;

/// Write a LEB128 varint.
fn write_varint<W: Write + ?Sized>(w: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return w.write_u8(byte);
        }
        w.write_u8(byte | 0x80)?;
    }
}

/// Read a LEB128 varint of at most 64 bits.
fn read_varint<R: Read + ?Sized>(r: &mut R) -> Result<u64, DecodeError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = r.read_u8()?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(DecodeError::VarintOverflow);
        }
    }
}

/// Validate a decoded count/length field and convert it to usize.
fn checked_len(value: u64) -> Result<usize, DecodeError> {
    if value > MAX_LEN {
        return Err(DecodeError::LengthOutOfRange(value));
    }
    Ok(value as usize)
}

/// Validate a decoded `i32` count field.
fn checked_count(value: i32) -> Result<usize, DecodeError> {
    if value < 0 {
        return Err(DecodeError::NegativeCount(value));
    }
    checked_len(u64::from(value.unsigned_abs()))
}

fn read_sketch_kind<R: Read + ?Sized>(r: &mut R) -> Result<SketchKind, DecodeError> {
    let tag = r.read_u8()?;
    SketchKind::from_tag(tag).ok_or(DecodeError::UnknownSketchKind(tag))
}

fn read_precision<R: Read + ?Sized>(r: &mut R) -> Result<u8, DecodeError> {
    let precision = r.read_u8()?;
    if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
        return Err(DecodeError::InvalidPrecision(precision));
    }
    Ok(precision)
}

impl DistinctCountEstimator {
    /// Serialize into `w`.
    pub fn pack_to_writer<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        match self.repr() {
            Representation::Approximate(sketch) => {
                w.write_u8(MODE_TIPPED)?;
                w.write_u8(self.spec().kind().tag())?;
                let registers = sketch.registers();
                w.write_u32::<LE>(registers.len() as u32 + 1)?;
                w.write_u8(sketch.precision())?;
                w.write_all(registers)
            }
            Representation::Exact(set) => {
                w.write_u8(MODE_EXACT)?;
                w.write_i32::<LE>(self.tipping_point() as i32)?;
                w.write_u8(self.spec().kind().tag())?;
                w.write_u8(self.spec().precision())?;
                w.write_i32::<LE>(set.len() as i32)?;
                for value in set.iter() {
                    w.write_i32::<LE>(value.len() as i32)?;
                    w.write_all(value)?;
                }
                Ok(())
            }
        }
    }

    /// Serialize into a fresh buffer.
    pub fn pack_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_of());
        self.pack_to_writer(&mut buf)
            .expect("writing to a vec cannot fail");
        buf
    }

    /// Deserialize from `r`.
    pub fn unpack_from_reader<R: Read + ?Sized>(r: &mut R) -> Result<Self, DecodeError> {
        match r.read_u8()? {
            MODE_TIPPED => {
                let kind = read_sketch_kind(r)?;
                let state_len = checked_len(u64::from(r.read_u32::<LE>()?))?;
                if state_len == 0 {
                    return Err(DecodeError::LengthOutOfRange(0));
                }
                let precision = read_precision(r)?;
                let mut registers = vec![0u8; state_len - 1];
                r.read_exact(&mut registers)?;
                let sketch = HllSketch::from_registers(precision, registers.into_boxed_slice())?;
                let spec = match kind {
                    SketchKind::HyperLogLog => SketchSpec::with_precision(precision),
                };
                Ok(Self::from_sketch(spec, sketch))
            }
            MODE_EXACT => {
                let tipping_point = r.read_i32::<LE>()?;
                if tipping_point < 0 {
                    return Err(DecodeError::NegativeCount(tipping_point));
                }
                let kind = read_sketch_kind(r)?;
                let precision = read_precision(r)?;
                let spec = match kind {
                    SketchKind::HyperLogLog => SketchSpec::with_precision(precision),
                };
                let count = checked_count(r.read_i32::<LE>()?)?;
                let mut set = ExactSet::new();
                for _ in 0..count {
                    let len = checked_count(r.read_i32::<LE>()?)?;
                    let mut value = vec![0u8; len];
                    r.read_exact(&mut value)?;
                    set.insert_owned(value.into_boxed_slice());
                }
                Ok(Self::from_exact(
                    tipping_point.unsigned_abs() as usize,
                    spec,
                    set,
                ))
            }
            mode => Err(DecodeError::InvalidMode(mode)),
        }
    }

    /// Deserialize from a byte slice.
    pub fn unpack_from_slice(mut s: &[u8]) -> Result<Self, DecodeError> {
        Self::unpack_from_reader(&mut s)
    }
}

impl DistinctCountPayload {
    /// Serialize into `w`.
    pub fn pack_to_writer<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_varint(w, self.total())?;
        self.estimator().pack_to_writer(w)
    }

    /// Serialize into a fresh buffer.
    pub fn pack_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.pack_to_writer(&mut buf)
            .expect("writing to a vec cannot fail");
        buf
    }

    /// Deserialize from `r`.
    pub fn unpack_from_reader<R: Read + ?Sized>(r: &mut R) -> Result<Self, DecodeError> {
        let total = read_varint(r)?;
        let estimator = DistinctCountEstimator::unpack_from_reader(r)?;
        Ok(Self::from_parts(total, estimator))
    }

    /// Deserialize from a byte slice.
    pub fn unpack_from_slice(mut s: &[u8]) -> Result<Self, DecodeError> {
        Self::unpack_from_reader(&mut s)
    }
}

impl BucketMap {
    /// Serialize into `w`.
    pub fn pack_to_writer<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_varint(w, self.len() as u64)?;
        for (key, payload) in self.iter() {
            w.write_i64::<LE>(key.0)?;
            payload.pack_to_writer(w)?;
        }
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn pack_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.pack_to_writer(&mut buf)
            .expect("writing to a vec cannot fail");
        buf
    }

    /// Deserialize from `r`.
    ///
    /// Decoded maps are only ever absorbed into an accumulator or
    /// materialized; their scan-time config is not consulted.
    pub fn unpack_from_reader<R: Read + ?Sized>(r: &mut R) -> Result<Self, DecodeError> {
        let count = checked_len(read_varint(r)?)?;
        let mut map = BucketMap::new(EstimatorConfig::default());
        for _ in 0..count {
            let key = BucketKey(r.read_i64::<LE>()?);
            let payload = DistinctCountPayload::unpack_from_reader(r)?;
            map.insert(key, payload);
        }
        Ok(map)
    }

    /// Deserialize from a byte slice.
    pub fn unpack_from_slice(mut s: &[u8]) -> Result<Self, DecodeError> {
        Self::unpack_from_reader(&mut s)
    }
}

impl SlicedBucketMap {
    /// Serialize into `w`.
    pub fn pack_to_writer<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        write_varint(w, self.len() as u64)?;
        for (key, slices) in self.iter() {
            w.write_i64::<LE>(key.0)?;
            write_varint(w, slices.len() as u64)?;
            for (label, payload) in slices {
                write_varint(w, label.len() as u64)?;
                w.write_all(label)?;
                payload.pack_to_writer(w)?;
            }
        }
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn pack_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.pack_to_writer(&mut buf)
            .expect("writing to a vec cannot fail");
        buf
    }

    /// Deserialize from `r`.
    ///
    /// Decoded maps are only ever absorbed into an accumulator or
    /// materialized; their scan-time config is not consulted.
    pub fn unpack_from_reader<R: Read + ?Sized>(r: &mut R) -> Result<Self, DecodeError> {
        let count = checked_len(read_varint(r)?)?;
        let mut map = SlicedBucketMap::new(EstimatorConfig::default());
        for _ in 0..count {
            let key = BucketKey(r.read_i64::<LE>()?);
            let slice_count = checked_len(read_varint(r)?)?;
            for _ in 0..slice_count {
                let label_len = checked_len(read_varint(r)?)?;
                let mut label = vec![0u8; label_len];
                r.read_exact(&mut label)?;
                let payload = DistinctCountPayload::unpack_from_reader(r)?;
                map.insert(key, SliceLabel::from(label), payload);
            }
        }
        Ok(map)
    }

    /// Deserialize from a byte slice.
    pub fn unpack_from_slice(mut s: &[u8]) -> Result<Self, DecodeError> {
        Self::unpack_from_reader(&mut s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config(tipping_point: usize, precision: u8) -> EstimatorConfig {
        EstimatorConfig::new()
            .with_tipping_point(tipping_point)
            .with_sketch(SketchSpec::with_precision(precision))
    }

    #[test_case(0)]
    #[test_case(1)]
    #[test_case(127)]
    #[test_case(128)]
    #[test_case(300_000)]
    #[test_case(u64::MAX)]
    fn test_varint_round_trip(value: u64) {
        let mut buf = Vec::new();
        write_varint(&mut buf, value).unwrap();
        assert_eq!(read_varint(&mut buf.as_slice()).unwrap(), value);
    }

    #[test]
    fn test_varint_overflow_detected() {
        let buf = [0xffu8; 11];
        assert!(matches!(
            read_varint(&mut buf.as_slice()),
            Err(DecodeError::VarintOverflow)
        ));
    }

    #[test]
    fn test_exact_estimator_round_trip() {
        let mut estimator = DistinctCountEstimator::new(&config(4, 14));
        for value in [b"a", b"b", b"c"] {
            estimator.offer(value);
        }
        let decoded = DistinctCountEstimator::unpack_from_slice(&estimator.pack_to_vec()).unwrap();
        assert_eq!(decoded, estimator);
        assert_eq!(decoded.cardinality(), 3);
        assert!(!decoded.is_approximate());

        // The tipping threshold survives the trip.
        let mut decoded = decoded;
        decoded.offer(b"d");
        assert!(!decoded.is_approximate());
        decoded.offer(b"e");
        assert!(decoded.is_approximate());
    }

    #[test]
    fn test_tipped_estimator_round_trip() {
        let mut estimator = DistinctCountEstimator::new(&config(0, 12));
        for i in 0u32..5_000 {
            estimator.offer(&i.to_le_bytes());
        }
        let decoded = DistinctCountEstimator::unpack_from_slice(&estimator.pack_to_vec()).unwrap();
        assert!(decoded.is_approximate());
        assert_eq!(decoded.cardinality(), estimator.cardinality());
        assert_eq!(decoded.spec(), estimator.spec());
    }

    #[test]
    fn test_payload_round_trip() {
        let mut payload = DistinctCountPayload::new(&config(100, 14));
        for value in [b"x", b"y", b"x"] {
            payload.update(value);
        }
        let decoded = DistinctCountPayload::unpack_from_slice(&payload.pack_to_vec()).unwrap();
        assert_eq!(decoded.total(), 3);
        assert_eq!(decoded.distinct(), 2);
    }

    #[test]
    fn test_flat_map_round_trip_then_reduce() {
        let mut remote = BucketMap::new(config(100, 14));
        remote.update(BucketKey(100), b"x");
        remote.update(BucketKey(200), b"y");
        let decoded = BucketMap::unpack_from_slice(&remote.pack_to_vec()).unwrap();

        let mut local = BucketMap::new(config(100, 14));
        local.update(BucketKey(100), b"z");
        let reduced = BucketMap::reduce(vec![local, decoded]).unwrap();
        assert_eq!(reduced.len(), 2);
        let (_, payload) = reduced.iter().find(|(key, _)| key.0 == 100).unwrap();
        assert_eq!(payload.total(), 2);
        assert_eq!(payload.distinct(), 2);
    }

    #[test]
    fn test_sliced_map_round_trip() {
        let mut map = SlicedBucketMap::new(config(100, 14));
        map.update(BucketKey(100), b"api", b"x");
        map.update(BucketKey(100), b"web", b"y");
        map.update(BucketKey(200), b"api", b"x");

        let decoded = SlicedBucketMap::unpack_from_slice(&map.pack_to_vec()).unwrap();
        assert_eq!(decoded.len(), 2);
        let (_, slices) = decoded.iter().find(|(key, _)| key.0 == 100).unwrap();
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_unknown_kind_tag_rejected() {
        let buf = [MODE_TIPPED, 0xab, 0, 0, 0, 0];
        assert!(matches!(
            DistinctCountEstimator::unpack_from_slice(&buf),
            Err(DecodeError::UnknownSketchKind(0xab))
        ));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(matches!(
            DistinctCountEstimator::unpack_from_slice(&[7]),
            Err(DecodeError::InvalidMode(7))
        ));
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut buf = vec![MODE_EXACT];
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            DistinctCountEstimator::unpack_from_slice(&buf),
            Err(DecodeError::NegativeCount(-1))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut estimator = DistinctCountEstimator::new(&config(0, 12));
        estimator.offer(b"v");
        let bytes = estimator.pack_to_vec();
        assert!(matches!(
            DistinctCountEstimator::unpack_from_slice(&bytes[..bytes.len() / 2]),
            Err(DecodeError::Io(_))
        ));
    }
}
