//! Range metadata block.
//!
//! The block stores the inverse transform as half-precision pairs together
//! with the analysis parameters that produced it. Layout (little-endian):
//!
//! ```text
//! offset  size  field
//! 0       1     tag            0x01 scalar, 0x02 per-channel
//! 1       1     transform      0x00 hard clamp, 0x01 soft knee
//! 2       1     flags          bit 0: degenerate range
//! 3       1     reserved       always 0
//! 4       4     length         bytes following this field
//! 8       N     pairs          f16 scale_inv, f16 offset_inv (N = 4 or 12)
//! 8+N     12    diagnostics    f32 low percentile, f32 high percentile, f32 knee width
//! ```

use byteorder::{ByteOrder, LittleEndian};
use half::f16;
use kiln_common::BinaryReader;
use tracing::warn;

use crate::stats::{ChannelMode, InverseTransform, QualityMode, RangeStatistics};
use crate::{Error, Result};

/// Key/value key under which the block is stored in a container.
pub const METADATA_KEY: &str = "kiln.range";

const HEADER_LEN: usize = 8;
const DIAGNOSTICS_LEN: usize = 12;
const FLAG_DEGENERATE: u8 = 0x01;

/// Distinguishes scalar from per-channel range metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetadataTag {
    Scalar = 0x01,
    PerChannel = 0x02,
}

impl MetadataTag {
    /// Number of `(scale_inv, offset_inv)` pairs carried.
    pub const fn pair_count(self) -> usize {
        match self {
            MetadataTag::Scalar => 1,
            MetadataTag::PerChannel => 3,
        }
    }

    /// Size of the quantized pair payload in bytes.
    pub const fn payload_len(self) -> usize {
        self.pair_count() * 4
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(MetadataTag::Scalar),
            0x02 => Ok(MetadataTag::PerChannel),
            other => Err(Error::UnknownTag(other)),
        }
    }
}

/// How the normalized data was squeezed into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransformKind {
    HardClamp = 0x00,
    SoftKnee = 0x01,
}

impl TransformKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(TransformKind::HardClamp),
            0x01 => Ok(TransformKind::SoftKnee),
            other => Err(Error::UnknownTransform(other)),
        }
    }
}

/// Decoded form of the range metadata block.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBlock {
    pub tag: MetadataTag,
    pub transform: TransformKind,
    pub degenerate: bool,
    /// Quantized `(scale_inv, offset_inv)` pairs; length is `tag.pair_count()`.
    pub pairs: Vec<(f16, f16)>,
    pub low_percentile: f32,
    pub high_percentile: f32,
    pub knee_width: f32,
}

impl MetadataBlock {
    /// Quantize the inverse transforms of `stats`.
    ///
    /// Per-channel statistics with fewer than three channels are padded with
    /// the identity pair.
    pub fn from_statistics(stats: &RangeStatistics) -> Self {
        let tag = match stats.channel_mode {
            ChannelMode::Combined => MetadataTag::Scalar,
            ChannelMode::PerChannel => MetadataTag::PerChannel,
        };
        let transform = match stats.quality {
            QualityMode::Fast => TransformKind::HardClamp,
            QualityMode::HighQuality => TransformKind::SoftKnee,
        };

        let mut inverse = stats.inverse();
        inverse.resize(tag.pair_count(), InverseTransform::IDENTITY);

        let pairs = inverse
            .iter()
            .map(|t| (quantize(t.scale_inv), quantize(t.offset_inv)))
            .collect();

        Self {
            tag,
            transform,
            degenerate: stats.is_degenerate(),
            pairs,
            low_percentile: stats.low_percentile,
            high_percentile: stats.high_percentile,
            knee_width: stats.knee_width,
        }
    }

    /// Serialize to bytes. Identical blocks always produce identical bytes.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.tag.payload_len();
        let mut buf = vec![0u8; HEADER_LEN + payload + DIAGNOSTICS_LEN];

        buf[0] = self.tag as u8;
        buf[1] = self.transform as u8;
        buf[2] = if self.degenerate { FLAG_DEGENERATE } else { 0 };
        LittleEndian::write_u32(&mut buf[4..8], (payload + DIAGNOSTICS_LEN) as u32);

        let identity = (f16::ONE, f16::ZERO);
        for i in 0..self.tag.pair_count() {
            let (scale, offset) = self.pairs.get(i).copied().unwrap_or(identity);
            let at = HEADER_LEN + i * 4;
            LittleEndian::write_u16(&mut buf[at..at + 2], scale.to_bits());
            LittleEndian::write_u16(&mut buf[at + 2..at + 4], offset.to_bits());
        }

        let at = HEADER_LEN + payload;
        LittleEndian::write_f32(&mut buf[at..at + 4], self.low_percentile);
        LittleEndian::write_f32(&mut buf[at + 4..at + 8], self.high_percentile);
        LittleEndian::write_f32(&mut buf[at + 8..at + 12], self.knee_width);

        buf
    }

    /// Parse a block produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(bytes);
        let tag = MetadataTag::from_u8(reader.read_u8()?)?;
        let transform = TransformKind::from_u8(reader.read_u8()?)?;
        let flags = reader.read_u8()?;
        let reserved = reader.read_u8()?;
        if reserved != 0 {
            return Err(Error::ReservedNotZero(reserved));
        }

        let declared = reader.read_u32()? as usize;
        let expected = tag.payload_len() + DIAGNOSTICS_LEN;
        if declared != expected {
            return Err(Error::LengthMismatch {
                expected,
                actual: declared,
            });
        }
        if reader.remaining() != declared {
            return Err(Error::LengthMismatch {
                expected: declared,
                actual: reader.remaining(),
            });
        }

        let mut pairs = Vec::with_capacity(tag.pair_count());
        for _ in 0..tag.pair_count() {
            let scale = f16::from_bits(reader.read_u16()?);
            let offset = f16::from_bits(reader.read_u16()?);
            pairs.push((scale, offset));
        }

        Ok(Self {
            tag,
            transform,
            degenerate: flags & FLAG_DEGENERATE != 0,
            pairs,
            low_percentile: reader.read_f32()?,
            high_percentile: reader.read_f32()?,
            knee_width: reader.read_f32()?,
        })
    }

    /// The stored inverse transforms, widened back to `f32`.
    pub fn inverse_transforms(&self) -> Vec<InverseTransform> {
        self.pairs
            .iter()
            .map(|(scale, offset)| InverseTransform {
                scale_inv: scale.to_f32(),
                offset_inv: offset.to_f32(),
            })
            .collect()
    }
}

/// Encode the inverse transform of `stats` as a metadata block.
pub fn encode_statistics(stats: &RangeStatistics) -> Vec<u8> {
    MetadataBlock::from_statistics(stats).encode()
}

/// Half of the f16 quantization step at `value`.
///
/// A value stored in the block differs from its `f32` source by at most this.
pub fn quantization_half_step(value: f32) -> f32 {
    let q = f16::from_f32(value.abs());
    if !q.is_finite() {
        return f32::INFINITY;
    }
    let next = f16::from_bits(q.to_bits() + 1);
    (next.to_f32() - q.to_f32()) / 2.0
}

fn quantize(value: f32) -> f16 {
    let q = f16::from_f32(value);
    if q.is_finite() {
        return q;
    }
    warn!(value, "range parameter exceeds half precision, saturating");
    if value.is_sign_negative() {
        f16::MIN
    } else {
        f16::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::inverse;
    use crate::stats::ChannelRange;

    fn stats(mode: ChannelMode, ranges: &[(f32, f32)]) -> RangeStatistics {
        RangeStatistics {
            channel_mode: mode,
            quality: QualityMode::HighQuality,
            low_percentile: 0.5,
            high_percentile: 99.5,
            knee_width: 0.02,
            channels: ranges.iter().map(|&(lo, hi)| ChannelRange::new(lo, hi)).collect(),
        }
    }

    #[test]
    fn test_scalar_layout() {
        let bytes = encode_statistics(&stats(ChannelMode::Combined, &[(11.0, 199.0)]));
        assert_eq!(bytes.len(), 8 + 4 + 12);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(bytes[2], 0x00);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]) as usize, bytes.len() - 8);
        assert_eq!(f16::from_bits(LittleEndian::read_u16(&bytes[8..10])).to_f32(), 188.0);
        assert_eq!(f16::from_bits(LittleEndian::read_u16(&bytes[10..12])).to_f32(), 11.0);
    }

    #[test]
    fn test_per_channel_layout_is_padded() {
        let block = MetadataBlock::from_statistics(&stats(ChannelMode::PerChannel, &[(0.0, 2.0)]));
        assert_eq!(block.pairs.len(), 3);
        assert_eq!(block.pairs[1], (f16::ONE, f16::ZERO));

        let bytes = block.encode();
        assert_eq!(bytes.len(), 8 + 12 + 12);
        assert_eq!(bytes[0], 0x02);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let s = stats(ChannelMode::PerChannel, &[(1.0, 2.0), (3.0, 7.5), (-4.0, 4.0)]);
        assert_eq!(encode_statistics(&s), encode_statistics(&s.clone()));
    }

    #[test]
    fn test_decode_roundtrip() {
        let s = stats(ChannelMode::PerChannel, &[(1.0, 2.0), (3.0, 7.5), (-4.0, 4.0)]);
        let block = MetadataBlock::from_statistics(&s);
        let decoded = MetadataBlock::decode(&block.encode()).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_degenerate_flag() {
        let s = stats(ChannelMode::Combined, &[(128.0, 128.0)]);
        let bytes = encode_statistics(&s);
        assert_eq!(bytes[2] & FLAG_DEGENERATE, FLAG_DEGENERATE);
        assert!(MetadataBlock::decode(&bytes).unwrap().degenerate);
    }

    #[test]
    fn test_recovery_within_half_step() {
        for &(lo, hi) in &[(11.0f32, 199.0f32), (0.013, 0.87), (-3.7, 12.25), (100.0, 4000.0)] {
            let s = stats(ChannelMode::Combined, &[(lo, hi)]);
            let exact = s.inverse()[0];
            let stored = MetadataBlock::decode(&encode_statistics(&s))
                .unwrap()
                .inverse_transforms()[0];
            let bound = quantization_half_step(exact.scale_inv)
                + quantization_half_step(exact.offset_inv)
                + 1e-5 * hi.abs().max(1.0);

            for i in 0..=100 {
                let v = i as f32 / 100.0;
                let original = inverse(v, &exact);
                let recovered = inverse(v, &stored);
                assert!(
                    (original - recovered).abs() <= bound,
                    "[{}, {}] v={} err={} bound={}",
                    lo,
                    hi,
                    v,
                    (original - recovered).abs(),
                    bound
                );
            }
        }
    }

    #[test]
    fn test_rejects_bad_blocks() {
        let good = encode_statistics(&stats(ChannelMode::Combined, &[(0.0, 1.0)]));

        let mut bad_tag = good.clone();
        bad_tag[0] = 0x7F;
        assert!(matches!(MetadataBlock::decode(&bad_tag), Err(Error::UnknownTag(0x7F))));

        let mut bad_len = good.clone();
        LittleEndian::write_u32(&mut bad_len[4..8], 99);
        assert!(matches!(
            MetadataBlock::decode(&bad_len),
            Err(Error::LengthMismatch { .. })
        ));

        let truncated = &good[..good.len() - 1];
        assert!(matches!(
            MetadataBlock::decode(truncated),
            Err(Error::LengthMismatch { .. })
        ));

        let mut reserved = good;
        reserved[3] = 1;
        assert!(matches!(
            MetadataBlock::decode(&reserved),
            Err(Error::ReservedNotZero(1))
        ));
    }

    #[test]
    fn test_half_step() {
        // f16 spacing in [128, 256) is 0.125.
        assert_eq!(quantization_half_step(188.0), 0.0625);
        assert_eq!(quantization_half_step(-188.0), 0.0625);
    }
}
