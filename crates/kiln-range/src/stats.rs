//! Range statistics and the transforms derived from them.

use crate::Error;

/// Which samples feed the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ChannelMode {
    /// One range from Rec.709 luminance, applied to every color channel.
    #[default]
    Combined,
    /// One range per color channel (up to three).
    PerChannel,
}

/// How out-of-range values are mapped into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum QualityMode {
    /// Hard clamp at the percentiles.
    Fast,
    /// Smooth knee around both percentiles.
    #[default]
    HighQuality,
}

/// Parameters of a histogram analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnalysisSettings {
    pub channel_mode: ChannelMode,
    pub quality: QualityMode,
    /// Low percentile, in percent.
    pub low_percentile: f32,
    /// High percentile, in percent.
    pub high_percentile: f32,
    /// Knee half-width as a fraction of `hi - lo`.
    pub knee_width: f32,
    /// Pool every mip level instead of only level 0.
    pub per_level: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            channel_mode: ChannelMode::default(),
            quality: QualityMode::default(),
            low_percentile: 0.5,
            high_percentile: 99.5,
            knee_width: 0.02,
            per_level: false,
        }
    }
}

impl AnalysisSettings {
    pub(crate) fn validate(&self) -> crate::Result<()> {
        let (low, high) = (self.low_percentile, self.high_percentile);
        if !(low.is_finite() && high.is_finite() && 0.0 <= low && low < high && high <= 100.0) {
            return Err(Error::InvalidPercentiles { low, high });
        }
        Ok(())
    }
}

/// Forward transform: `normalized = value * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeTransform {
    pub scale: f32,
    pub offset: f32,
}

/// Inverse transform: `value = normalized * scale_inv + offset_inv`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InverseTransform {
    pub scale_inv: f32,
    pub offset_inv: f32,
}

impl InverseTransform {
    /// The transform that leaves values unchanged.
    pub const IDENTITY: Self = Self {
        scale_inv: 1.0,
        offset_inv: 0.0,
    };
}

/// Range found for one analysis channel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelRange {
    /// Value at the low percentile.
    pub lo: f32,
    /// Value at the high percentile (after any epsilon widening).
    pub hi: f32,
    /// Value at the high percentile as measured.
    pub measured_hi: f32,
    /// The percentiles collapsed and `hi` was widened.
    pub degenerate: bool,
}

impl ChannelRange {
    /// Build a range, widening `hi` when it does not exceed `lo`.
    pub fn new(lo: f32, hi: f32) -> Self {
        let lo = if lo.is_finite() { lo } else { 0.0 };
        if hi.is_finite() && hi > lo && (1.0 / (hi - lo)).is_finite() {
            return Self {
                lo,
                hi,
                measured_hi: hi,
                degenerate: false,
            };
        }
        Self {
            lo,
            hi: lo + degenerate_span(lo),
            measured_hi: hi,
            degenerate: true,
        }
    }

    /// Forward transform mapping `[lo, hi]` onto `[0, 1]`.
    pub fn forward(&self) -> RangeTransform {
        let scale = 1.0 / (self.hi - self.lo);
        RangeTransform {
            scale,
            offset: -self.lo * scale,
        }
    }

    /// Inverse of [`forward`](Self::forward).
    pub fn inverse(&self) -> InverseTransform {
        let forward = self.forward();
        InverseTransform {
            scale_inv: 1.0 / forward.scale,
            offset_inv: -forward.offset / forward.scale,
        }
    }
}

/// Width used in place of an empty range.
pub fn degenerate_span(lo: f32) -> f32 {
    1e-4 * lo.abs().max(1.0)
}

/// Result of a histogram analysis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RangeStatistics {
    pub channel_mode: ChannelMode,
    pub quality: QualityMode,
    pub low_percentile: f32,
    pub high_percentile: f32,
    pub knee_width: f32,
    /// One entry in combined mode, one per color channel otherwise.
    pub channels: Vec<ChannelRange>,
}

impl RangeStatistics {
    /// Whether any channel range had to be widened.
    pub fn is_degenerate(&self) -> bool {
        self.channels.iter().any(|c| c.degenerate)
    }

    /// `DegenerateRange` diagnostics for every widened channel.
    pub fn degenerate_ranges(&self) -> Vec<Error> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.degenerate)
            .map(|(channel, c)| Error::DegenerateRange {
                channel,
                lo: c.lo,
                hi: c.measured_hi,
            })
            .collect()
    }

    /// Forward transforms, one per analysis channel.
    pub fn forward(&self) -> Vec<RangeTransform> {
        self.channels.iter().map(ChannelRange::forward).collect()
    }

    /// Inverse transforms, one per analysis channel.
    pub fn inverse(&self) -> Vec<InverseTransform> {
        self.channels.iter().map(ChannelRange::inverse).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_agree() {
        let range = ChannelRange::new(11.0, 199.0);
        let fwd = range.forward();
        let inv = range.inverse();

        assert!((fwd.scale - 1.0 / 188.0).abs() < 1e-9);
        assert!((inv.scale_inv - 188.0).abs() < 1e-3);
        assert!((inv.offset_inv - 11.0).abs() < 1e-3);
        for v in [11.0f32, 50.0, 199.0] {
            let n = v * fwd.scale + fwd.offset;
            assert!((n * inv.scale_inv + inv.offset_inv - v).abs() < 1e-3);
        }
    }

    #[test]
    fn test_equal_bounds_are_widened() {
        let range = ChannelRange::new(128.0, 128.0);
        assert!(range.degenerate);
        assert!(range.hi > range.lo);
        let fwd = range.forward();
        assert!(fwd.scale.is_finite() && fwd.scale > 0.0);
        assert!(fwd.offset.is_finite());
    }

    #[test]
    fn test_inverted_bounds_are_widened() {
        let range = ChannelRange::new(5.0, 2.0);
        assert!(range.degenerate);
        assert_eq!(range.lo, 5.0);
        assert!(range.hi > 5.0);
    }

    #[test]
    fn test_settings_validation() {
        assert!(AnalysisSettings::default().validate().is_ok());
        let bad = AnalysisSettings {
            low_percentile: 60.0,
            high_percentile: 40.0,
            ..AnalysisSettings::default()
        };
        assert!(matches!(bad.validate(), Err(Error::InvalidPercentiles { .. })));
    }
}
