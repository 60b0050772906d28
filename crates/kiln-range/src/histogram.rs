//! Percentile histogram analysis.

use kiln_mip::{ImagePlane, MipChain};
use tracing::{debug, warn};

use crate::stats::{AnalysisSettings, ChannelMode, ChannelRange, RangeStatistics};
use crate::Result;

/// Rec.709 luminance weights.
const LUMA_WEIGHTS: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// A fixed-size histogram over the finite range of its input.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min: f32,
    max: f32,
    bins: Vec<u64>,
    total: u64,
}

impl Histogram {
    /// Number of bins.
    pub const BINS: usize = 4096;

    /// Build a histogram from `values`, ignoring non-finite samples.
    ///
    /// Returns `None` when no finite sample exists.
    pub fn from_values(values: &[f32]) -> Option<Self> {
        let (min, max) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })?;

        let mut bins = vec![0u64; Self::BINS];
        let mut total = 0u64;
        let width = (max - min) / Self::BINS as f32;

        for &v in values.iter().filter(|v| v.is_finite()) {
            let index = if width > 0.0 {
                (((v - min) / width) as usize).min(Self::BINS - 1)
            } else {
                0
            };
            bins[index] += 1;
            total += 1;
        }

        Some(Self {
            min,
            max,
            bins,
            total,
        })
    }

    #[inline]
    pub fn min(&self) -> f32 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> f32 {
        self.max
    }

    /// Number of samples counted.
    #[inline]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Value below which `percent` of the samples fall.
    ///
    /// Interpolates linearly inside the bin that crosses the target count.
    pub fn percentile(&self, percent: f32) -> f32 {
        let width = (self.max - self.min) / Self::BINS as f32;
        if width <= 0.0 {
            return self.min;
        }

        let target = (percent.clamp(0.0, 100.0) as f64 / 100.0) * self.total as f64;
        let mut cumulative = 0.0f64;
        for (i, &count) in self.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let next = cumulative + count as f64;
            if next >= target {
                let frac = ((target - cumulative) / count as f64).clamp(0.0, 1.0);
                return self.min + (i as f64 + frac) as f32 * width;
            }
            cumulative = next;
        }
        self.max
    }
}

/// Analyze a single plane.
pub fn analyze_plane(plane: &ImagePlane, settings: &AnalysisSettings) -> Result<RangeStatistics> {
    analyze_planes(std::iter::once(plane), settings)
}

/// Analyze a mip chain: level 0 only, or every level pooled when
/// `settings.per_level` is set.
pub fn analyze_chain(chain: &MipChain, settings: &AnalysisSettings) -> Result<RangeStatistics> {
    let count = if settings.per_level { chain.len() } else { 1 };
    analyze_planes(chain.levels().iter().take(count).map(|l| l.plane()), settings)
}

fn analyze_planes<'a, I>(planes: I, settings: &AnalysisSettings) -> Result<RangeStatistics>
where
    I: Iterator<Item = &'a ImagePlane> + Clone,
{
    settings.validate()?;

    let analysis_channels = match settings.channel_mode {
        ChannelMode::Combined => 1,
        ChannelMode::PerChannel => planes
            .clone()
            .map(color_channel_count)
            .min()
            .unwrap_or(1),
    };

    let mut channels = Vec::with_capacity(analysis_channels);
    for channel in 0..analysis_channels {
        let values: Vec<f32> = planes
            .clone()
            .flat_map(|plane| channel_values(plane, settings.channel_mode, channel))
            .collect();

        let range = match Histogram::from_values(&values) {
            Some(hist) => ChannelRange::new(
                hist.percentile(settings.low_percentile),
                hist.percentile(settings.high_percentile),
            ),
            None => ChannelRange::new(0.0, 0.0),
        };

        if range.degenerate {
            warn!(
                channel,
                lo = range.lo,
                hi = range.measured_hi,
                "degenerate range, widened to epsilon span"
            );
        } else {
            debug!(channel, lo = range.lo, hi = range.hi, "analyzed channel range");
        }
        channels.push(range);
    }

    Ok(RangeStatistics {
        channel_mode: settings.channel_mode,
        quality: settings.quality,
        low_percentile: settings.low_percentile,
        high_percentile: settings.high_percentile,
        knee_width: settings.knee_width,
        channels,
    })
}

/// Number of channels that carry color (alpha excluded), capped at three.
pub(crate) fn color_channel_count(plane: &ImagePlane) -> usize {
    (0..plane.channels())
        .filter(|&c| plane.is_color_channel(c))
        .count()
        .min(3)
}

fn channel_values(plane: &ImagePlane, mode: ChannelMode, channel: usize) -> Vec<f32> {
    match mode {
        ChannelMode::PerChannel => plane.channel(channel).collect(),
        ChannelMode::Combined => {
            if color_channel_count(plane) >= 3 {
                plane
                    .samples()
                    .chunks_exact(plane.channels())
                    .map(|px| {
                        px[0] * LUMA_WEIGHTS[0] + px[1] * LUMA_WEIGHTS[1] + px[2] * LUMA_WEIGHTS[2]
                    })
                    .collect()
            } else {
                plane.channel(0).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::QualityMode;
    use kiln_mip::{ColorSpace, MipSettings};

    fn uniform_plane(lo: f32, hi: f32, count: u32) -> ImagePlane {
        let samples = (0..count)
            .map(|i| lo + (hi - lo) * (i as f32 + 0.5) / count as f32)
            .collect();
        ImagePlane::new(count, 1, 1, samples, ColorSpace::Linear).unwrap()
    }

    #[test]
    fn test_uniform_10_to_200_scenario() {
        let plane = uniform_plane(10.0, 200.0, 100_000);
        let settings = AnalysisSettings {
            low_percentile: 0.5,
            high_percentile: 99.5,
            knee_width: 0.02,
            ..AnalysisSettings::default()
        };
        let stats = analyze_plane(&plane, &settings).unwrap();
        let range = stats.channels[0];

        assert!((range.lo - 11.0).abs() < 0.1, "lo = {}", range.lo);
        assert!((range.hi - 199.0).abs() < 0.1, "hi = {}", range.hi);
        let scale = stats.forward()[0].scale;
        assert!((1.0 / scale - 188.0).abs() < 0.3, "1/scale = {}", 1.0 / scale);
        assert!(!stats.is_degenerate());
    }

    #[test]
    fn test_flat_image_is_degenerate_not_fatal() {
        let plane = ImagePlane::filled(16, 16, &[128.0], ColorSpace::Linear).unwrap();
        let stats = analyze_plane(&plane, &AnalysisSettings::default()).unwrap();
        let range = stats.channels[0];

        assert!(stats.is_degenerate());
        assert_eq!(range.lo, 128.0);
        assert!(range.hi > range.lo);
        let scale = stats.forward()[0].scale;
        assert!(scale.is_finite() && scale > 0.0);
        assert_eq!(stats.degenerate_ranges().len(), 1);
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let samples = (0..64 * 64 * 3)
            .map(|i| ((i * 7919) % 1000) as f32 / 37.0)
            .collect();
        let plane = ImagePlane::new(64, 64, 3, samples, ColorSpace::Linear).unwrap();
        for channel_mode in [ChannelMode::Combined, ChannelMode::PerChannel] {
            let settings = AnalysisSettings {
                channel_mode,
                quality: QualityMode::Fast,
                ..AnalysisSettings::default()
            };
            let a = analyze_plane(&plane, &settings).unwrap();
            let b = analyze_plane(&plane, &settings).unwrap();
            assert_eq!(a, b);
            for (x, y) in a.channels.iter().zip(&b.channels) {
                assert_eq!(x.lo.to_bits(), y.lo.to_bits());
                assert_eq!(x.hi.to_bits(), y.hi.to_bits());
            }
        }
    }

    #[test]
    fn test_per_channel_ignores_alpha() {
        let plane =
            ImagePlane::filled(4, 4, &[1.0, 2.0, 3.0, 0.5], ColorSpace::Linear).unwrap();
        let stats = analyze_plane(
            &plane,
            &AnalysisSettings {
                channel_mode: ChannelMode::PerChannel,
                ..AnalysisSettings::default()
            },
        )
        .unwrap();
        assert_eq!(stats.channels.len(), 3);
        assert_eq!(stats.channels[2].lo, 3.0);
    }

    #[test]
    fn test_combined_uses_luminance() {
        let samples = vec![
            0.0, 0.0, 0.0, //
            1.0, 1.0, 1.0,
        ];
        let plane = ImagePlane::new(2, 1, 3, samples, ColorSpace::Linear).unwrap();
        let stats = analyze_plane(
            &plane,
            &AnalysisSettings {
                low_percentile: 0.0,
                high_percentile: 100.0,
                ..AnalysisSettings::default()
            },
        )
        .unwrap();
        assert_eq!(stats.channels.len(), 1);
        assert!(stats.channels[0].lo.abs() < 1e-6);
        assert!((stats.channels[0].hi - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_non_finite_samples_are_ignored() {
        let plane = ImagePlane::new(
            4,
            1,
            1,
            vec![f32::NAN, 1.0, f32::INFINITY, 3.0],
            ColorSpace::Linear,
        )
        .unwrap();
        let hist = Histogram::from_values(plane.samples()).unwrap();
        assert_eq!(hist.total(), 2);
        assert_eq!(hist.min(), 1.0);
        assert_eq!(hist.max(), 3.0);
        assert!(Histogram::from_values(&[f32::NAN]).is_none());
    }

    #[test]
    fn test_per_level_pools_the_chain() {
        let plane = uniform_plane(0.0, 1.0, 64);
        let chain = MipChain::build(plane, &MipSettings::default()).unwrap();
        let base = analyze_chain(&chain, &AnalysisSettings::default()).unwrap();
        let pooled = analyze_chain(
            &chain,
            &AnalysisSettings {
                per_level: true,
                ..AnalysisSettings::default()
            },
        )
        .unwrap();
        assert_eq!(base.channels.len(), pooled.channels.len());
        assert_ne!(base.channels[0], pooled.channels[0]);
    }

    #[test]
    fn test_invalid_percentiles_rejected() {
        let plane = uniform_plane(0.0, 1.0, 8);
        let settings = AnalysisSettings {
            low_percentile: -1.0,
            ..AnalysisSettings::default()
        };
        assert!(analyze_plane(&plane, &settings).is_err());
    }
}
