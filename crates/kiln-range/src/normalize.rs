//! Forward/inverse range transforms and chain normalization.
//!
//! [`forward`] and [`inverse`] are pure functions of a value and a transform,
//! so a decoder only needs the recovered `(scale_inv, offset_inv)` pair to
//! undo the mapping.

use kiln_mip::{ColorSpace, ImagePlane, MipChain};
use tracing::debug;

use crate::histogram::color_channel_count;
use crate::stats::{ChannelMode, InverseTransform, QualityMode, RangeStatistics, RangeTransform};
use crate::{Error, Result};

/// Map `value` into `[0, 1]`.
pub fn forward(value: f32, transform: &RangeTransform, quality: QualityMode, knee: f32) -> f32 {
    let t = value * transform.scale + transform.offset;
    match quality {
        QualityMode::Fast => t.clamp(0.0, 1.0),
        QualityMode::HighQuality => soft_knee(t, knee),
    }
}

/// Recover the original value from a normalized one.
#[inline]
pub fn inverse(normalized: f32, transform: &InverseTransform) -> f32 {
    normalized * transform.scale_inv + transform.offset_inv
}

/// Smooth saturation into `[0, 1]`.
///
/// Identity on `[knee, 1 - knee]`. Within `knee` of either bound the curve is
/// the integral of a smoothstep, which meets the identity with matching slope
/// and flattens to exactly 0 (or 1) at `knee` beyond the bound.
pub fn soft_knee(t: f32, knee: f32) -> f32 {
    if knee.is_nan() || knee <= 0.0 {
        return t.clamp(0.0, 1.0);
    }
    let knee = knee.min(0.5);

    if t < knee {
        lower_knee(t, knee)
    } else if t > 1.0 - knee {
        1.0 - lower_knee(1.0 - t, knee)
    } else {
        t
    }
}

fn lower_knee(t: f32, knee: f32) -> f32 {
    if t <= -knee {
        return 0.0;
    }
    let s = (t + knee) / (2.0 * knee);
    let s3 = s * s * s;
    2.0 * knee * (s3 - 0.5 * s3 * s)
}

/// Apply the forward transform of `stats` to every level of `chain`.
///
/// Every level receives the identical transform, so one recovered
/// scale/offset set is valid across the whole chain. Returns the inverse
/// transforms, one per analysis channel.
pub fn normalize_chain(chain: &mut MipChain, stats: &RangeStatistics) -> Result<Vec<InverseTransform>> {
    for level in chain.levels_mut() {
        let index = level.index();
        normalize_plane(level.plane_mut(), stats)?;
        debug!(level = index, "normalized level");
    }
    Ok(stats.inverse())
}

/// Apply the forward transform of `stats` to one plane.
pub fn normalize_plane(plane: &mut ImagePlane, stats: &RangeStatistics) -> Result<()> {
    let channels = plane.channels();
    let transforms = stats.forward();

    // Per-sample transform index, or None for channels left untouched.
    let mapping: Vec<Option<usize>> = match stats.channel_mode {
        ChannelMode::Combined => (0..channels)
            .map(|c| plane.is_color_channel(c).then_some(0))
            .collect(),
        ChannelMode::PerChannel => {
            let color = color_channel_count(plane);
            if color > transforms.len() {
                return Err(Error::LengthMismatch {
                    expected: color,
                    actual: transforms.len(),
                });
            }
            (0..channels).map(|c| (c < color).then_some(c)).collect()
        }
    };

    if transforms.is_empty() {
        return Err(Error::LengthMismatch {
            expected: 1,
            actual: 0,
        });
    }

    for px in plane.samples_mut().chunks_exact_mut(channels) {
        for (v, slot) in px.iter_mut().zip(&mapping) {
            if let Some(i) = slot {
                *v = forward(*v, &transforms[*i], stats.quality, stats.knee_width);
            }
        }
    }

    plane.set_color_space(ColorSpace::Linear);
    Ok(())
}
