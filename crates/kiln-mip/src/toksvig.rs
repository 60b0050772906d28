//! Toksvig roughness correction.
//!
//! Averaging normals shortens them; the lost length is a measure of the
//! normal variance that the lower level can no longer represent. Folding
//! that variance into roughness keeps distant specular highlights from
//! sharpening as the texture is minified.

use tracing::debug;

use crate::builder::MipChain;
use crate::{Error, Result};

/// Settings for [`apply_toksvig`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ToksvigSettings {
    /// Channel of the roughness chain holding roughness (or gloss).
    pub channel: usize,
    /// The channel stores gloss (`1 - roughness`).
    pub gloss: bool,
    /// Multiplier on the recovered variance.
    pub strength: f32,
}

impl Default for ToksvigSettings {
    fn default() -> Self {
        Self {
            channel: 0,
            gloss: false,
            strength: 1.0,
        }
    }
}

/// Roughness after accounting for a filtered normal of length `length`.
///
/// Monotonically non-decreasing as `length` drops below 1.
pub fn corrected_roughness(roughness: f32, length: f32, strength: f32) -> f32 {
    let length = length.clamp(1e-4, 1.0);
    let variance = ((1.0 - length) / length).max(0.0);

    let alpha = roughness.clamp(0.0, 1.0).powi(2);
    let corrected = (alpha * alpha + strength.max(0.0) * variance).sqrt().min(1.0);
    corrected.sqrt()
}

/// Adjust every level above 0 of `roughness` using the co-located `normals`.
///
/// Both chains must have the same level count and dimensions. Normal lengths
/// come from the builder when available; otherwise the stored vectors are
/// decoded and measured directly.
pub fn apply_toksvig(
    roughness: &mut MipChain,
    normals: &MipChain,
    settings: &ToksvigSettings,
) -> Result<()> {
    if roughness.dimensions() != normals.dimensions() {
        return Err(Error::ChainMismatch {
            level: 0,
            expected: format!("{:?}", roughness.dimensions()),
            actual: format!("{:?}", normals.dimensions()),
        });
    }

    for (level, normal_level) in roughness
        .levels_mut()
        .iter_mut()
        .zip(normals.levels())
        .skip(1)
    {
        let index = level.index();
        let plane = level.plane_mut();
        let channels = plane.channels();
        if settings.channel >= channels {
            return Err(Error::UnsupportedChannels {
                expected: "roughness channel within the image",
                actual: channels,
            });
        }

        let lengths: Vec<f32> = match normal_level.normal_length() {
            Some(lengths) => lengths.to_vec(),
            None => measure_lengths(normal_level.plane().samples(), normal_level.plane().channels())?,
        };

        let mut total_shift = 0.0f64;
        for (px, &len) in plane.samples_mut().chunks_exact_mut(channels).zip(&lengths) {
            let stored = px[settings.channel];
            let r = if settings.gloss { 1.0 - stored } else { stored };
            let adjusted = corrected_roughness(r, len, settings.strength);
            total_shift += (adjusted - r) as f64;
            px[settings.channel] = if settings.gloss { 1.0 - adjusted } else { adjusted };
        }

        debug!(
            level = index,
            mean_shift = total_shift / lengths.len().max(1) as f64,
            "applied toksvig correction"
        );
    }

    Ok(())
}

fn measure_lengths(samples: &[f32], channels: usize) -> Result<Vec<f32>> {
    if channels < 3 {
        return Err(Error::UnsupportedChannels {
            expected: "3..=4 for measuring normal length",
            actual: channels,
        });
    }
    Ok(samples
        .chunks_exact(channels)
        .map(|px| {
            let x = px[0] * 2.0 - 1.0;
            let y = px[1] * 2.0 - 1.0;
            let z = px[2] * 2.0 - 1.0;
            (x * x + y * y + z * z).sqrt()
        })
        .collect())
}
