//! Mip chain construction.
//!
//! Levels are generated in cascade: level `n + 1` is resampled from the
//! working buffer of level `n`. For gamma-encoded color the working buffer is
//! linear light; for normal maps it holds the un-normalized filtered vectors so
//! that the lost length keeps accumulating across levels.

use tracing::debug;

use crate::image::{ColorSpace, ImagePlane};
use crate::kernel::Kernel;
use crate::resample::{for_each_row, resample};
use crate::{Error, Result};

/// Default display gamma used to linearize encoded samples.
pub const DEFAULT_GAMMA: f32 = 2.2;

/// Vectors shorter than this are replaced by +Z when renormalizing.
const MIN_VECTOR_LENGTH: f32 = 1e-8;

/// How the channels of the source should be treated while filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ChannelHandling {
    /// Ordinary color (plus optional alpha).
    #[default]
    Color,
    /// Tangent-space normals encoded as `n * 0.5 + 0.5`; renormalized per level.
    NormalVector,
    /// Binary coverage masks; box-filtered and snapped to 0 or 1.
    BinaryMask,
}

/// Settings for [`MipChain::build`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MipSettings {
    /// Resampling kernel.
    pub kernel: Kernel,
    /// Filter encoded color in linear light.
    pub gamma_correct: bool,
    /// Exponent of the encoding curve.
    pub gamma: f32,
    /// Channel semantics.
    pub handling: ChannelHandling,
}

impl Default for MipSettings {
    fn default() -> Self {
        Self {
            kernel: Kernel::default(),
            gamma_correct: true,
            gamma: DEFAULT_GAMMA,
            handling: ChannelHandling::default(),
        }
    }
}

/// One level of a mip chain.
#[derive(Debug, Clone)]
pub struct MipLevel {
    index: usize,
    plane: ImagePlane,
    normal_length: Option<Vec<f32>>,
}

impl MipLevel {
    /// Wrap a plane as level `index`.
    pub fn new(index: usize, plane: ImagePlane) -> Self {
        Self {
            index,
            plane,
            normal_length: None,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn plane(&self) -> &ImagePlane {
        &self.plane
    }

    #[inline]
    pub fn plane_mut(&mut self) -> &mut ImagePlane {
        &mut self.plane
    }

    /// Per-pixel length of the filtered normal before renormalization.
    ///
    /// Only present on chains built with [`ChannelHandling::NormalVector`].
    pub fn normal_length(&self) -> Option<&[f32]> {
        self.normal_length.as_deref()
    }

    pub fn into_plane(self) -> ImagePlane {
        self.plane
    }
}

/// A full resolution pyramid, level 0 first.
#[derive(Debug, Clone)]
pub struct MipChain {
    levels: Vec<MipLevel>,
}

impl MipChain {
    /// Build every level down to 1x1 from `source`.
    pub fn build(source: ImagePlane, settings: &MipSettings) -> Result<Self> {
        let dims = level_dimensions(source.width(), source.height())?;
        debug!(
            width = source.width(),
            height = source.height(),
            levels = dims.len(),
            kernel = %settings.kernel,
            handling = ?settings.handling,
            "building mip chain"
        );

        match settings.handling {
            ChannelHandling::Color => build_color(source, &dims, settings),
            ChannelHandling::NormalVector => build_normals(source, &dims, settings.kernel),
            ChannelHandling::BinaryMask => build_mask(source, &dims, settings.kernel),
        }
    }

    /// Wrap already-built levels, checking the dimension law.
    pub fn from_levels(levels: Vec<MipLevel>) -> Result<Self> {
        let first = levels.first().ok_or(Error::InvalidDimension {
            width: 0,
            height: 0,
            reason: "a mip chain needs at least one level",
        })?;
        let expected = level_dimensions(first.plane.width(), first.plane.height())?;

        if expected.len() != levels.len() {
            return Err(Error::ChainMismatch {
                level: levels.len().min(expected.len()),
                expected: format!("{} levels", expected.len()),
                actual: format!("{} levels", levels.len()),
            });
        }
        for (i, (level, &(w, h))) in levels.iter().zip(&expected).enumerate() {
            if (level.plane.width(), level.plane.height()) != (w, h) || level.index != i {
                return Err(Error::ChainMismatch {
                    level: i,
                    expected: format!("level {} at {}x{}", i, w, h),
                    actual: format!(
                        "level {} at {}x{}",
                        level.index,
                        level.plane.width(),
                        level.plane.height()
                    ),
                });
            }
        }

        Ok(Self { levels })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Always false; a chain holds at least level 0.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[inline]
    pub fn levels(&self) -> &[MipLevel] {
        &self.levels
    }

    #[inline]
    pub fn levels_mut(&mut self) -> &mut [MipLevel] {
        &mut self.levels
    }

    pub fn level(&self, index: usize) -> Option<&MipLevel> {
        self.levels.get(index)
    }

    /// Width and height of each level.
    pub fn dimensions(&self) -> Vec<(u32, u32)> {
        self.levels
            .iter()
            .map(|l| (l.plane.width(), l.plane.height()))
            .collect()
    }

    pub fn into_levels(self) -> Vec<MipLevel> {
        self.levels
    }
}

/// Dimensions of every level for a `width`x`height` source.
///
/// Each level is `max(1, floor(prev / 2))` per axis, ending at 1x1.
pub fn level_dimensions(width: u32, height: u32) -> Result<Vec<(u32, u32)>> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidDimension {
            width,
            height,
            reason: "source width and height must be non-zero",
        });
    }

    let mut dims = vec![(width, height)];
    let (mut w, mut h) = (width, height);
    while w > 1 || h > 1 {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
        dims.push((w, h));
    }
    Ok(dims)
}

fn build_color(source: ImagePlane, dims: &[(u32, u32)], settings: &MipSettings) -> Result<MipChain> {
    let channels = source.channels();
    let color_space = source.color_space();
    let linearize = settings.gamma_correct && color_space == ColorSpace::Encoded;
    let gamma = settings.gamma;
    let coded: Vec<bool> = (0..channels)
        .map(|c| linearize && source.is_color_channel(c))
        .collect();

    let mut work: Vec<f32> = source
        .samples()
        .iter()
        .enumerate()
        .map(|(i, &v)| if coded[i % channels] { decode_gamma(v, gamma) } else { v })
        .collect();

    let mut levels = vec![MipLevel::new(0, source)];
    for (index, window) in dims.windows(2).enumerate() {
        let ((sw, sh), (dw, dh)) = (window[0], window[1]);
        work = resample(&work, sw, sh, channels, dw, dh, settings.kernel);

        let mut out = work.clone();
        if linearize {
            let row_len = dw as usize * channels;
            for_each_row(&mut out, row_len, |_, row| {
                for px in row.chunks_exact_mut(channels) {
                    for (v, &is_coded) in px.iter_mut().zip(&coded) {
                        if is_coded {
                            *v = encode_gamma(*v, gamma);
                        }
                    }
                }
            });
        }

        let plane = ImagePlane::new(dw, dh, channels, out, color_space)?;
        levels.push(MipLevel::new(index + 1, plane));
    }

    Ok(MipChain { levels })
}

fn build_normals(source: ImagePlane, dims: &[(u32, u32)], kernel: Kernel) -> Result<MipChain> {
    let channels = source.channels();
    if channels < 2 {
        return Err(Error::UnsupportedChannels {
            expected: "2..=4 for normal vectors",
            actual: channels,
        });
    }

    // Working layout: x, y, z, then any extra channel (alpha) untouched.
    let extra = channels.saturating_sub(3);
    let work_channels = 3 + extra;
    let mut work = Vec::with_capacity(source.pixel_count() * work_channels);
    for px in source.samples().chunks_exact(channels) {
        let x = px[0] * 2.0 - 1.0;
        let y = px[1] * 2.0 - 1.0;
        let z = if channels >= 3 {
            px[2] * 2.0 - 1.0
        } else {
            (1.0 - x * x - y * y).max(0.0).sqrt()
        };
        work.extend_from_slice(&[x, y, z]);
        work.extend_from_slice(&px[3.min(channels)..]);
    }

    let color_space = source.color_space();
    let mut level0 = MipLevel::new(0, source);
    level0.normal_length = Some(vector_lengths(&work, work_channels));
    let mut levels = vec![level0];

    for (index, window) in dims.windows(2).enumerate() {
        let ((sw, sh), (dw, dh)) = (window[0], window[1]);
        work = resample(&work, sw, sh, work_channels, dw, dh, kernel);

        let lengths = vector_lengths(&work, work_channels);
        let mut out = Vec::with_capacity(dw as usize * dh as usize * channels);
        for (px, &len) in work.chunks_exact(work_channels).zip(&lengths) {
            let n = if len > MIN_VECTOR_LENGTH {
                [px[0] / len, px[1] / len, px[2] / len]
            } else {
                [0.0, 0.0, 1.0]
            };
            out.extend(n.iter().take(channels.min(3)).map(|v| v * 0.5 + 0.5));
            out.extend_from_slice(&px[3..]);
        }

        let mut level = MipLevel::new(index + 1, ImagePlane::new(dw, dh, channels, out, color_space)?);
        level.normal_length = Some(lengths);
        levels.push(level);
    }

    Ok(MipChain { levels })
}

fn build_mask(source: ImagePlane, dims: &[(u32, u32)], kernel: Kernel) -> Result<MipChain> {
    let channels = source.channels();
    let color_space = source.color_space();
    let mut work = source.samples().to_vec();
    let mut levels = vec![MipLevel::new(0, source)];

    for (index, window) in dims.windows(2).enumerate() {
        let ((sw, sh), (dw, dh)) = (window[0], window[1]);
        // Coverage keeps its fractional value in the working buffer.
        work = resample(&work, sw, sh, channels, dw, dh, kernel);
        let out = work
            .iter()
            .map(|&v| if v >= 0.5 { 1.0 } else { 0.0 })
            .collect();
        levels.push(MipLevel::new(index + 1, ImagePlane::new(dw, dh, channels, out, color_space)?));
    }

    Ok(MipChain { levels })
}

fn vector_lengths(work: &[f32], work_channels: usize) -> Vec<f32> {
    work.chunks_exact(work_channels)
        .map(|px| (px[0] * px[0] + px[1] * px[1] + px[2] * px[2]).sqrt())
        .collect()
}

/// Encoded value to linear light.
#[inline]
pub fn decode_gamma(v: f32, gamma: f32) -> f32 {
    v.max(0.0).powf(gamma)
}

/// Linear light to encoded value. Negative overshoot clamps to 0.
#[inline]
pub fn encode_gamma(v: f32, gamma: f32) -> f32 {
    v.max(0.0).powf(1.0 / gamma)
}
