//! Floating-point image planes.

use crate::{Error, Result};

/// Transfer characteristic of the stored samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ColorSpace {
    /// Samples are proportional to light (or are non-color data).
    Linear,
    /// Samples are gamma encoded.
    #[default]
    Encoded,
}

/// An interleaved `f32` image with 1 to 4 channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlane {
    width: u32,
    height: u32,
    channels: usize,
    samples: Vec<f32>,
    color_space: ColorSpace,
}

impl ImagePlane {
    /// Maximum supported channel count.
    pub const MAX_CHANNELS: usize = 4;

    /// Create a plane from interleaved samples.
    pub fn new(
        width: u32,
        height: u32,
        channels: usize,
        samples: Vec<f32>,
        color_space: ColorSpace,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimension {
                width,
                height,
                reason: "width and height must be non-zero",
            });
        }
        if channels == 0 || channels > Self::MAX_CHANNELS {
            return Err(Error::UnsupportedChannels {
                expected: "1..=4",
                actual: channels,
            });
        }

        let expected = width as usize * height as usize * channels;
        if samples.len() != expected {
            return Err(Error::SampleCountMismatch {
                expected,
                actual: samples.len(),
            });
        }

        Ok(Self {
            width,
            height,
            channels,
            samples,
            color_space,
        })
    }

    /// Create a plane where every pixel has the same value.
    pub fn filled(
        width: u32,
        height: u32,
        pixel: &[f32],
        color_space: ColorSpace,
    ) -> Result<Self> {
        let count = width as usize * height as usize;
        let samples = pixel.iter().copied().cycle().take(count * pixel.len()).collect();
        Self::new(width, height, pixel.len(), samples, color_space)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Number of pixels.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Interleaved samples.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable interleaved samples. Geometry cannot change through this.
    #[inline]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Samples of a single pixel.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[f32] {
        let start = (y as usize * self.width as usize + x as usize) * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// Iterate over the samples of one channel.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
    }

    /// Retag the transfer characteristic without touching samples.
    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        self.color_space = color_space;
    }

    /// Consume the plane and return its samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Whether channel `channel` carries gamma-encoded color.
    ///
    /// Alpha (the last channel of 2- and 4-channel images) is always linear.
    pub fn is_color_channel(&self, channel: usize) -> bool {
        match self.channels {
            2 | 4 => channel + 1 < self.channels,
            _ => channel < self.channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_dimension() {
        let err = ImagePlane::new(0, 4, 1, vec![], ColorSpace::Linear).unwrap_err();
        assert!(matches!(err, Error::InvalidDimension { width: 0, height: 4, .. }));
    }

    #[test]
    fn test_rejects_short_buffer() {
        let err = ImagePlane::new(2, 2, 3, vec![0.0; 11], ColorSpace::Linear).unwrap_err();
        assert!(matches!(
            err,
            Error::SampleCountMismatch {
                expected: 12,
                actual: 11
            }
        ));
    }

    #[test]
    fn test_filled_and_pixel_access() {
        let plane = ImagePlane::filled(3, 2, &[0.25, 0.5, 0.75], ColorSpace::Encoded).unwrap();
        assert_eq!(plane.pixel_count(), 6);
        assert_eq!(plane.pixel(2, 1), &[0.25, 0.5, 0.75]);
        assert_eq!(plane.channel(1).count(), 6);
        assert!(plane.channel(1).all(|v| v == 0.5));
    }

    #[test]
    fn test_alpha_is_not_color() {
        let rgba = ImagePlane::filled(1, 1, &[0.0; 4], ColorSpace::Encoded).unwrap();
        assert!(rgba.is_color_channel(2));
        assert!(!rgba.is_color_channel(3));

        let la = ImagePlane::filled(1, 1, &[0.0; 2], ColorSpace::Encoded).unwrap();
        assert!(la.is_color_channel(0));
        assert!(!la.is_color_channel(1));
    }
}
