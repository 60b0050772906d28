//! Image decoding into planes and 16-bit PNG intermediates.

use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Luma, LumaA, Rgb, Rgba};
use kiln_mip::{ColorSpace, ImagePlane};
use tracing::debug;

use crate::{Error, Result};

/// Decode `path` into a plane with samples in `[0, 1]`.
///
/// The channel count follows the file: gray, gray+alpha, RGB or RGBA.
pub fn load_plane<P: AsRef<Path>>(path: P, color_space: ColorSpace) -> Result<ImagePlane> {
    let path = path.as_ref();
    let image = image::open(path)?;
    let plane = plane_from_image(&image, color_space)?;
    debug!(
        path = %path.display(),
        width = plane.width(),
        height = plane.height(),
        channels = plane.channels(),
        "loaded image"
    );
    Ok(plane)
}

/// Convert a decoded image into a plane.
pub fn plane_from_image(image: &DynamicImage, color_space: ColorSpace) -> Result<ImagePlane> {
    let (width, height) = (image.width(), image.height());
    let (channels, samples) = match image.color().channel_count() {
        1 => (1, image.to_luma32f().into_raw()),
        2 => (2, image.to_luma_alpha32f().into_raw()),
        3 => (3, image.to_rgb32f().into_raw()),
        _ => (4, image.to_rgba32f().into_raw()),
    };
    Ok(ImagePlane::new(width, height, channels, samples, color_space)?)
}

/// Quantize a plane to 16 bits per channel.
pub fn plane_to_image(plane: &ImagePlane) -> Result<DynamicImage> {
    let (w, h) = (plane.width(), plane.height());
    let data: Vec<u16> = plane.samples().iter().map(|&v| quantize_u16(v)).collect();

    let image = match plane.channels() {
        1 => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, data).map(DynamicImage::ImageLuma16),
        2 => ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, data).map(DynamicImage::ImageLumaA16),
        3 => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, data).map(DynamicImage::ImageRgb16),
        _ => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, data).map(DynamicImage::ImageRgba16),
    };
    image.ok_or_else(|| {
        Error::Mip(kiln_mip::Error::SampleCountMismatch {
            expected: w as usize * h as usize * plane.channels(),
            actual: plane.samples().len(),
        })
    })
}

/// Write a plane as a 16-bit PNG.
pub fn write_png16<P: AsRef<Path>>(plane: &ImagePlane, path: P) -> Result<()> {
    let path = path.as_ref();
    plane_to_image(plane)?.save_with_format(path, ImageFormat::Png)?;
    debug!(path = %path.display(), width = plane.width(), height = plane.height(), "wrote level");
    Ok(())
}

#[inline]
fn quantize_u16(v: f32) -> u16 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png16_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("level.png");
        let samples: Vec<f32> = (0..4 * 3 * 4).map(|i| i as f32 / 47.0).collect();
        let plane = ImagePlane::new(4, 3, 4, samples.clone(), ColorSpace::Linear).unwrap();

        write_png16(&plane, &path).unwrap();
        let loaded = load_plane(&path, ColorSpace::Linear).unwrap();

        assert_eq!((loaded.width(), loaded.height(), loaded.channels()), (4, 3, 4));
        for (a, b) in loaded.samples().iter().zip(&samples) {
            assert!((a - b).abs() <= 1.0 / 65535.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_channel_counts_preserved() {
        let dir = tempfile::tempdir().unwrap();
        for channels in 1..=4 {
            let path = dir.path().join(format!("c{}.png", channels));
            let plane = ImagePlane::filled(2, 2, &vec![0.5; channels], ColorSpace::Encoded).unwrap();
            write_png16(&plane, &path).unwrap();
            assert_eq!(load_plane(&path, ColorSpace::Encoded).unwrap().channels(), channels);
        }
    }

    #[test]
    fn test_out_of_range_samples_saturate() {
        assert_eq!(quantize_u16(-1.0), 0);
        assert_eq!(quantize_u16(2.0), u16::MAX);
        assert_eq!(quantize_u16(f32::NAN), 0);
        assert_eq!(quantize_u16(0.5), 32768);
    }

    #[test]
    fn test_eight_bit_source_scaled_to_unit_range() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(2, 2, Rgb([255u8, 0, 51])));
        let plane = plane_from_image(&image, ColorSpace::Encoded).unwrap();
        assert_eq!(plane.channels(), 3);
        let px = plane.pixel(1, 1);
        assert!((px[0] - 1.0).abs() < 1e-6);
        assert!(px[1].abs() < 1e-6);
        assert!((px[2] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_plane("/nonexistent/kiln.png", ColorSpace::Encoded),
            Err(Error::Image(_))
        ));
    }
}
