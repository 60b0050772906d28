//! Resampling kernels.
//!
//! Each kernel is a continuous weight function of the distance (in
//! destination-pixel units) between a source sample and the output center.
//! Weights are normalized by the resampler, so kernels need not integrate to 1.

use std::f32::consts::PI;
use std::fmt;

/// Kaiser window half-width.
const KAISER_WIDTH: f32 = 3.0;
/// Kaiser window shape parameter.
const KAISER_ALPHA: f32 = 4.0;

/// A named resampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Kernel {
    /// Unweighted average over the exact footprint.
    #[default]
    Box,
    /// Tent filter.
    Bilinear,
    /// Catmull-Rom cubic (B = 0, C = 0.5).
    Bicubic,
    /// Three-lobe windowed sinc.
    Lanczos3,
    /// Mitchell-Netravali cubic (B = C = 1/3).
    Mitchell,
    /// Kaiser-windowed sinc.
    Kaiser,
}

impl Kernel {
    /// Every kernel, in declaration order.
    pub const ALL: [Kernel; 6] = [
        Kernel::Box,
        Kernel::Bilinear,
        Kernel::Bicubic,
        Kernel::Lanczos3,
        Kernel::Mitchell,
        Kernel::Kaiser,
    ];

    /// Support radius in destination-pixel units.
    pub fn support(self) -> f32 {
        match self {
            Kernel::Box => 0.5,
            Kernel::Bilinear => 1.0,
            Kernel::Bicubic | Kernel::Mitchell => 2.0,
            Kernel::Lanczos3 => 3.0,
            Kernel::Kaiser => KAISER_WIDTH,
        }
    }

    /// Weight at distance `x`.
    pub fn weight(self, x: f32) -> f32 {
        match self {
            // Half-open so a sample on a shared edge is counted once.
            Kernel::Box => {
                if (-0.5..0.5).contains(&x) {
                    1.0
                } else {
                    0.0
                }
            }
            Kernel::Bilinear => (1.0 - x.abs()).max(0.0),
            Kernel::Bicubic => mitchell_netravali(x, 0.0, 0.5),
            Kernel::Mitchell => mitchell_netravali(x, 1.0 / 3.0, 1.0 / 3.0),
            Kernel::Lanczos3 => {
                if x.abs() < 3.0 {
                    sinc(x) * sinc(x / 3.0)
                } else {
                    0.0
                }
            }
            Kernel::Kaiser => {
                let t = x / KAISER_WIDTH;
                if t.abs() < 1.0 {
                    sinc(x) * bessel_i0(KAISER_ALPHA * (1.0 - t * t).sqrt())
                        / bessel_i0(KAISER_ALPHA)
                } else {
                    0.0
                }
            }
        }
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Kernel::Box => "box",
            Kernel::Bilinear => "bilinear",
            Kernel::Bicubic => "bicubic",
            Kernel::Lanczos3 => "lanczos3",
            Kernel::Mitchell => "mitchell",
            Kernel::Kaiser => "kaiser",
        }
    }

    /// Parse a kernel name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "box" => Some(Kernel::Box),
            "bilinear" | "triangle" | "tent" => Some(Kernel::Bilinear),
            "bicubic" | "catmull-rom" | "catmullrom" => Some(Kernel::Bicubic),
            "lanczos3" | "lanczos" => Some(Kernel::Lanczos3),
            "mitchell" => Some(Kernel::Mitchell),
            "kaiser" => Some(Kernel::Kaiser),
            _ => None,
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
fn sinc(x: f32) -> f32 {
    if x.abs() < 1e-6 {
        1.0
    } else {
        let px = PI * x;
        px.sin() / px
    }
}

fn mitchell_netravali(x: f32, b: f32, c: f32) -> f32 {
    let x = x.abs();
    let x2 = x * x;
    let x3 = x2 * x;

    if x < 1.0 {
        ((12.0 - 9.0 * b - 6.0 * c) * x3 + (-18.0 + 12.0 * b + 6.0 * c) * x2 + (6.0 - 2.0 * b))
            / 6.0
    } else if x < 2.0 {
        ((-b - 6.0 * c) * x3 + (6.0 * b + 30.0 * c) * x2 + (-12.0 * b - 48.0 * c) * x
            + (8.0 * b + 24.0 * c))
            / 6.0
    } else {
        0.0
    }
}

/// Zeroth-order modified Bessel function of the first kind (power series).
fn bessel_i0(x: f32) -> f32 {
    let half = x as f64 / 2.0;
    let mut sum = 1.0f64;
    let mut term = 1.0f64;
    let mut k = 1.0f64;

    while term > sum * 1e-12 {
        term *= (half / k) * (half / k);
        sum += term;
        k += 1.0;
    }

    sum as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_is_one() {
        // Mitchell blurs by construction: its peak is (6 - 2B) / 6.
        assert!((Kernel::Mitchell.weight(0.0) - 8.0 / 9.0).abs() < 1e-5);

        for kernel in Kernel::ALL.into_iter().filter(|k| *k != Kernel::Mitchell) {
            assert!(
                (kernel.weight(0.0) - 1.0).abs() < 1e-5,
                "{} peak = {}",
                kernel,
                kernel.weight(0.0)
            );
        }
    }

    #[test]
    fn test_zero_outside_support() {
        for kernel in Kernel::ALL {
            let outside = kernel.support() + 0.01;
            assert_eq!(kernel.weight(outside), 0.0, "{}", kernel);
            assert_eq!(kernel.weight(-outside), 0.0, "{}", kernel);
        }
    }

    #[test]
    fn test_symmetric() {
        for kernel in [Kernel::Bilinear, Kernel::Bicubic, Kernel::Lanczos3, Kernel::Mitchell, Kernel::Kaiser] {
            for x in [0.3f32, 0.9, 1.4, 2.2] {
                assert!((kernel.weight(x) - kernel.weight(-x)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_catmull_rom_interpolates() {
        assert!(Kernel::Bicubic.weight(1.0).abs() < 1e-6);
        assert!(Kernel::Lanczos3.weight(1.0).abs() < 1e-6);
        assert!(Kernel::Lanczos3.weight(2.0).abs() < 1e-6);
    }

    #[test]
    fn test_bessel_i0_known_values() {
        assert!((bessel_i0(0.0) - 1.0).abs() < 1e-6);
        // I0(4) = 11.3019219521
        assert!((bessel_i0(4.0) - 11.301_922).abs() < 1e-3);
    }

    #[test]
    fn test_name_roundtrip() {
        for kernel in Kernel::ALL {
            assert_eq!(Kernel::from_name(kernel.name()), Some(kernel));
        }
        assert_eq!(Kernel::from_name("Catmull-Rom"), Some(Kernel::Bicubic));
        assert_eq!(Kernel::from_name("nearest"), None);
    }
}
