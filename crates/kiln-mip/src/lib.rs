//! Mip chain generation for Kiln.
//!
//! Builds a full resolution pyramid from a floating-point source image:
//!
//! - gamma-correct filtering (encoded samples are resampled in linear light)
//! - six separable [`Kernel`]s evaluated over the exact fractional footprint
//! - unit-length renormalization for normal maps, box + snap for binary masks
//! - optional [`toksvig`] roughness correction driven by the filtered normals
//!
//! # Example
//!
//! ```
//! use kiln_mip::{ColorSpace, ImagePlane, Kernel, MipChain, MipSettings};
//!
//! let source = ImagePlane::filled(3, 5, &[0.5, 0.25, 1.0], ColorSpace::Encoded)?;
//! let settings = MipSettings { kernel: Kernel::Lanczos3, ..MipSettings::default() };
//! let chain = MipChain::build(source, &settings)?;
//!
//! assert_eq!(chain.dimensions(), vec![(3, 5), (1, 2), (1, 1)]);
//! # Ok::<(), kiln_mip::Error>(())
//! ```

mod builder;
mod error;
mod image;
mod kernel;
mod resample;

pub mod toksvig;

pub use builder::{
    decode_gamma, encode_gamma, level_dimensions, ChannelHandling, MipChain, MipLevel,
    MipSettings, DEFAULT_GAMMA,
};
pub use error::{Error, Result};
pub use image::{ColorSpace, ImagePlane};
pub use kernel::Kernel;
pub use toksvig::{apply_toksvig, ToksvigSettings};
