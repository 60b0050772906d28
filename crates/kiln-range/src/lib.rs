//! Dynamic-range analysis and normalization for Kiln.
//!
//! - [`histogram`] - percentile analysis over a plane or a whole mip chain
//! - [`normalize`] - pure forward/inverse transforms and chain normalization
//! - [`metadata`] - the compact binary block that carries the inverse transform
//!
//! # Example
//!
//! ```
//! use kiln_mip::{ColorSpace, ImagePlane, MipChain, MipSettings};
//! use kiln_range::{analyze_chain, encode_statistics, normalize_chain, AnalysisSettings};
//!
//! let samples = (0..64).map(|i| 10.0 + i as f32 * 3.0).collect();
//! let plane = ImagePlane::new(8, 8, 1, samples, ColorSpace::Linear)?;
//! let mut chain = MipChain::build(plane, &MipSettings::default())?;
//!
//! let stats = analyze_chain(&chain, &AnalysisSettings::default())?;
//! let inverse = normalize_chain(&mut chain, &stats)?;
//! let block = encode_statistics(&stats);
//!
//! assert_eq!(inverse.len(), 1);
//! assert_eq!(block[0], 0x01);
//! # Ok::<(), kiln_range::Error>(())
//! ```

mod error;
mod stats;

pub mod histogram;
pub mod metadata;
pub mod normalize;

pub use error::{Error, Result};
pub use histogram::{analyze_chain, analyze_plane, Histogram};
pub use metadata::{encode_statistics, MetadataBlock, MetadataTag, TransformKind, METADATA_KEY};
pub use normalize::{forward, inverse, normalize_chain, normalize_plane, soft_knee};
pub use stats::{
    AnalysisSettings, ChannelMode, ChannelRange, InverseTransform, QualityMode, RangeStatistics,
    RangeTransform,
};
