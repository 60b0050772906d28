//! Kiln - texture preparation for compressed GPU delivery.
//!
//! This crate ties the Kiln library ecosystem into a conversion pipeline:
//! build a mip chain, analyze and normalize its dynamic range, hand the levels
//! to an external block encoder, then embed the recovery parameters in the
//! resulting KTX2 container.
//!
//! # Crates
//!
//! - [`kiln_common`] - Common utilities (binary reading, alignment, CRC32C)
//! - [`kiln_mip`] - Mip chain generation and Toksvig roughness correction
//! - [`kiln_range`] - Histogram range analysis, normalization, metadata block
//! - [`kiln_ktx`] - KTX2 layout parsing and metadata injection
//!
//! # Example
//!
//! ```no_run
//! use kiln::prelude::*;
//!
//! let config = PipelineConfig::load("kiln.json")?;
//! let pipeline = Pipeline::with_ktx_create(config)?;
//!
//! let report = pipeline.run(&ConversionJob::new("albedo.png", "albedo.ktx2"))?;
//! println!("{} levels, degenerate: {}", report.levels, report.is_degenerate());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod error;

pub mod config;
pub mod encoder;
pub mod image_io;
pub mod pipeline;

// Re-export all sub-crates
pub use kiln_common as common;
pub use kiln_ktx as ktx;
pub use kiln_mip as mip;
pub use kiln_range as range;

pub use error::{Error, PipelineError, Result, Stage};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{EncodeMode, EncoderConfig, MipPolicy, PipelineConfig, ScratchConfig};
    pub use crate::encoder::{BlockEncoder, CancelToken, EncodeRequest, KtxCreateEncoder};
    pub use crate::pipeline::{ConversionJob, JobReport, Pipeline};
    pub use crate::{Error, PipelineError, Stage};
    pub use kiln_ktx::{inject_metadata, Ktx2File};
    pub use kiln_mip::{ChannelHandling, ColorSpace, ImagePlane, Kernel, MipChain, MipSettings};
    pub use kiln_range::{
        analyze_chain, AnalysisSettings, ChannelMode, MetadataBlock, QualityMode, RangeStatistics,
        METADATA_KEY,
    };
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
