//! Error types for mip chain generation.

use thiserror::Error;

/// Errors that can occur while building or correcting a mip chain.
#[derive(Debug, Error)]
pub enum Error {
    /// Source image has an unusable size.
    #[error("invalid dimension {width}x{height}: {reason}")]
    InvalidDimension {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// Sample buffer does not match the declared geometry.
    #[error("sample buffer size mismatch: expected {expected}, got {actual}")]
    SampleCountMismatch { expected: usize, actual: usize },

    /// Channel count outside the supported range for the requested handling.
    #[error("unsupported channel count {actual} (expected {expected})")]
    UnsupportedChannels { expected: &'static str, actual: usize },

    /// Two chains that must line up level by level do not.
    #[error("mip chain mismatch at level {level}: expected {expected}, got {actual}")]
    ChainMismatch {
        level: usize,
        expected: String,
        actual: String,
    },
}

/// Result type for mip operations.
pub type Result<T> = std::result::Result<T, Error>;
