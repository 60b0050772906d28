//! Error types for range analysis and metadata encoding.

use thiserror::Error;

/// Errors that can occur during range analysis or metadata handling.
#[derive(Debug, Error)]
pub enum Error {
    /// Common library error.
    #[error("{0}")]
    Common(#[from] kiln_common::Error),

    /// Mip chain error.
    #[error("{0}")]
    Mip(#[from] kiln_mip::Error),

    /// The requested percentiles collapse to an empty range.
    ///
    /// Reported for diagnostics only; the analyzer recovers by widening the
    /// range to a small epsilon span.
    #[error("degenerate range on channel {channel}: low {lo} >= high {hi}")]
    DegenerateRange { channel: usize, lo: f32, hi: f32 },

    /// Percentile parameters are out of order or out of bounds.
    #[error("invalid percentiles: low {low} high {high} (expected 0 <= low < high <= 100)")]
    InvalidPercentiles { low: f32, high: f32 },

    /// Unknown metadata tag byte.
    #[error("unknown range metadata tag {0:#04x}")]
    UnknownTag(u8),

    /// Unknown transform kind byte.
    #[error("unknown range transform kind {0:#04x}")]
    UnknownTransform(u8),

    /// Declared payload length disagrees with the tag or the buffer.
    #[error("range metadata length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Reserved byte was not zero.
    #[error("range metadata reserved byte is {0:#04x}, expected 0")]
    ReservedNotZero(u8),
}

/// Result type for range operations.
pub type Result<T> = std::result::Result<T, Error>;
