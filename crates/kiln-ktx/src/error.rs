//! Error types for KTX2 handling.

use thiserror::Error;

/// Errors that can occur when working with KTX2 containers.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] kiln_common::Error),

    /// Header, index table or section layout is invalid.
    #[error("malformed container: {what} (expected {expected}, got {actual})")]
    MalformedContainer {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// Required alignment cannot be satisfied.
    #[error("alignment error: {what} (alignment {alignment}, value {value})")]
    AlignmentError {
        what: &'static str,
        alignment: u64,
        value: u64,
    },

    /// Key is empty or contains a NUL byte.
    #[error("invalid key/value key {0:?}")]
    InvalidKey(String),

    /// Level bytes changed during a rewrite.
    #[error("level {level} data changed during rewrite: crc {before:#010x} -> {after:#010x}")]
    LevelDataChanged { level: usize, before: u32, after: u32 },
}

impl Error {
    pub(crate) fn malformed(
        what: &'static str,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Error::MalformedContainer {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type for KTX2 operations.
pub type Result<T> = std::result::Result<T, Error>;
