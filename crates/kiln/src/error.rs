//! Error types for the conversion pipeline.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by pipeline stages.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mip chain error.
    #[error("mip: {0}")]
    Mip(#[from] kiln_mip::Error),

    /// Range analysis or metadata error.
    #[error("range: {0}")]
    Range(#[from] kiln_range::Error),

    /// Container error.
    #[error("ktx2: {0}")]
    Ktx(#[from] kiln_ktx::Error),

    /// Image decoding or encoding error.
    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// External encoder executable could not be located.
    #[error("encoder executable {program:?} not found: {source}")]
    ToolNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    /// External encoder exited unsuccessfully.
    #[error("{program} exited with {}: {}", exit_description(.exit_code), first_line(.stderr))]
    ExternalToolFailure {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// External encoder reported success without producing output.
    #[error("encoder produced no output at {0}")]
    MissingOutput(PathBuf),

    /// The job was cancelled.
    #[error("cancelled")]
    Cancelled,
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no diagnostic output")
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Build,
    Correct,
    Analyze,
    Normalize,
    Scratch,
    Encode,
    Inject,
    Finalize,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Build => "build",
            Stage::Correct => "correct",
            Stage::Analyze => "analyze",
            Stage::Normalize => "normalize",
            Stage::Scratch => "scratch",
            Stage::Encode => "encode",
            Stage::Inject => "inject",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage failure together with the path it concerns.
#[derive(Debug, Error)]
#[error("{stage} failed for {}: {source}", .path.display())]
pub struct PipelineError {
    pub stage: Stage,
    pub path: PathBuf,
    #[source]
    pub source: Error,
}

impl PipelineError {
    pub fn new(stage: Stage, path: impl Into<PathBuf>, source: impl Into<Error>) -> Self {
        Self {
            stage,
            path: path.into(),
            source: source.into(),
        }
    }

    /// Whether the failure came from cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, Error::Cancelled)
    }
}

/// Attach stage and path to a fallible result.
pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage, path: impl Into<PathBuf>) -> std::result::Result<T, PipelineError>;
}

impl<T, E: Into<Error>> StageContext<T> for std::result::Result<T, E> {
    fn stage(self, stage: Stage, path: impl Into<PathBuf>) -> std::result::Result<T, PipelineError> {
        self.map_err(|e| PipelineError::new(stage, path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failure_message_uses_first_stderr_line() {
        let err = Error::ExternalToolFailure {
            program: "ktx".into(),
            exit_code: Some(2),
            stderr: "\n  error: bad format\nmore detail\n".into(),
        };
        assert_eq!(err.to_string(), "ktx exited with code 2: error: bad format");
    }

    #[test]
    fn test_pipeline_error_names_stage_and_path() {
        let err = PipelineError::new(Stage::Inject, "/tmp/a.ktx2", Error::Cancelled);
        assert_eq!(err.to_string(), "inject failed for /tmp/a.ktx2: cancelled");
        assert!(err.is_cancelled());
    }
}
