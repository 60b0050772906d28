//! External block encoder invocation.
//!
//! Block compression is delegated to a command-line tool behind the
//! [`BlockEncoder`] trait. [`KtxCreateEncoder`] drives `ktx create` from
//! KTX-Software; tests substitute their own implementation.

use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::EncodeMode;
use crate::{Error, Result};

/// Default executable name looked up on `PATH`.
pub const DEFAULT_PROGRAM: &str = "ktx";

/// Shared flag used to abort a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Tool-independent encoding options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    /// Vulkan format name.
    pub format: String,
    pub mode: EncodeMode,
    pub quality: Option<u32>,
    /// Zstandard level when supercompressing.
    pub zstd_level: Option<u32>,
    /// Let the tool build the mip chain from a single input.
    pub generate_mipmap: bool,
    /// Number of levels supplied as separate inputs.
    pub levels: Option<u32>,
    pub threads: Option<usize>,
    pub extra_args: Vec<String>,
}

/// One encoder invocation.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    /// Input images in level order.
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
    pub settings: EncodeSettings,
    pub cancel: CancelToken,
}

/// Result of a successful invocation.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Captured diagnostic output, possibly empty.
    pub stderr: String,
    pub output: PathBuf,
}

/// Something that turns level images into a compressed container.
pub trait BlockEncoder: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Encode `request.inputs` into `request.output`.
    ///
    /// Must fail with [`Error::Cancelled`] if the request's token is set while
    /// running, leaving no file at the output path.
    fn encode(&self, request: &EncodeRequest) -> Result<EncodeOutcome>;
}

/// Encoder backed by `ktx create`.
#[derive(Debug, Clone)]
pub struct KtxCreateEncoder {
    program: PathBuf,
    poll_interval: Duration,
}

impl KtxCreateEncoder {
    /// Use the executable at `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Use `tool_path` if given, otherwise find `ktx` on `PATH`.
    pub fn locate(tool_path: Option<&Path>) -> Result<Self> {
        let program = match tool_path {
            Some(path) => which::which(path).map_err(|source| Error::ToolNotFound {
                program: path.display().to_string(),
                source,
            })?,
            None => which::which(DEFAULT_PROGRAM).map_err(|source| Error::ToolNotFound {
                program: DEFAULT_PROGRAM.to_string(),
                source,
            })?,
        };
        debug!(program = %program.display(), "located encoder");
        Ok(Self::new(program))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command-line arguments for `request`, inputs strictly before the output.
    pub fn arguments(request: &EncodeRequest) -> Vec<OsString> {
        let s = &request.settings;
        let mut args: Vec<OsString> = vec!["create".into(), "--format".into(), s.format.clone().into()];

        if let Some(mode) = s.mode.as_arg() {
            args.push("--encode".into());
            args.push(mode.into());
        }
        let quality_flag = match s.mode {
            EncodeMode::Uastc => Some("--uastc-quality"),
            EncodeMode::BasisLz => Some("--qlevel"),
            EncodeMode::Raw => None,
        };
        if let (Some(flag), Some(q)) = (quality_flag, s.quality) {
            args.push(flag.into());
            args.push(q.to_string().into());
        }
        if let Some(level) = s.zstd_level {
            args.push("--zstd".into());
            args.push(level.to_string().into());
        }
        if s.generate_mipmap {
            args.push("--generate-mipmap".into());
        } else if let Some(levels) = s.levels.filter(|&n| n > 1) {
            args.push("--levels".into());
            args.push(levels.to_string().into());
        }
        if let Some(threads) = s.threads {
            args.push("--threads".into());
            args.push(threads.to_string().into());
        }
        args.extend(s.extra_args.iter().map(OsString::from));

        args.extend(request.inputs.iter().map(|p| p.as_os_str().to_owned()));
        args.push(request.output.as_os_str().to_owned());
        args
    }
}

impl BlockEncoder for KtxCreateEncoder {
    fn name(&self) -> &str {
        "ktx create"
    }

    fn encode(&self, request: &EncodeRequest) -> Result<EncodeOutcome> {
        request.cancel.check()?;
        let args = Self::arguments(request);
        info!(
            program = %self.program.display(),
            inputs = request.inputs.len(),
            output = %request.output.display(),
            "running encoder"
        );
        debug!(?args, "encoder arguments");

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr concurrently so a chatty tool cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                if let Err(e) = pipe.read_to_string(&mut text) {
                    debug!(error = %e, captured = text.len(), "encoder stderr read failed");
                }
                text
            })
        });

        let status = loop {
            if request.cancel.is_cancelled() {
                warn!(output = %request.output.display(), "cancelling encoder");
                let _ = child.kill();
                let _ = child.wait();
                remove_partial(&request.output);
                return Err(Error::Cancelled);
            }
            match child.try_wait()? {
                Some(status) => break status,
                None => thread::sleep(self.poll_interval),
            }
        };

        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let duration = start.elapsed();

        if !status.success() {
            remove_partial(&request.output);
            return Err(Error::ExternalToolFailure {
                program: self.program.display().to_string(),
                exit_code: status.code(),
                stderr,
            });
        }
        if !request.output.is_file() {
            return Err(Error::MissingOutput(request.output.clone()));
        }

        debug!(?duration, "encoder finished");
        Ok(EncodeOutcome {
            exit_code: status.code(),
            duration,
            stderr,
            output: request.output.clone(),
        })
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove partial output");
        }
    }
}
