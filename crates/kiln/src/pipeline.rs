//! Conversion job orchestration.
//!
//! A job runs its stages strictly in order, each consuming the complete
//! output of the previous one:
//!
//! ```text
//! load -> build -> correct -> analyze -> normalize -> scratch PNGs
//!      -> encode (external tool) -> inject range metadata -> finalize
//! ```
//!
//! With [`MipPolicy::Automatic`] the build, correct and normalize stages are
//! skipped, the encoder generates mips itself, and no metadata is injected.
//!
//! Intermediates live in a scratch directory that is removed on success and
//! kept on failure. The output path is only written by the final rename.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use kiln_ktx::{inject_metadata, InjectionReport};
use kiln_mip::{apply_toksvig, ChannelHandling, ColorSpace, MipChain, MipSettings};
use kiln_range::{analyze_chain, normalize_chain, MetadataBlock, RangeStatistics, METADATA_KEY};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::config::{MipPolicy, PipelineConfig, ScratchConfig};
use crate::encoder::{BlockEncoder, CancelToken, EncodeOutcome, EncodeRequest, KtxCreateEncoder};
use crate::error::{PipelineError, Stage, StageContext};
use crate::image_io::{load_plane, write_png16};

type JobResult<T> = std::result::Result<T, PipelineError>;

const ENCODED_NAME: &str = "encoded.ktx2";

/// One texture to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Tangent-space normal map driving roughness correction.
    pub normal_map: Option<PathBuf>,
}

impl ConversionJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            normal_map: None,
        }
    }

    pub fn with_normal_map(mut self, path: impl Into<PathBuf>) -> Self {
        self.normal_map = Some(path.into());
        self
    }
}

/// What a successful job produced.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub output: PathBuf,
    pub policy: MipPolicy,
    /// Number of level images handed to the encoder.
    pub levels: usize,
    /// Range analysis, absent under [`MipPolicy::Automatic`].
    pub statistics: Option<RangeStatistics>,
    pub metadata: Option<MetadataBlock>,
    pub injection: Option<InjectionReport>,
    pub encode: EncodeOutcome,
    /// Scratch directory, when kept by configuration.
    pub scratch: Option<PathBuf>,
}

impl JobReport {
    /// Whether a range had to be widened.
    pub fn is_degenerate(&self) -> bool {
        self.statistics
            .as_ref()
            .is_some_and(RangeStatistics::is_degenerate)
    }
}

/// Runs conversion jobs with one configuration and one encoder.
pub struct Pipeline {
    config: PipelineConfig,
    encoder: Box<dyn BlockEncoder>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, encoder: Box<dyn BlockEncoder>) -> Self {
        Self { config, encoder }
    }

    /// Pipeline driving `ktx create`, located per the encoder configuration.
    pub fn with_ktx_create(config: PipelineConfig) -> crate::Result<Self> {
        config.validate()?;
        let encoder = KtxCreateEncoder::locate(config.encoder.tool_path.as_deref())?;
        Ok(Self::new(config, Box::new(encoder)))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, job: &ConversionJob) -> JobResult<JobReport> {
        self.run_with_cancel(job, &CancelToken::new())
    }

    /// Run `job`, aborting between stages (and inside the encoder) once
    /// `cancel` is set.
    pub fn run_with_cancel(&self, job: &ConversionJob, cancel: &CancelToken) -> JobResult<JobReport> {
        info!(input = %job.input.display(), output = %job.output.display(), policy = ?self.config.policy, "starting job");

        let scratch_root = self
            .config
            .scratch
            .root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let scratch = create_scratch(&self.config.scratch).stage(Stage::Scratch, &scratch_root)?;
        debug!(scratch = %scratch.path().display(), "created scratch directory");

        match self.execute(job, scratch.path(), cancel) {
            Ok(mut report) => {
                if self.config.scratch.keep {
                    let kept = scratch.keep();
                    info!(scratch = %kept.display(), "kept scratch directory");
                    report.scratch = Some(kept);
                } else if let Err(e) = scratch.close() {
                    warn!(error = %e, "could not remove scratch directory");
                }
                info!(output = %report.output.display(), levels = report.levels, "job finished");
                Ok(report)
            }
            Err(err) => {
                let kept = scratch.keep();
                warn!(
                    stage = %err.stage,
                    path = %err.path.display(),
                    scratch = %kept.display(),
                    "job failed, scratch retained"
                );
                Err(err)
            }
        }
    }

    fn execute(&self, job: &ConversionJob, scratch: &Path, cancel: &CancelToken) -> JobResult<JobReport> {
        let config = &self.config;
        let input = job.input.as_path();

        cancel.check().stage(Stage::Load, input)?;
        let source = load_plane(input, config.input_color_space).stage(Stage::Load, input)?;

        let encoded = scratch.join(ENCODED_NAME);

        if config.policy == MipPolicy::Automatic {
            let level_path = scratch.join("source.png");
            write_png16(&source, &level_path).stage(Stage::Scratch, &level_path)?;
            let encode = self.encode(vec![level_path], &encoded, None, cancel)?;
            finalize(&encoded, &job.output).stage(Stage::Finalize, &job.output)?;
            return Ok(JobReport {
                output: job.output.clone(),
                policy: config.policy,
                levels: 1,
                statistics: None,
                metadata: None,
                injection: None,
                encode,
                scratch: None,
            });
        }

        let mut chain = MipChain::build(source, &config.mip).stage(Stage::Build, input)?;
        info!(levels = chain.len(), "built mip chain");

        if let Some(toksvig) = &config.toksvig {
            cancel.check().stage(Stage::Correct, input)?;
            match &job.normal_map {
                Some(normal_path) => {
                    let normals = self.normal_chain(normal_path)?;
                    apply_toksvig(&mut chain, &normals, toksvig).stage(Stage::Correct, normal_path)?;
                    debug!(normals = %normal_path.display(), "applied roughness correction");
                }
                None => warn!("roughness correction configured without a normal map, skipped"),
            }
        }

        cancel.check().stage(Stage::Analyze, input)?;
        let stats = analyze_chain(&chain, &config.analysis).stage(Stage::Analyze, input)?;
        normalize_chain(&mut chain, &stats).stage(Stage::Normalize, input)?;
        if stats.is_degenerate() {
            warn!(input = %input.display(), "range is degenerate, continuing with widened range");
        }

        let mut inputs = Vec::with_capacity(chain.len());
        for level in chain.levels() {
            let path = scratch.join(format!("level_{:02}.png", level.index()));
            write_png16(level.plane(), &path).stage(Stage::Scratch, &path)?;
            inputs.push(path);
        }
        let levels = inputs.len();

        let encode = self.encode(inputs, &encoded, Some(levels as u32), cancel)?;

        let metadata = MetadataBlock::from_statistics(&stats);
        cancel.check().stage(Stage::Inject, &encoded)?;
        let injection =
            inject_metadata(&encoded, METADATA_KEY, &metadata.encode()).stage(Stage::Inject, &encoded)?;
        debug!(shift = injection.shift, alignment = injection.alignment, "injected range metadata");

        finalize(&encoded, &job.output).stage(Stage::Finalize, &job.output)?;

        Ok(JobReport {
            output: job.output.clone(),
            policy: config.policy,
            levels,
            statistics: Some(stats),
            metadata: Some(metadata),
            injection: Some(injection),
            encode,
            scratch: None,
        })
    }

    fn normal_chain(&self, path: &Path) -> JobResult<MipChain> {
        let plane = load_plane(path, ColorSpace::Linear).stage(Stage::Load, path)?;
        let settings = MipSettings {
            handling: ChannelHandling::NormalVector,
            ..self.config.mip
        };
        MipChain::build(plane, &settings).stage(Stage::Correct, path)
    }

    fn encode(
        &self,
        inputs: Vec<PathBuf>,
        output: &Path,
        levels: Option<u32>,
        cancel: &CancelToken,
    ) -> JobResult<EncodeOutcome> {
        let request = EncodeRequest {
            inputs,
            output: output.to_path_buf(),
            settings: self.config.encode_settings(levels),
            cancel: cancel.clone(),
        };
        let outcome = self.encoder.encode(&request).stage(Stage::Encode, output)?;
        info!(
            encoder = self.encoder.name(),
            duration_ms = outcome.duration.as_millis() as u64,
            "encoded container"
        );
        Ok(outcome)
    }
}

fn create_scratch(config: &ScratchConfig) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("kiln-");
    match &config.root {
        Some(root) => {
            fs::create_dir_all(root)?;
            builder.tempdir_in(root)
        }
        None => builder.tempdir(),
    }
}

/// Copy `encoded` next to `output` and rename it into place.
fn finalize(encoded: &Path, output: &Path) -> io::Result<()> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(encoded)?, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(output).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use image::{Rgb, RgbImage};
    use kiln_ktx::{Ktx2Builder, Ktx2File, VkFormat};
    use kiln_mip::ToksvigSettings;
    use kiln_range::metadata::quantization_half_step;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Writes a valid container with one RGBA8 level per input.
    #[derive(Default)]
    struct FakeEncoder {
        requests: Mutex<Vec<EncodeRequest>>,
        fail: bool,
    }

    impl FakeEncoder {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    impl BlockEncoder for Arc<FakeEncoder> {
        fn name(&self) -> &str {
            "fake"
        }

        fn encode(&self, request: &EncodeRequest) -> Result<EncodeOutcome> {
            self.requests.lock().unwrap().push(request.clone());
            request.cancel.check()?;
            if self.fail {
                return Err(Error::ExternalToolFailure {
                    program: "fake".into(),
                    exit_code: Some(3),
                    stderr: "fake failure".into(),
                });
            }

            let (w, h) = image::image_dimensions(&request.inputs[0])?;
            let mut builder = Ktx2Builder::new(VkFormat::R8G8B8A8_UNORM, w, h, 4)
                .key_value("KTXwriter", b"fake encoder\0".to_vec());
            for (i, input) in request.inputs.iter().enumerate() {
                let (lw, lh) = image::image_dimensions(input)?;
                builder = builder.level(vec![i as u8; (lw * lh * 4) as usize]);
            }
            fs::write(&request.output, builder.build()?)?;

            Ok(EncodeOutcome {
                exit_code: Some(0),
                duration: Duration::from_millis(1),
                stderr: String::new(),
                output: request.output.clone(),
            })
        }
    }

    fn fake() -> Arc<FakeEncoder> {
        Arc::new(FakeEncoder::default())
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = PipelineConfig::default();
            config.scratch.root = Some(dir.path().join("scratch"));
            Self { dir, config }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn write_gradient(&self, name: &str, width: u32, height: u32) -> PathBuf {
            let path = self.path(name);
            RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x * 30 + 10) as u8, (y * 40 + 20) as u8, ((x + y) * 10) as u8])
            })
            .save(&path)
            .unwrap();
            path
        }

        fn scratch_entries(&self) -> Vec<PathBuf> {
            match fs::read_dir(self.path("scratch")) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }
    }

    #[test]
    fn test_manual_job_injects_range_metadata() {
        let fx = Fixture::new();
        let input = fx.write_gradient("albedo.png", 8, 4);
        let output = fx.path("out/albedo.ktx2");
        let encoder = fake();

        let pipeline = Pipeline::new(fx.config.clone(), Box::new(encoder.clone()));
        let report = pipeline.run(&ConversionJob::new(&input, &output)).unwrap();

        assert_eq!(report.levels, 4);
        assert!(report.injection.is_some());
        assert!(report.scratch.is_none());
        assert!(fx.scratch_entries().is_empty());

        let requests = encoder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].inputs.len(), 4);
        assert_eq!(requests[0].settings.levels, Some(4));
        assert!(!requests[0].settings.generate_mipmap);

        let file = Ktx2File::open(&output).unwrap();
        let bytes = file.get(METADATA_KEY).unwrap().unwrap();
        let block = MetadataBlock::decode(&bytes).unwrap();
        assert_eq!(&block, report.metadata.as_ref().unwrap());
        assert!(file.get("KTXwriter").unwrap().is_some());

        let stats = report.statistics.unwrap();
        for (stored, exact) in block.inverse_transforms().iter().zip(stats.inverse()) {
            assert!((stored.scale_inv - exact.scale_inv).abs() <= quantization_half_step(exact.scale_inv));
            assert!((stored.offset_inv - exact.offset_inv).abs() <= quantization_half_step(exact.offset_inv));
        }
    }

    #[test]
    fn test_automatic_policy_skips_mips_and_metadata() {
        let mut fx = Fixture::new();
        fx.config.policy = MipPolicy::Automatic;
        let input = fx.write_gradient("albedo.png", 8, 4);
        let output = fx.path("albedo.ktx2");
        let encoder = fake();

        let report = Pipeline::new(fx.config.clone(), Box::new(encoder.clone()))
            .run(&ConversionJob::new(&input, &output))
            .unwrap();

        assert_eq!(report.levels, 1);
        assert!(report.statistics.is_none());
        assert!(report.injection.is_none());

        let requests = encoder.requests.lock().unwrap();
        assert_eq!(requests[0].inputs.len(), 1);
        assert!(requests[0].settings.generate_mipmap);

        let file = Ktx2File::open(&output).unwrap();
        assert!(file.get(METADATA_KEY).unwrap().is_none());
    }

    #[test]
    fn test_encoder_failure_keeps_scratch_and_no_output() {
        let fx = Fixture::new();
        let input = fx.write_gradient("albedo.png", 4, 4);
        let output = fx.path("albedo.ktx2");

        let err = Pipeline::new(fx.config.clone(), Box::new(Arc::new(FakeEncoder::failing())))
            .run(&ConversionJob::new(&input, &output))
            .unwrap_err();

        assert_eq!(err.stage, Stage::Encode);
        assert!(matches!(err.source, Error::ExternalToolFailure { exit_code: Some(3), .. }));
        assert!(!output.exists());

        let scratch = fx.scratch_entries();
        assert_eq!(scratch.len(), 1);
        assert!(scratch[0].join("level_00.png").is_file());
        assert!(scratch[0].join("level_02.png").is_file());
    }

    #[test]
    fn test_keep_scratch_on_success() {
        let mut fx = Fixture::new();
        fx.config.scratch.keep = true;
        let input = fx.write_gradient("albedo.png", 2, 2);
        let report = Pipeline::new(fx.config.clone(), Box::new(fake()))
            .run(&ConversionJob::new(&input, fx.path("a.ktx2")))
            .unwrap();
        let kept = report.scratch.unwrap();
        assert!(kept.join(ENCODED_NAME).is_file());
    }

    #[test]
    fn test_missing_input_reports_load_stage() {
        let fx = Fixture::new();
        let input = fx.path("missing.png");
        let err = Pipeline::new(fx.config.clone(), Box::new(fake()))
            .run(&ConversionJob::new(&input, fx.path("a.ktx2")))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Load);
        assert_eq!(err.path, input);
    }

    #[test]
    fn test_cancelled_job() {
        let fx = Fixture::new();
        let input = fx.write_gradient("albedo.png", 4, 4);
        let output = fx.path("a.ktx2");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = Pipeline::new(fx.config.clone(), Box::new(fake()))
            .run_with_cancel(&ConversionJob::new(&input, &output), &cancel)
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!output.exists());
    }

    #[test]
    fn test_flat_image_is_degenerate_but_succeeds() {
        let fx = Fixture::new();
        let input = fx.path("flat.png");
        RgbImage::from_pixel(4, 4, Rgb([128, 128, 128])).save(&input).unwrap();

        let report = Pipeline::new(fx.config.clone(), Box::new(fake()))
            .run(&ConversionJob::new(&input, fx.path("flat.ktx2")))
            .unwrap();
        assert!(report.is_degenerate());
        assert!(report.metadata.unwrap().degenerate);
    }

    #[test]
    fn test_roughness_correction_with_normal_map() {
        let mut fx = Fixture::new();
        fx.config.toksvig = Some(ToksvigSettings::default());
        let roughness = fx.write_gradient("rough.png", 8, 8);
        let normals = fx.write_gradient("normal.png", 8, 8);
        let report = Pipeline::new(fx.config.clone(), Box::new(fake()))
            .run(&ConversionJob::new(&roughness, fx.path("rough.ktx2")).with_normal_map(&normals))
            .unwrap();
        assert_eq!(report.levels, 4);

        let small_normals = fx.write_gradient("small.png", 4, 4);
        let err = Pipeline::new(fx.config.clone(), Box::new(fake()))
            .run(&ConversionJob::new(&roughness, fx.path("r2.ktx2")).with_normal_map(&small_normals))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Correct);
        assert_eq!(err.path, small_normals);
    }
}
