//! Kiln CLI - Command-line tool for preparing GPU-ready KTX2 textures.
//!
//! This is the main entry point for the Kiln command-line application.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use kiln::encoder::DEFAULT_PROGRAM;
use kiln::prelude::*;
use kiln::range::histogram::analyze_plane;

/// Kiln - mip generation, range normalization and KTX2 metadata injection
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pipeline configuration (JSON)
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an image into a KTX2 container
    Convert {
        /// Source image
        input: PathBuf,

        /// Output KTX2 file
        output: PathBuf,

        /// Normal map used for roughness correction
        #[arg(long)]
        normal_map: Option<PathBuf>,

        /// Who generates mip levels
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,

        /// Resampling kernel (box, bilinear, bicubic, lanczos3, mitchell, kaiser)
        #[arg(long, value_parser = parse_kernel)]
        kernel: Option<Kernel>,

        /// Vulkan format name passed to the encoder
        #[arg(long)]
        format: Option<String>,

        /// Block encoding
        #[arg(long, value_enum)]
        encode: Option<EncodeArg>,

        /// Encoder quality (uastc 0-4, basis-lz 1-255)
        #[arg(long)]
        quality: Option<u32>,

        /// Zstandard supercompression level
        #[arg(long)]
        zstd: Option<u32>,

        /// Encoder thread count
        #[arg(long)]
        threads: Option<usize>,

        /// Path to the `ktx` executable
        #[arg(long, env = "KILN_KTX_TOOL")]
        tool: Option<PathBuf>,

        /// Keep scratch files after success
        #[arg(long)]
        keep_scratch: bool,
    },

    /// Print range statistics for an image
    Analyze {
        /// Source image
        input: PathBuf,

        /// Analyze level 0 only without building the chain
        #[arg(long)]
        base_only: bool,

        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the layout and key/value data of a KTX2 file
    Inspect {
        /// KTX2 file
        input: PathBuf,
    },

    /// Insert or replace a key/value entry in a KTX2 file
    Inject {
        /// KTX2 file, rewritten in place
        input: PathBuf,

        /// Entry key
        #[arg(short, long, default_value = METADATA_KEY)]
        key: String,

        /// File whose bytes become the value
        #[arg(long, conflicts_with = "text")]
        value_file: Option<PathBuf>,

        /// Text value, stored with a trailing NUL
        #[arg(long)]
        text: Option<String>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Manual,
    Automatic,
}

#[derive(Clone, Copy, ValueEnum)]
enum EncodeArg {
    Raw,
    Uastc,
    BasisLz,
}

fn parse_kernel(name: &str) -> std::result::Result<Kernel, String> {
    Kernel::from_name(name).ok_or_else(|| format!("unknown kernel '{}'", name))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Convert {
            input,
            output,
            normal_map,
            policy,
            kernel,
            format,
            encode,
            quality,
            zstd,
            threads,
            tool,
            keep_scratch,
        } => {
            let mut config = config;
            if let Some(policy) = policy {
                config.policy = match policy {
                    PolicyArg::Manual => MipPolicy::Manual,
                    PolicyArg::Automatic => MipPolicy::Automatic,
                };
            }
            if let Some(kernel) = kernel {
                config.mip.kernel = kernel;
            }
            if let Some(format) = format {
                config.encoder.format = format;
            }
            if let Some(encode) = encode {
                config.encoder.mode = match encode {
                    EncodeArg::Raw => EncodeMode::Raw,
                    EncodeArg::Uastc => EncodeMode::Uastc,
                    EncodeArg::BasisLz => EncodeMode::BasisLz,
                };
            }
            if quality.is_some() {
                config.encoder.quality = quality;
            }
            if let Some(level) = zstd {
                config.encoder.supercompress = true;
                config.encoder.zstd_level = level;
            }
            if threads.is_some() {
                config.encoder.threads = threads;
            }
            if tool.is_some() {
                config.encoder.tool_path = tool;
            }
            config.scratch.keep |= keep_scratch;

            let mut job = ConversionJob::new(input, output);
            if let Some(normal_map) = normal_map {
                job = job.with_normal_map(normal_map);
            }
            cmd_convert(config, &job)?;
        }
        Commands::Analyze {
            input,
            base_only,
            json,
        } => {
            cmd_analyze(&config, &input, base_only, json)?;
        }
        Commands::Inspect { input } => {
            cmd_inspect(&input)?;
        }
        Commands::Inject {
            input,
            key,
            value_file,
            text,
        } => {
            let value = match (value_file, text) {
                (Some(path), _) => fs::read(&path)
                    .with_context(|| format!("Failed to read value file {}", path.display()))?,
                (None, Some(text)) => {
                    let mut bytes = text.into_bytes();
                    bytes.push(0);
                    bytes
                }
                (None, None) => bail!("Provide --value-file or --text"),
            };
            cmd_inject(&input, &key, &value)?;
        }
        Commands::Config => {
            println!("{}", config.to_json()?);
        }
    }

    Ok(())
}

/// `RUST_LOG` when set, otherwise the kiln crates at info (debug with `--verbose`).
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    ["kiln", "kiln_mip", "kiln_range", "kiln_ktx"]
        .iter()
        .map(|target| format!("{}={}", target, level))
        .collect::<Vec<_>>()
        .join(",")
}

fn spinner(message: String) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn cmd_convert(config: PipelineConfig, job: &ConversionJob) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let tool = config
        .encoder
        .tool_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM));
    let pipeline = Pipeline::with_ktx_create(config)
        .with_context(|| format!("Failed to set up encoder {}", tool.display()))?;

    let pb = spinner(format!("Converting {}", job.input.display()))?;
    let start = Instant::now();
    let result = pipeline.run(job);
    pb.finish_and_clear();

    let report = result.with_context(|| format!("Failed to convert {}", job.input.display()))?;
    info!(output = %report.output.display(), levels = report.levels, "conversion complete");

    println!(
        "Wrote {} ({} levels) in {:?}",
        report.output.display(),
        report.levels,
        start.elapsed()
    );
    if let Some(stats) = &report.statistics {
        for (i, range) in stats.channels.iter().enumerate() {
            println!("  range[{}]: {:.6} .. {:.6}", i, range.lo, range.hi);
        }
    }
    if report.is_degenerate() {
        println!("  warning: degenerate range, widened to a minimal span");
    }
    if let Some(injection) = &report.injection {
        println!(
            "  metadata: {} bytes under '{}', sections shifted by {}",
            injection.kvd_length, METADATA_KEY, injection.shift
        );
    }
    if let Some(scratch) = &report.scratch {
        println!("  scratch kept at {}", scratch.display());
    }

    Ok(())
}

fn cmd_analyze(config: &PipelineConfig, input: &Path, base_only: bool, json: bool) -> Result<()> {
    let plane = kiln::image_io::load_plane(input, config.input_color_space)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    if !json {
        println!(
            "{}: {}x{}, {} channels",
            input.display(),
            plane.width(),
            plane.height(),
            plane.channels()
        );
    }

    let stats = if base_only {
        analyze_plane(&plane, &config.analysis).context("Failed to analyze image")?
    } else {
        let chain = MipChain::build(plane, &config.mip).context("Failed to build mip chain")?;
        if !json {
            println!("Mip chain: {} levels", chain.len());
        }
        analyze_chain(&chain, &config.analysis).context("Failed to analyze image")?
    };

    let block = MetadataBlock::from_statistics(&stats).encode();
    let hex: Vec<String> = block.iter().map(|b| format!("{:02x}", b)).collect();

    if json {
        let value = serde_json::json!({
            "statistics": stats,
            "inverse": stats.inverse(),
            "metadata": hex.join(""),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!(
        "Mode: {:?}, {:?}, percentiles {}..{}, knee {}",
        stats.channel_mode, stats.quality, stats.low_percentile, stats.high_percentile, stats.knee_width
    );
    for (i, (range, inverse)) in stats.channels.iter().zip(stats.inverse()).enumerate() {
        println!(
            "  [{}] lo {:.6} hi {:.6}  scale_inv {:.6} offset_inv {:.6}{}",
            i,
            range.lo,
            range.hi,
            inverse.scale_inv,
            inverse.offset_inv,
            if range.degenerate { "  (degenerate)" } else { "" }
        );
    }

    println!("Metadata block ({} bytes): {}", block.len(), hex.join(""));

    Ok(())
}

fn cmd_inspect(input: &Path) -> Result<()> {
    let file = Ktx2File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let header = file.header();
    let layout = file.layout();

    println!("{}", input.display());
    println!(
        "  vkFormat {}  {}x{}x{}  layers {}  faces {}  levels {}  supercompression {}",
        header.vk_format,
        header.pixel_width,
        header.pixel_height,
        header.pixel_depth,
        header.layer_count,
        header.face_count,
        header.level_count,
        header.supercompression_scheme
    );
    println!(
        "  dfd {:?}  kvd {:?}  sgd {:?}",
        layout.dfd_range(),
        layout.kvd_range(),
        layout.sgd_range()
    );
    println!("  texel block bytes {}", layout.bytes_plane0(file.dfd()));

    println!("\nLevels:");
    for (i, (level, crc)) in layout.levels.iter().zip(file.level_checksums()).enumerate() {
        println!(
            "  {:>2}  offset {:>10}  length {:>10}  uncompressed {:>10}  crc32c {:08x}",
            i, level.byte_offset, level.byte_length, level.uncompressed_byte_length, crc
        );
    }

    println!("\nKey/value data:");
    for kv in file.key_values().context("Failed to parse key/value data")? {
        if kv.key == METADATA_KEY {
            match MetadataBlock::decode(&kv.value) {
                Ok(block) => {
                    println!(
                        "  {} = {:?} {:?}{}",
                        kv.key,
                        block.tag,
                        block.transform,
                        if block.degenerate { " degenerate" } else { "" }
                    );
                    for (i, t) in block.inverse_transforms().iter().enumerate() {
                        println!("      [{}] scale_inv {} offset_inv {}", i, t.scale_inv, t.offset_inv);
                    }
                }
                Err(e) => println!("  {} = <invalid block: {}>", kv.key, e),
            }
        } else if let Some(text) = kv.value_str() {
            println!("  {} = {:?}", kv.key, text);
        } else {
            println!("  {} = <{} bytes>", kv.key, kv.value.len());
        }
    }

    Ok(())
}

fn cmd_inject(input: &Path, key: &str, value: &[u8]) -> Result<()> {
    let report = inject_metadata(input, key, value)
        .with_context(|| format!("Failed to inject '{}' into {}", key, input.display()))?;

    println!(
        "Injected {} bytes under '{}' into {}{}",
        value.len(),
        key,
        input.display(),
        if report.replaced { " (replaced)" } else { "" }
    );
    println!(
        "  alignment {}  shift {}  file size {}",
        report.alignment, report.shift, report.file_length
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(false),
            "kiln=info,kiln_mip=info,kiln_range=info,kiln_ktx=info"
        );
        assert!(default_directives(true).split(',').all(|d| d.ends_with("=debug")));
    }

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            for directive in default_directives(verbose).split(',') {
                assert!(directive.parse::<tracing_subscriber::filter::Directive>().is_ok());
            }
        }
    }

    #[test]
    fn test_cli_parses_convert_overrides() {
        let cli = Cli::try_parse_from([
            "kiln", "-v", "convert", "in.png", "out.ktx2", "--kernel", "lanczos3", "--zstd", "20",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Convert { kernel, zstd, .. } => {
                assert_eq!(kernel, Some(Kernel::Lanczos3));
                assert_eq!(zstd, Some(20));
            }
            _ => panic!("expected convert"),
        }
        assert!(Cli::try_parse_from(["kiln", "convert", "a", "b", "--kernel", "nearest"]).is_err());
    }
}
