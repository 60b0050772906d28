//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration and files only need to name what they change.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_mip::{ColorSpace, MipSettings, ToksvigSettings};
use kiln_range::AnalysisSettings;
use serde::{Deserialize, Serialize};

use crate::encoder::EncodeSettings;
use crate::{Error, Result};

/// Who generates the mip levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MipPolicy {
    /// Build, correct and normalize levels here, then inject range metadata.
    #[default]
    Manual,
    /// Hand the source to the encoder and let it generate mips.
    Automatic,
}

/// Block encoding performed by the external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodeMode {
    /// Store levels in `format` without transcodable encoding.
    #[default]
    Raw,
    Uastc,
    BasisLz,
}

impl EncodeMode {
    /// Value for `--encode`, if any.
    pub fn as_arg(self) -> Option<&'static str> {
        match self {
            EncodeMode::Raw => None,
            EncodeMode::Uastc => Some("uastc"),
            EncodeMode::BasisLz => Some("basis-lz"),
        }
    }
}

/// External encoder options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Vulkan format name passed to `--format`.
    pub format: String,
    pub mode: EncodeMode,
    /// UASTC quality (0-4) or BasisLZ quality level (1-255).
    pub quality: Option<u32>,
    /// Apply Zstandard supercompression.
    pub supercompress: bool,
    pub zstd_level: u32,
    pub threads: Option<usize>,
    /// Explicit executable; otherwise `ktx` is looked up on `PATH`.
    pub tool_path: Option<PathBuf>,
    /// Extra arguments placed before the inputs.
    pub extra_args: Vec<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            format: "R8G8B8A8_UNORM".to_string(),
            mode: EncodeMode::default(),
            quality: None,
            supercompress: false,
            zstd_level: 18,
            threads: None,
            tool_path: None,
            extra_args: Vec::new(),
        }
    }
}

/// Scratch directory handling.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Parent directory for scratch folders; the system temp dir if unset.
    pub root: Option<PathBuf>,
    /// Keep scratch files after a successful job.
    pub keep: bool,
}

/// Complete configuration of one conversion job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub policy: MipPolicy,
    /// How source samples are encoded.
    pub input_color_space: ColorSpace,
    pub mip: MipSettings,
    /// Roughness correction; needs a normal map on the job.
    pub toksvig: Option<ToksvigSettings>,
    pub analysis: AnalysisSettings,
    pub encoder: EncoderConfig,
    pub scratch: ScratchConfig,
}

impl PipelineConfig {
    /// Parse a JSON configuration and validate it.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject combinations the pipeline or the encoder cannot honor.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if !(self.mip.gamma.is_finite() && self.mip.gamma > 0.0) {
            return invalid(format!("gamma must be positive, got {}", self.mip.gamma));
        }

        let a = &self.analysis;
        if !(0.0 <= a.low_percentile && a.low_percentile < a.high_percentile && a.high_percentile <= 100.0) {
            return invalid(format!(
                "percentiles must satisfy 0 <= low < high <= 100, got {} and {}",
                a.low_percentile, a.high_percentile
            ));
        }
        if !(0.0..=0.5).contains(&a.knee_width) {
            return invalid(format!("knee width must be within 0..=0.5, got {}", a.knee_width));
        }

        let e = &self.encoder;
        if e.format.trim().is_empty() {
            return invalid("encoder format must not be empty".to_string());
        }
        if e.supercompress && !(1..=22).contains(&e.zstd_level) {
            return invalid(format!("zstd level must be within 1..=22, got {}", e.zstd_level));
        }
        if e.supercompress && e.mode == EncodeMode::BasisLz {
            return invalid("basis-lz output cannot also be zstd supercompressed".to_string());
        }
        if let Some(q) = e.quality {
            let range = match e.mode {
                EncodeMode::Uastc => 0..=4,
                EncodeMode::BasisLz => 1..=255,
                EncodeMode::Raw => {
                    return invalid("quality is only meaningful with uastc or basis-lz".to_string())
                }
            };
            if !range.contains(&q) {
                return invalid(format!(
                    "quality {} outside {}..={} for {:?}",
                    q,
                    range.start(),
                    range.end(),
                    e.mode
                ));
            }
        }
        if e.threads == Some(0) {
            return invalid("threads must be at least 1".to_string());
        }

        Ok(())
    }

    /// Encoder settings for a job that hands over `levels` inputs, or a
    /// single source when the encoder generates mips.
    pub fn encode_settings(&self, levels: Option<u32>) -> EncodeSettings {
        let e = &self.encoder;
        EncodeSettings {
            format: e.format.clone(),
            mode: e.mode,
            quality: e.quality,
            zstd_level: e.supercompress.then_some(e.zstd_level),
            generate_mipmap: self.policy == MipPolicy::Automatic,
            levels,
            threads: e.threads,
            extra_args: e.extra_args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_mip::Kernel;
    use kiln_range::{ChannelMode, QualityMode};

    #[test]
    fn test_empty_object_is_default() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.policy, MipPolicy::Manual);
        assert_eq!(config.encoder.format, "R8G8B8A8_UNORM");
    }

    #[test]
    fn test_partial_config() {
        let config = PipelineConfig::from_json(
            r#"{
                "policy": "automatic",
                "mip": { "kernel": "lanczos3", "gamma": 2.4 },
                "analysis": { "channel_mode": "per-channel", "quality": "fast" },
                "encoder": { "mode": "uastc", "quality": 2, "supercompress": true, "zstd_level": 9 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.policy, MipPolicy::Automatic);
        assert_eq!(config.mip.kernel, Kernel::Lanczos3);
        assert!(config.mip.gamma_correct);
        assert_eq!(config.analysis.channel_mode, ChannelMode::PerChannel);
        assert_eq!(config.analysis.quality, QualityMode::Fast);
        assert_eq!(config.analysis.high_percentile, 99.5);

        let settings = config.encode_settings(None);
        assert!(settings.generate_mipmap);
        assert_eq!(settings.zstd_level, Some(9));
        assert_eq!(settings.quality, Some(2));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = PipelineConfig::default();
        config.toksvig = Some(ToksvigSettings::default());
        config.scratch.keep = true;
        let text = config.to_json().unwrap();
        assert_eq!(PipelineConfig::from_json(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        for text in [
            r#"{ "analysis": { "low_percentile": 90.0, "high_percentile": 10.0 } }"#,
            r#"{ "analysis": { "knee_width": 0.75 } }"#,
            r#"{ "mip": { "gamma": 0.0 } }"#,
            r#"{ "encoder": { "mode": "uastc", "quality": 9 } }"#,
            r#"{ "encoder": { "quality": 2 } }"#,
            r#"{ "encoder": { "mode": "basis-lz", "supercompress": true } }"#,
            r#"{ "encoder": { "format": "" } }"#,
            r#"{ "encoder": { "threads": 0 } }"#,
        ] {
            assert!(
                matches!(PipelineConfig::from_json(text), Err(Error::InvalidConfig(_))),
                "accepted {}",
                text
            );
        }
    }

    #[test]
    fn test_unknown_enum_value_is_parse_error() {
        assert!(matches!(
            PipelineConfig::from_json(r#"{ "policy": "sometimes" }"#),
            Err(Error::Config(_))
        ));
    }
}
