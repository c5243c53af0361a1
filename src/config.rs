// Pipeline configuration
// Groups the per-stage configs; every field has a default so partial JSON files load

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::audio::{OnsetConfig, SegmenterConfig, DEFAULT_SAMPLE_RATE};
use crate::features::ExtractorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Analysis sample rate every clip is resampled to
    pub sample_rate: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub loader: LoaderConfig,
    pub segmenter: SegmenterConfig,
    pub extractor: ExtractorConfig,

    /// Feature extraction threads: 0 = rayon default pool, 1 = sequential
    pub parallelism: usize,

    /// Store each classified segment's audio for playback
    pub persist_segments: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            loader: LoaderConfig::default(),
            segmenter: SegmenterConfig::default(),
            extractor: ExtractorConfig::default(),
            parallelism: 0,
            persist_segments: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn onset(&self) -> &OnsetConfig {
        &self.segmenter.onset
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.loader.sample_rate == 0 {
            return invalid("loader.sample_rate must be positive");
        }

        let onset = self.onset();
        if onset.window_size == 0 || onset.hop_size == 0 {
            return invalid("onset window_size and hop_size must be positive");
        }
        if onset.hop_size > onset.window_size {
            return invalid("onset hop_size must not exceed window_size");
        }
        if onset.n_mels == 0 {
            return invalid("onset n_mels must be positive");
        }
        if !onset.delta.is_finite() || onset.delta < 0.0 {
            return invalid("onset delta must be a non-negative number");
        }
        let windows = [
            onset.pre_max_secs,
            onset.post_max_secs,
            onset.pre_avg_secs,
            onset.post_avg_secs,
            onset.wait_secs,
        ];
        if windows.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return invalid("onset window durations must be non-negative");
        }

        let min_duration = self.segmenter.min_segment_duration;
        if !min_duration.is_finite() || min_duration < 0.0 {
            return invalid("segmenter.min_segment_duration must be non-negative");
        }

        if !self.extractor.trim_top_db.is_finite() || self.extractor.trim_top_db <= 0.0 {
            return invalid("extractor.trim_top_db must be positive");
        }
        if self.extractor.max_frame_length < 2 {
            return invalid("extractor.max_frame_length must be at least 2");
        }

        Ok(())
    }
}
