// Pipeline boundary types
// Results returned to callers and the error taxonomy they can match on

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::AudioError;
use crate::config::ConfigError;
use crate::features::FeatureError;
use crate::model::ClassifierError;
use crate::state::{ArtifactLoadError, SegmentRef, SegmentStoreError};

/// One classified segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Segment start in seconds from the beginning of the clip
    pub start_time: f64,

    /// Segment end in seconds
    pub end_time: f64,

    pub label: String,

    /// Probability of `label` [0.0, 1.0]
    pub confidence: f32,

    /// Playback handle when segment persistence is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<SegmentRef>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Audio could not be decoded: {0}")]
    Decode(#[from] AudioError),

    #[error("No segments found in audio")]
    NoSegmentsFound,

    #[error("Feature dimension mismatch: scaler expects {expected}, extractor produced {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(#[from] ClassifierError),

    #[error("Segment storage failed: {0}")]
    SegmentStore(#[from] SegmentStoreError),

    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] FeatureError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<ArtifactLoadError> for PipelineError {
    fn from(e: ArtifactLoadError) -> Self {
        PipelineError::ModelUnavailable(e.to_string())
    }
}

impl PipelineError {
    /// Stable discriminant for callers that map errors to responses
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Decode(_) => "decode",
            PipelineError::NoSegmentsFound => "no_segments_found",
            PipelineError::DimensionMismatch { .. } => "dimension_mismatch",
            PipelineError::ModelUnavailable(_) => "model_unavailable",
            PipelineError::Inference(_) => "inference",
            PipelineError::SegmentStore(_) => "segment_store",
            PipelineError::Segmentation(_) => "segmentation",
            PipelineError::Config(_) => "config",
        }
    }

    /// Whether the caller sent bad input, as opposed to a server-side failure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Decode(_) | PipelineError::NoSegmentsFound
        )
    }
}
