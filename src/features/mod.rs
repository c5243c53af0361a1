// Feature extraction module
// Versioned segment -> fixed-length vector recipe shared by training and serving

pub mod descriptors;
pub mod extractor;
pub mod spectrum;

use thiserror::Error;

pub use extractor::{
    extract, ExtractorConfig, FeatureBlock, FeatureExtractor, FeatureLayout, FeatureVector,
    FEATURE_DIM, FEATURE_VERSION,
};

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Segment is empty after trimming silence")]
    EmptySegment,

    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("Invalid analysis frame (n_fft {n_fft}, hop {hop})")]
    InvalidFrame { n_fft: usize, hop: usize },

    #[error("FFT failed: {0}")]
    Fft(String),

    #[error("Feature layout mismatch: expected {expected} values, produced {actual}")]
    LayoutMismatch { expected: usize, actual: usize },
}
