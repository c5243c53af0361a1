// chordseg - guitar chord segmentation and classification
// Module declarations

pub mod audio;
pub mod config;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod state;
pub mod training;

pub use config::PipelineConfig;
pub use pipeline::{ClassificationResult, InferenceContext, PipelineError};
