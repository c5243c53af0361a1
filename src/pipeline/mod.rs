// Pipeline execution and monitoring module
// Runs classification requests against a loaded inference context

pub mod context;
pub mod orchestrator;
pub mod trace;
pub mod types;

pub use context::InferenceContext;
pub use trace::{read_trace_file, RequestTrace, Stage, TraceEntry, TraceError, TraceWriter};
pub use types::{ClassificationResult, PipelineError};
