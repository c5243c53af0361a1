// Inference context
// Loaded artifacts and configuration shared read-only by every request

use std::sync::Arc;

use crate::audio::Segmenter;
use crate::config::{ConfigError, PipelineConfig};
use crate::features::{FeatureExtractor, FEATURE_DIM};
use crate::model::{ChordModel, Classifier, LabelSpace, ScalingParameters};
use crate::pipeline::trace::TraceWriter;
use crate::pipeline::types::PipelineError;
use crate::state::{load_bundle, ArtifactStore, SegmentStore};

/// Everything a request needs; build once at startup and pass by reference
pub struct InferenceContext {
    pub(crate) config: PipelineConfig,
    pub(crate) segmenter: Segmenter,
    pub(crate) extractor: FeatureExtractor,
    pub(crate) scaler: ScalingParameters,
    pub(crate) classifier: Classifier,
    pub(crate) segment_store: Option<Arc<dyn SegmentStore>>,
    pub(crate) trace: Option<TraceWriter>,
    pub(crate) pool: Option<rayon::ThreadPool>,
}

impl InferenceContext {
    /// Load model, scaler and labels from a store
    /// Any missing or inconsistent artifact is reported as ModelUnavailable
    pub fn load(store: &dyn ArtifactStore, config: PipelineConfig) -> Result<Self, PipelineError> {
        let bundle = load_bundle(store)?;
        Self::from_parts(Box::new(bundle.network), bundle.scaler, bundle.labels, config)
    }

    /// Assemble a context from already loaded parts
    pub fn from_parts(
        model: Box<dyn ChordModel>,
        scaler: ScalingParameters,
        labels: LabelSpace,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        if scaler.dimension() != FEATURE_DIM {
            log::error!(
                "Scaler was fitted on {} dimensions but the extractor produces {}",
                scaler.dimension(),
                FEATURE_DIM
            );
        }

        let classifier = Classifier::new(model, labels)
            .map_err(|e| PipelineError::ModelUnavailable(e.to_string()))?;

        let pool = match config.parallelism {
            0 | 1 => None,
            threads => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("chordseg-features-{}", i))
                    .build()
                    .map_err(|e| ConfigError::Invalid(format!("thread pool: {}", e)))?,
            ),
        };

        log::info!(
            "Inference context ready: {} labels, sample rate {} Hz, parallelism {}",
            classifier.labels().len(),
            config.loader.sample_rate,
            config.parallelism
        );

        Ok(InferenceContext {
            segmenter: Segmenter::new(config.segmenter.clone()),
            extractor: FeatureExtractor::new(config.extractor),
            config,
            scaler,
            classifier,
            segment_store: None,
            trace: None,
            pool,
        })
    }

    /// Store segment audio here when `persist_segments` is enabled
    pub fn with_segment_store(mut self, store: Arc<dyn SegmentStore>) -> Self {
        self.segment_store = Some(store);
        self
    }

    /// Append a JSONL trace of every request to this writer
    pub fn with_trace(mut self, writer: TraceWriter) -> Self {
        self.trace = Some(writer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelSpace {
        self.classifier.labels()
    }

    pub fn scaler(&self) -> &ScalingParameters {
        &self.scaler
    }
}

impl std::fmt::Debug for InferenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceContext")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("persist_segments", &self.segment_store.is_some())
            .field("trace", &self.trace)
            .finish_non_exhaustive()
    }
}
