// Request orchestration
// Decode -> segment -> featurize (parallel) -> scale -> classify (one batch) -> assemble

use rayon::prelude::*;

use crate::audio::{load_waveform, Segment, Waveform};
use crate::features::{FeatureError, FeatureVector};
use crate::model::{ClassifierError, ScalerError};
use crate::pipeline::context::InferenceContext;
use crate::pipeline::trace::{RequestTrace, Stage};
use crate::pipeline::types::{ClassificationResult, PipelineError};
use crate::state::{SegmentRef, SegmentStore};

/// Feature extraction outcome for one segment, tagged with its position
type Featurized = (Segment, Result<FeatureVector, FeatureError>);

impl InferenceContext {
    /// Classify every chord event in an uploaded clip
    /// Returns results ordered by start time, or an error for the whole request
    pub fn classify(&self, audio: &[u8]) -> Result<Vec<ClassificationResult>, PipelineError> {
        let trace = RequestTrace::new(self.trace.as_ref());
        trace.record(Stage::Load, 0.0, format!("Decoding {} bytes", audio.len()));

        let waveform = load_waveform(audio, self.config.loader.sample_rate).map_err(|e| {
            log::warn!("Rejected upload: {}", e);
            PipelineError::from(e)
        })?;

        trace.record_data(
            Stage::Load,
            0.1,
            "Decoded audio",
            serde_json::json!({
                "duration_secs": waveform.duration_secs(),
                "sample_rate": waveform.sample_rate,
            }),
        );

        self.run(&waveform, &trace)
    }

    /// Classify a waveform the caller has already decoded
    /// The waveform is peak-normalized first if it is not already
    pub fn classify_waveform(
        &self,
        waveform: &Waveform,
    ) -> Result<Vec<ClassificationResult>, PipelineError> {
        let trace = RequestTrace::new(self.trace.as_ref());
        let peak = waveform.peak();
        if peak > 0.0 && (peak - 1.0).abs() > 1e-6 {
            let normalized = Waveform::normalized(waveform.samples.clone(), waveform.sample_rate);
            return self.run(&normalized, &trace);
        }
        self.run(waveform, &trace)
    }

    fn run(
        &self,
        waveform: &Waveform,
        trace: &RequestTrace<'_>,
    ) -> Result<Vec<ClassificationResult>, PipelineError> {
        let segments = self.segmenter.segment(waveform)?;
        trace.record_data(
            Stage::Segmentation,
            0.3,
            format!("Found {} segments", segments.len()),
            serde_json::json!({ "segments": segments.len() }),
        );
        if segments.is_empty() {
            log::info!(
                "No segment of {:.2}s audio reached {:.2}s",
                waveform.duration_secs(),
                self.config.segmenter.min_segment_duration
            );
            return Err(PipelineError::NoSegmentsFound);
        }

        let (kept, features) = self.featurize(waveform, &segments);
        trace.record_data(
            Stage::FeatureExtraction,
            0.6,
            format!("Extracted features for {} segments", kept.len()),
            serde_json::json!({
                "extracted": kept.len(),
                "skipped": segments.len() - kept.len(),
            }),
        );
        if kept.is_empty() {
            log::info!("All {} segments were skipped during feature extraction", segments.len());
            return Err(PipelineError::NoSegmentsFound);
        }

        let scaled = self.scaler.transform_batch(&features).map_err(|e| match e {
            ScalerError::DimensionMismatch { expected, actual } => dimension_mismatch(expected, actual),
            other => PipelineError::Inference(ClassifierError::Inference(other.to_string())),
        })?;

        let predictions = self.classifier.classify_batch(&scaled).map_err(|e| match e {
            ClassifierError::InputShape { expected, actual } => dimension_mismatch(expected, actual),
            other => {
                log::error!("Inference failed: {}", other);
                PipelineError::Inference(other)
            }
        })?;
        trace.record(
            Stage::Classification,
            0.9,
            format!("Classified {} segments", predictions.len()),
        );

        let stored = match self.segment_store.as_ref() {
            Some(store) if self.config.persist_segments => persist_segments(
                store.as_ref(),
                |segment| self.playback_audio(waveform, segment),
                &kept,
                waveform.sample_rate,
            )?
            .into_iter()
            .map(Some)
            .collect(),
            _ => vec![None; kept.len()],
        };

        let mut results = Vec::with_capacity(kept.len());
        for ((segment, prediction), stored) in kept.iter().zip(predictions).zip(stored) {
            results.push((
                segment.start_sample,
                ClassificationResult {
                    start_time: segment.start_time(),
                    end_time: segment.end_time(),
                    label: prediction.label,
                    confidence: prediction.confidence,
                    segment: stored,
                },
            ));
        }

        results.sort_by_key(|(start, _)| *start);
        let results: Vec<ClassificationResult> = results.into_iter().map(|(_, r)| r).collect();

        log::info!(
            "Classified {} of {} segments from {:.2}s of audio",
            results.len(),
            segments.len(),
            waveform.duration_secs()
        );
        trace.record(Stage::Assembly, 1.0, format!("Returned {} results", results.len()));

        Ok(results)
    }

    /// Same trimmed, normalized signal the features were computed from
    fn playback_audio(&self, waveform: &Waveform, segment: &Segment) -> Vec<f32> {
        self.extractor
            .prepare(waveform.slice(segment))
            .unwrap_or_else(|_| waveform.slice(segment).to_vec())
    }

    /// Extract features for each segment, dropping the ones that fail
    /// Returns the kept segments and their vectors in segment order
    fn featurize(&self, waveform: &Waveform, segments: &[Segment]) -> (Vec<Segment>, Vec<FeatureVector>) {
        let extract_one = |segment: &Segment| -> Featurized {
            let samples = waveform.slice(segment);
            (*segment, self.extractor.extract(samples, waveform.sample_rate))
        };

        let mut outcomes: Vec<Featurized> = match (self.config.parallelism, &self.pool) {
            (1, _) => segments.iter().map(extract_one).collect(),
            (_, Some(pool)) => pool.install(|| segments.par_iter().map(extract_one).collect()),
            _ => segments.par_iter().map(extract_one).collect(),
        };
        outcomes.sort_by_key(|(segment, _)| segment.index);

        let mut kept = Vec::with_capacity(outcomes.len());
        let mut features = Vec::with_capacity(outcomes.len());
        for (segment, outcome) in outcomes {
            match outcome {
                Ok(vector) => {
                    kept.push(segment);
                    features.push(vector);
                }
                Err(e) => {
                    log::warn!(
                        "Skipping segment {} ({:.2}s-{:.2}s): {}",
                        segment.index,
                        segment.start_time(),
                        segment.end_time(),
                        e
                    );
                }
            }
        }

        (kept, features)
    }
}

/// Write every segment or none of them
/// Audio is prepared up front; if a write fails, segments already written are removed again
fn persist_segments<F>(
    store: &dyn SegmentStore,
    audio_for: F,
    segments: &[Segment],
    sample_rate: u32,
) -> Result<Vec<SegmentRef>, PipelineError>
where
    F: Fn(&Segment) -> Vec<f32>,
{
    let prepared: Vec<Vec<f32>> = segments.iter().map(audio_for).collect();

    let mut written = Vec::with_capacity(prepared.len());
    for audio in &prepared {
        match store.put(audio, sample_rate) {
            Ok(segment) => written.push(segment),
            Err(e) => {
                log::error!(
                    "Storing segment {} of {} failed, rolling back: {}",
                    written.len() + 1,
                    prepared.len(),
                    e
                );
                for segment in &written {
                    if let Err(remove_err) = store.remove(segment) {
                        log::warn!("Could not remove segment {}: {}", segment.id, remove_err);
                    }
                }
                return Err(PipelineError::from(e));
            }
        }
    }

    Ok(written)
}

fn dimension_mismatch(expected: usize, actual: usize) -> PipelineError {
    log::error!(
        "Feature dimension mismatch: expected {}, got {}",
        expected,
        actual
    );
    PipelineError::DimensionMismatch { expected, actual }
}
