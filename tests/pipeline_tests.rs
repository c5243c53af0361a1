use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chordseg_lib::audio::Waveform;
use chordseg_lib::config::PipelineConfig;
use chordseg_lib::features::{FEATURE_DIM, FEATURE_VERSION};
use chordseg_lib::model::{Activation, DenseNetwork, LabelSpace, LayerSpec, NetworkSpec, ScalingParameters};
use chordseg_lib::pipeline::{read_trace_file, InferenceContext, PipelineError, Stage, TraceWriter};
use chordseg_lib::state::{
    encode_wav, save_bundle, DirectoryStore, MemorySegmentStore, SegmentAudio, SegmentRef, SegmentStore,
    SegmentStoreError,
};
use tempfile::TempDir;

const SR: u32 = 22050;

fn uniform_network(input_dim: usize, classes: usize) -> NetworkSpec {
    NetworkSpec {
        input_dim,
        layers: vec![LayerSpec {
            weights: vec![vec![0.0; classes]; input_dim],
            bias: vec![0.0; classes],
            activation: Activation::Softmax,
        }],
    }
}

fn unit_scaler(dim: usize) -> ScalingParameters {
    ScalingParameters::new(vec![0.0; dim], vec![1.0; dim], FEATURE_VERSION).unwrap()
}

fn context_with(config: PipelineConfig) -> InferenceContext {
    let network = DenseNetwork::from_spec(&uniform_network(FEATURE_DIM, 2)).unwrap();
    let labels = LabelSpace::fit(["Am", "G"]).unwrap();
    InferenceContext::from_parts(Box::new(network), unit_scaler(FEATURE_DIM), labels, config).unwrap()
}

fn context() -> InferenceContext {
    context_with(PipelineConfig::default())
}

/// 4 s of silence with unit impulses at 0 s and 2 s
fn two_impulses() -> Vec<f32> {
    let mut samples = vec![0.0f32; SR as usize * 4];
    samples[0] = 1.0;
    samples[SR as usize * 2] = 1.0;
    samples
}

/// Decaying two-partial tones starting at the given times
fn plucks(starts: &[f32], total_secs: f32) -> Vec<f32> {
    let len = (total_secs * SR as f32) as usize;
    let mut samples = vec![0.0f32; len];
    for (n, &start) in starts.iter().enumerate() {
        let freq = 196.0 * (1.0 + 0.25 * n as f32);
        let offset = (start * SR as f32) as usize;
        for (i, s) in samples.iter_mut().enumerate().skip(offset) {
            let t = (i - offset) as f32 / SR as f32;
            let env = (-6.0 * t).exp();
            *s += env
                * (0.7 * (2.0 * std::f32::consts::PI * freq * t).sin()
                    + 0.3 * (4.0 * std::f32::consts::PI * freq * t).sin());
        }
    }
    samples
}

fn wav(samples: &[f32]) -> Vec<u8> {
    encode_wav(samples, SR).unwrap()
}

#[test]
fn test_two_onset_clip_yields_two_segments() {
    let results = context().classify(&wav(&two_impulses())).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].start_time, 0.0);
    assert!((results[1].start_time - 2.0).abs() < 0.05);
    assert!((results[1].end_time - 4.0).abs() < 1e-6);
    assert!((results[0].end_time - results[1].start_time).abs() < 1e-9);

    // Uniform model: ties resolve to the first label
    for result in &results {
        assert_eq!(result.label, "Am");
        assert!((result.confidence - 0.5).abs() < 1e-5);
        assert!(result.segment.is_none());
    }
}

#[test]
fn test_classification_is_deterministic() {
    let ctx = context();
    let bytes = wav(&plucks(&[0.1, 1.3, 2.4], 3.5));
    let first = ctx.classify(&bytes).unwrap();
    let second = ctx.classify(&bytes).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_results_respect_duration_floor_and_order() {
    let results = context()
        .classify(&wav(&plucks(&[0.0, 0.8, 1.0, 2.2, 3.1], 4.0)))
        .unwrap();

    assert!(!results.is_empty());
    for result in &results {
        assert!(result.end_time - result.start_time >= 0.5 - 1e-9);
    }
    for pair in results.windows(2) {
        assert!(pair[0].start_time < pair[1].start_time);
        assert!(pair[0].end_time <= pair[1].start_time + 1e-9);
    }
}

#[test]
fn test_sequential_and_parallel_agree() {
    let bytes = wav(&plucks(&[0.0, 1.0, 2.0, 3.0], 4.0));
    let parallel = context().classify(&bytes).unwrap();
    let sequential = context_with(PipelineConfig {
        parallelism: 1,
        ..PipelineConfig::default()
    })
    .classify(&bytes)
    .unwrap();
    let pooled = context_with(PipelineConfig {
        parallelism: 3,
        ..PipelineConfig::default()
    })
    .classify(&bytes)
    .unwrap();

    assert_eq!(parallel, sequential);
    assert_eq!(parallel, pooled);
}

#[test]
fn test_short_clip_has_no_segments() {
    let clip: Vec<f32> = (0..(SR as usize / 5))
        .map(|i| (i as f32 * 0.1).sin())
        .collect();
    let err = context().classify(&wav(&clip)).unwrap_err();
    assert!(matches!(err, PipelineError::NoSegmentsFound));
}

#[test]
fn test_silent_clip_reports_no_segments() {
    let err = context().classify(&wav(&vec![0.0; SR as usize * 2])).unwrap_err();
    assert_eq!(err.kind(), "no_segments_found");
}

#[test]
fn test_undecodable_upload() {
    let err = context().classify(b"definitely not audio").unwrap_err();
    assert!(matches!(err, PipelineError::Decode(_)));
    assert!(err.is_client_error());
}

#[test]
fn test_scaler_dimension_mismatch_is_fatal() {
    let network = DenseNetwork::from_spec(&uniform_network(24, 2)).unwrap();
    let labels = LabelSpace::fit(["Am", "G"]).unwrap();
    let ctx = InferenceContext::from_parts(
        Box::new(network),
        unit_scaler(24),
        labels,
        PipelineConfig::default(),
    )
    .unwrap();

    let err = ctx.classify(&wav(&two_impulses())).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DimensionMismatch {
            expected: 24,
            actual: FEATURE_DIM
        }
    ));
}

#[test]
fn test_artifacts_round_trip_through_directory() {
    let temp_dir = TempDir::new().unwrap();
    let store = DirectoryStore::new(temp_dir.path());
    let labels = LabelSpace::fit(["C", "D", "E"]).unwrap();
    save_bundle(&store, &uniform_network(FEATURE_DIM, 3), &unit_scaler(FEATURE_DIM), &labels).unwrap();

    let ctx = InferenceContext::load(&store, PipelineConfig::default()).unwrap();
    let results = ctx.classify(&wav(&two_impulses())).unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.label == "C"));
}

#[test]
fn test_missing_artifacts_are_model_unavailable() {
    let temp_dir = TempDir::new().unwrap();
    let err = InferenceContext::load(&DirectoryStore::new(temp_dir.path()), PipelineConfig::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::ModelUnavailable(_)));
}

#[test]
fn test_segments_are_persisted_for_playback() {
    let store = Arc::new(MemorySegmentStore::new());
    let ctx = context_with(PipelineConfig {
        persist_segments: true,
        ..PipelineConfig::default()
    })
    .with_segment_store(store.clone());

    let results = ctx.classify(&wav(&two_impulses())).unwrap();
    assert_eq!(store.len(), results.len());

    for result in &results {
        let handle = result.segment.expect("segment stored");
        let audio = store.get(&handle).unwrap();
        assert_eq!(audio.content_type, "audio/wav");
        assert_eq!(&audio.bytes[0..4], b"RIFF");
    }
}

/// Memory store whose n-th write (1-based) fails
struct FailingNthWrite {
    inner: MemorySegmentStore,
    fail_on: usize,
    writes: AtomicUsize,
}

impl SegmentStore for FailingNthWrite {
    fn put(&self, samples: &[f32], sample_rate: u32) -> Result<SegmentRef, SegmentStoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(SegmentStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.put(samples, sample_rate)
    }

    fn get(&self, segment: &SegmentRef) -> Result<SegmentAudio, SegmentStoreError> {
        self.inner.get(segment)
    }

    fn remove(&self, segment: &SegmentRef) -> Result<(), SegmentStoreError> {
        self.inner.remove(segment)
    }
}

#[test]
fn test_failed_segment_write_leaves_store_empty() {
    let store = Arc::new(FailingNthWrite {
        inner: MemorySegmentStore::new(),
        fail_on: 2,
        writes: AtomicUsize::new(0),
    });
    let ctx = context_with(PipelineConfig {
        persist_segments: true,
        ..PipelineConfig::default()
    })
    .with_segment_store(store.clone());

    let err = ctx.classify(&wav(&two_impulses())).unwrap_err();
    assert!(matches!(err, PipelineError::SegmentStore(_)));
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    assert!(store.inner.is_empty());
}

#[test]
fn test_request_trace_records_stages() {
    let temp_dir = TempDir::new().unwrap();
    let trace_path = temp_dir.path().join("trace.jsonl");
    let ctx = context().with_trace(TraceWriter::new(trace_path.clone()));

    ctx.classify(&wav(&two_impulses())).unwrap();

    let entries = read_trace_file(&trace_path).unwrap();
    let stages: Vec<Stage> = entries.iter().map(|e| e.stage).collect();
    assert_eq!(stages.first(), Some(&Stage::Load));
    assert_eq!(stages.last(), Some(&Stage::Assembly));
    assert!(stages.contains(&Stage::Segmentation));
    assert!(stages.contains(&Stage::FeatureExtraction));
    assert!(stages.contains(&Stage::Classification));
}

#[test]
fn test_classify_waveform_matches_bytes_path() {
    let samples = two_impulses();
    let ctx = context();
    let from_waveform = ctx.classify_waveform(&Waveform::normalized(samples.clone(), SR)).unwrap();
    assert_eq!(from_waveform.len(), 2);
    assert!((from_waveform[1].start_time - 2.0).abs() < 0.05);
}
