// Audio processing module
// Decoding, resampling and normalization of uploaded clips, then onset-based segmentation

pub mod ingest;
pub mod onset;
pub mod segment;

pub use ingest::{
    decode_audio, ingest_wav, load_waveform, resample, AudioData, AudioError, Waveform,
    DEFAULT_SAMPLE_RATE,
};
pub use onset::{detect_onsets, Onset, OnsetConfig};
pub use segment::{segments_from_onsets, Segment, Segmenter, SegmenterConfig};
