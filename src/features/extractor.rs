// Segment feature extraction
// Trims silence, adapts the analysis frame to the segment length and
// concatenates time-averaged descriptors into a fixed-length vector

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use super::descriptors::{
    self, CONTRAST_BANDS, N_CHROMA, N_MELS, N_MFCC, TOP_DB,
};
use super::spectrum::{max_value, mel_filterbank, mel_power, power_to_db, stft_magnitude, AMIN};
use super::FeatureError;
use crate::audio::ingest::normalize_peak;

/// Recipe version; bump whenever the descriptor set, order or parameters change
pub const FEATURE_VERSION: u32 = 2;

/// Longest analysis frame in samples
pub const MAX_FRAME_LENGTH: usize = 2048;

/// Frame and hop used when measuring energy for silence trimming
pub const TRIM_FRAME_LENGTH: usize = 2048;
pub const TRIM_HOP_LENGTH: usize = 512;

/// Frames quieter than this many dB below the loudest frame are trimmed
pub const TRIM_TOP_DB: f32 = 60.0;

/// Tunables of the extraction recipe
/// Training and serving must use the same values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Silence threshold in dB below the loudest frame
    pub trim_top_db: f32,

    /// Upper bound on the analysis frame in samples
    pub max_frame_length: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            trim_top_db: TRIM_TOP_DB,
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

/// Descriptor blocks in concatenation order
pub const FEATURE_LAYOUT: [(&str, usize); 6] = [
    ("chroma", N_CHROMA),
    ("mfcc", N_MFCC),
    ("spectral_contrast", CONTRAST_BANDS + 1),
    ("zero_crossing_rate", 1),
    ("spectral_rolloff", 1),
    ("log_mel", N_MELS),
];

/// Length of every feature vector produced by this recipe
pub const FEATURE_DIM: usize = N_CHROMA + N_MFCC + (CONTRAST_BANDS + 1) + 1 + 1 + N_MELS;

/// Fixed-length feature vector for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        FeatureVector(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Values of one named descriptor block
    pub fn block(&self, name: &str) -> Option<&[f32]> {
        let range = FeatureLayout::range(name)?;
        self.0.get(range)
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        FeatureVector(values)
    }
}

/// Named ranges of the feature vector, exposed for training-side consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub version: u32,
    pub dimension: usize,
    pub blocks: Vec<FeatureBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBlock {
    pub name: String,
    pub offset: usize,
    pub len: usize,
}

impl FeatureLayout {
    pub fn current() -> Self {
        let mut offset = 0;
        let blocks = FEATURE_LAYOUT
            .iter()
            .map(|&(name, len)| {
                let block = FeatureBlock {
                    name: name.to_string(),
                    offset,
                    len,
                };
                offset += len;
                block
            })
            .collect();

        FeatureLayout {
            version: FEATURE_VERSION,
            dimension: FEATURE_DIM,
            blocks,
        }
    }

    /// Index range of a named block
    pub fn range(name: &str) -> Option<std::ops::Range<usize>> {
        let mut offset = 0;
        for &(block, len) in FEATURE_LAYOUT.iter() {
            if block == name {
                return Some(offset..offset + len);
            }
            offset += len;
        }
        None
    }
}

/// Analysis frame for a trimmed segment: full frame unless the segment is shorter
pub fn analysis_frame(segment_len: usize, max_frame_length: usize) -> (usize, usize) {
    let frame_length = segment_len.min(max_frame_length).max(1);
    let hop_length = (frame_length / 4).max(1);
    (frame_length, hop_length)
}

/// Drop leading and trailing near-silence
/// Returns the kept sub-slice, empty when everything is silent
pub fn trim_silence(samples: &[f32], top_db: f32) -> &[f32] {
    let rms = descriptors::rms_frames(samples, TRIM_FRAME_LENGTH, TRIM_HOP_LENGTH);
    let energy: Vec<f32> = rms.iter().map(|r| r * r).collect();
    let peak = energy.iter().cloned().fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return &samples[..0];
    }

    let ref_db = 10.0 * peak.max(AMIN).log10();
    let loud = |e: f32| 10.0 * e.max(AMIN).log10() - ref_db > -top_db;

    let first = energy.iter().position(|&e| loud(e));
    let last = energy.iter().rposition(|&e| loud(e));

    match (first, last) {
        (Some(first), Some(last)) => {
            let start = (first * TRIM_HOP_LENGTH).min(samples.len());
            let end = ((last + 1) * TRIM_HOP_LENGTH).min(samples.len());
            &samples[start..end.max(start)]
        }
        _ => &samples[..0],
    }
}

fn time_mean(values: &Array2<f32>) -> Vec<f32> {
    values
        .mean_axis(Axis(1))
        .map(|m| m.to_vec())
        .unwrap_or_else(|| vec![0.0; values.nrows()])
}

/// NaN and infinities become 0.0
fn zero_non_finite(values: &mut [f32]) {
    for value in values.iter_mut() {
        if !value.is_finite() {
            *value = 0.0;
        }
    }
}

fn scalar_mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Feature extractor for one recipe version
/// Filterbanks are rebuilt per call because the frame size follows the segment
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        FeatureExtractor { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn version(&self) -> u32 {
        FEATURE_VERSION
    }

    pub fn dimension(&self) -> usize {
        FEATURE_DIM
    }

    /// Extract the feature vector of one segment: trim, re-normalize, describe
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureVector, FeatureError> {
        let signal = self.prepare(samples)?;
        self.describe(&signal, sample_rate)
    }

    /// Trimmed, peak-normalized copy of a segment; the signal the descriptors see
    pub fn prepare(&self, samples: &[f32]) -> Result<Vec<f32>, FeatureError> {
        let trimmed = trim_silence(samples, self.config.trim_top_db);
        if trimmed.is_empty() {
            return Err(FeatureError::EmptySegment);
        }

        let mut signal = trimmed.to_vec();
        normalize_peak(&mut signal);
        Ok(signal)
    }

    /// Compute and concatenate the descriptors of an already trimmed, normalized signal
    pub fn describe(&self, signal: &[f32], sample_rate: u32) -> Result<FeatureVector, FeatureError> {
        if signal.is_empty() {
            return Err(FeatureError::EmptySegment);
        }
        if sample_rate == 0 {
            return Err(FeatureError::InvalidSampleRate);
        }

        let (n_fft, hop) = analysis_frame(signal.len(), self.config.max_frame_length);
        let magnitudes = stft_magnitude(signal, n_fft, hop)?;
        let power = magnitudes.mapv(|m| m * m);

        let mel_bank = mel_filterbank(sample_rate, n_fft, N_MELS, 0.0, sample_rate as f32 / 2.0);
        let mel = mel_power(&magnitudes, &mel_bank);

        let chroma = descriptors::chroma(&power, sample_rate, n_fft);
        let mfcc = descriptors::mfcc(&mel);
        let contrast = descriptors::spectral_contrast(&magnitudes, sample_rate, n_fft);
        let zcr = descriptors::zero_crossing_rate(signal, n_fft, hop);
        let rolloff = descriptors::spectral_rolloff(&magnitudes, sample_rate, n_fft);
        let log_mel = power_to_db(&mel, max_value(&mel), Some(TOP_DB));

        let mut values = Vec::with_capacity(FEATURE_DIM);
        values.extend(time_mean(&chroma));
        values.extend(time_mean(&mfcc));
        values.extend(time_mean(&contrast));
        values.push(scalar_mean(&zcr));
        values.push(scalar_mean(&rolloff));
        values.extend(time_mean(&log_mel));

        zero_non_finite(&mut values);

        if values.len() != FEATURE_DIM {
            return Err(FeatureError::LayoutMismatch {
                expected: FEATURE_DIM,
                actual: values.len(),
            });
        }

        log::trace!(
            "Extracted {} features (frame {}, hop {}, {} samples)",
            values.len(),
            n_fft,
            hop,
            signal.len()
        );

        Ok(FeatureVector(values))
    }
}

/// Extract features from a segment with the current recipe
pub fn extract(samples: &[f32], sample_rate: u32) -> Result<FeatureVector, FeatureError> {
    FeatureExtractor::default().extract(samples, sample_rate)
}
