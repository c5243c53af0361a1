// Onset detection
// Mel-band spectral flux envelope, adaptive peak picking and backtracking to the preceding energy minimum

use serde::{Deserialize, Serialize};

use crate::audio::Waveform;
use crate::features::descriptors::TOP_DB;
use crate::features::spectrum::{mel_filterbank, mel_power, power_to_db, stft_magnitude};
use crate::features::FeatureError;

/// Onset detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Onset {
    /// Analysis frame index (after backtracking when enabled)
    pub frame: usize,

    /// First sample of the onset
    pub sample: usize,

    /// Onset time in seconds from start of audio
    pub time_secs: f64,

    /// Normalized onset strength of the detected peak [0.0, 1.0]
    pub strength: f32,
}

/// Configuration for onset detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// FFT window size in samples
    pub window_size: usize,

    /// Hop size in samples (advance between frames)
    pub hop_size: usize,

    /// Mel bands aggregated into the flux envelope
    pub n_mels: usize,

    /// Peak must exceed the local average by this much (envelope normalized to [0, 1])
    pub delta: f32,

    /// Local-maximum search window before / after a candidate, in seconds
    pub pre_max_secs: f64,
    pub post_max_secs: f64,

    /// Local-average window before / after a candidate, in seconds
    pub pre_avg_secs: f64,
    pub post_avg_secs: f64,

    /// Minimum time between onsets in seconds
    pub wait_secs: f64,

    /// Move each onset back to the preceding local minimum of the envelope
    pub backtrack: bool,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        OnsetConfig {
            window_size: 2048,
            hop_size: 512,
            n_mels: 128,
            delta: 0.07,
            pre_max_secs: 0.03,
            post_max_secs: 0.0,
            pre_avg_secs: 0.10,
            post_avg_secs: 0.10,
            wait_secs: 0.03,
            backtrack: true,
        }
    }
}

/// Peak-picking windows expressed in frames
#[derive(Debug, Clone, Copy, PartialEq)]
struct PeakWindows {
    pre_max: usize,
    post_max: usize,
    pre_avg: usize,
    post_avg: usize,
    wait: usize,
}

impl PeakWindows {
    fn from_config(config: &OnsetConfig, sample_rate: u32) -> Self {
        let frames = |secs: f64| (secs * sample_rate as f64 / config.hop_size as f64).floor() as usize;
        PeakWindows {
            pre_max: frames(config.pre_max_secs),
            post_max: frames(config.post_max_secs) + 1,
            pre_avg: frames(config.pre_avg_secs),
            post_avg: frames(config.post_avg_secs) + 1,
            wait: frames(config.wait_secs),
        }
    }
}

/// Detect onsets in a normalized waveform
/// Returns onsets sorted by position with duplicates removed
pub fn detect_onsets(waveform: &Waveform, config: &OnsetConfig) -> Result<Vec<Onset>, FeatureError> {
    if waveform.is_empty() {
        return Ok(Vec::new());
    }

    let envelope = onset_strength(&waveform.samples, waveform.sample_rate, config)?;
    let normalized = normalize_envelope(&envelope);

    let peaks = pick_onset_peaks(&normalized, waveform.sample_rate, config);
    let frames = if config.backtrack {
        backtrack(&peaks, &normalized)
    } else {
        peaks.clone()
    };

    let mut onsets: Vec<Onset> = frames
        .iter()
        .zip(peaks.iter())
        .map(|(&frame, &peak)| {
            let sample = (frame * config.hop_size).min(waveform.len());
            Onset {
                frame,
                sample,
                time_secs: sample as f64 / waveform.sample_rate as f64,
                strength: normalized[peak],
            }
        })
        .collect();

    onsets.sort_by_key(|o| o.sample);
    onsets.dedup_by_key(|o| o.sample);

    log::debug!(
        "Detected {} onsets over {} frames",
        onsets.len(),
        envelope.len()
    );

    Ok(onsets)
}

/// Onset strength envelope: mean positive first difference of the dB mel spectrogram
/// Shifted by half a window so that frame `t` describes audio arriving around sample `t * hop`
pub fn onset_strength(
    samples: &[f32],
    sample_rate: u32,
    config: &OnsetConfig,
) -> Result<Vec<f32>, FeatureError> {
    if sample_rate == 0 {
        return Err(FeatureError::InvalidSampleRate);
    }

    let magnitudes = stft_magnitude(samples, config.window_size, config.hop_size)?;
    let bank = mel_filterbank(
        sample_rate,
        config.window_size,
        config.n_mels,
        0.0,
        sample_rate as f32 / 2.0,
    );
    let db = power_to_db(&mel_power(&magnitudes, &bank), 1.0, Some(TOP_DB));

    let (n_bands, n_frames) = db.dim();
    if n_frames == 0 || n_bands == 0 {
        return Ok(Vec::new());
    }

    // Compute spectral flux across all frames; first frame has no flux
    let mut flux = vec![0.0f32; n_frames];
    for t in 1..n_frames {
        let mut sum = 0.0;
        for band in 0..n_bands {
            let diff = db[[band, t]] - db[[band, t - 1]];
            if diff > 0.0 {
                sum += diff;
            }
        }
        flux[t] = sum / n_bands as f32;
    }

    let shift = config.window_size / (2 * config.hop_size);
    let mut envelope = vec![0.0f32; n_frames];
    for t in shift..n_frames {
        envelope[t] = flux[t - shift];
    }

    Ok(envelope)
}

/// Rescale the envelope to [0, 1]; a flat envelope becomes all zeros
fn normalize_envelope(envelope: &[f32]) -> Vec<f32> {
    let min = envelope.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = envelope.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    if !range.is_finite() || range <= 0.0 {
        return vec![0.0; envelope.len()];
    }

    envelope.iter().map(|v| (v - min) / range).collect()
}

/// Pick onset peaks from the normalized envelope using local max / local mean tests
fn pick_onset_peaks(envelope: &[f32], sample_rate: u32, config: &OnsetConfig) -> Vec<usize> {
    if envelope.is_empty() || config.hop_size == 0 {
        return Vec::new();
    }

    let windows = PeakWindows::from_config(config, sample_rate);
    let len = envelope.len();
    let mut peaks = Vec::new();
    let mut next_allowed = 0;

    for i in 0..len {
        if i < next_allowed {
            continue;
        }

        let max_start = i.saturating_sub(windows.pre_max);
        let max_end = (i + windows.post_max).min(len);
        let local_max = envelope[max_start..max_end]
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        if envelope[i] < local_max {
            continue;
        }

        let avg_start = i.saturating_sub(windows.pre_avg);
        let avg_end = (i + windows.post_avg).min(len);
        let window = &envelope[avg_start..avg_end];
        let local_mean = window.iter().sum::<f32>() / window.len() as f32;

        if envelope[i] >= local_mean + config.delta {
            peaks.push(i);
            next_allowed = i + windows.wait + 1;
        }
    }

    peaks
}

/// Move each onset to the nearest preceding local minimum of `energy`
/// Frame 0 always counts as a minimum
pub fn backtrack(onsets: &[usize], energy: &[f32]) -> Vec<usize> {
    let mut minima = vec![0usize];
    if energy.len() >= 3 {
        for i in 1..energy.len() - 1 {
            if energy[i] <= energy[i - 1] && energy[i] < energy[i + 1] {
                minima.push(i);
            }
        }
    }

    onsets
        .iter()
        .map(|&onset| {
            minima
                .iter()
                .rev()
                .find(|&&m| m <= onset)
                .copied()
                .unwrap_or(0)
        })
        .collect()
}
