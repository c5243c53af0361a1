// Short-time spectral analysis
// Centered STFT, mel filterbanks and dB conversion shared by onset detection and feature extraction

use ndarray::Array2;
use realfft::RealFftPlanner;

use super::FeatureError;

/// Smallest power considered when converting to decibels
pub const AMIN: f32 = 1e-10;

/// Periodic Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    let mut window = vec![1.0; n];
    apply_hann_window(&mut window);
    window
}

/// Apply Hann window function to reduce spectral leakage
pub fn apply_hann_window(samples: &mut [f32]) {
    let n = samples.len();
    if n == 0 {
        return;
    }

    for (i, sample) in samples.iter_mut().enumerate() {
        let window_val = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos());
        *sample *= window_val;
    }
}

/// Centered magnitude STFT, shape (n_fft / 2 + 1, frames)
/// The signal is zero-padded by n_fft / 2 on both sides so frame `t` is centred on sample `t * hop`
pub fn stft_magnitude(samples: &[f32], n_fft: usize, hop: usize) -> Result<Array2<f32>, FeatureError> {
    if n_fft == 0 || hop == 0 {
        return Err(FeatureError::InvalidFrame { n_fft, hop });
    }

    let pad = n_fft / 2;
    let mut padded = vec![0.0f32; samples.len() + 2 * pad];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    let n_frames = if padded.len() >= n_fft {
        1 + (padded.len() - n_fft) / hop
    } else {
        0
    };
    let n_bins = n_fft / 2 + 1;

    let window = hann_window(n_fft);
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut input = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();

    let mut magnitudes = Array2::<f32>::zeros((n_bins, n_frames));

    for frame in 0..n_frames {
        let start = frame * hop;
        for (i, slot) in input.iter_mut().enumerate() {
            *slot = padded[start + i] * window[i];
        }

        fft.process(&mut input, &mut spectrum)
            .map_err(|e| FeatureError::Fft(e.to_string()))?;

        for (bin, value) in spectrum.iter().enumerate() {
            magnitudes[[bin, frame]] = value.norm();
        }
    }

    Ok(magnitudes)
}

/// Centre frequency of every STFT bin in Hz
pub fn fft_frequencies(sample_rate: u32, n_fft: usize) -> Vec<f32> {
    let n_bins = n_fft / 2 + 1;
    (0..n_bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect()
}

/// Slaney-style mel scale (linear below 1 kHz, logarithmic above)
pub fn hz_to_mel(hz: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;

    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Triangular mel filterbank with Slaney area normalization, shape (n_mels, n_fft / 2 + 1)
pub fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Array2<f32> {
    let fft_freqs = fft_frequencies(sample_rate, n_fft);
    let mut weights = Array2::<f32>::zeros((n_mels, fft_freqs.len()));

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    for m in 0..n_mels {
        let left = hz_points[m];
        let center = hz_points[m + 1];
        let right = hz_points[m + 2];
        let lower_width = center - left;
        let upper_width = right - center;
        if lower_width <= 0.0 || upper_width <= 0.0 {
            continue;
        }

        let enorm = 2.0 / (right - left);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / lower_width;
            let upper = (right - freq) / upper_width;
            let w = lower.min(upper).max(0.0);
            weights[[m, k]] = w * enorm;
        }
    }

    weights
}

/// Mel power spectrogram from a magnitude STFT
pub fn mel_power(magnitudes: &Array2<f32>, filterbank: &Array2<f32>) -> Array2<f32> {
    let power = magnitudes.mapv(|m| m * m);
    filterbank.dot(&power)
}

/// Convert power to decibels relative to `reference`, clipping to `top_db` below the peak
pub fn power_to_db(power: &Array2<f32>, reference: f32, top_db: Option<f32>) -> Array2<f32> {
    let ref_db = 10.0 * reference.abs().max(AMIN).log10();
    let mut db = power.mapv(|p| 10.0 * p.max(AMIN).log10() - ref_db);

    if let Some(top_db) = top_db {
        let peak = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        if peak.is_finite() {
            let floor = peak - top_db;
            db.mapv_inplace(|v| v.max(floor));
        }
    }

    db
}

/// Largest value in a spectrogram, 0.0 when empty
pub fn max_value(values: &Array2<f32>) -> f32 {
    values.iter().cloned().fold(0.0f32, f32::max)
}
