// Frame-level audio descriptors
// Chroma, MFCC, spectral contrast, zero-crossing rate, roll-off and frame energy

use ndarray::Array2;

use super::spectrum::{fft_frequencies, power_to_db};

/// Number of pitch classes in a chromagram
pub const N_CHROMA: usize = 12;

/// Number of cepstral coefficients kept
pub const N_MFCC: usize = 40;

/// Number of mel bands for MFCC and log-mel descriptors
pub const N_MELS: usize = 128;

/// Octave sub-bands for spectral contrast (plus one residual band above them)
pub const CONTRAST_BANDS: usize = 6;

/// Lower edge of the first contrast band in Hz
pub const CONTRAST_FMIN: f32 = 200.0;

/// Fraction of each band used to estimate peak and valley energy
pub const CONTRAST_QUANTILE: f32 = 0.02;

/// Fraction of spectral energy below the roll-off frequency
pub const ROLLOFF_PERCENT: f32 = 0.85;

/// Dynamic range kept when converting to decibels
pub const TOP_DB: f32 = 80.0;

/// Samples with magnitude at or below this count as zero for crossing detection
const ZERO_THRESHOLD: f32 = 1e-10;

/// Chroma filterbank, shape (n_chroma, n_fft / 2 + 1)
/// Gaussian bumps around each pitch class, octave-weighted around C5, starting at C
pub fn chroma_filterbank(sample_rate: u32, n_fft: usize, n_chroma: usize) -> Array2<f32> {
    let n_bins = n_fft / 2 + 1;
    let mut weights = Array2::<f32>::zeros((n_chroma, n_bins));
    if n_fft < 2 || n_chroma == 0 {
        return weights;
    }

    let n_chroma_f = n_chroma as f32;
    let ref_freq = 440.0 / 16.0;

    // Fractional chroma bin of every FFT bin; DC gets a made-up value 1.5 octaves below bin 1
    let mut frqbins: Vec<f32> = (1..n_fft)
        .map(|i| {
            let hz = i as f32 * sample_rate as f32 / n_fft as f32;
            n_chroma_f * (hz / ref_freq).log2()
        })
        .collect();
    let dc_bin = frqbins[0] - 1.5 * n_chroma_f;
    frqbins.insert(0, dc_bin);

    let widths: Vec<f32> = (0..frqbins.len())
        .map(|i| {
            if i + 1 < frqbins.len() {
                (frqbins[i + 1] - frqbins[i]).max(1.0)
            } else {
                1.0
            }
        })
        .collect();

    let half = (n_chroma_f / 2.0).round();
    let ctroct = 5.0;
    let octwidth = 2.0;
    // Start the bank at C rather than A
    let shift = 3 * (n_chroma / 12);

    for fbin in 0..n_bins {
        let mut column = vec![0.0f32; n_chroma];
        for (chroma, slot) in column.iter_mut().enumerate() {
            let d = (frqbins[fbin] - chroma as f32 + half + 10.0 * n_chroma_f).rem_euclid(n_chroma_f)
                - half;
            *slot = (-0.5 * (2.0 * d / widths[fbin]).powi(2)).exp();
        }

        let norm = column.iter().map(|w| w * w).sum::<f32>().sqrt();
        let octave = frqbins[fbin] / n_chroma_f;
        let octave_weight = (-0.5 * ((octave - ctroct) / octwidth).powi(2)).exp();

        for (chroma, w) in column.iter().enumerate() {
            let normalized = if norm > 0.0 { w / norm } else { 0.0 };
            let row = (chroma + n_chroma - shift) % n_chroma;
            weights[[row, fbin]] = normalized * octave_weight;
        }
    }

    weights
}

/// Chromagram from a power spectrogram, each frame scaled to unit max
pub fn chroma(power: &Array2<f32>, sample_rate: u32, n_fft: usize) -> Array2<f32> {
    let filterbank = chroma_filterbank(sample_rate, n_fft, N_CHROMA);
    let mut chroma = filterbank.dot(power);

    for mut column in chroma.columns_mut() {
        let norm = column.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        if norm > f32::MIN_POSITIVE {
            column.mapv_inplace(|v| v / norm);
        }
    }

    chroma
}

/// Orthonormal DCT-II basis, shape (n_out, n_in)
pub fn dct_matrix(n_out: usize, n_in: usize) -> Array2<f32> {
    let mut basis = Array2::<f32>::zeros((n_out, n_in));
    if n_in == 0 {
        return basis;
    }

    let n = n_in as f32;
    for k in 0..n_out {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for i in 0..n_in {
            let angle = std::f32::consts::PI * k as f32 * (2.0 * i as f32 + 1.0) / (2.0 * n);
            basis[[k, i]] = scale * angle.cos();
        }
    }

    basis
}

/// MFCCs from a mel power spectrogram, shape (N_MFCC, frames)
pub fn mfcc(mel_power: &Array2<f32>) -> Array2<f32> {
    let log_mel = power_to_db(mel_power, 1.0, Some(TOP_DB));
    dct_matrix(N_MFCC, mel_power.nrows()).dot(&log_mel)
}

/// Octave-band spectral contrast from a magnitude spectrogram, shape (CONTRAST_BANDS + 1, frames)
/// Bands too narrow to contain any FFT bin at small frame sizes stay at zero contrast
pub fn spectral_contrast(magnitudes: &Array2<f32>, sample_rate: u32, n_fft: usize) -> Array2<f32> {
    let freqs = fft_frequencies(sample_rate, n_fft);
    let n_bins = freqs.len().min(magnitudes.nrows());
    let n_frames = magnitudes.ncols();
    let n_rows = CONTRAST_BANDS + 1;

    let mut peaks = Array2::<f32>::zeros((n_rows, n_frames));
    let mut valleys = Array2::<f32>::zeros((n_rows, n_frames));
    let mut populated = vec![false; n_rows];

    let mut edges = vec![0.0f32];
    edges.extend((0..=CONTRAST_BANDS).map(|k| CONTRAST_FMIN * 2f32.powi(k as i32)));

    for k in 0..n_rows {
        let (low, high) = (edges[k], edges[k + 1]);
        let mut in_band: Vec<bool> = freqs[..n_bins]
            .iter()
            .map(|&f| f >= low && f <= high)
            .collect();

        let (first, last) = match (
            in_band.iter().position(|&b| b),
            in_band.iter().rposition(|&b| b),
        ) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };

        // Overlap one bin with the band below; the top band absorbs everything above it
        if k > 0 && first > 0 {
            in_band[first - 1] = true;
        }
        if k == CONTRAST_BANDS {
            for flag in in_band.iter_mut().skip(last + 1) {
                *flag = true;
            }
        }

        let mut rows: Vec<usize> = (0..n_bins).filter(|&b| in_band[b]).collect();
        let band_size = rows.len();
        if k < CONTRAST_BANDS && rows.len() > 1 {
            rows.pop();
        }

        let q = ((CONTRAST_QUANTILE * band_size as f32).round() as usize)
            .max(1)
            .min(rows.len());

        for t in 0..n_frames {
            let mut column: Vec<f32> = rows.iter().map(|&r| magnitudes[[r, t]]).collect();
            column.sort_by(|a, b| a.total_cmp(b));

            valleys[[k, t]] = column[..q].iter().sum::<f32>() / q as f32;
            peaks[[k, t]] = column[column.len() - q..].iter().sum::<f32>() / q as f32;
        }
        populated[k] = true;
    }

    let mut contrast =
        power_to_db(&peaks, 1.0, Some(TOP_DB)) - power_to_db(&valleys, 1.0, Some(TOP_DB));
    for (k, filled) in populated.iter().enumerate() {
        if !filled {
            contrast.row_mut(k).fill(0.0);
        }
    }

    contrast
}

/// Roll-off frequency per frame: lowest frequency below which ROLLOFF_PERCENT of the energy lies
pub fn spectral_rolloff(magnitudes: &Array2<f32>, sample_rate: u32, n_fft: usize) -> Vec<f32> {
    let freqs = fft_frequencies(sample_rate, n_fft);

    magnitudes
        .columns()
        .into_iter()
        .map(|column| {
            let total: f32 = column.sum();
            let threshold = ROLLOFF_PERCENT * total;
            let mut cumulative = 0.0f32;
            for (bin, &value) in column.iter().enumerate() {
                cumulative += value;
                if cumulative >= threshold {
                    return freqs.get(bin).copied().unwrap_or(0.0);
                }
            }
            freqs.last().copied().unwrap_or(0.0)
        })
        .collect()
}

/// Zero-crossing rate per centered frame, edge-padded
pub fn zero_crossing_rate(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() || frame_length == 0 || hop == 0 {
        return vec![0.0];
    }

    let pad = frame_length / 2;
    let first = samples[0];
    let last = samples[samples.len() - 1];
    let mut padded = Vec::with_capacity(samples.len() + 2 * pad);
    padded.extend(std::iter::repeat(first).take(pad));
    padded.extend_from_slice(samples);
    padded.extend(std::iter::repeat(last).take(pad));

    if padded.len() < frame_length {
        return vec![calculate_zcr(&padded, frame_length)];
    }

    let n_frames = 1 + (padded.len() - frame_length) / hop;
    (0..n_frames)
        .map(|frame| {
            let start = frame * hop;
            calculate_zcr(&padded[start..start + frame_length], frame_length)
        })
        .collect()
}

/// Sign changes within one frame divided by the frame length
/// Near-zero samples count as positive
fn calculate_zcr(frame: &[f32], frame_length: usize) -> f32 {
    if frame.len() < 2 || frame_length == 0 {
        return 0.0;
    }

    let negative = |x: f32| x < -ZERO_THRESHOLD;
    let crossings = frame
        .windows(2)
        .filter(|pair| negative(pair[0]) != negative(pair[1]))
        .count();

    crossings as f32 / frame_length as f32
}

/// Root-mean-square energy per centered, zero-padded frame
pub fn rms_frames(samples: &[f32], frame_length: usize, hop: usize) -> Vec<f32> {
    if frame_length == 0 || hop == 0 {
        return Vec::new();
    }

    let pad = frame_length / 2;
    let mut padded = vec![0.0f32; samples.len() + 2 * pad];
    padded[pad..pad + samples.len()].copy_from_slice(samples);

    if padded.len() < frame_length {
        return Vec::new();
    }

    let n_frames = 1 + (padded.len() - frame_length) / hop;
    (0..n_frames)
        .map(|frame| {
            let start = frame * hop;
            let energy: f32 = padded[start..start + frame_length]
                .iter()
                .map(|s| s * s)
                .sum();
            (energy / frame_length as f32).sqrt()
        })
        .collect()
}
