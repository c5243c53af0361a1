// Audio ingestion module
// Decodes WAV and compressed audio, down-mixes to mono, resamples and peak-normalizes

use hound::{SampleFormat, WavReader};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::audio::Segment;

/// Default analysis sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Frames handed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV data: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Failed to decode audio stream: {0}")]
    DecodeFailed(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Resampling failed: {0}")]
    ResampleFailed(String),

    #[error("Audio stream contains no samples")]
    Empty,
}

/// Raw decoded audio, interleaved, before mono conversion and resampling
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples in range [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Total number of frames (samples / channels)
    pub frame_count: usize,
}

impl AudioData {
    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Mono waveform at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Waveform {
            samples,
            sample_rate,
        }
    }

    /// Build a waveform and peak-normalize it
    pub fn normalized(samples: Vec<f32>, sample_rate: u32) -> Self {
        let mut waveform = Waveform::new(samples, sample_rate);
        normalize_peak(&mut waveform.samples);
        waveform
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Borrow the samples covered by a segment, clamped to the waveform bounds
    pub fn slice(&self, segment: &Segment) -> &[f32] {
        let end = segment.end_sample.min(self.samples.len());
        let start = segment.start_sample.min(end);
        &self.samples[start..end]
    }

    /// Peak absolute amplitude
    pub fn peak(&self) -> f32 {
        peak_amplitude(&self.samples)
    }
}

/// Largest absolute sample value, 0.0 for empty input
pub fn peak_amplitude(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// Divide every sample by the peak magnitude
/// Silent input is left untouched
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = peak_amplitude(samples);
    if peak > 0.0 && peak.is_finite() {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}

/// Decode audio bytes into a normalized mono waveform at `target_rate`
pub fn load_waveform(data: &[u8], target_rate: u32) -> Result<Waveform, AudioError> {
    let audio = decode_audio(data)?;
    if audio.frame_count == 0 {
        return Err(AudioError::Empty);
    }

    let mono = audio.to_mono();
    let samples = resample(&mono, audio.sample_rate, target_rate)?;

    log::debug!(
        "Decoded {} frames at {} Hz ({} ch) -> {} samples at {} Hz",
        audio.frame_count,
        audio.sample_rate,
        audio.channels,
        samples.len(),
        target_rate
    );

    Ok(Waveform::normalized(samples, target_rate))
}

/// Decode any supported container; RIFF/WAVE goes through hound
pub fn decode_audio(data: &[u8]) -> Result<AudioData, AudioError> {
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
        ingest_wav(data)
    } else {
        decode_compressed(data)
    }
}

/// Ingest a WAV file from raw bytes
pub fn ingest_wav(data: &[u8]) -> Result<AudioData, AudioError> {
    let cursor = Cursor::new(data);
    let mut reader = WavReader::new(cursor)?;

    let spec = reader.spec();
    let channels = spec.channels;
    let bit_depth = spec.bits_per_sample;

    if channels == 0 {
        return Err(AudioError::UnsupportedFormat("zero channels".to_string()));
    }

    // Read and normalize samples to f32 [-1.0, 1.0]
    let samples: Vec<f32> = match (spec.sample_format, bit_depth) {
        (SampleFormat::Int, 8) => {
            // hound yields 8-bit PCM already re-centred around zero
            reader
                .samples::<i32>()
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|s| s as f32 / 128.0)
                .collect()
        }
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 8388608.0)
            .collect(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                format, bits
            )));
        }
    };

    let frame_count = samples.len() / channels as usize;

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
        channels,
        frame_count,
    })
}

/// Decode MP3/AAC/FLAC/OGG and friends with symphonia
fn decode_compressed(data: &[u8]) -> Result<AudioData, AudioError> {
    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::UnsupportedFormat("no audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::UnsupportedFormat("unknown sample rate".to_string()))?;
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                log::warn!("Skipping corrupt audio packet: {}", e);
                continue;
            }
            Err(e) => return Err(AudioError::DecodeFailed(e.to_string())),
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            if channels == 0 {
                channels = spec.channels.count() as u16;
            }
            sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if channels == 0 {
        return Err(AudioError::Empty);
    }

    let frame_count = samples.len() / channels as usize;

    Ok(AudioData {
        samples,
        sample_rate,
        channels,
        frame_count,
    })
}

/// Resample a mono signal with a windowed-sinc interpolator
/// Output is delay-compensated and has round(len * to / from) samples
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, AudioError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(AudioError::UnsupportedFormat(format!(
            "invalid sample rate conversion {} -> {}",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;

    while samples.len() - position >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = [&samples[position..position + needed]];
        let out = resampler
            .process(&chunk[..], None)
            .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
        output.extend_from_slice(&out[0]);
        position += needed;
    }

    if position < samples.len() {
        let chunk = [&samples[position..]];
        let out = resampler
            .process_partial(Some(&chunk[..]), None)
            .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
        output.extend_from_slice(&out[0]);
    }

    // Flush the filter tail until the delayed output is complete
    while output.len() < expected + delay {
        let out = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| AudioError::ResampleFailed(e.to_string()))?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let mut resampled: Vec<f32> = output.into_iter().skip(delay).take(expected).collect();
    resampled.resize(expected, 0.0);
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_audio_data_to_mono() {
        // Create stereo audio: [L, R, L, R, L, R]
        let audio_data = AudioData {
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            sample_rate: 44100,
            channels: 2,
            frame_count: 3,
        };

        let mono = audio_data.to_mono();

        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.15).abs() < 1e-6);
        assert!((mono[1] - 0.35).abs() < 1e-6);
        assert!((mono[2] - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_peak() {
        let mut samples = vec![0.25, -0.5, 0.1];
        normalize_peak(&mut samples);
        assert_eq!(samples, vec![0.5, -1.0, 0.2]);
    }

    #[test]
    fn test_normalize_silence_is_noop() {
        let mut samples = vec![0.0; 64];
        normalize_peak(&mut samples);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_ingest_wav_16bit_stereo() {
        let bytes = wav_bytes(&[16384, -16384, 8192, -8192], 22050, 2);
        let audio = ingest_wav(&bytes).unwrap();

        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frame_count, 2);
        assert!((audio.samples[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_load_waveform_normalizes() {
        let bytes = wav_bytes(&[0, 8192, -4096, 0], DEFAULT_SAMPLE_RATE, 1);
        let waveform = load_waveform(&bytes, DEFAULT_SAMPLE_RATE).unwrap();

        assert_eq!(waveform.len(), 4);
        assert!((waveform.peak() - 1.0).abs() < 1e-6);
        assert!((waveform.samples[2] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let result = load_waveform(b"definitely not audio", DEFAULT_SAMPLE_RATE);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_wav_fails() {
        let bytes = wav_bytes(&[], DEFAULT_SAMPLE_RATE, 1);
        assert!(matches!(
            load_waveform(&bytes, DEFAULT_SAMPLE_RATE),
            Err(AudioError::Empty)
        ));
    }

    #[test]
    fn test_decode_compressed_reads_every_packet() {
        let samples: Vec<i16> = (0..22050).map(|i| ((i % 200) as i16 - 100) * 100).collect();
        let bytes = wav_bytes(&samples, 22050, 1);

        let audio = decode_compressed(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.channels, 1);
        assert_eq!(audio.frame_count, 22050);
        assert_eq!(audio.samples.len(), 22050);
        assert!((audio.samples[1] - (-9900.0 / 32768.0)).abs() < 1e-4);
    }

    #[test]
    fn test_decode_compressed_stereo_downmix() {
        // Left at +0.5, right at -0.25 for 0.5 s
        let samples: Vec<i16> = (0..11025).flat_map(|_| [16384i16, -8192]).collect();
        let bytes = wav_bytes(&samples, 44100, 2);

        let audio = decode_compressed(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frame_count, 11025);

        let mono = audio.to_mono();
        assert_eq!(mono.len(), 11025);
        assert!(mono.iter().all(|&s| (s - 0.125).abs() < 1e-3));
    }

    #[test]
    fn test_resample_length() {
        let samples: Vec<f32> = (0..44100)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();
        let out = resample(&samples, 44100, 22050).unwrap();
        assert_eq!(out.len(), 22050);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 22050, 22050).unwrap(), samples);
    }
}
