// Segmentation
// Splits a waveform at detected onsets into ordered, non-overlapping segments

use serde::{Deserialize, Serialize};

use crate::audio::onset::{detect_onsets, OnsetConfig};
use crate::audio::Waveform;
use crate::features::FeatureError;

/// Half-open sample range [start_sample, end_sample) within a waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    /// Position among the segments retained for this waveform
    pub index: usize,
    pub start_sample: usize,
    pub end_sample: usize,
    pub sample_rate: u32,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end_sample.saturating_sub(self.start_sample)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start_time(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate as f64
    }

    pub fn end_time(&self) -> f64 {
        self.end_sample as f64 / self.sample_rate as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Segments shorter than this (seconds) are dropped, never merged
    pub min_segment_duration: f64,

    pub onset: OnsetConfig,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            min_segment_duration: 0.5,
            onset: OnsetConfig::default(),
        }
    }
}

/// Onset-driven segmenter
#[derive(Debug, Clone, Default)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Segmenter { config }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Segment a normalized waveform
    /// An empty result means no span reached the duration floor
    pub fn segment(&self, waveform: &Waveform) -> Result<Vec<Segment>, FeatureError> {
        if waveform.sample_rate == 0 {
            return Err(FeatureError::InvalidSampleRate);
        }

        let onsets = detect_onsets(waveform, &self.config.onset)?;
        let positions: Vec<usize> = onsets.iter().map(|o| o.sample).collect();

        let segments = segments_from_onsets(
            &positions,
            waveform.len(),
            waveform.sample_rate,
            self.config.min_segment_duration,
        );

        log::info!(
            "Segmented {:.2}s of audio: {} onsets, {} segments kept",
            waveform.duration_secs(),
            positions.len(),
            segments.len()
        );

        Ok(segments)
    }
}

/// Build segments from onset sample positions
/// Boundaries are {0} ∪ onsets ∪ {total_len}, sorted and deduplicated; spans shorter than
/// `min_duration` seconds are discarded
pub fn segments_from_onsets(
    onsets: &[usize],
    total_len: usize,
    sample_rate: u32,
    min_duration: f64,
) -> Vec<Segment> {
    if total_len == 0 || sample_rate == 0 {
        return Vec::new();
    }

    let mut boundaries = Vec::with_capacity(onsets.len() + 2);
    boundaries.push(0);
    boundaries.extend(onsets.iter().map(|&s| s.min(total_len)));
    boundaries.push(total_len);
    boundaries.sort_unstable();
    boundaries.dedup();

    let min_samples = min_duration.max(0.0) * sample_rate as f64;

    boundaries
        .windows(2)
        .filter(|pair| (pair[1] - pair[0]) as f64 >= min_samples)
        .enumerate()
        .map(|(index, pair)| Segment {
            index,
            start_sample: pair[0],
            end_sample: pair[1],
            sample_rate,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    #[test]
    fn test_segment_timing() {
        let seg = Segment {
            index: 0,
            start_sample: 11025,
            end_sample: 33075,
            sample_rate: SR,
        };
        assert_eq!(seg.len(), 22050);
        assert!((seg.start_time() - 0.5).abs() < 1e-9);
        assert!((seg.end_time() - 1.5).abs() < 1e-9);
        assert!((seg.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_onsets_gives_whole_clip() {
        let segments = segments_from_onsets(&[], 44100, SR, 0.5);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_sample, 0);
        assert_eq!(segments[0].end_sample, 44100);
    }

    #[test]
    fn test_short_spans_dropped_not_merged() {
        // 0..2000 is too short and is discarded; the next span keeps its own start
        let segments = segments_from_onsets(&[2000, 30000], 60000, SR, 0.5);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_sample, 2000);
        assert_eq!(segments[0].end_sample, 30000);
        assert_eq!(segments[1].start_sample, 30000);
        assert_eq!(segments[0].index, 0);
        assert_eq!(segments[1].index, 1);
    }

    #[test]
    fn test_duplicate_and_unsorted_onsets() {
        let segments = segments_from_onsets(&[44100, 0, 22050, 44100], 66150, SR, 0.5);
        let starts: Vec<usize> = segments.iter().map(|s| s.start_sample).collect();
        assert_eq!(starts, vec![0, 22050, 44100]);
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_sample, pair[1].start_sample);
        }
    }

    #[test]
    fn test_clip_shorter_than_floor() {
        let segments = segments_from_onsets(&[], (0.2 * SR as f64) as usize, SR, 0.5);
        assert!(segments.is_empty());
    }

    #[test]
    fn test_segmenter_on_two_impulses() {
        let mut samples = vec![0.0f32; SR as usize * 4];
        samples[0] = 1.0;
        samples[SR as usize * 2] = 1.0;
        let waveform = Waveform::new(samples, SR);

        let segments = Segmenter::default().segment(&waveform).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_sample, 0);
        assert!((segments[1].start_time() - 2.0).abs() < 0.05);
        assert_eq!(segments[1].end_sample, waveform.len());
        for seg in &segments {
            assert!(seg.duration_secs() >= 0.5);
        }
    }
}
