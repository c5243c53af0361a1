// Segment playback storage
// Persists segment audio as 16-bit PCM WAV so clients can replay what was classified
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

pub const WAV_CONTENT_TYPE: &str = "audio/wav";

#[derive(Debug, Error)]
pub enum SegmentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),

    #[error("Segment not found: {0}")]
    NotFound(Uuid),

    #[error("Segment store lock poisoned")]
    Poisoned,
}

/// Opaque handle to a stored segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentRef {
    pub id: Uuid,
}

impl SegmentRef {
    pub fn new() -> Self {
        SegmentRef { id: Uuid::new_v4() }
    }

    /// File name used by on-disk stores
    pub fn file_name(&self) -> String {
        format!("{}.wav", self.id)
    }
}

impl Default for SegmentRef {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoded segment ready to be served
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentAudio {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

pub trait SegmentStore: Send + Sync {
    fn put(&self, samples: &[f32], sample_rate: u32) -> Result<SegmentRef, SegmentStoreError>;

    fn get(&self, segment: &SegmentRef) -> Result<SegmentAudio, SegmentStoreError>;

    /// Delete a stored segment; NotFound if it was never stored or already removed
    fn remove(&self, segment: &SegmentRef) -> Result<(), SegmentStoreError>;
}

/// Encode mono samples in [-1.0, 1.0] as a 16-bit PCM WAV file
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SegmentStoreError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * i16::MAX as f32).round() as i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Segments written as `<uuid>.wav` under one directory
#[derive(Debug, Clone)]
pub struct WavSegmentStore {
    dir: PathBuf,
}

impl WavSegmentStore {
    /// Create the store, making the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SegmentStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(WavSegmentStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, segment: &SegmentRef) -> PathBuf {
        self.dir.join(segment.file_name())
    }
}

impl SegmentStore for WavSegmentStore {
    fn put(&self, samples: &[f32], sample_rate: u32) -> Result<SegmentRef, SegmentStoreError> {
        let segment = SegmentRef::new();
        let bytes = encode_wav(samples, sample_rate)?;
        fs::write(self.path_for(&segment), bytes)?;
        log::debug!("Stored segment {} ({} samples)", segment.id, samples.len());
        Ok(segment)
    }

    fn get(&self, segment: &SegmentRef) -> Result<SegmentAudio, SegmentStoreError> {
        match fs::read(self.path_for(segment)) {
            Ok(bytes) => Ok(SegmentAudio {
                bytes,
                content_type: WAV_CONTENT_TYPE,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SegmentStoreError::NotFound(segment.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, segment: &SegmentRef) -> Result<(), SegmentStoreError> {
        match fs::remove_file(self.path_for(segment)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SegmentStoreError::NotFound(segment.id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Segments kept in memory for the lifetime of the store
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    segments: RwLock<HashMap<Uuid, Vec<u8>>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SegmentStore for MemorySegmentStore {
    fn put(&self, samples: &[f32], sample_rate: u32) -> Result<SegmentRef, SegmentStoreError> {
        let segment = SegmentRef::new();
        let bytes = encode_wav(samples, sample_rate)?;
        self.segments
            .write()
            .map_err(|_| SegmentStoreError::Poisoned)?
            .insert(segment.id, bytes);
        Ok(segment)
    }

    fn get(&self, segment: &SegmentRef) -> Result<SegmentAudio, SegmentStoreError> {
        let segments = self.segments.read().map_err(|_| SegmentStoreError::Poisoned)?;
        segments
            .get(&segment.id)
            .map(|bytes| SegmentAudio {
                bytes: bytes.clone(),
                content_type: WAV_CONTENT_TYPE,
            })
            .ok_or(SegmentStoreError::NotFound(segment.id))
    }

    fn remove(&self, segment: &SegmentRef) -> Result<(), SegmentStoreError> {
        self.segments
            .write()
            .map_err(|_| SegmentStoreError::Poisoned)?
            .remove(&segment.id)
            .map(|_| ())
            .ok_or(SegmentStoreError::NotFound(segment.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;
    use tempfile::TempDir;

    fn tone() -> Vec<f32> {
        (0..2205).map(|i| (i as f32 * 0.05).sin() * 0.5).collect()
    }

    #[test]
    fn test_encode_wav_is_16_bit_mono() {
        let bytes = encode_wav(&tone(), 22050).unwrap();
        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(reader.len(), 2205);
    }

    #[test]
    fn test_wav_store_put_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = WavSegmentStore::new(temp_dir.path().join("segments")).unwrap();

        let segment = store.put(&tone(), 22050).unwrap();
        assert!(store.path_for(&segment).exists());

        let audio = store.get(&segment).unwrap();
        assert_eq!(audio.content_type, "audio/wav");
        assert_eq!(&audio.bytes[0..4], b"RIFF");
    }

    #[test]
    fn test_unknown_segment() {
        let store = MemorySegmentStore::new();
        let missing = SegmentRef::new();
        assert!(matches!(
            store.get(&missing),
            Err(SegmentStoreError::NotFound(id)) if id == missing.id
        ));
    }

    #[test]
    fn test_memory_store_distinct_ids() {
        let store = MemorySegmentStore::new();
        let a = store.put(&tone(), 22050).unwrap();
        let b = store.put(&tone(), 22050).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&a).unwrap(), store.get(&b).unwrap());
    }

    #[test]
    fn test_memory_store_remove() {
        let store = MemorySegmentStore::new();
        let a = store.put(&tone(), 22050).unwrap();
        let b = store.put(&tone(), 22050).unwrap();

        store.remove(&a).unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(store.get(&a), Err(SegmentStoreError::NotFound(_))));
        assert!(store.get(&b).is_ok());
        assert!(matches!(store.remove(&a), Err(SegmentStoreError::NotFound(_))));
    }

    #[test]
    fn test_wav_store_remove_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = WavSegmentStore::new(temp_dir.path()).unwrap();

        let segment = store.put(&tone(), 22050).unwrap();
        store.remove(&segment).unwrap();
        assert!(!store.path_for(&segment).exists());
        assert!(matches!(
            store.remove(&segment),
            Err(SegmentStoreError::NotFound(id)) if id == segment.id
        ));
    }
}
