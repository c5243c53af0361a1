// State management module
// Trained artifact storage and segment playback storage

pub mod artifacts;
pub mod segments;

pub use artifacts::{
    calculate_sha256, load_bundle, save_bundle, ArtifactBundle, ArtifactLoadError, ArtifactStore,
    DirectoryStore, Manifest, MemoryStore, LABELS_ARTIFACT, MANIFEST_ARTIFACT, MODEL_ARTIFACT,
    SCALER_ARTIFACT,
};
pub use segments::{
    encode_wav, MemorySegmentStore, SegmentAudio, SegmentRef, SegmentStore, SegmentStoreError,
    WavSegmentStore,
};
