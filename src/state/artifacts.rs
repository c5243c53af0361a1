// Artifact storage for trained model files
// Named blobs (model, scaler, labels, manifest) with SHA256 and feature-version checks at load
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

use crate::features::{FEATURE_DIM, FEATURE_VERSION};
use crate::model::{DenseNetwork, LabelSpace, NetworkSpec, ScalingParameters};

pub const MODEL_ARTIFACT: &str = "model.json";
pub const SCALER_ARTIFACT: &str = "scaler.json";
pub const LABELS_ARTIFACT: &str = "labels.json";
pub const MANIFEST_ARTIFACT: &str = "manifest.json";

#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("IO error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed artifact {name}: {reason}")]
    Malformed { name: String, reason: String },

    #[error("Digest mismatch for {name}: manifest {expected}, actual {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("{name} was produced with feature version {found}, this build extracts version {expected}")]
    VersionSkew {
        name: String,
        expected: u32,
        found: u32,
    },

    #[error("Artifact store lock poisoned")]
    Poisoned,
}

pub type ArtifactResult<T> = Result<T, ArtifactLoadError>;

/// Source of trained artifacts, addressed by file name
pub trait ArtifactStore: Send + Sync {
    fn load(&self, name: &str) -> ArtifactResult<Vec<u8>>;

    fn store(&self, name: &str, data: &[u8]) -> ArtifactResult<()>;
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn check_name(name: &str) -> ArtifactResult<()> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(ArtifactLoadError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Artifacts stored as files in one directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for DirectoryStore {
    fn load(&self, name: &str) -> ArtifactResult<Vec<u8>> {
        check_name(name)?;
        fs::read(self.root.join(name)).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ArtifactLoadError::NotFound(name.to_string())
            } else {
                ArtifactLoadError::Io {
                    name: name.to_string(),
                    source,
                }
            }
        })
    }

    fn store(&self, name: &str, data: &[u8]) -> ArtifactResult<()> {
        check_name(name)?;
        let io_err = |source| ArtifactLoadError::Io {
            name: name.to_string(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(io_err)?;
        let mut file = fs::File::create(self.root.join(name)).map_err(io_err)?;
        file.write_all(data).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        Ok(())
    }
}

/// In-memory artifacts, for tests and embedding callers
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactStore for MemoryStore {
    fn load(&self, name: &str) -> ArtifactResult<Vec<u8>> {
        check_name(name)?;
        let blobs = self.blobs.read().map_err(|_| ArtifactLoadError::Poisoned)?;
        blobs
            .get(name)
            .cloned()
            .ok_or_else(|| ArtifactLoadError::NotFound(name.to_string()))
    }

    fn store(&self, name: &str, data: &[u8]) -> ArtifactResult<()> {
        check_name(name)?;
        let mut blobs = self.blobs.write().map_err(|_| ArtifactLoadError::Poisoned)?;
        blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

/// Provenance record written next to the artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub feature_version: u32,
    pub feature_dim: usize,
    pub created_at: DateTime<Utc>,

    /// Artifact name -> hex SHA256
    pub artifacts: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest {
            feature_version: FEATURE_VERSION,
            feature_dim: FEATURE_DIM,
            created_at: Utc::now(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, name: &str, data: &[u8]) {
        self.artifacts.insert(name.to_string(), calculate_sha256(data));
    }

    /// Check an artifact's bytes against its recorded digest; unlisted artifacts pass
    pub fn verify(&self, name: &str, data: &[u8]) -> ArtifactResult<()> {
        if let Some(expected) = self.artifacts.get(name) {
            let actual = calculate_sha256(data);
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(ArtifactLoadError::DigestMismatch {
                    name: name.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything inference needs, decoded and checked
#[derive(Debug)]
pub struct ArtifactBundle {
    pub network: DenseNetwork,
    pub scaler: ScalingParameters,
    pub labels: LabelSpace,
    pub manifest: Option<Manifest>,
}

fn parse_json<T: serde::de::DeserializeOwned>(name: &str, data: &[u8]) -> ArtifactResult<T> {
    serde_json::from_slice(data).map_err(|e| ArtifactLoadError::Malformed {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn check_version(name: &str, found: u32) -> ArtifactResult<()> {
    if found != FEATURE_VERSION {
        log::error!(
            "{} feature version {} does not match extractor version {}",
            name,
            found,
            FEATURE_VERSION
        );
        return Err(ArtifactLoadError::VersionSkew {
            name: name.to_string(),
            expected: FEATURE_VERSION,
            found,
        });
    }
    Ok(())
}

/// Load and verify model, scaler and labels from a store
pub fn load_bundle(store: &dyn ArtifactStore) -> ArtifactResult<ArtifactBundle> {
    let manifest: Option<Manifest> = match store.load(MANIFEST_ARTIFACT) {
        Ok(bytes) => Some(parse_json(MANIFEST_ARTIFACT, &bytes)?),
        Err(ArtifactLoadError::NotFound(_)) => None,
        Err(e) => return Err(e),
    };

    if let Some(manifest) = &manifest {
        check_version(MANIFEST_ARTIFACT, manifest.feature_version)?;
    }

    let load_checked = |name: &str| -> ArtifactResult<Vec<u8>> {
        let bytes = store.load(name)?;
        if let Some(manifest) = &manifest {
            manifest.verify(name, &bytes)?;
        }
        Ok(bytes)
    };

    let model_bytes = load_checked(MODEL_ARTIFACT)?;
    let network = DenseNetwork::from_json(&model_bytes).map_err(|e| ArtifactLoadError::Malformed {
        name: MODEL_ARTIFACT.to_string(),
        reason: e.to_string(),
    })?;

    let scaler: ScalingParameters = parse_json(SCALER_ARTIFACT, &load_checked(SCALER_ARTIFACT)?)?;
    scaler.validate().map_err(|e| ArtifactLoadError::Malformed {
        name: SCALER_ARTIFACT.to_string(),
        reason: e.to_string(),
    })?;
    check_version(SCALER_ARTIFACT, scaler.feature_version())?;

    let labels: LabelSpace = parse_json(LABELS_ARTIFACT, &load_checked(LABELS_ARTIFACT)?)?;

    log::info!(
        "Loaded artifacts: {} labels, scaler dim {}, model input {} (manifest: {})",
        labels.len(),
        scaler.dimension(),
        network.input_dim(),
        manifest.is_some()
    );

    Ok(ArtifactBundle {
        network,
        scaler,
        labels,
        manifest,
    })
}

/// Serialize model, scaler and labels into a store together with a manifest
pub fn save_bundle(
    store: &dyn ArtifactStore,
    network: &NetworkSpec,
    scaler: &ScalingParameters,
    labels: &LabelSpace,
) -> ArtifactResult<Manifest> {
    let to_json = |name: &str, value: Result<Vec<u8>, serde_json::Error>| {
        value.map_err(|e| ArtifactLoadError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })
    };

    let mut manifest = Manifest::new();
    let blobs = [
        (MODEL_ARTIFACT, to_json(MODEL_ARTIFACT, serde_json::to_vec(network))?),
        (SCALER_ARTIFACT, to_json(SCALER_ARTIFACT, serde_json::to_vec(scaler))?),
        (LABELS_ARTIFACT, to_json(LABELS_ARTIFACT, serde_json::to_vec(labels))?),
    ];

    for (name, data) in blobs.iter() {
        store.store(name, data)?;
        manifest.record(name, data);
    }

    let manifest_bytes = to_json(MANIFEST_ARTIFACT, serde_json::to_vec_pretty(&manifest))?;
    store.store(MANIFEST_ARTIFACT, &manifest_bytes)?;

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activation, LayerSpec};
    use tempfile::TempDir;

    fn tiny_bundle() -> (NetworkSpec, ScalingParameters, LabelSpace) {
        let network = NetworkSpec {
            input_dim: 2,
            layers: vec![LayerSpec {
                weights: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                bias: vec![0.0, 0.0],
                activation: Activation::Softmax,
            }],
        };
        let scaler = ScalingParameters::new(vec![0.0, 0.0], vec![1.0, 1.0], FEATURE_VERSION).unwrap();
        let labels = LabelSpace::fit(["A", "E"]).unwrap();
        (network, scaler, labels)
    }

    #[test]
    fn test_calculate_sha256() {
        let data = b"hello world";
        let hash = calculate_sha256(data);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_directory_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path());
        let (network, scaler, labels) = tiny_bundle();

        let manifest = save_bundle(&store, &network, &scaler, &labels).unwrap();
        assert_eq!(manifest.artifacts.len(), 3);
        assert!(temp_dir.path().join(MANIFEST_ARTIFACT).exists());

        let bundle = load_bundle(&store).unwrap();
        assert_eq!(bundle.labels, labels);
        assert_eq!(bundle.scaler, scaler);
        assert_eq!(bundle.network.to_spec(), network);
        assert!(bundle.manifest.is_some());
    }

    #[test]
    fn test_missing_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path());
        assert!(matches!(
            load_bundle(&store),
            Err(ArtifactLoadError::NotFound(name)) if name == MODEL_ARTIFACT
        ));
    }

    #[test]
    fn test_tampered_artifact_fails_digest() {
        let store = MemoryStore::new();
        let (network, scaler, labels) = tiny_bundle();
        save_bundle(&store, &network, &scaler, &labels).unwrap();

        store.store(LABELS_ARTIFACT, br#"["A","F"]"#).unwrap();
        assert!(matches!(
            load_bundle(&store),
            Err(ArtifactLoadError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_scaler_version_skew() {
        let store = MemoryStore::new();
        let (network, _, labels) = tiny_bundle();
        let old = ScalingParameters::new(vec![0.0, 0.0], vec![1.0, 1.0], 1).unwrap();
        store.store(MODEL_ARTIFACT, &serde_json::to_vec(&network).unwrap()).unwrap();
        store.store(SCALER_ARTIFACT, &serde_json::to_vec(&old).unwrap()).unwrap();
        store.store(LABELS_ARTIFACT, &serde_json::to_vec(&labels).unwrap()).unwrap();

        assert!(matches!(
            load_bundle(&store),
            Err(ArtifactLoadError::VersionSkew { found: 1, .. })
        ));
    }

    #[test]
    fn test_manifest_version_skew() {
        let store = MemoryStore::new();
        let (network, scaler, labels) = tiny_bundle();
        let mut manifest = save_bundle(&store, &network, &scaler, &labels).unwrap();

        manifest.feature_version = 1;
        store
            .store(MANIFEST_ARTIFACT, &serde_json::to_vec(&manifest).unwrap())
            .unwrap();

        assert!(matches!(
            load_bundle(&store),
            Err(ArtifactLoadError::VersionSkew { name, expected, found: 1 })
                if name == MANIFEST_ARTIFACT && expected == FEATURE_VERSION
        ));
    }

    #[test]
    fn test_memory_store_rejects_path_names() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load("nested/model.json"),
            Err(ArtifactLoadError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_path_names() {
        let store = DirectoryStore::new("/tmp");
        assert!(matches!(
            store.load("../etc/passwd"),
            Err(ArtifactLoadError::InvalidName(_))
        ));
    }
}
