// Training-side feature contract
// Builds scaled feature matrices and label targets with the exact recipe used at inference

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{load_waveform, AudioError, Waveform};
use crate::config::PipelineConfig;
use crate::features::{FeatureError, FeatureExtractor, FeatureVector};
use crate::model::{LabelError, LabelSpace, NetworkSpec, ScalerError, ScalingParameters, StandardScaler};
use crate::state::{save_bundle, ArtifactLoadError, ArtifactStore, Manifest};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("Failed to load clip: {0}")]
    Audio(#[from] AudioError),

    #[error("Failed to extract features: {0}")]
    Feature(#[from] FeatureError),

    #[error("Failed to fit scaler: {0}")]
    Scaler(#[from] ScalerError),

    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    #[error("Failed to write artifacts: {0}")]
    Artifact(#[from] ArtifactLoadError),

    #[error("No training examples")]
    NoExamples,
}

/// Which partition an example belongs to; only training examples are used for fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Training,
    Test,
}

/// Scaled feature matrix with dense class targets
#[derive(Debug, Clone)]
pub struct EncodedSplit {
    pub features: Array2<f32>,
    pub targets: Vec<usize>,
}

/// Fitted label space and scaler plus the encoded partitions
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub labels: LabelSpace,
    pub scaler: ScalingParameters,
    pub training: EncodedSplit,
    pub test: Option<EncodedSplit>,
}

impl TrainingSet {
    /// Write a trained network with this set's scaler and labels, plus a manifest
    pub fn save_artifacts(
        &self,
        store: &dyn ArtifactStore,
        network: &NetworkSpec,
    ) -> Result<Manifest, TrainingError> {
        Ok(save_bundle(store, network, &self.scaler, &self.labels)?)
    }
}

/// Collects labeled clips and fits the preprocessing state used at inference
#[derive(Debug)]
pub struct TrainingSetBuilder {
    sample_rate: u32,
    extractor: FeatureExtractor,
    examples: Vec<(Split, String, FeatureVector)>,
}

impl TrainingSetBuilder {
    pub fn new(config: &PipelineConfig) -> Self {
        TrainingSetBuilder {
            sample_rate: config.loader.sample_rate,
            extractor: FeatureExtractor::new(config.extractor),
            examples: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Decode a whole clip and add it as one example
    pub fn add_audio(&mut self, split: Split, label: &str, audio: &[u8]) -> Result<(), TrainingError> {
        let waveform = load_waveform(audio, self.sample_rate)?;
        self.add_waveform(split, label, &waveform)
    }

    /// Add an already decoded clip; it is trimmed, normalized and described like a segment
    pub fn add_waveform(
        &mut self,
        split: Split,
        label: &str,
        waveform: &Waveform,
    ) -> Result<(), TrainingError> {
        let features = self.extractor.extract(&waveform.samples, waveform.sample_rate)?;
        self.examples.push((split, label.to_string(), features));
        Ok(())
    }

    /// Fit labels and scaler on the training split and encode both splits
    /// Test labels missing from the training split are an error
    pub fn build(self) -> Result<TrainingSet, TrainingError> {
        let (training, test): (Vec<_>, Vec<_>) = self
            .examples
            .into_iter()
            .partition(|(split, _, _)| *split == Split::Training);

        if training.is_empty() {
            return Err(TrainingError::NoExamples);
        }

        let labels = LabelSpace::fit(training.iter().map(|(_, label, _)| label.as_str()))?;
        let vectors: Vec<FeatureVector> = training.iter().map(|(_, _, f)| f.clone()).collect();
        let scaler = StandardScaler::fit(&vectors)?;

        let encode = |examples: &[(Split, String, FeatureVector)]| -> Result<EncodedSplit, TrainingError> {
            let rows: Vec<FeatureVector> = examples.iter().map(|(_, _, f)| f.clone()).collect();
            let targets = examples
                .iter()
                .map(|(_, label, _)| labels.encode(label))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EncodedSplit {
                features: scaler.transform_batch(&rows)?,
                targets,
            })
        };

        let training = encode(&training)?;
        let test = if test.is_empty() {
            None
        } else {
            Some(encode(&test)?)
        };

        log::info!(
            "Built training set: {} training rows, {} test rows, {} labels",
            training.targets.len(),
            test.as_ref().map(|t| t.targets.len()).unwrap_or(0),
            labels.len()
        );

        Ok(TrainingSet {
            labels,
            scaler,
            training,
            test,
        })
    }
}
