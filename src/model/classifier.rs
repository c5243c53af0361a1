// Classifier adapter
// Batched model inference over scaled feature rows, decoded through the label space

use ndarray::{Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::labels::{LabelError, LabelSpace};

/// Errors that can occur during classification
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Model expects {expected} input values per row, got {actual}")]
    InputShape { expected: usize, actual: usize },

    #[error("Model returned shape {actual:?}, expected {expected:?}")]
    OutputShape {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Model has {model} outputs but the label space has {labels} classes")]
    LabelCount { model: usize, labels: usize },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Label(#[from] LabelError),
}

/// Inference backend
/// `batch` has shape (rows, features, 1); the result has shape (rows, classes)
pub trait ChordModel: Send + Sync {
    fn predict(&self, batch: ArrayView3<f32>) -> Result<Array2<f32>, ClassifierError>;

    /// Number of classes, when the backend knows it up front
    fn output_dim(&self) -> Option<usize> {
        None
    }
}

/// Decoded prediction for one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_index: usize,
    pub label: String,

    /// Probability of the chosen class [0.0, 1.0]
    pub confidence: f32,
}

/// Model plus the label space its outputs are indexed by
pub struct Classifier {
    model: Box<dyn ChordModel>,
    labels: LabelSpace,
}

impl Classifier {
    pub fn new(model: Box<dyn ChordModel>, labels: LabelSpace) -> Result<Self, ClassifierError> {
        if let Some(outputs) = model.output_dim() {
            if outputs != labels.len() {
                return Err(ClassifierError::LabelCount {
                    model: outputs,
                    labels: labels.len(),
                });
            }
        }

        Ok(Classifier { model, labels })
    }

    pub fn labels(&self) -> &LabelSpace {
        &self.labels
    }

    /// Classify scaled rows (rows, features) in a single model call
    pub fn classify_batch(&self, scaled: &Array2<f32>) -> Result<Vec<Prediction>, ClassifierError> {
        let rows = scaled.nrows();
        if rows == 0 {
            return Ok(Vec::new());
        }

        let batch = scaled.view().insert_axis(Axis(2));
        let probabilities = self.model.predict(batch)?;

        let expected = (rows, self.labels.len());
        if probabilities.dim() != expected {
            return Err(ClassifierError::OutputShape {
                expected,
                actual: probabilities.dim(),
            });
        }

        probabilities
            .rows()
            .into_iter()
            .map(|row| -> Result<Prediction, ClassifierError> {
                let (class_index, confidence) = argmax(row.iter().copied())?;
                let label = self.labels.decode(class_index)?.to_string();
                Ok(Prediction {
                    class_index,
                    label,
                    confidence,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

/// Index and value of the largest entry; ties go to the lowest index
fn argmax(values: impl Iterator<Item = f32>) -> Result<(usize, f32), ClassifierError> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.enumerate() {
        if !v.is_finite() {
            return Err(ClassifierError::Inference(format!(
                "non-finite probability at class {}",
                i
            )));
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.ok_or_else(|| ClassifierError::Inference("empty probability row".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Returns fixed probabilities regardless of input
    struct FixedModel {
        row: Vec<f32>,
    }

    impl ChordModel for FixedModel {
        fn predict(&self, batch: ArrayView3<f32>) -> Result<Array2<f32>, ClassifierError> {
            let n = batch.len_of(Axis(0));
            let mut out = Array2::zeros((n, self.row.len()));
            for mut r in out.rows_mut() {
                for (slot, v) in r.iter_mut().zip(&self.row) {
                    *slot = *v;
                }
            }
            Ok(out)
        }

        fn output_dim(&self) -> Option<usize> {
            Some(self.row.len())
        }
    }

    #[test]
    fn test_classify_batch_decodes_argmax() {
        let labels = LabelSpace::fit(["A", "C", "G"]).unwrap();
        let model = FixedModel {
            row: vec![0.1, 0.7, 0.2],
        };
        let classifier = Classifier::new(Box::new(model), labels).unwrap();

        let preds = classifier.classify_batch(&array![[0.0, 1.0], [2.0, 3.0]]).unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].label, "C");
        assert_eq!(preds[0].class_index, 1);
        assert!((preds[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_label_count_mismatch() {
        let labels = LabelSpace::fit(["A", "C"]).unwrap();
        let model = FixedModel {
            row: vec![0.1, 0.7, 0.2],
        };
        assert!(matches!(
            Classifier::new(Box::new(model), labels),
            Err(ClassifierError::LabelCount { model: 3, labels: 2 })
        ));
    }

    #[test]
    fn test_argmax_ties_take_first() {
        let (i, v) = argmax([0.5f32, 0.5, 0.0].into_iter()).unwrap();
        assert_eq!(i, 0);
        assert_eq!(v, 0.5);
        assert!(argmax([f32::NAN].into_iter()).is_err());
    }

    #[test]
    fn test_empty_batch() {
        let labels = LabelSpace::fit(["A"]).unwrap();
        let classifier = Classifier::new(Box::new(FixedModel { row: vec![1.0] }), labels).unwrap();
        let preds = classifier.classify_batch(&Array2::zeros((0, 4))).unwrap();
        assert!(preds.is_empty());
    }
}
