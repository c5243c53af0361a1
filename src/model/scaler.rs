// Feature scaling
// Per-dimension standardization fitted on training vectors and applied unchanged at inference

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{FeatureVector, FEATURE_VERSION};

#[derive(Debug, Error, PartialEq)]
pub enum ScalerError {
    #[error("Cannot fit scaler on an empty feature matrix")]
    EmptyInput,

    #[error("Row {row} has {actual} values, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid scale at dimension {0}")]
    InvalidScale(usize),
}

/// Fitted mean and scale per feature dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingParameters {
    feature_version: u32,
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl ScalingParameters {
    /// Build parameters from stored values, checking that they are usable
    pub fn new(mean: Vec<f32>, scale: Vec<f32>, feature_version: u32) -> Result<Self, ScalerError> {
        let params = ScalingParameters {
            feature_version,
            mean,
            scale,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check internal consistency (used after deserializing)
    pub fn validate(&self) -> Result<(), ScalerError> {
        if self.mean.is_empty() {
            return Err(ScalerError::EmptyInput);
        }
        if self.mean.len() != self.scale.len() {
            return Err(ScalerError::DimensionMismatch {
                expected: self.mean.len(),
                actual: self.scale.len(),
            });
        }
        if let Some(i) = self.scale.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(ScalerError::InvalidScale(i));
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    pub fn feature_version(&self) -> u32 {
        self.feature_version
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn scale(&self) -> &[f32] {
        &self.scale
    }

    /// Standardize one vector: (x - mean) / scale
    pub fn transform(&self, features: &FeatureVector) -> Result<Vec<f32>, ScalerError> {
        if features.len() != self.dimension() {
            return Err(ScalerError::DimensionMismatch {
                expected: self.dimension(),
                actual: features.len(),
            });
        }

        Ok(features
            .as_slice()
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    /// Standardize a batch into a (rows, dimension) matrix
    pub fn transform_batch(&self, rows: &[FeatureVector]) -> Result<Array2<f32>, ScalerError> {
        let dim = self.dimension();
        let mut matrix = Array2::<f32>::zeros((rows.len(), dim));

        for (i, row) in rows.iter().enumerate() {
            let scaled = self.transform(row)?;
            for (j, value) in scaled.into_iter().enumerate() {
                matrix[[i, j]] = value;
            }
        }

        Ok(matrix)
    }
}

/// Fits ScalingParameters with population statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardScaler;

impl StandardScaler {
    /// Fit per-dimension mean and standard deviation
    /// Dimensions with zero variance get a scale of 1.0
    pub fn fit(rows: &[FeatureVector]) -> Result<ScalingParameters, ScalerError> {
        let first = rows.first().ok_or(ScalerError::EmptyInput)?;
        let dim = first.len();
        if dim == 0 {
            return Err(ScalerError::EmptyInput);
        }

        for (row, features) in rows.iter().enumerate() {
            if features.len() != dim {
                return Err(ScalerError::RaggedRows {
                    row,
                    expected: dim,
                    actual: features.len(),
                });
            }
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0f64; dim];
        for features in rows {
            for (acc, &x) in mean.iter_mut().zip(features.as_slice()) {
                *acc += x as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0f64; dim];
        for features in rows {
            for ((acc, &x), m) in variance.iter_mut().zip(features.as_slice()).zip(&mean) {
                let d = x as f64 - m;
                *acc += d * d;
            }
        }

        let scale: Vec<f32> = variance
            .iter()
            .map(|v| {
                let std = (v / n).sqrt();
                if std > 0.0 && std.is_finite() {
                    std as f32
                } else {
                    1.0
                }
            })
            .collect();

        log::debug!("Fitted scaler on {} rows x {} dimensions", rows.len(), dim);

        ScalingParameters::new(
            mean.into_iter().map(|m| m as f32).collect(),
            scale,
            FEATURE_VERSION,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[f32]]) -> Vec<FeatureVector> {
        values.iter().map(|r| FeatureVector::new(r.to_vec())).collect()
    }

    #[test]
    fn test_fit_population_statistics() {
        let params = StandardScaler::fit(&rows(&[&[1.0, 5.0], &[3.0, 5.0]])).unwrap();
        assert_eq!(params.mean(), &[2.0, 5.0]);
        // Population std of [1, 3] is 1; constant column falls back to 1
        assert_eq!(params.scale(), &[1.0, 1.0]);
        assert_eq!(params.feature_version(), FEATURE_VERSION);
    }

    #[test]
    fn test_transform_standardizes() {
        let params = StandardScaler::fit(&rows(&[&[0.0, 10.0], &[4.0, 30.0]])).unwrap();
        let scaled = params.transform(&FeatureVector::new(vec![4.0, 10.0])).unwrap();
        assert!((scaled[0] - 1.0).abs() < 1e-6);
        assert!((scaled[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fit_rejects_empty_and_ragged() {
        assert_eq!(StandardScaler::fit(&[]), Err(ScalerError::EmptyInput));
        assert_eq!(
            StandardScaler::fit(&rows(&[&[1.0, 2.0], &[1.0]])),
            Err(ScalerError::RaggedRows {
                row: 1,
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_dimension_mismatch() {
        let params = StandardScaler::fit(&rows(&[&[1.0, 2.0, 3.0]])).unwrap();
        let err = params.transform(&FeatureVector::new(vec![1.0])).unwrap_err();
        assert_eq!(
            err,
            ScalerError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn test_transform_batch_shape() {
        let data = rows(&[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let params = StandardScaler::fit(&data).unwrap();
        let matrix = params.transform_batch(&data).unwrap();
        assert_eq!(matrix.dim(), (3, 2));
        assert!(matrix.column(0).sum().abs() < 1e-5);
    }

    #[test]
    fn test_rejects_zero_scale() {
        assert_eq!(
            ScalingParameters::new(vec![0.0, 0.0], vec![1.0, 0.0], 2),
            Err(ScalerError::InvalidScale(1))
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let params = ScalingParameters::new(vec![0.5], vec![2.0], FEATURE_VERSION).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let back: ScalingParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
