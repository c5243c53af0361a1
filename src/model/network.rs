// Dense network backend
// Feed-forward layers loaded from JSON; the reference ChordModel implementation

use ndarray::{Array1, Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::model::classifier::{ChordModel, ClassifierError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Linear,
    Relu,
    Softmax,
}

/// Serialized form of one layer
/// `weights` is indexed [input][output]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

/// Serialized form of the whole network (`model.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input_dim: usize,
    pub layers: Vec<LayerSpec>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

impl DenseLayer {
    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let mut out = input.dot(&self.weights) + &self.bias;
        match self.activation {
            Activation::Linear => {}
            Activation::Relu => out.mapv_inplace(|v| v.max(0.0)),
            Activation::Softmax => softmax_rows(&mut out),
        }
        out
    }
}

/// Feed-forward network with validated layer shapes
#[derive(Debug, Clone)]
pub struct DenseNetwork {
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    /// Build from a NetworkSpec, checking that every layer's shape chains into the next
    pub fn from_spec(spec: &NetworkSpec) -> Result<Self, ClassifierError> {
        if spec.layers.is_empty() {
            return Err(ClassifierError::InvalidModel("network has no layers".to_string()));
        }

        let mut width = spec.input_dim;
        let mut layers = Vec::with_capacity(spec.layers.len());

        for (index, layer) in spec.layers.iter().enumerate() {
            if layer.weights.len() != width {
                return Err(ClassifierError::InvalidModel(format!(
                    "layer {} expects {} inputs, previous width is {}",
                    index,
                    layer.weights.len(),
                    width
                )));
            }

            let outputs = layer.bias.len();
            if outputs == 0 {
                return Err(ClassifierError::InvalidModel(format!(
                    "layer {} has no outputs",
                    index
                )));
            }

            let mut weights = Array2::<f32>::zeros((width, outputs));
            for (i, row) in layer.weights.iter().enumerate() {
                if row.len() != outputs {
                    return Err(ClassifierError::InvalidModel(format!(
                        "layer {} weight row {} has {} values, expected {}",
                        index,
                        i,
                        row.len(),
                        outputs
                    )));
                }
                for (j, &w) in row.iter().enumerate() {
                    weights[[i, j]] = w;
                }
            }

            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias.clone()),
                activation: layer.activation,
            });
            width = outputs;
        }

        Ok(DenseNetwork {
            input_dim: spec.input_dim,
            layers,
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ClassifierError> {
        let spec: NetworkSpec = serde_json::from_slice(bytes)
            .map_err(|e| ClassifierError::InvalidModel(e.to_string()))?;
        Self::from_spec(&spec)
    }

    pub fn to_spec(&self) -> NetworkSpec {
        NetworkSpec {
            input_dim: self.input_dim,
            layers: self
                .layers
                .iter()
                .map(|layer| LayerSpec {
                    weights: layer.weights.rows().into_iter().map(|r| r.to_vec()).collect(),
                    bias: layer.bias.to_vec(),
                    activation: layer.activation,
                })
                .collect(),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_width(&self) -> usize {
        self.layers
            .last()
            .map(|layer| layer.bias.len())
            .unwrap_or(self.input_dim)
    }

    /// Run the layers over a (rows, input_dim) matrix
    pub fn forward(&self, input: Array2<f32>) -> Result<Array2<f32>, ClassifierError> {
        if input.ncols() != self.input_dim {
            return Err(ClassifierError::InputShape {
                expected: self.input_dim,
                actual: input.ncols(),
            });
        }

        Ok(self
            .layers
            .iter()
            .fold(input, |activations, layer| layer.forward(&activations)))
    }
}

impl ChordModel for DenseNetwork {
    fn predict(&self, batch: ArrayView3<f32>) -> Result<Array2<f32>, ClassifierError> {
        let (rows, features, channels) = batch.dim();
        if channels != 1 {
            return Err(ClassifierError::InputShape {
                expected: self.input_dim,
                actual: features * channels,
            });
        }

        let flat = batch.index_axis(Axis(2), 0).to_owned();
        log::debug!("Dense network forward pass on {} rows", rows);
        self.forward(flat)
    }

    fn output_dim(&self) -> Option<usize> {
        Some(self.output_width())
    }
}

/// Numerically stable softmax applied to every row
fn softmax_rows(values: &mut Array2<f32>) {
    for mut row in values.rows_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}
