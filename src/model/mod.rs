// Model module
// Scaling, label space and the classifier adapter around a pluggable inference backend

pub mod classifier;
pub mod labels;
pub mod network;
pub mod scaler;

pub use classifier::{ChordModel, Classifier, ClassifierError, Prediction};
pub use labels::{LabelError, LabelSpace};
pub use network::{Activation, DenseNetwork, LayerSpec, NetworkSpec};
pub use scaler::{ScalerError, ScalingParameters, StandardScaler};
