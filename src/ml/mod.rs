//! Machine Learning Module
//!
//! Inference-side support for the per-region generation-mix forecaster:
//! - Standardization state fitted once per region and persisted
//! - Sequence model interface and the weight-file model behind it
//!
//! Training happens offline; models arrive here as opaque artifacts.

pub mod models;
pub mod scaler;

pub use models::{DenseSequenceModel, ModelMetadata, ModelRegistry, SequenceModel};
pub use scaler::{FeatureScaler, ScalerState, StandardScaler};
