//! Sequence model interface and the loadable weight-file model.
//!
//! The pipeline only relies on the tensor contract: a `6 x N` scaled input
//! window in, a `144 x 12` scaled generation forecast out.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::CACHE_DEPTH;
use crate::domain::{Region, FORECAST_HORIZON, FUEL_COUNT};
use crate::error::{PipelineError, Result};

/// Trait for pretrained sequence-to-sequence models
#[cfg_attr(test, mockall::automock)]
pub trait SequenceModel: Send + Sync {
    /// `input` is `CACHE_DEPTH x n_features`; output is `FORECAST_HORIZON x FUEL_COUNT`
    fn predict(&self, input: &Array2<f64>) -> Result<Array2<f64>>;

    fn metadata(&self) -> &ModelMetadata;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub version: String,
    pub trained_at: Option<chrono::DateTime<chrono::Utc>>,
    pub n_features: usize,
}

/// Linear read-out over the flattened input window.
///
/// `weights` is `(FORECAST_HORIZON * FUEL_COUNT) x (CACHE_DEPTH * n_features)`
/// and `bias` has one entry per output cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseSequenceModel {
    pub metadata: ModelMetadata,
    pub weights: Array2<f64>,
    pub bias: Array1<f64>,
}

impl DenseSequenceModel {
    pub fn new(metadata: ModelMetadata, weights: Array2<f64>, bias: Array1<f64>) -> Result<Self> {
        let model = Self {
            metadata,
            weights,
            bias,
        };
        model.validate()?;
        Ok(model)
    }

    /// All-zero weights with a constant bias; predicts the same tensor for any input
    pub fn constant(n_features: usize, value: f64) -> Self {
        let outputs = FORECAST_HORIZON * FUEL_COUNT;
        Self {
            metadata: ModelMetadata {
                model_id: "constant".to_string(),
                version: "0.1.0".to_string(),
                trained_at: None,
                n_features,
            },
            weights: Array2::zeros((outputs, CACHE_DEPTH * n_features)),
            bias: Array1::from_elem(outputs, value),
        }
    }

    fn validate(&self) -> Result<()> {
        let outputs = FORECAST_HORIZON * FUEL_COUNT;
        let inputs = CACHE_DEPTH * self.metadata.n_features;
        if self.weights.dim() != (outputs, inputs) {
            return Err(PipelineError::shape(
                format!("{outputs}x{inputs} weights"),
                format!("{}x{} weights", self.weights.nrows(), self.weights.ncols()),
            ));
        }
        if self.bias.len() != outputs {
            return Err(PipelineError::shape(
                format!("{outputs} bias terms"),
                format!("{} bias terms", self.bias.len()),
            ));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| PipelineError::persistence(path, e))?;
        let model: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => bincode::deserialize(&bytes)?,
            _ => serde_json::from_slice(&bytes)?,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = match path.extension().and_then(|e| e.to_str()) {
            Some("bin") => bincode::serialize(self)?,
            _ => serde_json::to_vec(self)?,
        };
        crate::repo::atomic::write_atomic(path, &bytes)
    }
}

impl SequenceModel for DenseSequenceModel {
    fn predict(&self, input: &Array2<f64>) -> Result<Array2<f64>> {
        let expected = (CACHE_DEPTH, self.metadata.n_features);
        if input.dim() != expected {
            return Err(PipelineError::shape(
                format!("{}x{}", expected.0, expected.1),
                format!("{}x{}", input.nrows(), input.ncols()),
            ));
        }
        let flat: Array1<f64> = input.iter().copied().collect();
        let out = self.weights.dot(&flat) + &self.bias;
        out.into_shape((FORECAST_HORIZON, FUEL_COUNT))
            .map_err(|e| PipelineError::Model(e.to_string()))
    }

    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }
}

/// One model per region; regions without a model are simply absent
#[derive(Default, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<Region, Arc<dyn SequenceModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `model_<region>.json` or `model_<region>.bin` under `dir`
    pub fn model_path(dir: &Path, region: Region) -> Option<PathBuf> {
        ["json", "bin"]
            .iter()
            .map(|ext| dir.join(format!("model_{}.{ext}", region.file_key())))
            .find(|p| p.exists())
    }

    /// Loads whatever models exist. A missing or unloadable file leaves that
    /// region without a model.
    pub fn load_dir(dir: &Path) -> Self {
        let mut registry = Self::new();
        for region in Region::ALL {
            let Some(path) = Self::model_path(dir, region) else {
                info!(region = %region, dir = %dir.display(), "no model file for region");
                continue;
            };
            match DenseSequenceModel::load(&path) {
                Ok(model) => {
                    info!(region = %region, model_id = %model.metadata.model_id, "loaded model");
                    registry.insert(region, Arc::new(model));
                }
                Err(e) => {
                    warn!(region = %region, path = %path.display(), error = %e, "failed to load model");
                }
            }
        }
        registry
    }

    pub fn insert(&mut self, region: Region, model: Arc<dyn SequenceModel>) {
        self.models.insert(region, model);
    }

    pub fn get(&self, region: Region) -> Option<&Arc<dyn SequenceModel>> {
        self.models.get(&region)
    }

    pub fn contains(&self, region: Region) -> bool {
        self.models.contains_key(&region)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
