//! Per-region standardization state, fitted once and reused across restarts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::Region;
use crate::error::{PipelineError, Result};
use crate::repo::atomic::{read_json, write_json_atomic};

/// Column-wise z-score standardizer. Uses the population standard deviation;
/// zero-variance columns get a scale of 1 and therefore transform to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(PipelineError::shape("at least one row", "0 rows"));
        }
        let mean: Array1<f64> = data
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::shape("at least one row", "0 rows"))?;
        let std = data.std_axis(Axis(0), 0.0);
        let scale = std
            .iter()
            .map(|s| if *s < 1e-10 { 1.0 } else { *s })
            .collect();
        Ok(Self {
            mean: mean.to_vec(),
            scale,
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    fn check_width(&self, data: &Array2<f64>) -> Result<()> {
        if data.ncols() != self.n_features() {
            return Err(PipelineError::shape(
                format!("{} columns", self.n_features()),
                format!("{} columns", data.ncols()),
            ));
        }
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(data)?;
        let mut out = data.clone();
        for (mut column, (mean, scale)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(&self.scale))
        {
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        Ok(out)
    }

    pub fn inverse_transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(data)?;
        let mut out = data.clone();
        for (mut column, (mean, scale)) in out
            .axis_iter_mut(Axis(1))
            .zip(self.mean.iter().zip(&self.scale))
        {
            column.mapv_inplace(|v| v * scale + mean);
        }
        Ok(out)
    }
}

/// Feature and target standardizers for one region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub features: Option<StandardScaler>,
    pub targets: Option<StandardScaler>,
    pub fitted: bool,
}

/// Owns every region's scaler state and its persisted file.
///
/// Once a region is fitted its parameters are never recomputed; a refit only
/// happens when no persisted state exists for that region.
pub struct FeatureScaler {
    path: PathBuf,
    states: BTreeMap<Region, ScalerState>,
}

impl FeatureScaler {
    /// Loads persisted state; a missing or unreadable file starts unfitted.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let states = match read_json::<BTreeMap<Region, ScalerState>>(&path) {
            Ok(Some(states)) => {
                let fitted: Vec<String> = states
                    .iter()
                    .filter(|(_, s)| s.fitted)
                    .map(|(r, _)| r.to_string())
                    .collect();
                info!(path = %path.display(), fitted = ?fitted, "loaded scaler state");
                states
            }
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load scaler state, starting unfitted");
                BTreeMap::new()
            }
        };
        Self { path, states }
    }

    pub fn is_fitted(&self, region: Region) -> bool {
        self.states.get(&region).is_some_and(|s| s.fitted)
    }

    pub fn state(&self, region: Region) -> Option<&ScalerState> {
        self.states.get(&region)
    }

    /// Fits both standardizers for `region` and persists immediately.
    /// `targets` holds the fuel columns of the same window.
    pub fn fit(&mut self, region: Region, features: &Array2<f64>, targets: &Array2<f64>) -> Result<()> {
        if self.is_fitted(region) {
            return Err(PipelineError::Model(format!(
                "scaler for region {region} is already fitted"
            )));
        }
        let state = ScalerState {
            features: Some(StandardScaler::fit(features)?),
            targets: Some(StandardScaler::fit(targets)?),
            fitted: true,
        };
        self.states.insert(region, state);
        write_json_atomic(&self.path, &self.states)?;
        info!(region = %region, rows = features.nrows(), "fitted scaler on first window");
        Ok(())
    }

    /// Fits only if the region has no fitted state. Returns whether a fit happened.
    pub fn fit_if_needed(
        &mut self,
        region: Region,
        features: &Array2<f64>,
        targets: &Array2<f64>,
    ) -> Result<bool> {
        if self.is_fitted(region) {
            return Ok(false);
        }
        self.fit(region, features, targets)?;
        Ok(true)
    }

    fn fitted(&self, region: Region) -> Result<(&StandardScaler, &StandardScaler)> {
        match self.states.get(&region) {
            Some(ScalerState {
                features: Some(features),
                targets: Some(targets),
                fitted: true,
            }) => Ok((features, targets)),
            _ => Err(PipelineError::ScalerNotFitted(region)),
        }
    }

    pub fn transform(&self, region: Region, features: &Array2<f64>) -> Result<Array2<f64>> {
        let (scaler, _) = self.fitted(region)?;
        scaler.transform(features)
    }

    /// Undoes target scaling; generation cannot be negative so output is clamped at 0.
    pub fn inverse_transform(&self, region: Region, predictions: &Array2<f64>) -> Result<Array2<f64>> {
        let (_, scaler) = self.fitted(region)?;
        let mut out = scaler.inverse_transform(predictions)?;
        out.mapv_inplace(|v| v.max(0.0));
        Ok(out)
    }
}
