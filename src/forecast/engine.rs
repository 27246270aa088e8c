use std::collections::BTreeMap;

use ndarray::Array2;
use tracing::{debug, info, warn};

use super::features::{feature_matrix, target_matrix};
use crate::cache::{RollingCache, CACHE_DEPTH};
use crate::domain::{Region, RegionSnapshot, RegionalForecast, FORECAST_HORIZON, FUEL_COUNT};
use crate::error::{PipelineError, Result};
use crate::ml::{FeatureScaler, ModelRegistry};

/// Runs each region's model over its cached window
pub struct Forecaster {
    models: ModelRegistry,
}

impl Forecaster {
    pub fn new(models: ModelRegistry) -> Self {
        Self { models }
    }

    /// Which regions have a loaded model
    pub fn model_status(&self) -> BTreeMap<Region, bool> {
        Region::ALL
            .iter()
            .map(|r| (*r, self.models.contains(*r)))
            .collect()
    }

    /// `144 x 12` MW forecast for one region, or `None` when the region has
    /// no model, the window is short, or inference fails.
    pub fn predict<'a, I>(
        &self,
        region: Region,
        snapshots: I,
        scaler: &mut FeatureScaler,
    ) -> Option<Array2<f64>>
    where
        I: IntoIterator<Item = &'a RegionSnapshot>,
        I::IntoIter: ExactSizeIterator,
    {
        if !self.models.contains(region) {
            debug!(region = %region, "no model loaded, skipping forecast");
            return None;
        }
        let snapshots = snapshots.into_iter();
        if snapshots.len() < CACHE_DEPTH {
            debug!(region = %region, cache_depth = snapshots.len(), "window too short for forecast");
            return None;
        }
        // Always the most recent window
        let skip = snapshots.len() - CACHE_DEPTH;
        match self.run(region, snapshots.skip(skip), scaler) {
            Ok(forecast) => Some(forecast),
            Err(e) => {
                warn!(region = %region, error = %e, "forecast failed");
                None
            }
        }
    }

    fn run<'a>(
        &self,
        region: Region,
        window: impl IntoIterator<Item = &'a RegionSnapshot>,
        scaler: &mut FeatureScaler,
    ) -> Result<Array2<f64>> {
        let model = self
            .models
            .get(region)
            .ok_or_else(|| PipelineError::Model(format!("no model for {region}")))?;

        let features = feature_matrix(region, window)?;
        scaler.fit_if_needed(region, &features, &target_matrix(&features))?;

        let scaled = scaler.transform(region, &features)?;
        let predicted = model.predict(&scaled)?;
        if predicted.dim() != (FORECAST_HORIZON, FUEL_COUNT) {
            return Err(PipelineError::shape(
                format!("{FORECAST_HORIZON}x{FUEL_COUNT}"),
                format!("{}x{}", predicted.nrows(), predicted.ncols()),
            ));
        }
        scaler.inverse_transform(region, &predicted)
    }

    /// Forecasts every region that can be forecast; the rest are omitted.
    pub fn predict_all(&self, cache: &RollingCache, scaler: &mut FeatureScaler) -> RegionalForecast {
        let mut forecast = RegionalForecast::new();
        for region in Region::ALL {
            let Some(queue) = cache.get(region) else {
                continue;
            };
            if let Some(tensor) = self.predict(region, queue.iter(), scaler) {
                if let Err(e) = forecast.insert(region, tensor) {
                    warn!(region = %region, error = %e, "discarding forecast");
                }
            }
        }
        info!(
            regions = forecast.len(),
            models = self.models.len(),
            "regional forecasts generated"
        );
        forecast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::domain::time::slot_sequence;
    use crate::domain::GenerationMix;
    use crate::forecast::features::feature_count;
    use crate::ml::models::{MockSequenceModel, ModelMetadata};
    use crate::ml::DenseSequenceModel;
    use chrono::{DateTime, FixedOffset, TimeZone};
    use std::sync::Arc;

    struct NullStore;

    impl CacheStore for NullStore {
        fn load(&self) -> Result<Option<crate::cache::CacheState>> {
            Ok(None)
        }
        fn save(&self, _: &crate::cache::CacheState) -> Result<()> {
            Ok(())
        }
    }

    fn t0() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 8, 0, 0)
            .unwrap()
    }

    fn snapshots(region: Region, n: usize) -> Vec<RegionSnapshot> {
        slot_sequence(t0(), n)
            .into_iter()
            .enumerate()
            .map(|(i, ts)| {
                let mut mw = [0.0; FUEL_COUNT];
                mw[1] = 1000.0 + 10.0 * i as f64;
                mw[4] = 500.0;
                RegionSnapshot::new(region, ts, GenerationMix::new(mw, 0.0).unwrap(), None).unwrap()
            })
            .collect()
    }

    fn registry_with(region: Region, value: f64) -> ModelRegistry {
        let mut models = ModelRegistry::new();
        models.insert(
            region,
            Arc::new(DenseSequenceModel::constant(feature_count(region), value)),
        );
        models
    }

    #[test]
    fn test_absent_without_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut scaler = FeatureScaler::open(dir.path().join("s.json"));
        let forecaster = Forecaster::new(ModelRegistry::new());
        assert!(forecaster
            .predict(Region::North, snapshots(Region::North, 6).iter(), &mut scaler)
            .is_none());
        assert!(!scaler.is_fitted(Region::North));
    }

    #[test]
    fn test_absent_with_short_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut scaler = FeatureScaler::open(dir.path().join("s.json"));
        let forecaster = Forecaster::new(registry_with(Region::South, 0.0));
        assert!(forecaster
            .predict(Region::South, snapshots(Region::South, 5).iter(), &mut scaler)
            .is_none());
    }

    #[test]
    fn test_predict_fits_scaler_and_inverts() {
        let dir = tempfile::tempdir().unwrap();
        let mut scaler = FeatureScaler::open(dir.path().join("s.json"));
        // A scaled output of 0 maps back to each fuel column's mean
        let forecaster = Forecaster::new(registry_with(Region::East, 0.0));
        let window = snapshots(Region::East, 6);

        let forecast = forecaster
            .predict(Region::East, window.iter(), &mut scaler)
            .unwrap();
        assert!(scaler.is_fitted(Region::East));
        assert_eq!(forecast.dim(), (FORECAST_HORIZON, FUEL_COUNT));
        assert!((forecast[[0, 1]] - 1025.0).abs() < 1e-9);
        assert!((forecast[[143, 4]] - 500.0).abs() < 1e-9);
        assert_eq!(forecast[[10, 0]], 0.0);
    }

    #[test]
    fn test_model_error_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut scaler = FeatureScaler::open(dir.path().join("s.json"));
        let mut model = MockSequenceModel::new();
        model
            .expect_predict()
            .returning(|_| Err(PipelineError::Model("nan in output".into())));
        model.expect_metadata().return_const(ModelMetadata {
            model_id: "broken".into(),
            version: "0".into(),
            trained_at: None,
            n_features: 18,
        });
        let mut models = ModelRegistry::new();
        models.insert(Region::Other, Arc::new(model));

        let forecaster = Forecaster::new(models);
        assert!(forecaster
            .predict(Region::Other, snapshots(Region::Other, 6).iter(), &mut scaler)
            .is_none());
    }

    #[test]
    fn test_predict_all_omits_regions_without_forecast() {
        let dir = tempfile::tempdir().unwrap();
        let mut scaler = FeatureScaler::open(dir.path().join("s.json"));
        let mut cache = RollingCache::open(Box::new(NullStore), t0());
        for region in Region::ALL {
            for s in snapshots(region, 6) {
                cache.append(s).unwrap();
            }
        }
        assert!(cache.is_ready());

        let forecaster = Forecaster::new(registry_with(Region::North, 0.0));
        let forecast = forecaster.predict_all(&cache, &mut scaler);
        assert_eq!(forecast.len(), 1);
        assert!(forecast.get(Region::North).is_some());
        assert_eq!(forecaster.model_status()[&Region::North], true);
        assert_eq!(forecaster.model_status()[&Region::South], false);
    }
}
