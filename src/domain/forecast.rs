use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::fuel::FUEL_COUNT;
use super::region::Region;
use super::time::{slot_duration, slot_sequence};
use crate::error::{PipelineError, Result};

/// Number of 10-minute slots in the 24-hour forecast
pub const FORECAST_HORIZON: usize = 144;

/// Per-region generation-mix forecasts (144 x 12, MW). Regions whose
/// forecast is absent are simply not present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionalForecast {
    regions: BTreeMap<Region, Array2<f64>>,
}

impl RegionalForecast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: Region, tensor: Array2<f64>) -> Result<()> {
        if tensor.dim() != (FORECAST_HORIZON, FUEL_COUNT) {
            return Err(PipelineError::shape(
                format!("{FORECAST_HORIZON}x{FUEL_COUNT}"),
                format!("{}x{}", tensor.nrows(), tensor.ncols()),
            ));
        }
        self.regions.insert(region, tensor);
        Ok(())
    }

    pub fn get(&self, region: Region) -> Option<&Array2<f64>> {
        self.regions.get(&region)
    }

    pub fn regions(&self) -> impl Iterator<Item = (&Region, &Array2<f64>)> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// 144 intensity values (kgCO2e/kWh) starting one slot after the last observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastIntensitySeries {
    pub start: DateTime<FixedOffset>,
    pub values: Vec<f64>,
}

impl ForecastIntensitySeries {
    pub fn from_last_observation(last_observation: DateTime<FixedOffset>, values: Vec<f64>) -> Self {
        Self {
            start: last_observation + slot_duration(),
            values,
        }
    }

    pub fn timestamps(&self) -> Vec<DateTime<FixedOffset>> {
        slot_sequence(self.start, self.values.len())
    }

    pub fn end(&self) -> DateTime<FixedOffset> {
        self.start + slot_duration() * (self.values.len().saturating_sub(1) as i32)
    }

    /// Whole grams per kWh, rounded to the nearest gram
    pub fn grams(&self) -> Vec<i64> {
        self.values.iter().map(|v| kg_to_grams(*v)).collect()
    }
}

/// kgCO2e/kWh to whole gCO2e/kWh
pub fn kg_to_grams(kg_per_kwh: f64) -> i64 {
    (kg_per_kwh * 1000.0).round() as i64
}
