//! Generation mix to carbon intensity.
//!
//! All arithmetic is in kW: MW values are multiplied by 1000 and emission
//! factors are kgCO2e/kWh, so intensities come out in kgCO2e/kWh. Storage
//! never enters a total.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::domain::{FuelType, Region, RegionSnapshot, RegionalForecast, FORECAST_HORIZON, FUEL_COUNT};

const KW_PER_MW: f64 = 1000.0;

/// Breakdown behind a current-intensity figure, used for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntensityDetails {
    pub total_generation_mw: f64,
    pub total_generation_kw: f64,
    pub total_emissions_kg: f64,
    pub fuel_generation_mw: BTreeMap<FuelType, f64>,
    pub fuel_emissions_kg: BTreeMap<FuelType, f64>,
    pub storage_mw: f64,
    pub regional_breakdown: BTreeMap<Region, BTreeMap<FuelType, f64>>,
}

impl IntensityDetails {
    /// Percentage of total generation per fuel, Storage excluded from the
    /// base. Empty when nothing is generating.
    pub fn generation_mix(&self) -> BTreeMap<FuelType, f64> {
        if self.total_generation_mw <= 0.0 {
            return BTreeMap::new();
        }
        self.fuel_generation_mw
            .iter()
            .map(|(fuel, mw)| (*fuel, mw / self.total_generation_mw * 100.0))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EmissionEngine {
    factors: [f64; FUEL_COUNT],
}

impl Default for EmissionEngine {
    fn default() -> Self {
        Self {
            factors: FuelType::ALL.map(|f| f.emission_factor()),
        }
    }
}

impl EmissionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factor(&self, fuel: FuelType) -> f64 {
        self.factors[fuel.index()]
    }

    /// National intensity from the latest snapshot of each region.
    /// Returns 0 when total generation is 0.
    pub fn current_intensity<'a>(
        &self,
        snapshots: impl IntoIterator<Item = &'a RegionSnapshot>,
    ) -> (f64, IntensityDetails) {
        let mut fuel_totals = [0.0; FUEL_COUNT];
        let mut details = IntensityDetails::default();

        for snapshot in snapshots {
            let generation = snapshot.generation();
            let breakdown = details
                .regional_breakdown
                .entry(snapshot.region())
                .or_default();
            for fuel in FuelType::ALL {
                let mw = generation.get(fuel);
                fuel_totals[fuel.index()] += mw;
                breakdown.insert(fuel, mw);
            }
            details.storage_mw += generation.storage_mw();
        }

        for fuel in FuelType::ALL {
            let mw = fuel_totals[fuel.index()];
            let emissions_kg = mw * KW_PER_MW * self.factor(fuel);
            details.total_generation_mw += mw;
            details.total_emissions_kg += emissions_kg;
            details.fuel_generation_mw.insert(fuel, mw);
            details.fuel_emissions_kg.insert(fuel, emissions_kg);
        }
        details.total_generation_kw = details.total_generation_mw * KW_PER_MW;

        let intensity = if details.total_generation_kw > 0.0 {
            details.total_emissions_kg / details.total_generation_kw
        } else {
            0.0
        };

        debug!(
            total_generation_mw = details.total_generation_mw,
            total_emissions_kg = details.total_emissions_kg,
            storage_mw = details.storage_mw,
            intensity_kg = intensity,
            "computed current intensity"
        );
        (intensity, details)
    }

    /// One intensity per forecast slot, summed over whichever regions are
    /// present. Negative predictions contribute nothing; a slot with no
    /// generation is 0.
    pub fn forecast_intensity(&self, forecast: &RegionalForecast) -> Vec<f64> {
        (0..FORECAST_HORIZON)
            .map(|t| {
                let mut generation_kw = 0.0;
                let mut emissions_kg = 0.0;
                for (_, tensor) in forecast.regions() {
                    for fuel in FuelType::ALL {
                        let mw = tensor[[t, fuel.index()]];
                        if mw > 0.0 {
                            let kw = mw * KW_PER_MW;
                            generation_kw += kw;
                            emissions_kg += kw * self.factor(fuel);
                        }
                    }
                }
                if generation_kw > 0.0 {
                    emissions_kg / generation_kw
                } else {
                    0.0
                }
            })
            .collect()
    }
}
