use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::fuel::{FuelType, FUEL_COUNT};
use super::region::Region;
use super::time::is_slot_aligned;
use crate::error::{PipelineError, Result};

/// Generation power per canonical fuel (MW), Storage held apart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMix {
    mw: [f64; FUEL_COUNT],
    storage_mw: f64,
}

impl GenerationMix {
    pub fn new(mw: [f64; FUEL_COUNT], storage_mw: f64) -> Result<Self> {
        if let Some(bad) = mw
            .iter()
            .chain(std::iter::once(&storage_mw))
            .find(|v| !v.is_finite() || **v < 0.0)
        {
            return Err(PipelineError::MalformedResponse(format!(
                "generation must be finite and non-negative, got {bad}"
            )));
        }
        Ok(Self { mw, storage_mw })
    }

    pub fn get(&self, fuel: FuelType) -> f64 {
        self.mw[fuel.index()]
    }

    pub fn storage_mw(&self) -> f64 {
        self.storage_mw
    }

    /// Fuel columns in canonical order
    pub fn as_array(&self) -> &[f64; FUEL_COUNT] {
        &self.mw
    }

    /// Total excluding Storage
    pub fn total_mw(&self) -> f64 {
        self.mw.iter().sum()
    }
}

/// Regional weather aggregates; each metric may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherAggregate {
    pub air_temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub sunshine_duration: Option<f64>,
    pub precipitation: Option<f64>,
}

impl WeatherAggregate {
    pub fn missing() -> Self {
        Self::default()
    }

    /// Metrics in model column order
    pub fn columns(&self) -> [Option<f64>; 4] {
        [
            self.air_temperature,
            self.wind_speed,
            self.sunshine_duration,
            self.precipitation,
        ]
    }
}

/// One 10-minute observation for one region.
///
/// Weather-bearing regions always carry a `WeatherAggregate` (possibly all
/// missing); the Other region never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    region: Region,
    timestamp: DateTime<FixedOffset>,
    generation: GenerationMix,
    weather: Option<WeatherAggregate>,
}

impl RegionSnapshot {
    pub fn new(
        region: Region,
        timestamp: DateTime<FixedOffset>,
        generation: GenerationMix,
        weather: Option<WeatherAggregate>,
    ) -> Result<Self> {
        if !is_slot_aligned(&timestamp) {
            return Err(PipelineError::MalformedResponse(format!(
                "snapshot timestamp {timestamp} is not on a 10-minute boundary"
            )));
        }
        let weather = match (region.has_weather(), weather) {
            (true, w) => Some(w.unwrap_or_default()),
            (false, None) => None,
            (false, Some(_)) => {
                return Err(PipelineError::MalformedResponse(format!(
                    "region {region} does not carry weather features"
                )))
            }
        };
        Ok(Self {
            region,
            timestamp,
            generation,
            weather,
        })
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn generation(&self) -> &GenerationMix {
        &self.generation
    }

    pub fn weather(&self) -> Option<&WeatherAggregate> {
        self.weather.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 12, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_generation_mix_validation() {
        let mut mw = [0.0; FUEL_COUNT];
        mw[FuelType::Coal.index()] = 100.0;
        let mix = GenerationMix::new(mw, 5.0).unwrap();
        assert_eq!(mix.get(FuelType::Coal), 100.0);
        assert_eq!(mix.total_mw(), 100.0);
        assert_eq!(mix.storage_mw(), 5.0);

        mw[0] = -1.0;
        assert!(GenerationMix::new(mw, 0.0).is_err());
        mw[0] = f64::NAN;
        assert!(GenerationMix::new(mw, 0.0).is_err());
    }

    #[test]
    fn test_weather_presence_follows_region() {
        let gen = GenerationMix::default();
        let north = RegionSnapshot::new(Region::North, ts(10), gen.clone(), None).unwrap();
        assert_eq!(north.weather(), Some(&WeatherAggregate::missing()));

        let other = RegionSnapshot::new(Region::Other, ts(10), gen.clone(), None).unwrap();
        assert!(other.weather().is_none());

        let bad = RegionSnapshot::new(
            Region::Other,
            ts(10),
            gen,
            Some(WeatherAggregate::missing()),
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_rejects_unaligned_timestamp() {
        let result = RegionSnapshot::new(Region::East, ts(13), GenerationMix::default(), None);
        assert!(result.is_err());
    }
}
