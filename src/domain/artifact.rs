//! Output documents consumed by the API layer's file-read endpoints

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::fuel::FuelType;
use super::region::Region;
use super::snapshot::WeatherAggregate;

/// Traffic-light classification of an intensity value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
            Self::Red => write!(f, "red"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Complete,
    BuildingCache,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentIntensity {
    #[serde(rename = "gCO2e_kWh")]
    pub g_co2e_kwh: i64,
    pub level: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    /// `HH:MM`
    pub time: String,
    #[serde(rename = "gCO2e_kWh")]
    pub g_co2e_kwh: i64,
    pub level: Level,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub message: String,
    pub start_time: String,
    pub end_time: String,
}

impl Recommendation {
    pub const PLACEHOLDER_TIME: &'static str = "--:--";
    pub const LOADING_MESSAGE: &'static str = "Loading data...";

    pub fn loading() -> Self {
        Self {
            message: Self::LOADING_MESSAGE.to_string(),
            start_time: Self::PLACEHOLDER_TIME.to_string(),
            end_time: Self::PLACEHOLDER_TIME.to_string(),
        }
    }
}

/// Client-facing "current + forecast + recommendation" document, rewritten every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonIntensityArtifact {
    pub last_updated: DateTime<FixedOffset>,
    pub status: ArtifactStatus,
    pub current_intensity: Option<CurrentIntensity>,
    pub forecast: Vec<ForecastEntry>,
    pub recommendation: Option<Recommendation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl CarbonIntensityArtifact {
    /// Current value known, forecast unavailable while the cache fills
    pub fn building_cache(last_updated: DateTime<FixedOffset>, current_g: i64) -> Self {
        Self {
            last_updated,
            status: ArtifactStatus::BuildingCache,
            current_intensity: Some(CurrentIntensity {
                g_co2e_kwh: current_g,
                level: Level::Yellow,
            }),
            forecast: Vec::new(),
            recommendation: Some(Recommendation::loading()),
            errors: Vec::new(),
        }
    }

    pub fn error(last_updated: DateTime<FixedOffset>, message: impl Into<String>) -> Self {
        Self {
            last_updated,
            status: ArtifactStatus::Error,
            current_intensity: None,
            forecast: Vec::new(),
            recommendation: None,
            errors: vec![message.into()],
        }
    }
}

/// Detailed companion document kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugArtifact {
    pub last_updated: DateTime<FixedOffset>,
    pub status: ArtifactStatus,
    pub current: Option<DebugCurrent>,
    pub forecast: DebugForecast,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugCurrent {
    /// kgCO2e/kWh, rounded to 3 decimals
    pub carbon_intensity: f64,
    pub timestamp: String,
    pub total_generation_mw: f64,
    /// Percent of total generation, Storage excluded
    pub generation_mix: BTreeMap<FuelType, f64>,
    /// MW per fuel; Storage listed for transparency only
    pub generation_mw: BTreeMap<String, f64>,
    pub weather: BTreeMap<Region, WeatherAggregate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugForecast {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamps: Vec<String>,
}

impl DebugForecast {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
            start_time: None,
            end_time: None,
            values: Vec::new(),
            timestamps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_building_cache_artifact_shape() {
        let artifact = CarbonIntensityArtifact::building_cache(now(), 512);
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["status"], "building_cache");
        assert_eq!(json["current_intensity"]["gCO2e_kWh"], 512);
        assert_eq!(json["current_intensity"]["level"], "yellow");
        assert_eq!(json["forecast"].as_array().unwrap().len(), 0);
        assert_eq!(json["recommendation"]["start_time"], "--:--");
        assert_eq!(json["recommendation"]["end_time"], "--:--");
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn test_error_artifact_shape() {
        let artifact = CarbonIntensityArtifact::error(now(), "Failed to fetch generation data");
        let json = serde_json::to_value(&artifact).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["current_intensity"].is_null());
        assert_eq!(json["errors"][0], "Failed to fetch generation data");
        assert_eq!(json["last_updated"], "2025-06-01T12:00:00+08:00");
    }
}
