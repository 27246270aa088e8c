//! Feature engineering for the generation-mix models
//!
//! Column order is fixed by the models' training schema: the 12 fuels in
//! canonical order, then the 4 weather metrics (weather-bearing regions only),
//! then 6 calendar columns.

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use ndarray::Array2;

use crate::domain::{Region, RegionSnapshot, FUEL_COUNT};
use crate::error::{PipelineError, Result};

pub const WEATHER_COLUMNS: [&str; 4] = [
    "AirTemperature",
    "WindSpeed",
    "SunshineDuration",
    "Precipitation",
];

pub const CALENDAR_COLUMNS: [&str; 6] = ["Year", "Month", "Day", "DayOfWeek", "Hour", "Minute"];

/// Number of model input columns for a region
pub fn feature_count(region: Region) -> usize {
    let weather = if region.has_weather() {
        WEATHER_COLUMNS.len()
    } else {
        0
    };
    FUEL_COUNT + weather + CALENDAR_COLUMNS.len()
}

/// Calendar columns; day of week counts from Monday = 0
pub fn calendar_features(timestamp: &DateTime<FixedOffset>) -> [f64; 6] {
    [
        timestamp.year() as f64,
        timestamp.month() as f64,
        timestamp.day() as f64,
        timestamp.weekday().num_days_from_monday() as f64,
        timestamp.hour() as f64,
        timestamp.minute() as f64,
    ]
}

/// One row per snapshot, old to new. Missing weather metrics become 0.
pub fn feature_matrix<'a>(
    region: Region,
    snapshots: impl IntoIterator<Item = &'a RegionSnapshot>,
) -> Result<Array2<f64>> {
    let width = feature_count(region);
    let mut values = Vec::new();
    let mut rows = 0;

    for snapshot in snapshots {
        if snapshot.region() != region {
            return Err(PipelineError::MalformedResponse(format!(
                "snapshot for {} passed to {region} feature matrix",
                snapshot.region()
            )));
        }
        values.extend_from_slice(snapshot.generation().as_array());
        if region.has_weather() {
            let weather = snapshot.weather().copied().unwrap_or_default();
            values.extend(weather.columns().iter().map(|v| v.unwrap_or(0.0)));
        }
        values.extend_from_slice(&calendar_features(&snapshot.timestamp()));
        rows += 1;
    }

    Array2::from_shape_vec((rows, width), values)
        .map_err(|e| PipelineError::shape(format!("{rows}x{width}"), e))
}

/// The fuel columns of a feature matrix, used to fit the target scaler
pub fn target_matrix(features: &Array2<f64>) -> Array2<f64> {
    features.slice(ndarray::s![.., 0..FUEL_COUNT]).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FuelType, GenerationMix, WeatherAggregate};
    use chrono::TimeZone;

    fn ts() -> DateTime<FixedOffset> {
        // 2025-06-02 is a Monday
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 2, 13, 40, 0)
            .unwrap()
    }

    fn mix() -> GenerationMix {
        let mut mw = [0.0; FUEL_COUNT];
        mw[FuelType::Nuclear.index()] = 900.0;
        mw[FuelType::OtherRenewable.index()] = 12.0;
        GenerationMix::new(mw, 3.0).unwrap()
    }

    #[test]
    fn test_feature_counts() {
        assert_eq!(feature_count(Region::North), 22);
        assert_eq!(feature_count(Region::Other), 18);
    }

    #[test]
    fn test_weather_region_row_layout() {
        let weather = WeatherAggregate {
            air_temperature: Some(28.5),
            wind_speed: None,
            sunshine_duration: Some(0.8),
            precipitation: Some(0.0),
        };
        let snapshot = RegionSnapshot::new(Region::Central, ts(), mix(), Some(weather)).unwrap();
        let matrix = feature_matrix(Region::Central, [&snapshot]).unwrap();

        assert_eq!(matrix.dim(), (1, 22));
        assert_eq!(matrix[[0, 0]], 900.0);
        assert_eq!(matrix[[0, 11]], 12.0);
        assert_eq!(matrix[[0, 12]], 28.5);
        assert_eq!(matrix[[0, 13]], 0.0);
        assert_eq!(matrix[[0, 14]], 0.8);
        assert_eq!(
            matrix.row(0).slice(ndarray::s![16..]).to_vec(),
            vec![2025.0, 6.0, 2.0, 0.0, 13.0, 40.0]
        );
    }

    #[test]
    fn test_other_region_has_no_weather_columns() {
        let snapshot = RegionSnapshot::new(Region::Other, ts(), mix(), None).unwrap();
        let matrix = feature_matrix(Region::Other, [&snapshot, &snapshot]).unwrap();
        assert_eq!(matrix.dim(), (2, 18));
        assert_eq!(matrix[[1, 12]], 2025.0);
        assert_eq!(target_matrix(&matrix).dim(), (2, FUEL_COUNT));
    }

    #[test]
    fn test_region_mismatch_rejected() {
        let snapshot = RegionSnapshot::new(Region::Other, ts(), mix(), None).unwrap();
        assert!(feature_matrix(Region::North, [&snapshot]).is_err());
    }
}
