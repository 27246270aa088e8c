//! Station observations averaged per region

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{build_client, RegionalWeather, WeatherSource};
use crate::config::SourcesConfig;
use crate::domain::{Region, RegionClassifier, WeatherAggregate};
use crate::error::{PipelineError, Result};

/// Readings at or below this are instrument sentinels, not temperatures
const TEMPERATURE_FLOOR_C: f64 = -90.0;

#[derive(Clone)]
pub struct HttpWeatherSource {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpWeatherSource {
    pub fn new(cfg: &SourcesConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(cfg.timeout(), &cfg.user_agent)?,
            url: cfg.weather_url.clone(),
            api_key: cfg.weather_api_key.clone(),
        })
    }
}

#[async_trait]
impl WeatherSource for HttpWeatherSource {
    async fn fetch(&self) -> Result<RegionalWeather> {
        debug!(url = %self.url, "fetching weather data");
        let response = self
            .client
            .get(&self.url)
            .query(&[("Authorization", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Fetch(format!(
                "weather API returned {}",
                response.status()
            )));
        }

        let raw: RawWeatherResponse = response.json().await?;
        let weather = aggregate_stations(&raw.records.stations);
        info!(
            stations = raw.records.stations.len(),
            "fetched weather data"
        );
        Ok(weather)
    }
}

#[derive(Debug, Deserialize)]
pub struct RawWeatherResponse {
    #[serde(default)]
    pub records: RawRecords,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawRecords {
    #[serde(rename = "Station", default)]
    pub stations: Vec<RawStation>,
}

#[derive(Debug, Deserialize)]
pub struct RawStation {
    #[serde(rename = "StationName", default)]
    pub station_name: String,
    #[serde(rename = "WeatherElement", default)]
    pub weather_element: RawWeatherElement,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawWeatherElement {
    #[serde(rename = "AirTemperature", default)]
    pub air_temperature: Value,
    #[serde(rename = "WindSpeed", default)]
    pub wind_speed: Value,
    #[serde(rename = "SunshineDuration", default)]
    pub sunshine_duration: Value,
    #[serde(rename = "Now", default)]
    pub now: RawNow,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawNow {
    #[serde(rename = "Precipitation", default)]
    pub precipitation: Value,
}

/// The feed mixes numbers and numeric strings
fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[derive(Default)]
struct MetricSamples {
    air_temperature: Vec<f64>,
    wind_speed: Vec<f64>,
    sunshine_duration: Vec<f64>,
    precipitation: Vec<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Mean of each metric over a region's configured stations. Stations
/// outside the configured set are ignored; a metric with no valid reading
/// is missing.
pub fn aggregate_stations(stations: &[RawStation]) -> RegionalWeather {
    let mut samples: BTreeMap<Region, MetricSamples> = BTreeMap::new();

    for station in stations {
        let Some(region) = RegionClassifier::station_region(&station.station_name) else {
            continue;
        };
        let entry = samples.entry(region).or_default();
        let element = &station.weather_element;

        if let Some(t) = numeric(&element.air_temperature).filter(|t| *t > TEMPERATURE_FLOOR_C) {
            entry.air_temperature.push(t);
        }
        if let Some(w) = numeric(&element.wind_speed).filter(|w| *w >= 0.0) {
            entry.wind_speed.push(w);
        }
        if let Some(s) = numeric(&element.sunshine_duration).filter(|s| *s >= 0.0) {
            entry.sunshine_duration.push(s);
        }
        if let Some(p) = numeric(&element.now.precipitation).filter(|p| *p >= 0.0) {
            entry.precipitation.push(p);
        }
    }

    Region::WEATHER
        .iter()
        .map(|region| {
            let aggregate = samples
                .get(region)
                .map(|s| WeatherAggregate {
                    air_temperature: mean(&s.air_temperature),
                    wind_speed: mean(&s.wind_speed),
                    sunshine_duration: mean(&s.sunshine_duration),
                    precipitation: mean(&s.precipitation),
                })
                .unwrap_or_default();
            debug!(region = %region, weather = ?aggregate, "regional weather");
            (*region, aggregate)
        })
        .collect()
}
