//! External telemetry: live generation per unit and weather per station,
//! normalized to per-region aggregates.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::info;

use crate::domain::{FeedFuel, GenerationMix, Region, WeatherAggregate};
use crate::error::{PipelineError, Result};

pub mod generation;
pub mod weather;

pub use generation::HttpGenerationSource;
pub use weather::HttpWeatherSource;

/// One generator unit's reading from the live feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReading {
    pub fuel: FeedFuel,
    pub region: Region,
    pub generation_mw: f64,
}

/// Normalized generation for one slot: every region present, every fuel
/// defaulting to zero
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReading {
    pub timestamp: DateTime<FixedOffset>,
    pub regions: BTreeMap<Region, GenerationMix>,
    pub units: BTreeMap<String, UnitReading>,
}

impl GenerationReading {
    pub fn region(&self, region: Region) -> GenerationMix {
        self.regions.get(&region).cloned().unwrap_or_default()
    }
}

pub type RegionalWeather = BTreeMap<Region, WeatherAggregate>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationSource: Send + Sync {
    async fn fetch(&self) -> Result<GenerationReading>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self) -> Result<RegionalWeather>;
}

pub(crate) fn build_client(timeout: Duration, user_agent: &str) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent)
            .map_err(|e| PipelineError::Config(format!("invalid user agent: {e}")))?,
    );
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}

/// Per-unit output changes below this are not reported
pub const FLUCTUATION_THRESHOLD_MW: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluctuationReport {
    pub came_online: Vec<String>,
    pub went_offline: Vec<String>,
    /// `(unit, previous MW, current MW)`
    pub changed: Vec<(String, f64, f64)>,
}

impl FluctuationReport {
    pub fn is_empty(&self) -> bool {
        self.came_online.is_empty() && self.went_offline.is_empty() && self.changed.is_empty()
    }
}

/// Compares each cycle's per-unit output with the previous cycle
#[derive(Debug, Default)]
pub struct FluctuationTracker {
    previous: Option<BTreeMap<String, f64>>,
}

impl FluctuationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first observation only records a baseline
    pub fn observe(&mut self, units: &BTreeMap<String, UnitReading>) -> FluctuationReport {
        let current: BTreeMap<String, f64> = units
            .iter()
            .map(|(name, u)| (name.clone(), u.generation_mw))
            .collect();
        let Some(previous) = self.previous.replace(current.clone()) else {
            return FluctuationReport::default();
        };

        let mut report = FluctuationReport::default();
        for (name, mw) in &current {
            match previous.get(name) {
                None => report.came_online.push(name.clone()),
                Some(prev) if (mw - prev).abs() > FLUCTUATION_THRESHOLD_MW => {
                    report.changed.push((name.clone(), *prev, *mw))
                }
                Some(_) => {}
            }
        }
        report.went_offline = previous
            .keys()
            .filter(|name| !current.contains_key(*name))
            .cloned()
            .collect();

        if !report.is_empty() {
            info!(
                came_online = ?report.came_online,
                went_offline = ?report.went_offline,
                changed = report.changed.len(),
                "generator fluctuation"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FuelType;

    fn units(entries: &[(&str, f64)]) -> BTreeMap<String, UnitReading> {
        entries
            .iter()
            .map(|(name, mw)| {
                (
                    name.to_string(),
                    UnitReading {
                        fuel: FeedFuel::Fuel(FuelType::Coal),
                        region: Region::Central,
                        generation_mw: *mw,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_first_observation_is_baseline() {
        let mut tracker = FluctuationTracker::new();
        assert!(tracker.observe(&units(&[("台中#1", 500.0)])).is_empty());
    }

    #[test]
    fn test_reports_online_offline_and_changes() {
        let mut tracker = FluctuationTracker::new();
        tracker.observe(&units(&[("台中#1", 500.0), ("台中#2", 480.0), ("麥寮#1", 300.0)]));
        let report = tracker.observe(&units(&[
            ("台中#1", 500.05),
            ("台中#2", 450.0),
            ("和平#1", 600.0),
        ]));

        assert_eq!(report.came_online, vec!["和平#1".to_string()]);
        assert_eq!(report.went_offline, vec!["麥寮#1".to_string()]);
        assert_eq!(report.changed, vec![("台中#2".to_string(), 480.0, 450.0)]);
    }

    #[test]
    fn test_client_rejects_bad_user_agent() {
        assert!(build_client(Duration::from_secs(5), "bad\nagent").is_err());
        assert!(build_client(Duration::from_secs(5), "carbon-intensity/0.2").is_ok());
    }
}
