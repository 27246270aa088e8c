pub mod scheduler;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::cache::{CacheStatus, JsonCacheStore, RollingCache, CACHE_DEPTH};
use crate::config::Config;
use crate::domain::{
    kg_to_grams, ArtifactStatus, CarbonIntensityArtifact, DebugArtifact, DebugCurrent,
    DebugForecast, ForecastIntensitySeries, Region, RegionSnapshot,
};
use crate::emissions::{EmissionEngine, IntensityDetails};
use crate::error::PipelineError;
use crate::forecast::Forecaster;
use crate::ingest::{
    FluctuationTracker, GenerationReading, GenerationSource, HttpGenerationSource,
    HttpWeatherSource, RegionalWeather, WeatherSource,
};
use crate::ml::{FeatureScaler, ModelRegistry};
use crate::recommendation::RecommendationDeriver;
use crate::repo::{ArtifactWriter, IntensityLog};

pub use scheduler::{CycleScheduler, TaskStatus};

const DEBUG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of one pipeline cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Complete { slot: DateTime<FixedOffset>, intensity_g: i64 },
    BuildingCache { slot: DateTime<FixedOffset>, intensity_g: i64, depth: usize },
    FetchFailed { message: String },
}

/// Everything the orchestrator drives, assembled by the caller
pub struct PipelineParts {
    pub generation: Box<dyn GenerationSource>,
    pub weather: Box<dyn WeatherSource>,
    pub cache: RollingCache,
    pub scaler: FeatureScaler,
    pub forecaster: Forecaster,
    pub intensity_log: IntensityLog,
    pub artifacts: ArtifactWriter,
    pub tz: Tz,
}

/// Runs fetch → aggregate → intensity → log → cache → forecast →
/// recommendation → artifact, one cycle at a time.
pub struct PipelineOrchestrator {
    generation: Box<dyn GenerationSource>,
    weather: Box<dyn WeatherSource>,
    engine: EmissionEngine,
    cache: RollingCache,
    scaler: FeatureScaler,
    forecaster: Forecaster,
    deriver: RecommendationDeriver,
    intensity_log: IntensityLog,
    artifacts: ArtifactWriter,
    fluctuations: FluctuationTracker,
    tz: Tz,
}

impl PipelineOrchestrator {
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            generation: parts.generation,
            weather: parts.weather,
            engine: EmissionEngine::new(),
            cache: parts.cache,
            scaler: parts.scaler,
            forecaster: parts.forecaster,
            deriver: RecommendationDeriver::new(),
            intensity_log: parts.intensity_log,
            artifacts: parts.artifacts,
            fluctuations: FluctuationTracker::new(),
            tz: parts.tz,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let tz = cfg.pipeline.tz()?;
        let now = chrono::Utc::now().with_timezone(&tz).fixed_offset();

        let generation = HttpGenerationSource::new(&cfg.sources, tz)
            .context("failed to build generation client")?;
        let weather =
            HttpWeatherSource::new(&cfg.sources).context("failed to build weather client")?;

        let cache = RollingCache::open(Box::new(JsonCacheStore::new(&cfg.pipeline.cache_path)), now);
        let scaler = FeatureScaler::open(&cfg.pipeline.scaler_path);
        let forecaster = Forecaster::new(ModelRegistry::load_dir(&cfg.pipeline.models_dir));
        for (region, loaded) in forecaster.model_status() {
            if !loaded {
                warn!(region = %region, "no forecast model for region");
            }
        }

        Ok(Self::new(PipelineParts {
            generation: Box::new(generation),
            weather: Box::new(weather),
            cache,
            scaler,
            forecaster,
            intensity_log: IntensityLog::new(&cfg.pipeline.intensity_log_path, tz),
            artifacts: ArtifactWriter::new(
                &cfg.pipeline.output_path,
                &cfg.pipeline.debug_output_path,
            ),
            tz,
        }))
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }

    pub fn clear_cache(&mut self, now: DateTime<FixedOffset>) -> crate::error::Result<()> {
        self.cache.clear(now)
    }

    pub fn model_status(&self) -> BTreeMap<Region, bool> {
        self.forecaster.model_status()
    }

    /// Runs one cycle. Fetch failures are reported through the error
    /// artifact and the outcome; only artifact write failures are returned
    /// as errors.
    pub async fn run_cycle(&mut self, now: DateTime<FixedOffset>) -> crate::error::Result<CycleOutcome> {
        let reading = match self.generation.fetch().await {
            Ok(reading) => reading,
            Err(e) => {
                let message = format!("Failed to fetch generation data: {e}");
                warn!(error = %e, transient = e.is_transient(), "generation fetch failed, cycle aborted");
                self.write_error(now, &message)?;
                return Ok(CycleOutcome::FetchFailed { message });
            }
        };
        self.fluctuations.observe(&reading.units);

        let weather = match self.weather.fetch().await {
            Ok(weather) => weather,
            Err(e) => {
                warn!(error = %e, "weather fetch failed, weather features missing this cycle");
                RegionalWeather::new()
            }
        };

        let snapshots = match build_snapshots(&reading, &weather) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                let message = format!("Failed to fetch generation data: {e}");
                warn!(error = %e, "generation reading rejected, cycle aborted");
                self.write_error(now, &message)?;
                return Ok(CycleOutcome::FetchFailed { message });
            }
        };

        let slot = reading.timestamp;
        let (current_kg, details) = self.engine.current_intensity(&snapshots);
        let intensity_g = kg_to_grams(current_kg);
        info!(slot = %slot, intensity_g, total_generation_mw = details.total_generation_mw, "current intensity");

        if let Err(e) = self.intensity_log.append(slot, current_kg) {
            warn!(error = %e, path = %self.intensity_log.path().display(), "failed to append intensity log");
        }
        if let Err(e) = self.cache.append_cycle(snapshots, now) {
            warn!(error = %e, "failed to persist rolling cache");
        }

        let status = self.cache.status();
        let (artifact, forecast, outcome) = if status.ready {
            let regional = self.forecaster.predict_all(&self.cache, &mut self.scaler);
            let values = self.engine.forecast_intensity(&regional);
            let last = self.cache.last_timestamp().unwrap_or(slot);
            let series = ForecastIntensitySeries::from_last_observation(last, values);
            let artifact = self.deriver.build_artifact(now, current_kg, &series);
            info!(
                regions = regional.len(),
                forecast_start = %series.start,
                status = ?artifact.status,
                "forecast published"
            );
            (
                artifact,
                debug_forecast(&series),
                CycleOutcome::Complete { slot, intensity_g },
            )
        } else {
            let depth = status.reference_count();
            info!(cache_depth = depth, required = CACHE_DEPTH, "building cache, forecast unavailable");
            (
                CarbonIntensityArtifact::building_cache(now, intensity_g),
                DebugForecast::unavailable(format!("Building cache: {depth}/{CACHE_DEPTH} timesteps")),
                CycleOutcome::BuildingCache { slot, intensity_g, depth },
            )
        };

        let debug = DebugArtifact {
            last_updated: now,
            status: artifact.status,
            current: Some(self.debug_current(slot, current_kg, &details)),
            forecast,
            errors: Vec::new(),
        };
        self.artifacts.write(&artifact)?;
        self.artifacts.write_debug(&debug)?;
        Ok(outcome)
    }

    fn write_error(&self, now: DateTime<FixedOffset>, message: &str) -> crate::error::Result<()> {
        self.artifacts
            .write(&CarbonIntensityArtifact::error(now, message))?;
        self.artifacts.write_debug(&DebugArtifact {
            last_updated: now,
            status: ArtifactStatus::Error,
            current: None,
            forecast: DebugForecast::unavailable(message),
            errors: vec![message.to_string()],
        })
    }

    fn debug_current(
        &self,
        slot: DateTime<FixedOffset>,
        current_kg: f64,
        details: &IntensityDetails,
    ) -> DebugCurrent {
        let mut generation_mw: BTreeMap<String, f64> = details
            .fuel_generation_mw
            .iter()
            .map(|(fuel, mw)| (fuel.to_string(), *mw))
            .collect();
        generation_mw.insert("Storage".to_string(), details.storage_mw);

        let weather = Region::WEATHER
            .into_iter()
            .filter_map(|region| {
                self.cache
                    .latest(region)
                    .and_then(|s| s.weather())
                    .map(|w| (region, *w))
            })
            .collect();

        DebugCurrent {
            carbon_intensity: (current_kg * 1000.0).round() / 1000.0,
            timestamp: slot
                .with_timezone(&self.tz)
                .format(DEBUG_TIMESTAMP_FORMAT)
                .to_string(),
            total_generation_mw: details.total_generation_mw,
            generation_mix: details.generation_mix(),
            generation_mw,
            weather,
        }
    }
}

/// One snapshot per region at the reading's slot. Weather-bearing regions
/// without an aggregate get all-missing weather.
pub fn build_snapshots(
    reading: &GenerationReading,
    weather: &RegionalWeather,
) -> Result<Vec<RegionSnapshot>, PipelineError> {
    Region::ALL
        .into_iter()
        .map(|region| {
            let aggregate = region
                .has_weather()
                .then(|| weather.get(&region).copied().unwrap_or_default());
            RegionSnapshot::new(region, reading.timestamp, reading.region(region), aggregate)
        })
        .collect()
}

fn debug_forecast(series: &ForecastIntensitySeries) -> DebugForecast {
    DebugForecast {
        available: true,
        reason: None,
        start_time: Some(series.start.format(DEBUG_TIMESTAMP_FORMAT).to_string()),
        end_time: Some(series.end().format(DEBUG_TIMESTAMP_FORMAT).to_string()),
        values: series.values.clone(),
        timestamps: series
            .timestamps()
            .iter()
            .map(|ts| ts.format(DEBUG_TIMESTAMP_FORMAT).to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheState, CacheStore};
    use crate::domain::{GenerationMix, FORECAST_HORIZON, FUEL_COUNT};
    use crate::forecast::features::feature_count;
    use crate::ingest::{MockGenerationSource, MockWeatherSource};
    use crate::ml::DenseSequenceModel;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    struct NullStore;

    impl CacheStore for NullStore {
        fn load(&self) -> crate::error::Result<Option<CacheState>> {
            Ok(None)
        }
        fn save(&self, _: &CacheState) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn tz() -> Tz {
        chrono_tz::Asia::Taipei
    }

    fn t0() -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap().fixed_offset()
    }

    fn reading(ts: DateTime<FixedOffset>) -> GenerationReading {
        let mut mw = [0.0; FUEL_COUNT];
        mw[1] = 100.0; // Coal
        mw[9] = 100.0; // Wind
        GenerationReading {
            timestamp: ts,
            regions: Region::ALL
                .into_iter()
                .map(|r| (r, GenerationMix::new(mw, 5.0).unwrap()))
                .collect(),
            units: BTreeMap::new(),
        }
    }

    fn orchestrator(
        dir: &std::path::Path,
        generation: MockGenerationSource,
        weather: MockWeatherSource,
    ) -> PipelineOrchestrator {
        let mut models = ModelRegistry::new();
        for region in Region::ALL {
            models.insert(
                region,
                Arc::new(DenseSequenceModel::constant(feature_count(region), 50.0)),
            );
        }
        PipelineOrchestrator::new(PipelineParts {
            generation: Box::new(generation),
            weather: Box::new(weather),
            cache: RollingCache::open(Box::new(NullStore), t0()),
            scaler: FeatureScaler::open(dir.join("scaler.json")),
            forecaster: Forecaster::new(models),
            intensity_log: IntensityLog::new(dir.join("intensity.csv"), tz()),
            artifacts: ArtifactWriter::new(dir.join("carbon.json"), dir.join("debug.json")),
            tz: tz(),
        })
    }

    #[tokio::test]
    async fn test_fetch_failure_writes_error_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut generation = MockGenerationSource::new();
        generation
            .expect_fetch()
            .returning(|| Err(PipelineError::Fetch("timed out".into())));
        let mut weather = MockWeatherSource::new();
        weather.expect_fetch().never();

        let mut pipeline = orchestrator(dir.path(), generation, weather);
        let outcome = pipeline.run_cycle(t0()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::FetchFailed { .. }));

        let artifact = pipeline.artifacts.read().unwrap().unwrap();
        assert_eq!(artifact.status, ArtifactStatus::Error);
        assert!(artifact.current_intensity.is_none());
        assert!(artifact.errors[0].starts_with("Failed to fetch generation data"));
        assert_eq!(pipeline.cache_status().reference_count(), 0);
    }

    #[tokio::test]
    async fn test_building_then_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mut generation = MockGenerationSource::new();
        let mut calls = 0;
        generation.expect_fetch().returning(move || {
            let ts = t0() + Duration::minutes(10 * calls);
            calls += 1;
            Ok(reading(ts))
        });
        let mut weather = MockWeatherSource::new();
        weather
            .expect_fetch()
            .returning(|| Err(PipelineError::Fetch("weather down".into())));

        let mut pipeline = orchestrator(dir.path(), generation, weather);
        for i in 0..CACHE_DEPTH - 1 {
            let outcome = pipeline.run_cycle(t0()).await.unwrap();
            assert!(matches!(outcome, CycleOutcome::BuildingCache { depth, .. } if depth == i + 1));
        }
        let debug = pipeline.artifacts.read_debug().unwrap().unwrap();
        assert_eq!(debug.forecast.reason.as_deref(), Some("Building cache: 5/6 timesteps"));
        assert_eq!(pipeline.artifacts.read().unwrap().unwrap().status, ArtifactStatus::BuildingCache);

        let outcome = pipeline.run_cycle(t0()).await.unwrap();
        // 100 MW coal + 100 MW wind in every region
        assert!(matches!(outcome, CycleOutcome::Complete { intensity_g: 456, .. }));

        let artifact = pipeline.artifacts.read().unwrap().unwrap();
        assert_eq!(artifact.status, ArtifactStatus::Complete);
        assert_eq!(artifact.forecast.len(), FORECAST_HORIZON);

        let debug = pipeline.artifacts.read_debug().unwrap().unwrap();
        assert!(debug.forecast.available);
        assert_eq!(debug.current.unwrap().generation_mw["Storage"], 25.0);

        let history = pipeline.intensity_log.load().unwrap();
        assert_eq!(history.len(), CACHE_DEPTH);
    }
}
