use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub pipeline: PipelineConfig,
    #[validate(nested)]
    pub sources: SourcesConfig,
    #[validate(nested)]
    pub savings: SavingsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    pub output_path: PathBuf,
    pub debug_output_path: PathBuf,
    pub cache_path: PathBuf,
    pub scaler_path: PathBuf,
    pub intensity_log_path: PathBuf,
    pub models_dir: PathBuf,
    pub timezone: String,
    /// Cycles run at minutes where `minute % 10 == cycle_minute_offset`
    #[validate(range(max = 9))]
    pub cycle_minute_offset: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("data/carbon_intensity.json"),
            debug_output_path: PathBuf::from("data/carbon_intensity_debug.json"),
            cache_path: PathBuf::from("cache/generation_cache.json"),
            scaler_path: PathBuf::from("cache/scalers.json"),
            intensity_log_path: PathBuf::from("logs/actual_carbon_intensity.csv"),
            models_dir: PathBuf::from("data/models"),
            timezone: "Asia/Taipei".to_string(),
            cycle_minute_offset: 9,
        }
    }
}

impl PipelineConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone {:?}: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourcesConfig {
    #[validate(url)]
    pub generation_url: String,
    #[validate(url)]
    pub weather_url: String,
    pub weather_api_key: String,
    #[validate(range(min = 1, max = 300))]
    pub http_timeout_seconds: u64,
    pub user_agent: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            generation_url: "https://www.taipower.com.tw/d006/loadGraph/loadGraph/data/genary.json"
                .to_string(),
            weather_url: "https://opendata.cwa.gov.tw/api/v1/rest/datastore/O-A0003-001".to_string(),
            weather_api_key: String::new(),
            http_timeout_seconds: 30,
            user_agent: "carbon-intensity-pipeline/0.2".to_string(),
        }
    }
}

impl SourcesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SavingsConfig {
    pub chore_log_path: PathBuf,
    pub progress_path: PathBuf,
    #[validate(range(min = 0.0))]
    pub default_actual_g_per_kwh: f64,
    #[validate(range(min = 0.0))]
    pub default_worst_g_per_kwh: f64,
    #[validate(range(min = 1, max = 1440))]
    pub closest_match_window_minutes: i64,
}

impl Default for SavingsConfig {
    fn default() -> Self {
        Self {
            chore_log_path: PathBuf::from("data/chores.csv"),
            progress_path: PathBuf::from("data/daily_carbon_progress.json"),
            default_actual_g_per_kwh: 500.0,
            default_worst_g_per_kwh: 600.0,
            closest_match_window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub filter: String,
    /// When set, a daily-rolling JSON log file is written here as well
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,hyper=warn,reqwest=warn".to_string(),
            directory: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config/default.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        // A missing .env is the normal case outside development.
        let _ = dotenvy::dotenv();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("CIP__").split("__"));
        let cfg: Config = figment.extract().context("failed to extract configuration")?;
        cfg.validate().context("invalid configuration")?;
        cfg.pipeline.tz()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.pipeline.tz().unwrap(), chrono_tz::Asia::Taipei);
        assert_eq!(cfg.sources.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_out_of_range_offset() {
        let mut cfg = Config::default();
        cfg.pipeline.cycle_minute_offset = 12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            "[pipeline]\ncycle_minute_offset = 0\ntimezone = \"UTC\"\n\n[sources]\nhttp_timeout_seconds = 5\n",
        )
        .unwrap();

        let cfg = Config::load_from(&path).unwrap();
        assert_eq!(cfg.pipeline.cycle_minute_offset, 0);
        assert_eq!(cfg.pipeline.tz().unwrap(), chrono_tz::UTC);
        assert_eq!(cfg.sources.http_timeout_seconds, 5);
        assert_eq!(cfg.savings.default_worst_g_per_kwh, 600.0);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.timezone = "Mars/Olympus".to_string();
        assert!(cfg.tz().is_err());
    }
}
