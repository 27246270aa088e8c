//! Append-only CSV of observed intensity, one row per successful cycle.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const KG_COLUMN: &str = "carbon_intensity_kgco2e_kwh";
pub const G_COLUMN: &str = "carbon_intensity_gco2e_kwh";

/// One logged observation, in grams per kWh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensitySample {
    pub timestamp: DateTime<FixedOffset>,
    pub g_co2e_kwh: f64,
}

#[derive(Debug, Clone)]
pub struct IntensityLog {
    path: PathBuf,
    tz: Tz,
}

impl IntensityLog {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row; the header is written only when the file is new or empty.
    pub fn append(&self, timestamp: DateTime<FixedOffset>, kg_per_kwh: f64) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| PipelineError::persistence(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| PipelineError::persistence(&self.path, e))?;
        let is_empty = file
            .metadata()
            .map_err(|e| PipelineError::persistence(&self.path, e))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_empty {
            writer.write_record(["timestamp", KG_COLUMN])?;
        }
        let local = timestamp.with_timezone(&self.tz);
        writer.write_record([
            local.format(TIMESTAMP_FORMAT).to_string(),
            format!("{kg_per_kwh:.6}"),
        ])?;
        writer
            .flush()
            .map_err(|e| PipelineError::persistence(&self.path, e))?;
        debug!(slot = %local, intensity_kg = kg_per_kwh, "logged intensity");
        Ok(())
    }

    /// Every parsable row sorted by time. Accepts either a kg or a g
    /// intensity column; a missing file is an empty history.
    pub fn load(&self) -> Result<Vec<IntensitySample>> {
        let mut reader = match csv::Reader::from_path(&self.path) {
            Ok(r) => r,
            Err(e) if is_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let headers = reader.headers()?.clone();
        let ts_idx = headers.iter().position(|h| h == "timestamp");
        let (value_idx, multiplier) = match (
            headers.iter().position(|h| h == KG_COLUMN),
            headers.iter().position(|h| h == G_COLUMN),
        ) {
            (Some(i), _) => (i, 1000.0),
            (None, Some(i)) => (i, 1.0),
            (None, None) => {
                return Err(PipelineError::MalformedResponse(format!(
                    "{} has no intensity column",
                    self.path.display()
                )))
            }
        };
        let ts_idx = ts_idx.ok_or_else(|| {
            PipelineError::MalformedResponse(format!("{} has no timestamp column", self.path.display()))
        })?;

        let mut samples = Vec::new();
        let mut skipped = 0usize;
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            let parsed = record
                .get(ts_idx)
                .and_then(|ts| self.parse_timestamp(ts))
                .zip(record.get(value_idx).and_then(|v| v.trim().parse::<f64>().ok()));
            match parsed {
                Some((timestamp, value)) if value.is_finite() => samples.push(IntensitySample {
                    timestamp,
                    g_co2e_kwh: value * multiplier,
                }),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(path = %self.path.display(), skipped, "skipped unparsable intensity rows");
        }
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    fn parse_timestamp(&self, raw: &str) -> Option<DateTime<FixedOffset>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts);
        }
        let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).ok()?;
        self.tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| ts.fixed_offset())
    }
}

fn is_not_found(error: &csv::Error) -> bool {
    matches!(error.kind(), csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound)
}
