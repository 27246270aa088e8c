use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

use crate::domain::ChoreRecord;
use crate::error::Result;

/// Chore log supplied by the application layer
#[cfg_attr(test, mockall::automock)]
pub trait ChoreSource: Send + Sync {
    /// Chores whose start falls on `date` in the configured zone
    fn chores_on(&self, date: NaiveDate) -> Result<Vec<ChoreRecord>>;
}

#[derive(Debug, Deserialize)]
struct ChoreRow {
    user_id: String,
    appliance_type: String,
    start_time: String,
    duration_minutes: u32,
}

/// CSV export with columns `user_id,appliance_type,start_time,duration_minutes`
#[derive(Debug, Clone)]
pub struct CsvChoreSource {
    path: PathBuf,
    tz: Tz,
}

impl CsvChoreSource {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
        }
    }

    fn parse_start(&self, raw: &str) -> Option<DateTime<FixedOffset>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts);
        }
        ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .and_then(|naive| self.tz.from_local_datetime(&naive).earliest())
            .map(|ts| ts.fixed_offset())
    }
}

impl ChoreSource for CsvChoreSource {
    fn chores_on(&self, date: NaiveDate) -> Result<Vec<ChoreRecord>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "chore log not found");
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let mut chores = Vec::new();
        for (line, row) in reader.deserialize::<ChoreRow>().enumerate() {
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    warn!(line = line + 2, error = %e, "skipping malformed chore row");
                    continue;
                }
            };
            let Some(start) = self.parse_start(&row.start_time) else {
                warn!(line = line + 2, start_time = %row.start_time, "skipping chore with bad start time");
                continue;
            };
            if start.with_timezone(&self.tz).date_naive() != date {
                continue;
            }
            match ChoreRecord::new(row.user_id, &row.appliance_type, start, row.duration_minutes) {
                Ok(chore) => chores.push(chore),
                Err(e) => warn!(line = line + 2, error = %e, "rejecting chore"),
            }
        }
        Ok(chores)
    }
}
