use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::atomic::{read_json, write_json_atomic};
use crate::error::{PipelineError, Result};

/// Carbon saved by one user on one date, in grams CO2e
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCarbonProgress {
    pub user_id: String,
    pub date: NaiveDate,
    pub daily_carbon_saved: f64,
    /// Running total within the calendar month, this date included
    pub cumulative_carbon_saved: f64,
}

#[cfg_attr(test, mockall::automock)]
pub trait ProgressStore: Send + Sync {
    fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyCarbonProgress>>;

    /// Inserts or replaces the entry for `(user_id, date)`
    fn put(&self, progress: DailyCarbonProgress) -> Result<()>;

    /// Entries for the user in the month of `date`, strictly before `date`
    fn month_before(&self, user_id: &str, date: NaiveDate) -> Result<Vec<DailyCarbonProgress>>;
}

/// All users' progress in a single JSON document
pub struct JsonProgressStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process
    lock: Mutex<()>,
}

impl JsonProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Vec<DailyCarbonProgress>> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }
}

fn poisoned() -> PipelineError {
    PipelineError::Serialization("progress store lock poisoned".to_string())
}

impl ProgressStore for JsonProgressStore {
    fn get(&self, user_id: &str, date: NaiveDate) -> Result<Option<DailyCarbonProgress>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Ok(self
            .load()?
            .into_iter()
            .find(|p| p.user_id == user_id && p.date == date))
    }

    fn put(&self, progress: DailyCarbonProgress) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut entries = self.load()?;
        match entries
            .iter_mut()
            .find(|p| p.user_id == progress.user_id && p.date == progress.date)
        {
            Some(existing) => *existing = progress,
            None => entries.push(progress),
        }
        entries.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.date.cmp(&b.date)));
        write_json_atomic(&self.path, &entries)
    }

    fn month_before(&self, user_id: &str, date: NaiveDate) -> Result<Vec<DailyCarbonProgress>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Ok(self
            .load()?
            .into_iter()
            .filter(|p| {
                p.user_id == user_id
                    && p.date < date
                    && p.date.year() == date.year()
                    && p.date.month() == date.month()
            })
            .collect())
    }
}
