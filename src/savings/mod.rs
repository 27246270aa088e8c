//! Counterfactual daily carbon savings per user.
//!
//! A chore's saving is what it would have emitted in the day's worst
//! continuous period of the same length, minus what it emitted at the time
//! it actually ran. Intensities come from the pipeline's historical log and
//! are in gCO2e/kWh throughout.

pub mod scheduler;

pub use scheduler::{next_midnight, DailySavingsScheduler, SavingsJob};

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SavingsConfig;
use crate::domain::time::{slot_duration, truncate_to_slot, SLOT_MINUTES};
use crate::domain::ChoreRecord;
use crate::error::Result;
use crate::repo::{ChoreSource, DailyCarbonProgress, IntensitySample, ProgressStore};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavingsSettings {
    pub default_actual_g_per_kwh: f64,
    pub default_worst_g_per_kwh: f64,
    /// A bucket without an exact sample uses the closest one strictly inside this window
    pub closest_match_window: Duration,
}

impl Default for SavingsSettings {
    fn default() -> Self {
        Self::from(&SavingsConfig::default())
    }
}

impl From<&SavingsConfig> for SavingsSettings {
    fn from(cfg: &SavingsConfig) -> Self {
        Self {
            default_actual_g_per_kwh: cfg.default_actual_g_per_kwh,
            default_worst_g_per_kwh: cfg.default_worst_g_per_kwh,
            closest_match_window: Duration::minutes(cfg.closest_match_window_minutes),
        }
    }
}

/// Logged intensity indexed by timestamp
#[derive(Debug, Clone, Default)]
pub struct IntensityHistory {
    by_time: BTreeMap<DateTime<FixedOffset>, f64>,
}

impl IntensityHistory {
    pub fn new(samples: impl IntoIterator<Item = IntensitySample>) -> Self {
        Self {
            by_time: samples
                .into_iter()
                .map(|s| (s.timestamp, s.g_co2e_kwh))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_time.is_empty()
    }

    pub fn exact(&self, ts: DateTime<FixedOffset>) -> Option<f64> {
        self.by_time.get(&ts).copied()
    }

    /// Closest sample strictly less than `within` away; the earlier sample wins ties
    pub fn closest(&self, ts: DateTime<FixedOffset>, within: Duration) -> Option<f64> {
        let before = self.by_time.range(..=ts).next_back();
        let after = self.by_time.range(ts..).next();
        let candidate = match (before, after) {
            (Some(b), Some(a)) => {
                if (ts - *b.0) <= (*a.0 - ts) {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        let (at, value) = candidate;
        let distance = if *at >= ts { *at - ts } else { ts - *at };
        (distance < within).then_some(*value)
    }

    /// Values whose local date in `tz` is `date`, in time order
    pub fn day_values(&self, date: NaiveDate, tz: Tz) -> Vec<f64> {
        self.by_time
            .iter()
            .filter(|(ts, _)| ts.with_timezone(&tz).date_naive() == date)
            .map(|(_, v)| *v)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoreSavings {
    pub chore: ChoreRecord,
    pub actual_g_per_kwh: f64,
    pub worst_g_per_kwh: f64,
    /// Never negative
    pub saved_g: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SavingsRunSummary {
    pub date: Option<NaiveDate>,
    pub users_processed: usize,
    pub users_failed: usize,
    pub total_saved_g: f64,
}

pub struct DailySavingsCalculator {
    history: IntensityHistory,
    settings: SavingsSettings,
    tz: Tz,
}

impl DailySavingsCalculator {
    pub fn new(history: IntensityHistory, settings: SavingsSettings, tz: Tz) -> Self {
        Self {
            history,
            settings,
            tz,
        }
    }

    /// Mean over 10-minute buckets from the truncated start up to (not
    /// including) `end`
    pub fn period_intensity(&self, start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> f64 {
        let mut values = Vec::new();
        let mut bucket = truncate_to_slot(start);
        while bucket < end {
            let value = self
                .history
                .exact(bucket)
                .or_else(|| self.history.closest(bucket, self.settings.closest_match_window));
            if let Some(v) = value {
                values.push(v);
            }
            bucket = bucket + slot_duration();
        }
        if values.is_empty() {
            self.settings.default_actual_g_per_kwh
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Highest average over any run of `ceil(duration / 10)` consecutive
    /// logged values on `date`. Without a full run the default applies.
    pub fn worst_period(&self, date: NaiveDate, duration_minutes: u32) -> f64 {
        let day = self.history.day_values(date, self.tz);
        if day.is_empty() {
            return self.settings.default_worst_g_per_kwh;
        }
        let slots = (duration_minutes as usize)
            .div_ceil(SLOT_MINUTES as usize)
            .max(1);
        // A day shorter than the window has no full window and falls back
        let worst = day
            .windows(slots)
            .map(|w| w.iter().sum::<f64>() / slots as f64)
            .fold(f64::NEG_INFINITY, f64::max);
        if worst > 0.0 {
            worst
        } else {
            self.settings.default_worst_g_per_kwh
        }
    }

    pub fn chore_savings(&self, chore: &ChoreRecord) -> ChoreSavings {
        let actual = self.period_intensity(chore.start_time, chore.end_time());
        let date = chore.start_time.with_timezone(&self.tz).date_naive();
        let worst = self.worst_period(date, chore.duration_minutes);
        let saved = (worst - actual) * chore.appliance.power_kw() * chore.duration_hours();

        debug!(
            user_id = %chore.user_id,
            appliance = %chore.appliance,
            start = %chore.start_time,
            duration_minutes = chore.duration_minutes,
            actual_g = actual,
            worst_g = worst,
            saved_g = saved,
            "chore carbon calculation"
        );
        ChoreSavings {
            chore: chore.clone(),
            actual_g_per_kwh: actual,
            worst_g_per_kwh: worst,
            saved_g: saved.max(0.0),
        }
    }

    /// Month-to-date total including `daily`. Chains from the previous
    /// day's entry when it is in the same month, otherwise sums the month's
    /// stored entries.
    pub fn cumulative(
        &self,
        store: &dyn ProgressStore,
        user_id: &str,
        date: NaiveDate,
        daily: f64,
    ) -> Result<f64> {
        if date.day() == 1 {
            return Ok(daily);
        }
        let previous_date = date - Duration::days(1);
        match store.get(user_id, previous_date)? {
            Some(previous) => Ok(previous.cumulative_carbon_saved + daily),
            None => {
                let month_to_date: f64 = store
                    .month_before(user_id, date)?
                    .iter()
                    .map(|p| p.daily_carbon_saved)
                    .sum();
                Ok(month_to_date + daily)
            }
        }
    }

    /// Computes and stores one user's progress for `date`
    pub fn calculate_user(
        &self,
        store: &dyn ProgressStore,
        user_id: &str,
        date: NaiveDate,
        chores: &[ChoreRecord],
    ) -> Result<DailyCarbonProgress> {
        let daily: f64 = chores
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| self.chore_savings(c).saved_g)
            .sum();
        let cumulative = self.cumulative(store, user_id, date, daily)?;

        let progress = DailyCarbonProgress {
            user_id: user_id.to_string(),
            date,
            daily_carbon_saved: daily,
            cumulative_carbon_saved: cumulative,
        };
        store.put(progress.clone())?;
        info!(
            user_id,
            date = %date,
            daily_saved_g = daily,
            cumulative_saved_g = cumulative,
            "daily carbon progress"
        );
        Ok(progress)
    }

    /// Processes every user with chores on `date`. A failing user is logged
    /// and skipped.
    pub fn run_for_date(
        &self,
        chores: &dyn ChoreSource,
        store: &dyn ProgressStore,
        date: NaiveDate,
    ) -> Result<SavingsRunSummary> {
        let records = chores.chores_on(date)?;
        let users: BTreeSet<&str> = records.iter().map(|c| c.user_id.as_str()).collect();
        info!(date = %date, users = users.len(), chores = records.len(), "calculating daily savings");

        let mut summary = SavingsRunSummary {
            date: Some(date),
            ..Default::default()
        };
        for user_id in users {
            match self.calculate_user(store, user_id, date, &records) {
                Ok(progress) => {
                    summary.users_processed += 1;
                    summary.total_saved_g += progress.daily_carbon_saved;
                }
                Err(e) => {
                    summary.users_failed += 1;
                    warn!(user_id, error = %e, "failed to calculate daily savings");
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::time::slot_sequence;
    use crate::error::PipelineError;
    use crate::repo::chores::MockChoreSource;
    use crate::repo::progress::MockProgressStore;
    use crate::repo::JsonProgressStore;
    use chrono::TimeZone;

    fn tz() -> Tz {
        chrono_tz::Asia::Taipei
    }

    fn at(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2025, 6, day, h, m, 0).unwrap().fixed_offset()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn flat_day(day: u32, value: f64) -> Vec<IntensitySample> {
        slot_sequence(at(day, 0, 0), 144)
            .into_iter()
            .map(|timestamp| IntensitySample {
                timestamp,
                g_co2e_kwh: value,
            })
            .collect()
    }

    fn calculator(samples: Vec<IntensitySample>) -> DailySavingsCalculator {
        DailySavingsCalculator::new(IntensityHistory::new(samples), SavingsSettings::default(), tz())
    }

    #[test]
    fn test_saving_on_flat_log_with_peak() {
        let mut samples = flat_day(1, 400.0);
        // 18:00-19:00 peak at 700
        for s in samples.iter_mut().skip(108).take(6) {
            s.g_co2e_kwh = 700.0;
        }
        let calc = calculator(samples);
        let chore = ChoreRecord::new("u1", "dryer", at(1, 10, 0), 60).unwrap();

        let result = calc.chore_savings(&chore);
        assert_eq!(result.actual_g_per_kwh, 400.0);
        assert_eq!(result.worst_g_per_kwh, 700.0);
        // (700 - 400) x 2.0 kW x 1 h
        assert!((result.saved_g - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_saving_clamped_when_chore_ran_at_worst_time() {
        let mut samples = flat_day(1, 300.0);
        samples[60].g_co2e_kwh = 900.0;
        let calc = calculator(samples);
        // 30-minute chore covering the spike: actual avg (900+300+300)/3 = 500,
        // worst 3-slot window is the same 500
        let chore = ChoreRecord::new("u1", "oven", at(1, 10, 0), 30).unwrap();
        let result = calc.chore_savings(&chore);
        assert!((result.actual_g_per_kwh - 500.0).abs() < 1e-9);
        assert_eq!(result.saved_g, 0.0);

        // A log where the chore window is above every other window
        let calc = calculator(vec![
            IntensitySample { timestamp: at(2, 9, 0), g_co2e_kwh: 800.0 },
            IntensitySample { timestamp: at(2, 9, 10), g_co2e_kwh: 100.0 },
        ]);
        let chore = ChoreRecord::new("u1", "oven", at(2, 9, 0), 10).unwrap();
        let result = calc.chore_savings(&chore);
        assert_eq!(result.worst_g_per_kwh, 800.0);
        assert_eq!(result.saved_g, 0.0);
    }

    #[test]
    fn test_defaults_without_history() {
        let calc = calculator(Vec::new());
        assert_eq!(calc.period_intensity(at(1, 10, 0), at(1, 11, 0)), 500.0);
        assert_eq!(calc.worst_period(date(1), 60), 600.0);
    }

    #[test]
    fn test_closest_match_must_be_under_an_hour() {
        let calc = calculator(vec![IntensitySample {
            timestamp: at(1, 12, 0),
            g_co2e_kwh: 420.0,
        }]);
        // 11:10 is 50 minutes away
        assert_eq!(calc.period_intensity(at(1, 11, 10), at(1, 11, 20)), 420.0);
        // 11:00 is exactly one hour away
        assert_eq!(calc.period_intensity(at(1, 11, 0), at(1, 11, 10)), 500.0);
    }

    #[test]
    fn test_buckets_exclude_end() {
        let calc = calculator(vec![
            IntensitySample { timestamp: at(1, 10, 0), g_co2e_kwh: 100.0 },
            IntensitySample { timestamp: at(1, 10, 10), g_co2e_kwh: 300.0 },
        ]);
        // Start 10:07 truncates to 10:00; end 10:10 excludes the 10:10 bucket
        assert_eq!(calc.period_intensity(at(1, 10, 7), at(1, 10, 10)), 100.0);
    }

    #[test]
    fn test_worst_window_longer_than_day_uses_default() {
        let calc = calculator(vec![
            IntensitySample { timestamp: at(1, 10, 0), g_co2e_kwh: 400.0 },
            IntensitySample { timestamp: at(1, 10, 10), g_co2e_kwh: 650.0 },
        ]);
        assert_eq!(calc.worst_period(date(1), 120), 600.0);
        assert_eq!(calc.worst_period(date(1), 20), 525.0);
        assert_eq!(calc.worst_period(date(1), 5), 650.0);
    }

    #[test]
    fn test_sparse_day_credits_against_default_worst() {
        let calc = calculator(vec![
            IntensitySample { timestamp: at(1, 10, 0), g_co2e_kwh: 400.0 },
            IntensitySample { timestamp: at(1, 10, 10), g_co2e_kwh: 400.0 },
        ]);
        // Two-hour dryer run: (600 - 400) x 2.0 kW x 2 h
        let chore = ChoreRecord::new("u1", "dryer", at(1, 10, 0), 120).unwrap();
        let result = calc.chore_savings(&chore);
        assert_eq!(result.worst_g_per_kwh, 600.0);
        assert_eq!(result.actual_g_per_kwh, 400.0);
        assert!((result.saved_g - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_cumulative_chains_within_month() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonProgressStore::new(dir.path().join("progress.json"));
        let calc = calculator(Vec::new());

        assert_eq!(calc.cumulative(&store, "u1", date(1), 10.0).unwrap(), 10.0);
        store
            .put(DailyCarbonProgress {
                user_id: "u1".into(),
                date: date(1),
                daily_carbon_saved: 10.0,
                cumulative_carbon_saved: 10.0,
            })
            .unwrap();
        assert_eq!(calc.cumulative(&store, "u1", date(2), 5.0).unwrap(), 15.0);
        // Gap on the 3rd: fall back to the month's stored dailies
        assert_eq!(calc.cumulative(&store, "u1", date(4), 7.0).unwrap(), 17.0);
    }

    #[test]
    fn test_cumulative_resets_on_first_of_month() {
        let mut store = MockProgressStore::new();
        store.expect_get().never();
        let calc = calculator(Vec::new());
        let july_first = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(calc.cumulative(&store, "u1", july_first, 3.0).unwrap(), 3.0);
    }

    #[test]
    fn test_run_for_date_skips_failing_user() {
        let calc = calculator(flat_day(1, 500.0));

        let mut chores = MockChoreSource::new();
        chores.expect_chores_on().returning(|_| {
            Ok(vec![
                ChoreRecord::new("alice", "washing_machine", at(1, 9, 0), 60).unwrap(),
                ChoreRecord::new("bob", "fan", at(1, 9, 0), 60).unwrap(),
            ])
        });

        let mut store = MockProgressStore::new();
        store.expect_get().returning(|_, _| Ok(None));
        store.expect_month_before().returning(|_, _| Ok(Vec::new()));
        store.expect_put().returning(|p| {
            if p.user_id == "bob" {
                Err(PipelineError::Serialization("disk full".into()))
            } else {
                Ok(())
            }
        });

        let summary = calc.run_for_date(&chores, &store, date(1)).unwrap();
        assert_eq!(summary.users_processed, 1);
        assert_eq!(summary.users_failed, 1);
        // Flat log: worst equals actual, nothing saved
        assert_eq!(summary.total_saved_g, 0.0);
    }
}
