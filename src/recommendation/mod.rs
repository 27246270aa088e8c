//! Traffic-light levels and the best low-carbon window for the rest of today.

use chrono::{DateTime, Duration, FixedOffset};
use tracing::debug;

use crate::domain::time::{end_of_day, format_12h, format_hhmm, slot_duration};
use crate::domain::{
    kg_to_grams, ArtifactStatus, CarbonIntensityArtifact, CurrentIntensity, ForecastEntry,
    ForecastIntensitySeries, Level, Recommendation,
};

/// Slots in the fallback window (2 hours)
pub const FALLBACK_WINDOW_SLOTS: usize = 12;

const MESSAGE_GREEN: &str = "Grid carbon intensity is low. A good time to run large appliances.";
const MESSAGE_YELLOW: &str = "Grid carbon intensity is moderate. Prefer running only essential appliances.";
const MESSAGE_RED: &str = "Grid carbon intensity is high. Avoid running power-hungry appliances.";

/// Index-based 33rd/67th percentile cut points over whole-gram values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelThresholds {
    pub p33: i64,
    pub p67: i64,
}

impl LevelThresholds {
    /// `None` for an empty series
    pub fn from_values(values: &[i64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_unstable();
        let n = sorted.len() as f64;
        Some(Self {
            p33: sorted[(n * 0.33) as usize],
            p67: sorted[(n * 0.67) as usize],
        })
    }

    pub fn classify(&self, grams: i64) -> Level {
        if grams <= self.p33 {
            Level::Green
        } else if grams <= self.p67 {
            Level::Yellow
        } else {
            Level::Red
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Two or more consecutive green slots
    GreenRun,
    /// A lone green slot stretched to one hour
    SingleGreenSlot,
    /// No green slot today; lowest-average 2-hour window
    LowestAverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecommendationWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub kind: WindowKind,
}

/// Result of deriving levels and a recommendation from a forecast
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    pub thresholds: LevelThresholds,
    pub current: CurrentIntensity,
    pub forecast: Vec<ForecastEntry>,
    pub window: Option<RecommendationWindow>,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Default)]
pub struct RecommendationDeriver;

impl RecommendationDeriver {
    pub fn new() -> Self {
        Self
    }

    /// Message tier follows the current level, not the chosen window
    pub fn message(level: Level) -> &'static str {
        match level {
            Level::Green => MESSAGE_GREEN,
            Level::Yellow => MESSAGE_YELLOW,
            Level::Red => MESSAGE_RED,
        }
    }

    /// Picks the recommended window among slots no later than 23:59 of the
    /// first slot's day. `timestamps` and `grams` are parallel.
    pub fn best_window(
        &self,
        timestamps: &[DateTime<FixedOffset>],
        grams: &[i64],
        thresholds: &LevelThresholds,
    ) -> Option<RecommendationWindow> {
        let first = *timestamps.first()?;
        let today_end = end_of_day(first);
        let today: Vec<(DateTime<FixedOffset>, i64)> = timestamps
            .iter()
            .zip(grams)
            .take_while(|(ts, _)| **ts <= today_end)
            .map(|(ts, g)| (*ts, *g))
            .collect();

        if let Some((start, len)) = longest_green_run(&today, thresholds) {
            let start_ts = today[start].0;
            return Some(if len > 1 {
                RecommendationWindow {
                    start: start_ts,
                    end: today[start + len - 1].0 + slot_duration(),
                    kind: WindowKind::GreenRun,
                }
            } else {
                RecommendationWindow {
                    start: start_ts,
                    end: start_ts + Duration::hours(1),
                    kind: WindowKind::SingleGreenSlot,
                }
            });
        }

        let start = lowest_average_window(&today)?;
        let start_ts = today[start].0;
        Some(RecommendationWindow {
            start: start_ts,
            end: start_ts + Duration::hours(2),
            kind: WindowKind::LowestAverage,
        })
    }

    pub fn derive(&self, current_kg: f64, series: &ForecastIntensitySeries) -> Option<Derivation> {
        let grams = series.grams();
        let timestamps = series.timestamps();
        let thresholds = LevelThresholds::from_values(&grams)?;

        let current_g = kg_to_grams(current_kg);
        let current_level = thresholds.classify(current_g);
        let forecast = timestamps
            .iter()
            .zip(&grams)
            .map(|(ts, g)| ForecastEntry {
                time: format_hhmm(ts),
                g_co2e_kwh: *g,
                level: thresholds.classify(*g),
            })
            .collect();

        let window = self.best_window(&timestamps, &grams, &thresholds);
        let (start_time, end_time) = match &window {
            Some(w) => (format_12h(&w.start), format_12h(&w.end)),
            None => (
                Recommendation::PLACEHOLDER_TIME.to_string(),
                Recommendation::PLACEHOLDER_TIME.to_string(),
            ),
        };
        debug!(
            p33 = thresholds.p33,
            p67 = thresholds.p67,
            current_g,
            level = %current_level,
            window = ?window.map(|w| w.kind),
            "derived recommendation"
        );

        Some(Derivation {
            thresholds,
            current: CurrentIntensity {
                g_co2e_kwh: current_g,
                level: current_level,
            },
            forecast,
            window,
            recommendation: Recommendation {
                message: Self::message(current_level).to_string(),
                start_time,
                end_time,
            },
        })
    }

    /// Complete artifact from a forecast; falls back to the building-cache
    /// shape when the series is empty.
    pub fn build_artifact(
        &self,
        last_updated: DateTime<FixedOffset>,
        current_kg: f64,
        series: &ForecastIntensitySeries,
    ) -> CarbonIntensityArtifact {
        match self.derive(current_kg, series) {
            Some(d) => CarbonIntensityArtifact {
                last_updated,
                status: ArtifactStatus::Complete,
                current_intensity: Some(d.current),
                forecast: d.forecast,
                recommendation: Some(d.recommendation),
                errors: Vec::new(),
            },
            None => CarbonIntensityArtifact::building_cache(last_updated, kg_to_grams(current_kg)),
        }
    }
}

/// Longest run of green slots as `(start, len)`; the earliest wins ties
fn longest_green_run(
    slots: &[(DateTime<FixedOffset>, i64)],
    thresholds: &LevelThresholds,
) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < slots.len() {
        if thresholds.classify(slots[i].1) != Level::Green {
            i += 1;
            continue;
        }
        let start = i;
        while i < slots.len() && thresholds.classify(slots[i].1) == Level::Green {
            i += 1;
        }
        let len = i - start;
        if best.map_or(true, |(_, best_len)| len > best_len) {
            best = Some((start, len));
        }
    }
    best
}

/// Start index of the lowest-average window of `FALLBACK_WINDOW_SLOTS`
/// slots (or all slots if fewer); the earliest wins ties
fn lowest_average_window(slots: &[(DateTime<FixedOffset>, i64)]) -> Option<usize> {
    if slots.is_empty() {
        return None;
    }
    let size = FALLBACK_WINDOW_SLOTS.min(slots.len());
    let mut best_start = 0;
    let mut best_avg = f64::INFINITY;
    for (start, window) in slots.windows(size).enumerate() {
        let avg = window.iter().map(|(_, g)| *g as f64).sum::<f64>() / size as f64;
        if avg < best_avg {
            best_avg = avg;
            best_start = start;
        }
    }
    Some(best_start)
}
