//! Live per-unit generation feed

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{build_client, GenerationReading, GenerationSource, UnitReading};
use crate::config::SourcesConfig;
use crate::domain::time::truncate_to_slot;
use crate::domain::{FeedFuel, GenerationMix, Region, RegionClassifier, FUEL_COUNT};
use crate::error::{PipelineError, Result};

const UPDATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const SUBTOTAL_MARKER: &str = "小計";
const LOAD_MARKER: &str = "Load";

#[derive(Clone)]
pub struct HttpGenerationSource {
    client: reqwest::Client,
    url: String,
    tz: Tz,
}

impl HttpGenerationSource {
    pub fn new(cfg: &SourcesConfig, tz: Tz) -> Result<Self> {
        Ok(Self {
            client: build_client(cfg.timeout(), &cfg.user_agent)?,
            url: cfg.generation_url.clone(),
            tz,
        })
    }
}

#[async_trait]
impl GenerationSource for HttpGenerationSource {
    async fn fetch(&self) -> Result<GenerationReading> {
        // Cache-busting query parameter, as the feed is served behind a CDN
        let cache_buster = Utc::now().timestamp().to_string();
        debug!(url = %self.url, "fetching generation data");

        let response = self
            .client
            .get(&self.url)
            .query(&[("_", cache_buster.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Fetch(format!(
                "generation API returned {}",
                response.status()
            )));
        }

        let raw: RawGenerationResponse = response.json().await?;
        let reading = parse_generation(raw, self.tz, Utc::now().with_timezone(&self.tz))?;
        info!(
            slot = %reading.timestamp,
            units = reading.units.len(),
            "fetched generation data"
        );
        Ok(reading)
    }
}

#[derive(Debug, Deserialize)]
pub struct RawGenerationResponse {
    #[serde(rename = "aaData", default)]
    pub aa_data: Vec<Vec<Value>>,
    #[serde(rename = "", default)]
    pub update_time_blank_key: Option<String>,
    #[serde(rename = "更新時間", default)]
    pub update_time: Option<String>,
}

fn fuel_label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<b>(.*?)</b>").expect("static regex"))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Slot timestamp from the feed's update time, or `now` when absent or
/// unparsable; truncated to the 10-minute boundary either way
pub fn parse_update_time(raw: Option<&str>, tz: Tz, now: DateTime<Tz>) -> DateTime<FixedOffset> {
    let parsed = raw
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| match NaiveDateTime::parse_from_str(s.trim(), UPDATE_TIME_FORMAT) {
            Ok(naive) => tz.from_local_datetime(&naive).earliest(),
            Err(e) => {
                warn!(update_time = s, error = %e, "unparsable update time, using now");
                None
            }
        });
    truncate_to_slot(parsed.unwrap_or(now)).fixed_offset()
}

/// Normalizes the raw feed into per-region fuel totals.
///
/// Rows that are short, subtotals, load rows, unknown fuels or carry a
/// non-numeric output are skipped. Negative regional totals are clamped to 0.
pub fn parse_generation(
    raw: RawGenerationResponse,
    tz: Tz,
    now: DateTime<Tz>,
) -> Result<GenerationReading> {
    if raw.aa_data.is_empty() {
        return Err(PipelineError::MalformedResponse(
            "no aaData rows in generation response".to_string(),
        ));
    }

    let update_time = raw
        .update_time_blank_key
        .as_deref()
        .filter(|s| !s.is_empty())
        .or(raw.update_time.as_deref());
    let timestamp = parse_update_time(update_time, tz, now);

    let mut fuels: BTreeMap<Region, ([f64; FUEL_COUNT], f64)> = Region::ALL
        .iter()
        .map(|r| (*r, ([0.0; FUEL_COUNT], 0.0)))
        .collect();
    let mut units = BTreeMap::new();

    for row in &raw.aa_data {
        if row.len() < 5 {
            continue;
        }
        let unit_name = cell_text(&row[2]).trim().to_string();
        if unit_name.is_empty() || unit_name.contains(SUBTOTAL_MARKER) {
            continue;
        }
        let label_cell = cell_text(&row[0]);
        let Some(label) = fuel_label_pattern()
            .captures(&label_cell)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
        else {
            continue;
        };
        if label.contains(LOAD_MARKER) {
            continue;
        }
        let Some(fuel) = FeedFuel::from_label(label) else {
            debug!(label, "skipping unknown fuel label");
            continue;
        };
        let Ok(generation_mw) = cell_text(&row[4]).replace(',', "").trim().parse::<f64>() else {
            continue;
        };
        if !generation_mw.is_finite() {
            continue;
        }

        let region = RegionClassifier::classify_unit(&unit_name);
        if let Some((mw, storage)) = fuels.get_mut(&region) {
            match fuel {
                FeedFuel::Fuel(f) => mw[f.index()] += generation_mw,
                FeedFuel::Storage => *storage += generation_mw,
            }
        }
        units.insert(
            unit_name,
            UnitReading {
                fuel,
                region,
                generation_mw,
            },
        );
    }

    let mut regions = BTreeMap::new();
    for (region, (mut mw, storage)) in fuels {
        for v in mw.iter_mut().filter(|v| **v < 0.0) {
            debug!(region = %region, total_mw = *v, "clamping negative regional total");
            *v = 0.0;
        }
        regions.insert(region, GenerationMix::new(mw, storage.max(0.0))?);
    }

    Ok(GenerationReading {
        timestamp,
        regions,
        units,
    })
}
