use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{PipelineError, Result};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Appliance {
    WashingMachine,
    Dryer,
    Dishwasher,
    Oven,
    Microwave,
    RiceCooker,
    Tv,
    AirConditioner,
    Fan,
    EvFastCharge,
    EvSlowCharge,
}

impl Appliance {
    /// Rated power draw in kW
    pub fn power_kw(&self) -> f64 {
        match self {
            Appliance::WashingMachine => 0.5,
            Appliance::Dryer => 2.0,
            Appliance::Dishwasher => 1.8,
            Appliance::Oven => 2.4,
            Appliance::Microwave => 1.0,
            Appliance::RiceCooker => 0.7,
            Appliance::Tv => 0.15,
            Appliance::AirConditioner => 1.5,
            Appliance::Fan => 0.075,
            Appliance::EvFastCharge => 50.0,
            Appliance::EvSlowCharge => 7.0,
        }
    }
}

/// One logged chore. Construction rejects unknown appliance types, so
/// anything downstream can rely on a known power rating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoreRecord {
    pub user_id: String,
    pub appliance: Appliance,
    pub start_time: DateTime<FixedOffset>,
    pub duration_minutes: u32,
}

impl ChoreRecord {
    pub fn new(
        user_id: impl Into<String>,
        appliance_type: &str,
        start_time: DateTime<FixedOffset>,
        duration_minutes: u32,
    ) -> Result<Self> {
        let appliance = Appliance::from_str(appliance_type.trim())
            .map_err(|_| PipelineError::UnknownAppliance(appliance_type.to_string()))?;
        Ok(Self {
            user_id: user_id.into(),
            appliance,
            start_time,
            duration_minutes,
        })
    }

    pub fn end_time(&self) -> DateTime<FixedOffset> {
        self.start_time + Duration::minutes(self.duration_minutes as i64)
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_minutes as f64 / 60.0
    }
}
