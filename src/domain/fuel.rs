use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Generation source category with an associated emission factor
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
pub enum FuelType {
    Nuclear,
    Coal,
    #[serde(rename = "Co-Gen")]
    #[strum(serialize = "Co-Gen")]
    CoGen,
    #[serde(rename = "IPP-Coal")]
    #[strum(serialize = "IPP-Coal")]
    IppCoal,
    #[serde(rename = "LNG")]
    #[strum(serialize = "LNG")]
    Lng,
    #[serde(rename = "IPP-LNG")]
    #[strum(serialize = "IPP-LNG")]
    IppLng,
    Oil,
    Diesel,
    Hydro,
    Wind,
    Solar,
    #[serde(rename = "Other_Renewable")]
    #[strum(serialize = "Other_Renewable")]
    OtherRenewable,
}

pub const FUEL_COUNT: usize = 12;

impl FuelType {
    /// Canonical column order shared by the cache, the model schema and the engine
    pub const ALL: [FuelType; FUEL_COUNT] = [
        FuelType::Nuclear,
        FuelType::Coal,
        FuelType::CoGen,
        FuelType::IppCoal,
        FuelType::Lng,
        FuelType::IppLng,
        FuelType::Oil,
        FuelType::Diesel,
        FuelType::Hydro,
        FuelType::Wind,
        FuelType::Solar,
        FuelType::OtherRenewable,
    ];

    /// Column index in the canonical order
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Emission factor in kgCO2e/kWh
    pub fn emission_factor(&self) -> f64 {
        match self {
            FuelType::Nuclear => 0.0,
            FuelType::Coal => 0.912,
            FuelType::CoGen => 1.111,
            FuelType::IppCoal => 0.919,
            FuelType::Lng => 0.389,
            FuelType::IppLng => 0.378,
            FuelType::Oil => 0.818,
            FuelType::Diesel => 0.811,
            FuelType::Hydro => 0.0,
            FuelType::Wind => 0.0,
            FuelType::Solar => 0.0,
            FuelType::OtherRenewable => 1.002,
        }
    }
}

/// A fuel label from the generation feed after normalization.
///
/// Storage is kept apart and never counts toward generation totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeedFuel {
    Fuel(FuelType),
    Storage,
}

impl FeedFuel {
    /// Map a raw feed label (native name, optionally followed by an English
    /// parenthetical) onto a fuel. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let base = label
            .split_once('(')
            .map(|(head, _)| head)
            .unwrap_or(label)
            .trim();
        let fuel = match base {
            "太陽能" => FuelType::Solar,
            "風力" => FuelType::Wind,
            "燃煤" => FuelType::Coal,
            "燃氣" => FuelType::Lng,
            "水力" => FuelType::Hydro,
            "核能" => FuelType::Nuclear,
            "汽電共生" => FuelType::CoGen,
            "民營電廠-燃煤" => FuelType::IppCoal,
            "民營電廠-燃氣" => FuelType::IppLng,
            "燃油" => FuelType::Oil,
            "輕油" => FuelType::Diesel,
            "其它再生能源" => FuelType::OtherRenewable,
            "儲能" => return Some(FeedFuel::Storage),
            _ => return None,
        };
        Some(FeedFuel::Fuel(fuel))
    }
}
