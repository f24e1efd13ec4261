//! Altitude limit handling and normalization to feet.

use serde::{Deserialize, Serialize};

const FEET_PER_METER: f64 = 3.280_84;
const FEET_PER_FLIGHT_LEVEL: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeUnit {
    Meters,
    Feet,
    FlightLevel,
}

impl AltitudeUnit {
    /// Numeric unit code used by the aviation-data API.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Meters),
            1 => Some(Self::Feet),
            6 => Some(Self::FlightLevel),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "m" | "meter" | "meters" | "metre" | "metres" => Some(Self::Meters),
            "ft" | "feet" | "foot" => Some(Self::Feet),
            "fl" | "flight_level" | "flightlevel" => Some(Self::FlightLevel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeDatum {
    Ground,
    MeanSeaLevel,
    Standard,
}

impl AltitudeDatum {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ground),
            1 => Some(Self::MeanSeaLevel),
            2 => Some(Self::Standard),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "gnd" | "ground" | "agl" | "sfc" => Some(Self::Ground),
            "msl" | "amsl" | "sealevel" | "sea_level" => Some(Self::MeanSeaLevel),
            "std" | "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

/// A raw vertical limit as published.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltitudeLimit {
    pub value: f64,
    pub unit: AltitudeUnit,
    pub datum: AltitudeDatum,
}

impl AltitudeLimit {
    pub fn new(value: f64, unit: AltitudeUnit, datum: AltitudeDatum) -> Self {
        Self { value, unit, datum }
    }

    /// Surface (0 ft GND).
    pub fn ground() -> Self {
        Self::new(0.0, AltitudeUnit::Feet, AltitudeDatum::Ground)
    }

    /// Normalize to feet.
    ///
    /// The datum does not shift the value: without a terrain model GND and
    /// MSL limits are compared directly as feet, and flight levels are taken
    /// as pressure altitude over the standard datum.
    pub fn to_feet(&self) -> f64 {
        to_feet(self.value, self.unit)
    }
}

/// Pure unit conversion to feet.
pub fn to_feet(value: f64, unit: AltitudeUnit) -> f64 {
    match unit {
        AltitudeUnit::Feet => value,
        AltitudeUnit::Meters => value * FEET_PER_METER,
        AltitudeUnit::FlightLevel => value * FEET_PER_FLIGHT_LEVEL,
    }
}

/// Normalized vertical extent of an airspace, in feet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltitudeBand {
    pub lower_ft: f64,
    pub upper_ft: f64,
}
