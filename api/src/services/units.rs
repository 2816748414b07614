//! Unit conversion between canonical and display units.
//!
//! Canonical units inside the engine: °C, km/h, mm, metres. Providers are
//! normalized into these; callers pick display units for the response.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// km/h per m/s.
const KMH_PER_MS: f64 = 3.6;
/// mph per km/h.
const MPH_PER_KMH: f64 = 0.621371;
/// km/h per mph.
const KMH_PER_MPH: f64 = 1.60934;
/// Inches per millimetre.
const IN_PER_MM: f64 = 0.0393701;
/// Miles per kilometre.
const MI_PER_KM: f64 = 0.621371;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TempUnit {
    #[default]
    C,
    F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WindUnit {
    #[default]
    Kmh,
    Ms,
    Mph,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrecipUnit {
    #[default]
    Mm,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Km,
    Mi,
}

impl TempUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TempUnit::C => "c",
            TempUnit::F => "f",
        }
    }
}

impl WindUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindUnit::Kmh => "kmh",
            WindUnit::Ms => "ms",
            WindUnit::Mph => "mph",
        }
    }
}

/// Display unit preferences for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Units {
    pub temperature: TempUnit,
    pub wind: WindUnit,
    pub precipitation: PrecipUnit,
    pub distance: DistanceUnit,
}

// ---------------------------------------------------------------------------
// Canonical -> display
// ---------------------------------------------------------------------------

pub fn wind_from_kmh(kmh: f64, unit: WindUnit) -> f64 {
    match unit {
        WindUnit::Kmh => kmh,
        WindUnit::Ms => kmh / KMH_PER_MS,
        WindUnit::Mph => kmh * MPH_PER_KMH,
    }
}

pub fn temp_from_c(c: f64, unit: TempUnit) -> f64 {
    match unit {
        TempUnit::C => c,
        TempUnit::F => c * 9.0 / 5.0 + 32.0,
    }
}

pub fn precip_from_mm(mm: f64, unit: PrecipUnit) -> f64 {
    match unit {
        PrecipUnit::Mm => mm,
        PrecipUnit::In => mm * IN_PER_MM,
    }
}

pub fn distance_from_m(m: f64, unit: DistanceUnit) -> f64 {
    let km = m / 1000.0;
    match unit {
        DistanceUnit::Km => km,
        DistanceUnit::Mi => km * MI_PER_KM,
    }
}

// ---------------------------------------------------------------------------
// Provider -> canonical
// ---------------------------------------------------------------------------

pub fn ms_to_kmh(ms: f64) -> f64 {
    ms * KMH_PER_MS
}

pub fn mph_to_kmh(mph: f64) -> f64 {
    mph * KMH_PER_MPH
}

pub fn f_to_c(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}
