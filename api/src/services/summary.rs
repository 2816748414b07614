//! Route-level weather summary.
//!
//! Collapses a run's observations into the handful of numbers shown above the
//! table: worst condition, temperature spread, wind and rain extremes. Blank
//! observations simply contribute nothing.

use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::{median, round_dp};
use crate::services::category::{worst_category, WeatherCategory};
use crate::services::normalizer::WeatherObservation;

/// Cloud cover (%) at which a clear or partly cloudy code counts as overcast.
const OVERCAST_CLOUD_PCT: f64 = 80.0;

/// Aggregates over one run, in canonical units.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RouteSummary {
    pub worst_category: WeatherCategory,
    pub temperature_median_c: Option<f64>,
    pub temperature_min_c: Option<f64>,
    pub temperature_max_c: Option<f64>,
    pub wind_median_kmh: Option<f64>,
    pub wind_gust_max_kmh: Option<f64>,
    pub precipitation_max_mm: Option<f64>,
    pub precipitation_probability_max_pct: Option<f64>,
    pub cloud_cover_mean_pct: Option<f64>,
}

/// Category used for ranking, after the cloud-cover correction.
fn effective_category(obs: &WeatherObservation) -> WeatherCategory {
    match (obs.weather_category, obs.cloud_cover_pct) {
        (WeatherCategory::ClearSky | WeatherCategory::PartlyCloudy, Some(cc))
            if cc >= OVERCAST_CLOUD_PCT =>
        {
            WeatherCategory::Overcast
        }
        (cat, _) => cat,
    }
}

fn collect(
    observations: &[WeatherObservation],
    f: impl Fn(&WeatherObservation) -> Option<f64>,
) -> Vec<f64> {
    observations.iter().filter_map(f).collect()
}

fn max_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

fn min_of(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn summarize(observations: &[WeatherObservation]) -> RouteSummary {
    let temps = collect(observations, |o| o.temperature_c);
    let winds = collect(observations, |o| o.wind_speed_kmh);
    let gusts = collect(observations, |o| o.wind_gust_kmh);
    let precip = collect(observations, |o| o.precipitation_mm);
    let probs = collect(observations, |o| o.precipitation_probability_pct);
    let clouds = collect(observations, |o| o.cloud_cover_pct);

    let cloud_mean = if clouds.is_empty() {
        None
    } else {
        Some(round_dp(clouds.iter().sum::<f64>() / clouds.len() as f64, 1))
    };

    RouteSummary {
        worst_category: worst_category(observations.iter().map(effective_category)),
        temperature_median_c: median(&temps),
        temperature_min_c: min_of(&temps),
        temperature_max_c: max_of(&temps),
        wind_median_kmh: median(&winds),
        wind_gust_max_kmh: max_of(&gusts),
        precipitation_max_mm: max_of(&precip),
        precipitation_probability_max_pct: max_of(&probs),
        cloud_cover_mean_pct: cloud_mean,
    }
}
