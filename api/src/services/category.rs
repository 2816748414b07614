//! Weather categories shared across providers.
//!
//! Every vendor has its own condition code scheme (WMO codes for Open-Meteo
//! and AROME-HD, condition ids for OpenWeather, pictocodes for MeteoBlue).
//! They all map onto one category set with a fixed severity order, used to
//! pick the "worst" weather along a route.

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, ToSchema)]
pub enum WeatherCategory {
    #[serde(rename = "clearsky")]
    ClearSky,
    #[serde(rename = "partlycloudy")]
    PartlyCloudy,
    #[serde(rename = "cloudy")]
    Cloudy,
    #[serde(rename = "overcast")]
    Overcast,
    #[serde(rename = "fog")]
    Fog,
    #[serde(rename = "drizzle")]
    Drizzle,
    #[serde(rename = "freezing_drizzle")]
    FreezingDrizzle,
    #[serde(rename = "rain_light")]
    RainLight,
    #[serde(rename = "rain")]
    Rain,
    #[serde(rename = "rain_heavy")]
    RainHeavy,
    #[serde(rename = "freezing_rain")]
    FreezingRain,
    #[serde(rename = "showers")]
    Showers,
    #[serde(rename = "sleet")]
    Sleet,
    #[serde(rename = "hail")]
    Hail,
    #[serde(rename = "snow_light")]
    SnowLight,
    #[serde(rename = "snow")]
    Snow,
    #[serde(rename = "snow_heavy")]
    SnowHeavy,
    #[serde(rename = "snow_showers")]
    SnowShowers,
    #[serde(rename = "thunderstorm")]
    Thunderstorm,
    #[serde(rename = "thunder_hail")]
    ThunderHail,
    #[default]
    #[serde(rename = "default")]
    Default,
}

impl WeatherCategory {
    /// Severity rank. Higher is worse; `Default` (unknown) ranks below all.
    pub fn severity(&self) -> f64 {
        use WeatherCategory::*;
        match self {
            ThunderHail => 10.0,
            Thunderstorm => 9.0,
            SnowHeavy => 8.0,
            Snow => 7.0,
            SnowShowers => 6.0,
            SnowLight | FreezingRain | Hail | Sleet => 5.0,
            FreezingDrizzle | RainHeavy => 4.0,
            Rain | Showers => 3.0,
            RainLight | Drizzle => 2.0,
            Fog => 1.0,
            Overcast => 0.8,
            Cloudy => 0.7,
            PartlyCloudy => 0.5,
            ClearSky => 0.0,
            Default => -1.0,
        }
    }

    /// WMO weather interpretation code (Open-Meteo, AROME-HD).
    pub fn from_wmo(code: i64) -> Self {
        use WeatherCategory::*;
        match code {
            0 => ClearSky,
            1 | 2 => PartlyCloudy,
            3 => Overcast,
            45 | 48 => Fog,
            51 | 53 | 55 => Drizzle,
            56 | 57 => FreezingDrizzle,
            61 => RainLight,
            63 => Rain,
            65 => RainHeavy,
            66 | 67 => FreezingRain,
            71 | 77 => SnowLight,
            73 => Snow,
            75 => SnowHeavy,
            80 | 81 => Showers,
            82 => RainHeavy,
            85 => SnowShowers,
            86 => SnowHeavy,
            95 => Thunderstorm,
            96 | 99 => ThunderHail,
            _ => Default,
        }
    }

    /// OpenWeather condition id.
    pub fn from_openweather(id: i64) -> Self {
        use WeatherCategory::*;
        match id {
            200..=232 => Thunderstorm,
            300..=321 => Drizzle,
            500 => RainLight,
            501 => Rain,
            502..=504 => RainHeavy,
            511 => FreezingRain,
            520 | 521 | 531 => Showers,
            522 => RainHeavy,
            600 => SnowLight,
            601 => Snow,
            602 => SnowHeavy,
            611..=613 | 615 | 616 => Sleet,
            620 | 621 => SnowShowers,
            622 => SnowHeavy,
            701 | 711 | 721 | 731 | 741 | 751 | 761 | 762 => Fog,
            771 => Showers,
            781 => Thunderstorm,
            800 => ClearSky,
            801 | 802 => PartlyCloudy,
            803 | 804 => Overcast,
            _ => Default,
        }
    }

    /// MeteoBlue hourly pictocode (1–37).
    pub fn from_meteoblue(pictocode: i64) -> Self {
        use WeatherCategory::*;
        match pictocode {
            1 => ClearSky,
            2..=9 => PartlyCloudy,
            10..=12 => Thunderstorm,
            13..=18 => Fog,
            19..=22 => Overcast,
            23 => Rain,
            24 => Snow,
            25 => RainHeavy,
            26 => SnowHeavy,
            27..=30 => Thunderstorm,
            31 => Drizzle,
            32 => Snow,
            33 => RainLight,
            34 => SnowLight,
            35 => Sleet,
            _ => Default,
        }
    }

    /// Coarse category from numeric fields when no condition code exists.
    pub fn from_basics(
        temperature_c: Option<f64>,
        precipitation_mm: Option<f64>,
        cloud_cover_pct: Option<f64>,
    ) -> Self {
        use WeatherCategory::*;
        let p = precipitation_mm.unwrap_or(0.0);

        if p > 0.0 && temperature_c.is_some_and(|t| t <= 0.0) {
            return if p >= 2.5 {
                SnowHeavy
            } else if p >= 0.5 {
                Snow
            } else {
                SnowLight
            };
        }
        if p > 0.0 {
            return if p >= 5.0 {
                RainHeavy
            } else if p >= 0.7 {
                Rain
            } else if cloud_cover_pct.is_some_and(|c| c >= 50.0) {
                Showers
            } else {
                RainLight
            };
        }
        match cloud_cover_pct {
            Some(c) if c >= 90.0 => Overcast,
            Some(c) if c >= 40.0 => PartlyCloudy,
            Some(_) => ClearSky,
            None => Default,
        }
    }
}

/// Correct an AROME-HD WMO code that contradicts the model's own numbers.
///
/// - measurable precipitation (> 0.1 mm) forces a rain code by intensity
/// - very high cloud cover (> 80%) turns clear/partly codes into overcast
/// - low cloud cover (< 50%) with a rain code and no real amount becomes drizzle
pub fn reconcile_arome_code(
    code: i64,
    precipitation_mm: Option<f64>,
    probability_pct: Option<f64>,
    cloud_cover_pct: Option<f64>,
) -> i64 {
    let p = precipitation_mm.unwrap_or(0.0);
    let prob = probability_pct.unwrap_or(0.0);
    let cloud = cloud_cover_pct.unwrap_or(0.0);

    if p > 0.1 {
        if prob > 70.0 || p > 2.0 {
            65
        } else if prob > 30.0 || p > 0.5 {
            63
        } else {
            61
        }
    } else if cloud > 80.0 && matches!(code, 0..=2) {
        3
    } else if cloud < 50.0 && matches!(code, 61 | 63 | 65) {
        51
    } else {
        code
    }
}

/// Pick the most severe category. Ties keep the first one seen.
pub fn worst_category<I>(categories: I) -> WeatherCategory
where
    I: IntoIterator<Item = WeatherCategory>,
{
    let mut best = WeatherCategory::Default;
    for cat in categories {
        if cat.severity() > best.severity() {
            best = cat;
        }
    }
    best
}
