//! Provider request shapes.
//!
//! Pure URL construction. Parameter names, variable lists and the AROME-HD
//! model selector follow each vendor's documented query contract.

use chrono::SecondsFormat;

use crate::services::policy::ProviderId;
use crate::services::segmenter::Sample;
use crate::services::units::TempUnit;

pub const DEFAULT_OPEN_METEO_BASE_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_METEOBLUE_BASE_URL: &str = "https://my.meteoblue.com";
pub const DEFAULT_OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org";

/// Hourly variables requested from Open-Meteo (standard and AROME-HD).
const OPEN_METEO_HOURLY: &str = "temperature_2m,precipitation,precipitation_probability,\
relative_humidity_2m,wind_speed_10m,wind_gusts_10m,winddirection_10m,weathercode,\
uv_index,is_day,cloud_cover";

/// Open-Meteo model id for Météo-France AROME HD.
const AROME_HD_MODEL: &str = "arome_france_hd";

/// Base URLs per vendor. Overridable for tests and self-hosted mirrors.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub open_meteo: String,
    pub meteoblue: String,
    pub openweather: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            open_meteo: DEFAULT_OPEN_METEO_BASE_URL.to_string(),
            meteoblue: DEFAULT_METEOBLUE_BASE_URL.to_string(),
            openweather: DEFAULT_OPENWEATHER_BASE_URL.to_string(),
        }
    }
}

/// An outgoing provider request. All providers are plain GETs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: reqwest::Method,
    pub url: String,
}

impl RequestDescriptor {
    fn get(url: String) -> Self {
        Self {
            method: reqwest::Method::GET,
            url,
        }
    }
}

/// OpenWeather `units` parameter for the display temperature unit.
pub fn openweather_units(temp_unit: TempUnit) -> &'static str {
    match temp_unit {
        TempUnit::F => "imperial",
        TempUnit::C => "metric",
    }
}

/// Build the request for `provider` at `sample`.
pub fn build_request(
    provider: ProviderId,
    sample: &Sample,
    credential: Option<&str>,
    temp_unit: TempUnit,
    endpoints: &Endpoints,
) -> RequestDescriptor {
    let iso = sample
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    let key = credential.map(str::trim).unwrap_or_default();
    let base = |b: &str| b.trim_end_matches('/').to_string();

    let url = match provider {
        ProviderId::OpenMeteo => format!(
            "{}/v1/forecast?latitude={}&longitude={}&hourly={}&start={}&timezone=auto",
            base(&endpoints.open_meteo),
            sample.lat,
            sample.lon,
            OPEN_METEO_HOURLY,
            iso
        ),
        ProviderId::AromeHd => format!(
            "{}/v1/forecast?latitude={}&longitude={}&hourly={}&start={}&timezone=auto&models={}",
            base(&endpoints.open_meteo),
            sample.lat,
            sample.lon,
            OPEN_METEO_HOURLY,
            iso,
            AROME_HD_MODEL
        ),
        ProviderId::MeteoBlue => format!(
            "{}/packages/basic-1h,clouds-1h?lat={}&lon={}&apikey={}&time={}&tz=auto",
            base(&endpoints.meteoblue),
            sample.lat,
            sample.lon,
            key,
            iso
        ),
        ProviderId::OpenWeather => format!(
            "{}/data/3.0/onecall?lat={}&lon={}&appid={}&units={}&exclude=minutely,alerts",
            base(&endpoints.openweather),
            sample.lat,
            sample.lon,
            key,
            openweather_units(temp_unit)
        ),
    };

    RequestDescriptor::get(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn sample() -> Sample {
        Sample {
            sequence_index: 0,
            lat: 45.76,
            lon: 4.84,
            timestamp: "2026-05-10T08:00:00Z".parse::<DateTime<Utc>>().unwrap(),
            cumulative_distance_m: 0.0,
        }
    }

    #[test]
    fn test_open_meteo_url() {
        let req = build_request(
            ProviderId::OpenMeteo,
            &sample(),
            None,
            TempUnit::C,
            &Endpoints::default(),
        );
        assert_eq!(req.method, reqwest::Method::GET);
        assert_eq!(
            req.url,
            "https://api.open-meteo.com/v1/forecast?latitude=45.76&longitude=4.84\
             &hourly=temperature_2m,precipitation,precipitation_probability,relative_humidity_2m,\
             wind_speed_10m,wind_gusts_10m,winddirection_10m,\
             weathercode,uv_index,is_day,cloud_cover\
             &start=2026-05-10T08:00:00.000Z&timezone=auto"
        );
    }

    #[test]
    fn test_arome_hd_adds_model() {
        let req = build_request(
            ProviderId::AromeHd,
            &sample(),
            None,
            TempUnit::C,
            &Endpoints::default(),
        );
        assert!(req.url.starts_with("https://api.open-meteo.com/v1/forecast?"));
        assert!(req.url.ends_with("&timezone=auto&models=arome_france_hd"));
        assert!(req.url.contains("hourly=temperature_2m,"));
    }

    #[test]
    fn test_meteoblue_url() {
        let req = build_request(
            ProviderId::MeteoBlue,
            &sample(),
            Some(" mb-secret "),
            TempUnit::C,
            &Endpoints::default(),
        );
        assert_eq!(
            req.url,
            "https://my.meteoblue.com/packages/basic-1h,clouds-1h?lat=45.76&lon=4.84\
             &apikey=mb-secret&time=2026-05-10T08:00:00.000Z&tz=auto"
        );
    }

    #[test]
    fn test_openweather_units_follow_temperature() {
        let metric = build_request(
            ProviderId::OpenWeather,
            &sample(),
            Some("ow-secret"),
            TempUnit::C,
            &Endpoints::default(),
        );
        assert_eq!(
            metric.url,
            "https://api.openweathermap.org/data/3.0/onecall?lat=45.76&lon=4.84\
             &appid=ow-secret&units=metric&exclude=minutely,alerts"
        );

        let imperial = build_request(
            ProviderId::OpenWeather,
            &sample(),
            Some("ow-secret"),
            TempUnit::F,
            &Endpoints::default(),
        );
        assert!(imperial.url.contains("&units=imperial&"));
    }

    #[test]
    fn test_endpoint_override_strips_trailing_slash() {
        let endpoints = Endpoints {
            open_meteo: "http://127.0.0.1:9000/".to_string(),
            ..Endpoints::default()
        };
        let req = build_request(ProviderId::OpenMeteo, &sample(), None, TempUnit::C, &endpoints);
        assert!(req.url.starts_with("http://127.0.0.1:9000/v1/forecast?latitude=45.76"));
    }
}
