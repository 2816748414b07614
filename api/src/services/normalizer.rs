//! Provider response normalization.
//!
//! Maps each vendor's payload plus a target sample into one canonical
//! `WeatherObservation` (°C, km/h, mm, %). Malformed payloads or payloads
//! with no usable timestamps produce a blank observation, not an error.
//!
//! - Open-Meteo / AROME-HD: hourly parallel arrays, closest `time` index
//! - OpenWeather: `hourly` records (closest `dt`), `daily` past the hourly range
//! - MeteoBlue: one instant per call; `time` array indexes pictocode etc.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::helpers::{finite_or_none, json_array_f64, json_f64, round_dp};
use crate::services::category::{reconcile_arome_code, WeatherCategory};
use crate::services::geo::is_daylight;
use crate::services::policy::ProviderId;
use crate::services::resolver::FallbackReason;
use crate::services::segmenter::Sample;
use crate::services::units::{
    distance_from_m, f_to_c, mph_to_kmh, ms_to_kmh, precip_from_mm, temp_from_c, wind_from_kmh,
    PrecipUnit, TempUnit, Units,
};

/// Hourly keys copied from standard Open-Meteo into an AROME-HD payload.
pub const AROME_BACKFILL_KEYS: [&str; 5] = [
    "precipitation_probability",
    "weathercode",
    "cloud_cover",
    "uv_index",
    "is_day",
];

/// Slack past the last OpenWeather hourly record before switching to daily.
const OPENWEATHER_HOURLY_SLACK_MINS: i64 = 30;

/// Naive local timestamp layouts returned with `timezone=auto` / `tz=auto`.
const NAIVE_TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

/// Canonical weather at one sample.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct WeatherObservation {
    pub sample: Sample,
    /// Provider the selector asked for at this sample.
    pub provider: ProviderId,
    /// Provider whose data is shown. Differs from `provider` only on fallback.
    pub effective_provider: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub temperature_c: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_gust_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub precipitation_mm: Option<f64>,
    /// Null whenever `precipitation_mm` is 0.
    pub precipitation_probability_pct: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub uv_index: Option<f64>,
    pub is_daylight: bool,
    /// Raw vendor condition code after reconciliation.
    pub weather_code: Option<i64>,
    pub weather_category: WeatherCategory,
}

impl WeatherObservation {
    /// All-null observation. Daylight still comes from the sun position.
    pub fn blank(sample: &Sample, provider: ProviderId, effective_provider: ProviderId) -> Self {
        Self {
            sample: sample.clone(),
            provider,
            effective_provider,
            fallback_reason: None,
            temperature_c: None,
            wind_speed_kmh: None,
            wind_gust_kmh: None,
            wind_direction_deg: None,
            humidity_pct: None,
            precipitation_mm: None,
            precipitation_probability_pct: None,
            cloud_cover_pct: None,
            uv_index: None,
            is_daylight: is_daylight(sample.position(), sample.timestamp),
            weather_code: None,
            weather_category: WeatherCategory::Default,
        }
    }

    /// True when no numeric field carries data.
    pub fn is_blank(&self) -> bool {
        self.temperature_c.is_none()
            && self.wind_speed_kmh.is_none()
            && self.precipitation_mm.is_none()
            && self.cloud_cover_pct.is_none()
    }

    fn drop_probability_without_amount(mut self) -> Self {
        if self.precipitation_mm == Some(0.0) {
            self.precipitation_probability_pct = None;
        }
        self
    }
}

/// Normalize a raw provider response for one sample.
///
/// `temp_unit` is the unit the request was made with (OpenWeather answers in
/// imperial units when Fahrenheit was requested).
pub fn normalize(
    provider: ProviderId,
    raw: &Value,
    sample: &Sample,
    temp_unit: TempUnit,
) -> WeatherObservation {
    let obs = match provider {
        ProviderId::OpenMeteo | ProviderId::AromeHd => normalize_open_meteo(provider, raw, sample),
        ProviderId::OpenWeather => normalize_openweather(raw, sample, temp_unit),
        ProviderId::MeteoBlue => normalize_meteoblue(raw, sample),
    };
    obs.unwrap_or_else(|| {
        tracing::debug!(
            "No usable {} data for sample {} at {}",
            provider.display_name(),
            sample.sequence_index,
            sample.timestamp
        );
        WeatherObservation::blank(sample, provider, provider)
    })
    .drop_probability_without_amount()
}

// ---------------------------------------------------------------------------
// Time matching
// ---------------------------------------------------------------------------

/// Parse a provider timestamp. Offset-less local times are shifted by
/// `utc_offset_secs` to UTC.
fn parse_provider_time(s: &str, utc_offset_secs: i64) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc() - Duration::seconds(utc_offset_secs))
}

/// Index of the timestamp closest to `target`. Unparseable entries are skipped.
pub fn closest_index(times: &[Option<DateTime<Utc>>], target: DateTime<Utc>) -> Option<usize> {
    times
        .iter()
        .enumerate()
        .filter_map(|(i, t)| t.map(|t| (i, t)))
        .min_by_key(|(_, t)| (t.timestamp_millis() - target.timestamp_millis()).unsigned_abs())
        .map(|(i, _)| i)
}

fn at(values: &[Option<f64>], idx: usize) -> Option<f64> {
    values.get(idx).copied().flatten().and_then(finite_or_none)
}

fn code_at(values: &[Option<f64>], idx: usize) -> Option<i64> {
    at(values, idx).map(|c| c.round() as i64)
}

// ---------------------------------------------------------------------------
// Open-Meteo / AROME-HD
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenMeteoResponse {
    utc_offset_seconds: i64,
    hourly: Option<OpenMeteoHourly>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
    precipitation_probability: Vec<Option<f64>>,
    relative_humidity_2m: Vec<Option<f64>>,
    wind_speed_10m: Vec<Option<f64>>,
    wind_gusts_10m: Vec<Option<f64>>,
    #[serde(alias = "wind_direction_10m")]
    winddirection_10m: Vec<Option<f64>>,
    #[serde(alias = "weather_code")]
    weathercode: Vec<Option<f64>>,
    uv_index: Vec<Option<f64>>,
    is_day: Vec<Option<f64>>,
    cloud_cover: Vec<Option<f64>>,
}

fn normalize_open_meteo(
    provider: ProviderId,
    raw: &Value,
    sample: &Sample,
) -> Option<WeatherObservation> {
    let resp: OpenMeteoResponse = serde_json::from_value(raw.clone())
        .map_err(|e| {
            tracing::warn!("{} response structure error: {}", provider.display_name(), e);
        })
        .ok()?;
    let h = resp.hourly?;

    let times: Vec<Option<DateTime<Utc>>> = h
        .time
        .iter()
        .map(|t| parse_provider_time(t, resp.utc_offset_seconds))
        .collect();
    let idx = closest_index(&times, sample.timestamp)?;

    let temperature_c = at(&h.temperature_2m, idx);
    let precipitation_mm = at(&h.precipitation, idx);
    let probability = at(&h.precipitation_probability, idx);
    let cloud_cover_pct = at(&h.cloud_cover, idx);
    let vendor_code = code_at(&h.weathercode, idx);

    let (weather_code, weather_category) = match (provider, vendor_code) {
        (ProviderId::AromeHd, None) => (
            None,
            WeatherCategory::from_basics(temperature_c, precipitation_mm, cloud_cover_pct),
        ),
        (ProviderId::AromeHd, Some(code)) => {
            let code = reconcile_arome_code(code, precipitation_mm, probability, cloud_cover_pct);
            (Some(code), WeatherCategory::from_wmo(code))
        }
        (_, Some(code)) => (Some(code), WeatherCategory::from_wmo(code)),
        (_, None) => (None, WeatherCategory::Default),
    };

    let is_daylight = at(&h.is_day, idx)
        .map(|d| d >= 0.5)
        .unwrap_or_else(|| is_daylight(sample.position(), sample.timestamp));

    Some(WeatherObservation {
        temperature_c,
        wind_speed_kmh: at(&h.wind_speed_10m, idx),
        wind_gust_kmh: at(&h.wind_gusts_10m, idx),
        wind_direction_deg: at(&h.winddirection_10m, idx),
        humidity_pct: at(&h.relative_humidity_2m, idx),
        precipitation_mm,
        precipitation_probability_pct: probability,
        cloud_cover_pct,
        uv_index: at(&h.uv_index, idx),
        is_daylight,
        weather_code,
        weather_category,
        ..WeatherObservation::blank(sample, provider, provider)
    })
}

/// AROME-HD answers 200 with empty or all-null arrays outside its real
/// (irregular) domain. Such a payload must not be shown.
pub fn arome_payload_invalid(raw: &Value) -> bool {
    let Some(hourly) = raw.get("hourly") else {
        return true;
    };
    let non_empty = |key: &str| {
        hourly
            .get(key)
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
    };
    if non_empty("time").is_none() {
        return true;
    }
    match non_empty("temperature_2m") {
        Some(temps) => !temps.iter().any(|t| json_f64(t).is_some()),
        None => true,
    }
}

/// Copy selected hourly arrays from a standard Open-Meteo payload into an
/// AROME-HD payload (the AROME model leaves some of them empty).
pub fn merge_arome_backfill(arome: &mut Value, standard: &Value) {
    let Some(std_hourly) = standard.get("hourly").and_then(Value::as_object) else {
        return;
    };
    let Some(root) = arome.as_object_mut() else {
        return;
    };
    let hourly = root
        .entry("hourly")
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(hourly) = hourly.as_object_mut() else {
        return;
    };

    for key in AROME_BACKFILL_KEYS {
        if let Some(arr) = std_hourly.get(key).filter(|v| v.is_array()) {
            hourly.insert(key.to_string(), arr.clone());
        }
    }
    let has_time = hourly.get("time").is_some_and(Value::is_array);
    if !has_time {
        if let Some(time) = std_hourly.get("time").filter(|v| v.is_array()) {
            hourly.insert("time".to_string(), time.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// OpenWeather One Call 3.0
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwResponse {
    current: Option<OwCurrent>,
    hourly: Vec<OwHourly>,
    daily: Vec<OwDaily>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwCurrent {
    uvi: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwCondition {
    id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwOneHour {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwHourly {
    dt: i64,
    temp: Option<f64>,
    humidity: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    pop: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    rain: Option<OwOneHour>,
    snow: Option<OwOneHour>,
    weather: Vec<OwCondition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwDailyTemp {
    day: Option<f64>,
    max: Option<f64>,
    min: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OwDaily {
    dt: i64,
    temp: Option<OwDailyTemp>,
    humidity: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    pop: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    rain: Option<f64>,
    snow: Option<f64>,
    weather: Vec<OwCondition>,
}

/// Fields shared by hourly and daily records, already picked.
struct OwRecord {
    temp: Option<f64>,
    humidity: Option<f64>,
    wind_speed: Option<f64>,
    wind_deg: Option<f64>,
    wind_gust: Option<f64>,
    pop: Option<f64>,
    uvi: Option<f64>,
    clouds: Option<f64>,
    precipitation: f64,
    code: Option<i64>,
}

fn closest_by_dt<T>(records: &[T], dt: impl Fn(&T) -> i64, target: i64) -> Option<&T> {
    records.iter().min_by_key(|r| (dt(r) - target).unsigned_abs())
}

fn normalize_openweather(
    raw: &Value,
    sample: &Sample,
    temp_unit: TempUnit,
) -> Option<WeatherObservation> {
    let resp: OwResponse = serde_json::from_value(raw.clone())
        .map_err(|e| tracing::warn!("OpenWeather response structure error: {}", e))
        .ok()?;
    let target = sample.timestamp.timestamp();

    let hourly_covers = resp
        .hourly
        .iter()
        .map(|h| h.dt)
        .max()
        .is_some_and(|last| target <= last + OPENWEATHER_HOURLY_SLACK_MINS * 60);

    let record = if hourly_covers {
        closest_by_dt(&resp.hourly, |h| h.dt, target).map(|h| OwRecord {
            temp: h.temp,
            humidity: h.humidity,
            wind_speed: h.wind_speed,
            wind_deg: h.wind_deg,
            wind_gust: h.wind_gust,
            pop: h.pop,
            uvi: h.uvi,
            clouds: h.clouds,
            precipitation: h.rain.as_ref().and_then(|r| r.one_hour).unwrap_or(0.0)
                + h.snow.as_ref().and_then(|s| s.one_hour).unwrap_or(0.0),
            code: h.weather.first().and_then(|w| w.id),
        })
    } else {
        None
    }
    .or_else(|| {
        closest_by_dt(&resp.daily, |d| d.dt, target).map(|d| OwRecord {
            temp: d.temp.as_ref().and_then(|t| t.day.or(t.max).or(t.min)),
            humidity: d.humidity,
            wind_speed: d.wind_speed,
            wind_deg: d.wind_deg,
            wind_gust: d.wind_gust,
            pop: d.pop,
            uvi: d.uvi,
            clouds: d.clouds,
            precipitation: d.rain.unwrap_or(0.0) + d.snow.unwrap_or(0.0),
            code: d.weather.first().and_then(|w| w.id),
        })
    })?;

    let to_kmh = |v: f64| match temp_unit {
        TempUnit::F => mph_to_kmh(v),
        TempUnit::C => ms_to_kmh(v),
    };
    let to_c = |v: f64| match temp_unit {
        TempUnit::F => f_to_c(v),
        TempUnit::C => v,
    };
    let current_uvi = resp.current.as_ref().and_then(|c| c.uvi);

    Some(WeatherObservation {
        temperature_c: record.temp.and_then(finite_or_none).map(to_c),
        wind_speed_kmh: record.wind_speed.and_then(finite_or_none).map(to_kmh),
        wind_gust_kmh: record.wind_gust.and_then(finite_or_none).map(to_kmh),
        wind_direction_deg: record.wind_deg.and_then(finite_or_none),
        humidity_pct: record.humidity.and_then(finite_or_none),
        precipitation_mm: finite_or_none(record.precipitation),
        // pop is a 0-1 fraction with two decimals
        precipitation_probability_pct: record
            .pop
            .and_then(finite_or_none)
            .map(|p| round_dp(p * 100.0, 0)),
        cloud_cover_pct: record.clouds.and_then(finite_or_none),
        uv_index: record.uvi.or(current_uvi).and_then(finite_or_none),
        is_daylight: is_daylight(sample.position(), sample.timestamp),
        weather_code: record.code,
        weather_category: record
            .code
            .map(WeatherCategory::from_openweather)
            .unwrap_or_default(),
        ..WeatherObservation::blank(sample, ProviderId::OpenWeather, ProviderId::OpenWeather)
    })
}

// ---------------------------------------------------------------------------
// MeteoBlue
// ---------------------------------------------------------------------------
//
// The package response shape varies (flat scalars, or `data_1h` arrays), so
// this one reads the JSON tree directly instead of a typed struct. Every
// field is read as "scalar, or the element at the matched time index".

/// First present key among `keys` in `obj`.
fn first_key<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn scalar_or_indexed(obj: &Value, keys: &[&str], idx: Option<usize>) -> Option<f64> {
    match first_key(obj, keys)? {
        Value::Array(_) => idx.and_then(|i| json_array_f64(first_key(obj, keys), i)),
        v => json_f64(v),
    }
}

fn normalize_meteoblue(raw: &Value, sample: &Sample) -> Option<WeatherObservation> {
    if !raw.is_object() {
        return None;
    }
    let data = raw.get("data_1h").filter(|v| v.is_object()).unwrap_or(raw);

    let offset_secs = raw
        .get("metadata")
        .and_then(|m| m.get("utc_timeoffset"))
        .and_then(json_f64)
        .map(|h| (h * 3600.0).round() as i64)
        .unwrap_or(0);
    let times: Vec<Option<DateTime<Utc>>> = first_key(data, &["time", "valid_time"])
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .map(|t| t.as_str().and_then(|s| parse_provider_time(s, offset_secs)))
                .collect()
        })
        .unwrap_or_default();
    let idx = closest_index(&times, sample.timestamp);

    let units = raw.get("units");
    let wind_unit = units
        .and_then(|u| u.get("windspeed"))
        .and_then(Value::as_str)
        .unwrap_or("kmh");
    let to_kmh = |v: f64| match wind_unit {
        "ms-1" | "m/s" => ms_to_kmh(v),
        "mph" => mph_to_kmh(v),
        _ => v,
    };
    let fahrenheit = units
        .and_then(|u| u.get("temperature"))
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("F"));

    let get = |keys: &[&str]| scalar_or_indexed(data, keys, idx);

    let temperature_c = get(&["temperature_2m", "temperature"])
        .map(|t| if fahrenheit { f_to_c(t) } else { t });
    let precipitation_mm = get(&["precipitation"]);
    let pictocode = get(&["pictocode"]).map(|c| c.round() as i64);

    if temperature_c.is_none() && precipitation_mm.is_none() && pictocode.is_none() {
        return None;
    }

    let is_daylight = get(&["isdaylight"])
        .map(|d| d >= 0.5)
        .unwrap_or_else(|| is_daylight(sample.position(), sample.timestamp));

    Some(WeatherObservation {
        temperature_c,
        wind_speed_kmh: get(&["wind_speed_10m", "windspeed"]).map(to_kmh),
        wind_gust_kmh: get(&["wind_gust_10m", "gust"]).map(to_kmh),
        wind_direction_deg: get(&["wind_direction_10m", "winddirection"]),
        humidity_pct: get(&["relative_humidity_2m", "relativehumidity"]),
        precipitation_mm,
        precipitation_probability_pct: get(&["precipitation_probability"]),
        cloud_cover_pct: get(&["total_cloud_cover", "totalcloudcover", "cloudcover"]),
        uv_index: get(&["uvindex", "uv_index"]),
        is_daylight,
        weather_code: pictocode,
        weather_category: pictocode
            .map(WeatherCategory::from_meteoblue)
            .unwrap_or_default(),
        ..WeatherObservation::blank(sample, ProviderId::MeteoBlue, ProviderId::MeteoBlue)
    })
}

// ---------------------------------------------------------------------------
// Display conversion
// ---------------------------------------------------------------------------

/// An observation in the caller's display units, rounded for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DisplayObservation {
    pub sequence_index: usize,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Distance from the start in the display distance unit.
    pub distance: f64,
    pub provider: ProviderId,
    pub effective_provider: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub precipitation: Option<f64>,
    pub precipitation_probability_pct: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub uv_index: Option<f64>,
    pub is_daylight: bool,
    pub weather_category: WeatherCategory,
}

impl WeatherObservation {
    pub fn to_display(&self, units: &Units) -> DisplayObservation {
        let precip_dp = match units.precipitation {
            PrecipUnit::Mm => 1,
            PrecipUnit::In => 2,
        };
        DisplayObservation {
            sequence_index: self.sample.sequence_index,
            timestamp: self.sample.timestamp,
            lat: self.sample.lat,
            lon: self.sample.lon,
            distance: round_dp(
                distance_from_m(self.sample.cumulative_distance_m, units.distance),
                2,
            ),
            provider: self.provider,
            effective_provider: self.effective_provider,
            fallback_reason: self.fallback_reason,
            temperature: self
                .temperature_c
                .map(|t| round_dp(temp_from_c(t, units.temperature), 1)),
            wind_speed: self
                .wind_speed_kmh
                .map(|w| round_dp(wind_from_kmh(w, units.wind), 1)),
            wind_gust: self
                .wind_gust_kmh
                .map(|w| round_dp(wind_from_kmh(w, units.wind), 1)),
            wind_direction_deg: self.wind_direction_deg.map(f64::round),
            humidity_pct: self.humidity_pct.map(f64::round),
            precipitation: self
                .precipitation_mm
                .map(|p| round_dp(precip_from_mm(p, units.precipitation), precip_dp)),
            precipitation_probability_pct: self.precipitation_probability_pct.map(f64::round),
            cloud_cover_pct: self.cloud_cover_pct.map(f64::round),
            uv_index: self.uv_index.map(|u| round_dp(u, 1)),
            is_daylight: self.is_daylight,
            weather_category: self.weather_category,
        }
    }
}
