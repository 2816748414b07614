//! Route segmentation.
//!
//! Turns a track polyline plus start time, riding speed and sampling interval
//! into the ordered list of points the rider is expected to occupy. Each
//! sample is a (position, timestamp) pair that the orchestrator fetches a
//! forecast for.
//!
//! Pacing is even: `distance(t) = speed * t`. The last sample always sits
//! on the final vertex at `start + total_duration`, so the table ends at the
//! finish regardless of how the interval divides the ride.

use chrono::{DateTime, Duration, NaiveDateTime, Timelike, Utc};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::geo::{haversine_km, interpolate, LatLon};
use crate::services::policy::OPENMETEO_MAX_DAYS;

/// Longest ride accepted, in minutes. Nothing past the baseline horizon can
/// be forecast anyway.
pub const MAX_RIDE_MINUTES: f64 = (OPENMETEO_MAX_DAYS * 24 * 60) as f64;

/// Upper bound on samples per route. Each sample costs at least one
/// upstream request.
pub const MAX_SAMPLES: usize = 1000;

/// Accepted naive start-time layouts (interpreted as UTC).
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

/// Errors that abort segmentation. No samples are produced.
#[derive(Debug, Error, PartialEq)]
pub enum SegmentError {
    #[error("Track needs at least 2 valid points, got {0}")]
    TrackTooShort(usize),
    #[error("Invalid start time '{0}'")]
    InvalidDate(String),
    #[error("Speed must be a positive number of km/h, got {0}")]
    InvalidSpeed(f64),
    #[error("Interval must be a positive number of minutes, got {0}")]
    InvalidInterval(u32),
    #[error("Ride of {0:.0} minutes exceeds the {max:.0} minute limit", max = MAX_RIDE_MINUTES)]
    RouteTooLong(f64),
    #[error("Route needs {0} samples, limit is {max}; use a longer interval", max = MAX_SAMPLES)]
    TooManySamples(usize),
    #[error("Ride end falls outside the supported date range")]
    TimeOutOfRange,
}

/// One predicted rider position.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Sample {
    pub sequence_index: usize,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    /// Distance along the track from the start, in metres.
    pub cumulative_distance_m: f64,
}

impl Sample {
    pub fn position(&self) -> LatLon {
        LatLon::new(self.lat, self.lon)
    }
}

/// Segmentation inputs.
#[derive(Debug, Clone)]
pub struct SegmentParams {
    pub start: DateTime<Utc>,
    pub speed_kmh: f64,
    pub interval_minutes: u32,
}

/// Parse a user-supplied start time.
///
/// - `None` or a time before `now` → next quarter hour after `now`
/// - RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` read as UTC
/// - anything else → `SegmentError::InvalidDate`
pub fn parse_start_time(
    raw: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, SegmentError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(round_up_to_quarter(now));
    };

    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| SegmentError::InvalidDate(raw.to_string()))?;

    if parsed < now {
        return Ok(round_up_to_quarter(now));
    }
    Ok(parsed)
}

/// Round up to the next quarter hour. Seconds are dropped; a time already on
/// a quarter stays where it is.
pub fn round_up_to_quarter(t: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = t
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t);
    let minute = truncated.minute();
    let rounded_minute = minute.div_ceil(15) * 15;
    truncated + Duration::minutes(i64::from(rounded_minute - minute))
}

/// Keep only finite, in-range vertices.
fn valid_vertices(track: &[LatLon]) -> Vec<LatLon> {
    let valid: Vec<LatLon> = track.iter().copied().filter(LatLon::is_valid).collect();
    if valid.len() != track.len() {
        tracing::warn!(
            "Dropped {} invalid track point(s) out of {}",
            track.len() - valid.len(),
            track.len()
        );
    }
    valid
}

/// Cumulative distance (km) at each vertex, starting with 0.0.
fn cumulative_km(vertices: &[LatLon]) -> Vec<f64> {
    let mut cum = Vec::with_capacity(vertices.len());
    let mut total = 0.0;
    cum.push(0.0);
    for pair in vertices.windows(2) {
        total += haversine_km(pair[0], pair[1]);
        cum.push(total);
    }
    cum
}

/// Position at `target_km` along the track.
fn position_at(vertices: &[LatLon], cum: &[f64], target_km: f64) -> LatLon {
    // partition_point gives the first vertex strictly past the target
    let idx = cum.partition_point(|&d| d <= target_km);
    if idx >= vertices.len() {
        return vertices[vertices.len() - 1];
    }
    let seg_start = idx.saturating_sub(1);
    let seg_len = cum[idx] - cum[seg_start];
    if seg_len <= 0.0 {
        return vertices[idx];
    }
    let fraction = (target_km - cum[seg_start]) / seg_len;
    interpolate(vertices[seg_start], vertices[idx], fraction)
}

/// `start + m` minutes, rounded to the millisecond.
fn offset(start: DateTime<Utc>, m: f64) -> Result<DateTime<Utc>, SegmentError> {
    let ms = (m * 60_000.0).round();
    if !ms.is_finite() || ms.abs() >= i64::MAX as f64 {
        return Err(SegmentError::TimeOutOfRange);
    }
    Duration::try_milliseconds(ms as i64)
        .and_then(|d| start.checked_add_signed(d))
        .ok_or(SegmentError::TimeOutOfRange)
}

/// Segment a track into time-ordered samples.
pub fn segment_route(
    track: &[LatLon],
    params: &SegmentParams,
) -> Result<Vec<Sample>, SegmentError> {
    if !params.speed_kmh.is_finite() || params.speed_kmh <= 0.0 {
        return Err(SegmentError::InvalidSpeed(params.speed_kmh));
    }
    if params.interval_minutes == 0 {
        return Err(SegmentError::InvalidInterval(params.interval_minutes));
    }

    let vertices = valid_vertices(track);
    if vertices.len() < 2 {
        return Err(SegmentError::TrackTooShort(vertices.len()));
    }

    let cum = cumulative_km(&vertices);
    let total_km = cum[cum.len() - 1];
    let total_minutes = total_km / params.speed_kmh * 60.0;
    if !total_minutes.is_finite() || total_minutes > MAX_RIDE_MINUTES {
        return Err(SegmentError::RouteTooLong(total_minutes));
    }
    let interval = f64::from(params.interval_minutes);
    // Bounded by MAX_RIDE_MINUTES, so the cast cannot saturate.
    let step_count = (total_minutes / interval).floor() as usize + 1;
    if step_count > MAX_SAMPLES {
        return Err(SegmentError::TooManySamples(step_count));
    }

    let mut samples: Vec<Sample> = (0..step_count)
        .map(|i| {
            let elapsed = interval * i as f64;
            let target_km = params.speed_kmh * elapsed / 60.0;
            let pos = position_at(&vertices, &cum, target_km);
            Ok(Sample {
                sequence_index: i,
                lat: pos.lat,
                lon: pos.lon,
                timestamp: offset(params.start, elapsed)?,
                cumulative_distance_m: target_km.min(total_km) * 1000.0,
            })
        })
        .collect::<Result<_, SegmentError>>()?;

    let finish = vertices[vertices.len() - 1];
    let arrival = offset(params.start, total_minutes)?;
    let total_m = total_km * 1000.0;

    match samples.last_mut() {
        Some(last) if last.cumulative_distance_m.round() >= total_m.round() => {
            last.lat = finish.lat;
            last.lon = finish.lon;
            last.cumulative_distance_m = total_m;
            last.timestamp = arrival;
        }
        _ => {
            if samples.len() >= MAX_SAMPLES {
                return Err(SegmentError::TooManySamples(samples.len() + 1));
            }
            samples.push(Sample {
                sequence_index: samples.len(),
                lat: finish.lat,
                lon: finish.lon,
                timestamp: arrival,
                cumulative_distance_m: total_m,
            })
        }
    }

    tracing::debug!(
        "Segmented {:.2} km track into {} samples ({} min interval, {:.1} km/h)",
        total_km,
        samples.len(),
        params.interval_minutes,
        params.speed_kmh
    );

    Ok(samples)
}
