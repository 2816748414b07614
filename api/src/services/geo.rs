//! Great-circle geometry and solar position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Mean Earth radius in km (haversine).
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and within [-90, 90] / [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Haversine distance between two points in km.
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Linear interpolation between two coordinates by fraction (0 = `a`, 1 = `b`).
///
/// Plain lat/lon lerp: segments between GPS track vertices are short enough
/// that the great-circle correction is far below GPS noise.
pub fn interpolate(a: LatLon, b: LatLon, fraction: f64) -> LatLon {
    let f = fraction.clamp(0.0, 1.0);
    LatLon {
        lat: a.lat + (b.lat - a.lat) * f,
        lon: a.lon + (b.lon - a.lon) * f,
    }
}

// --- Solar position ---
//
// Low-precision solar ephemeris (accurate to a fraction of a degree), enough
// to tell day from night at a route sample.

const J1970: f64 = 2_440_588.0;
const J2000: f64 = 2_451_545.0;
const MS_PER_DAY: f64 = 86_400_000.0;
/// Obliquity of the ecliptic (degrees).
const OBLIQUITY_DEG: f64 = 23.4397;
/// Perihelion of the Earth (degrees).
const PERIHELION_DEG: f64 = 102.9372;

fn days_since_j2000(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / MS_PER_DAY - 0.5 + J1970 - J2000
}

/// Solar altitude above the horizon in radians at `pos` and time `t`.
pub fn solar_altitude(pos: LatLon, t: DateTime<Utc>) -> f64 {
    let d = days_since_j2000(t);
    let e = OBLIQUITY_DEG.to_radians();

    let m = (357.5291 + 0.985_600_28 * d).to_radians();
    let c = (1.9148 * m.sin() + 0.02 * (2.0 * m).sin() + 0.0003 * (3.0 * m).sin()).to_radians();
    let l = m + c + PERIHELION_DEG.to_radians() + std::f64::consts::PI;

    let dec = (e.sin() * l.sin()).asin();
    let ra = (l.sin() * e.cos()).atan2(l.cos());

    let lw = (-pos.lon).to_radians();
    let phi = pos.lat.to_radians();
    let sidereal = (280.16 + 360.985_623_5 * d).to_radians() - lw;
    let h = sidereal - ra;

    (phi.sin() * dec.sin() + phi.cos() * dec.cos() * h.cos()).asin()
}

/// True when the sun is above the horizon.
pub fn is_daylight(pos: LatLon, t: DateTime<Utc>) -> bool {
    solar_altitude(pos, t) > 0.0
}
