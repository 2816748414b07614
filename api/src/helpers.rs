//! Shared numeric helpers.
//!
//! Provider payloads are loosely typed: numbers arrive as JSON numbers,
//! numeric strings, `null`, or are missing entirely. Everything downstream
//! works on `Option<f64>` where `None` means "no usable value".
//!
//! - `finite_or_none`: drops NaN / ±Inf (logged, since they signal a bad payload)
//! - `json_f64`: lenient number extraction from a `serde_json::Value`
//! - `round_dp`: fixed decimal rounding for cache keys and output
//! - `median`: used by the route summary

use serde_json::Value;

/// Keep a value only if it is finite.
pub(crate) fn finite_or_none(v: f64) -> Option<f64> {
    if !v.is_finite() {
        tracing::warn!("finite_or_none received non-finite value {}, dropping", v);
        return None;
    }
    Some(v)
}

/// Read a JSON value as f64, accepting numbers and numeric strings.
///
/// Returns `None` for `null`, empty strings, booleans, objects, arrays and
/// anything that does not parse to a finite number.
pub(crate) fn json_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64().and_then(finite_or_none),
        Value::String(s) if !s.trim().is_empty() => {
            s.trim().parse::<f64>().ok().and_then(finite_or_none)
        }
        _ => None,
    }
}

/// Index into a JSON array and read the element as f64.
pub(crate) fn json_array_f64(v: Option<&Value>, idx: usize) -> Option<f64> {
    v.and_then(|arr| arr.get(idx)).and_then(json_f64)
}

/// Round to `dp` decimal places.
pub(crate) fn round_dp(v: f64, dp: i32) -> f64 {
    let factor = 10f64.powi(dp);
    (v * factor).round() / factor
}

/// Median of a slice. Returns `None` for an empty slice.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}
