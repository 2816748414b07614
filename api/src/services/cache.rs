//! In-memory TTL cache for raw provider responses.
//!
//! Shared by every run in the process (including concurrent compare rows).
//! Entries are written whole and expire lazily: a stale entry is simply not
//! returned and gets overwritten by the next write to the same key.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use crate::helpers::round_dp;
use crate::services::clock::Clock;
use crate::services::policy::ProviderId;
use crate::services::segmenter::Sample;
use crate::services::units::{TempUnit, WindUnit};

/// Default time-to-live for cached responses (minutes).
pub const DEFAULT_CACHE_TTL_MINS: i64 = 30;

/// Build the cache key for a provider response at one sample.
///
/// `provider|date|tempUnit|windUnit|lat(3dp)|lon(3dp)|iso-timestamp`
pub fn cache_key(
    provider: ProviderId,
    sample: &Sample,
    temp_unit: TempUnit,
    wind_unit: WindUnit,
) -> String {
    format!(
        "{}|{}|{}|{}|{:.3}|{:.3}|{}",
        provider.as_str(),
        sample.timestamp.format("%Y-%m-%d"),
        temp_unit.as_str(),
        wind_unit.as_str(),
        round_dp(sample.lat, 3),
        round_dp(sample.lon, 3),
        sample.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    )
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<serde_json::Value>,
    stored_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            clock,
        }
    }

    /// Fresh value for `key`, or `None` if absent or older than the TTL.
    pub fn get(&self, key: &str) -> Option<Arc<serde_json::Value>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        if self.clock.now() - entry.stored_at > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Store `value` under `key`, replacing any previous entry. Returns the
    /// shared handle to the stored value.
    pub fn put(&self, key: String, value: serde_json::Value) -> Arc<serde_json::Value> {
        let value = Arc::new(value);
        let entry = CacheEntry {
            value: value.clone(),
            stored_at: self.clock.now(),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, entry);
        value
    }

    /// Number of stored entries, stale ones included.
    pub fn entry_count(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use serde_json::json;

    fn start() -> DateTime<Utc> {
        "2026-05-10T08:00:00Z".parse::<DateTime<Utc>>().unwrap()
    }

    fn store(clock: &ManualClock) -> CacheStore {
        CacheStore::new(
            Duration::minutes(DEFAULT_CACHE_TTL_MINS),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_put_then_get() {
        let clock = ManualClock::new(start());
        let cache = store(&clock);
        cache.put("k".to_string(), json!({"hourly": {}}));
        assert_eq!(*cache.get("k").unwrap(), json!({"hourly": {}}));
    }

    #[test]
    fn test_missing_key() {
        let clock = ManualClock::new(start());
        assert!(store(&clock).get("nope").is_none());
    }

    #[test]
    fn test_expires_after_ttl() {
        let clock = ManualClock::new(start());
        let cache = store(&clock);
        cache.put("k".to_string(), json!(1));

        clock.advance(Duration::minutes(30));
        assert!(cache.get("k").is_some(), "exactly at TTL is still fresh");

        clock.advance(Duration::seconds(1));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_overwrite_refreshes_stored_at() {
        let clock = ManualClock::new(start());
        let cache = store(&clock);
        cache.put("k".to_string(), json!("old"));
        clock.advance(Duration::minutes(25));
        cache.put("k".to_string(), json!("new"));
        clock.advance(Duration::minutes(25));
        assert_eq!(*cache.get("k").unwrap(), json!("new"));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let clock = ManualClock::new(start());
        let cache = store(&clock);
        let other = cache.clone();
        cache.put("k".to_string(), json!(true));
        assert!(other.get("k").is_some());
    }

    #[test]
    fn test_cache_key_layout() {
        let sample = Sample {
            sequence_index: 3,
            lat: 45.764_49,
            lon: 4.835_66,
            timestamp: start(),
            cumulative_distance_m: 1234.0,
        };
        let key = cache_key(ProviderId::AromeHd, &sample, TempUnit::C, WindUnit::Kmh);
        assert_eq!(
            key,
            "aromehd|2026-05-10|c|kmh|45.764|4.836|2026-05-10T08:00:00.000Z"
        );
    }

    #[test]
    fn test_cache_key_varies_with_units_and_provider() {
        let sample = Sample {
            sequence_index: 0,
            lat: 1.0,
            lon: 2.0,
            timestamp: start(),
            cumulative_distance_m: 0.0,
        };
        let a = cache_key(ProviderId::OpenMeteo, &sample, TempUnit::C, WindUnit::Kmh);
        let b = cache_key(ProviderId::OpenMeteo, &sample, TempUnit::F, WindUnit::Kmh);
        let c = cache_key(ProviderId::OpenWeather, &sample, TempUnit::C, WindUnit::Kmh);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
