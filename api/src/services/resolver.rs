//! Provider resolution per sample.
//!
//! Order for a bare provider `p`:
//!   1. hard-disabled in this run        → Open-Meteo
//!   2. needs a credential, none usable  → Open-Meteo
//!   3. sample beyond `p`'s horizon      → Open-Meteo
//!   4. sample outside `p`'s coverage    → Open-Meteo
//!   5. otherwise                        → `p`
//!
//! A chain first picks its bucket provider by hours-from-now, then runs the
//! same checks. Chains never bypass them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::services::failures::FailureTracker;
use crate::services::policy::{Credentials, ProviderId, ProviderSelector, OPENMETEO_MAX_DAYS};
use crate::services::segmenter::Sample;

/// Why a sample ended up on a provider other than the one requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    HardDisabled,
    MissingCredential,
    HorizonExceeded,
    OutOfCoverage,
    /// The provider answered with an HTTP error (set by the orchestrator).
    ProviderError,
    /// AROME-HD answered 200 with no usable data (set by the orchestrator).
    InvalidPayload,
}

/// Outcome of resolving one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Provider picked by the selector (the chain bucket, or the bare id).
    pub requested: ProviderId,
    /// Provider to actually query.
    pub provider: ProviderId,
    pub reason: Option<FallbackReason>,
}

fn elapsed_hours(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (timestamp - now).num_milliseconds() as f64 / 3_600_000.0
}

/// True when even Open-Meteo has no forecast for this time.
pub fn beyond_baseline_horizon(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    elapsed_hours(timestamp, now) > (OPENMETEO_MAX_DAYS * 24) as f64
}

/// Resolve the provider for one sample.
pub fn resolve(
    selector: ProviderSelector,
    sample: &Sample,
    now: DateTime<Utc>,
    credentials: &Credentials,
    failures: &FailureTracker,
) -> Resolution {
    let elapsed = elapsed_hours(sample.timestamp, now);
    let requested = match selector {
        ProviderSelector::Provider(p) => p,
        ProviderSelector::Chain(chain) => chain.provider_at(elapsed),
    };

    let reason = fallback_reason(requested, sample, elapsed, credentials, failures);
    Resolution {
        requested,
        provider: if reason.is_some() {
            ProviderId::OpenMeteo
        } else {
            requested
        },
        reason,
    }
}

fn fallback_reason(
    provider: ProviderId,
    sample: &Sample,
    elapsed_hours: f64,
    credentials: &Credentials,
    failures: &FailureTracker,
) -> Option<FallbackReason> {
    if provider == ProviderId::OpenMeteo {
        return None;
    }
    let cap = provider.capability();

    if failures.is_hard_disabled(provider) {
        return Some(FallbackReason::HardDisabled);
    }
    if cap.requires_credential && !credentials.has(provider) {
        return Some(FallbackReason::MissingCredential);
    }
    if elapsed_hours > cap.max_horizon_hours as f64 {
        return Some(FallbackReason::HorizonExceeded);
    }
    if let Some(bbox) = cap.coverage {
        if !bbox.contains(sample.lat, sample.lon) {
            return Some(FallbackReason::OutOfCoverage);
        }
    }
    None
}

/// Preview the provider each sample would use, with a clean failure state.
pub fn pick_providers_for_route(
    selector: ProviderSelector,
    samples: &[Sample],
    now: DateTime<Utc>,
    credentials: &Credentials,
) -> Vec<ProviderId> {
    let failures = FailureTracker::default();
    samples
        .iter()
        .map(|s| resolve(selector, s, now, credentials, &failures).provider)
        .collect()
}

/// A run of consecutive samples served by the same provider.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProviderSegment {
    pub provider: ProviderId,
    pub from_index: usize,
    pub to_index: usize,
    pub from_time: DateTime<Utc>,
    pub to_time: DateTime<Utc>,
}

/// Collapse a per-sample provider list into consecutive runs.
///
/// `providers` and `timestamps` are parallel; extra entries in the longer one
/// are ignored.
pub fn summarize_provider_segments(
    providers: &[ProviderId],
    timestamps: &[DateTime<Utc>],
) -> Vec<ProviderSegment> {
    let n = providers.len().min(timestamps.len());
    let mut segments: Vec<ProviderSegment> = Vec::new();

    for i in 0..n {
        match segments.last_mut() {
            Some(seg) if seg.provider == providers[i] => {
                seg.to_index = i;
                seg.to_time = timestamps[i];
            }
            _ => segments.push(ProviderSegment {
                provider: providers[i],
                from_index: i,
                to_index: i,
                from_time: timestamps[i],
                to_time: timestamps[i],
            }),
        }
    }
    segments
}
