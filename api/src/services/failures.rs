//! Per-run provider failure tracking.
//!
//! Counts consecutive provider-side failures and latches a provider off for
//! the rest of the run once the limit is hit. One tracker per run: compare
//! mode rows and a concurrent main run never share state.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::policy::ProviderId;

/// Default consecutive failures before a provider is disabled for the run.
pub const DEFAULT_FAIL_LIMIT: u32 = 3;

/// Provider-side failure taxonomy, derived from HTTP status and body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("forbidden")]
    Forbidden,
    #[error("HTTP error")]
    Http,
}

/// Classify a non-2xx provider response.
///
/// Each vendor signals auth and quota problems differently, so the mapping is
/// per provider first and falls back to generic status handling.
pub fn classify_provider_error(provider: ProviderId, status: u16, body: &str) -> ProviderErrorKind {
    match (provider, status) {
        (ProviderId::MeteoBlue, 401) => ProviderErrorKind::InvalidCredential,
        (ProviderId::MeteoBlue, 403) => {
            let lower = body.to_ascii_lowercase();
            if lower.contains("quota") || lower.contains("limit") {
                ProviderErrorKind::QuotaExceeded
            } else {
                ProviderErrorKind::InvalidCredential
            }
        }
        (ProviderId::MeteoBlue, 429) => ProviderErrorKind::QuotaExceeded,
        (ProviderId::OpenWeather, 401) => ProviderErrorKind::InvalidCredential,
        (ProviderId::OpenWeather, 403) => ProviderErrorKind::Forbidden,
        (ProviderId::OpenWeather, 429) => ProviderErrorKind::QuotaExceeded,
        (_, 401) => ProviderErrorKind::InvalidCredential,
        (_, 403) => ProviderErrorKind::Forbidden,
        (_, 429) => ProviderErrorKind::QuotaExceeded,
        _ => ProviderErrorKind::Http,
    }
}

/// Mutable failure state for one provider within one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub hard_disabled: bool,
    pub last_error_kind: Option<ProviderErrorKind>,
    pub last_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct FailureTracker {
    limit: u32,
    states: HashMap<ProviderId, FailureState>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAIL_LIMIT)
    }
}

impl FailureTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            states: HashMap::new(),
        }
    }

    /// Record a provider-side failure. Returns `true` if this call tripped
    /// the hard-disable latch.
    pub fn record_failure(
        &mut self,
        provider: ProviderId,
        kind: ProviderErrorKind,
        status: Option<u16>,
    ) -> bool {
        let limit = self.limit;
        let state = self.states.entry(provider).or_default();
        state.consecutive_failures += 1;
        state.last_error_kind = Some(kind);
        state.last_status = status.or(state.last_status);

        if !state.hard_disabled && state.consecutive_failures >= limit {
            state.hard_disabled = true;
            tracing::warn!(
                "{} disabled for this run after {} consecutive failures (last: {})",
                provider.display_name(),
                state.consecutive_failures,
                kind
            );
            return true;
        }
        false
    }

    /// Reset the consecutive counter. Does not clear the latch.
    pub fn record_success(&mut self, provider: ProviderId) {
        if let Some(state) = self.states.get_mut(&provider) {
            state.consecutive_failures = 0;
        }
    }

    pub fn is_hard_disabled(&self, provider: ProviderId) -> bool {
        self.states.get(&provider).is_some_and(|s| s.hard_disabled)
    }

    pub fn state(&self, provider: ProviderId) -> Option<&FailureState> {
        self.states.get(&provider)
    }
}
