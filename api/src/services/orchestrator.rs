//! Fetch orchestration.
//!
//! Drives one run over a batch of samples: resolve the provider, consult the
//! cache, fetch, fall back to Open-Meteo on provider errors, normalize. Every
//! sample yields exactly one observation, in input order. Per-sample errors
//! never escape a run; they are folded into a single `SystemicNotice`.
//!
//! Network calls within a run are sequential with a small courtesy delay.
//! Compare mode runs several selectors concurrently over the same samples,
//! sharing the cache but each with its own `FailureTracker`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::cache::{cache_key, CacheStore};
use crate::services::clock::Clock;
use crate::services::failures::{
    classify_provider_error, FailureTracker, ProviderErrorKind, DEFAULT_FAIL_LIMIT,
};
use crate::services::geo::LatLon;
use crate::services::normalizer::{
    arome_payload_invalid, merge_arome_backfill, normalize, WeatherObservation,
};
use crate::services::policy::{
    ChainId, Credentials, ProviderId, ProviderSelector, OPENMETEO_MAX_DAYS,
};
use crate::services::request::{build_request, Endpoints};
use crate::services::resolver::{
    beyond_baseline_horizon, resolve, summarize_provider_segments, FallbackReason, ProviderSegment,
};
use crate::services::segmenter::Sample;
use crate::services::summary::{summarize, RouteSummary};
use crate::services::transport::{HttpTransport, TransportError};
use crate::services::units::{TempUnit, Units};

/// Delay between consecutive network calls in a normal run (milliseconds).
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 70;
/// Delay between consecutive network calls in compare mode (milliseconds).
pub const DEFAULT_COMPARE_REQUEST_DELAY_MS: u64 = 35;

/// Point used by the credential probe when the caller gives none (Barcelona).
pub const DEFAULT_PROBE_POINT: LatLon = LatLon {
    lat: 41.3874,
    lon: 2.1686,
};

/// Rows of the compare table, in display order.
pub const COMPARE_SELECTORS: [ProviderSelector; 5] = [
    ProviderSelector::Provider(ProviderId::OpenMeteo),
    ProviderSelector::Provider(ProviderId::AromeHd),
    ProviderSelector::Provider(ProviderId::MeteoBlue),
    ProviderSelector::Provider(ProviderId::OpenWeather),
    ProviderSelector::Chain(ChainId::Ow2AromeOpenmeteo),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("run was cancelled")]
    Cancelled,
}

/// Cooperative cancellation, checked between samples and after each call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub request_delay: Duration,
    pub compare_request_delay: Duration,
    pub fail_limit: u32,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            compare_request_delay: Duration::from_millis(DEFAULT_COMPARE_REQUEST_DELAY_MS),
            fail_limit: DEFAULT_FAIL_LIMIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Run output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NoticeSeverity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    HorizonExceeded,
    MissingCredential,
    HardDisabled,
    Fallback,
}

/// The single most severe systemic condition of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SystemicNotice {
    pub severity: NoticeSeverity,
    pub kind: NoticeKind,
    pub provider: ProviderId,
    pub provider_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProviderErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizon_days: Option<i64>,
}

impl SystemicNotice {
    fn new(severity: NoticeSeverity, kind: NoticeKind, provider: ProviderId) -> Self {
        Self {
            severity,
            kind,
            provider,
            provider_name: provider.display_name().to_string(),
            error_kind: None,
            status: None,
            horizon_days: None,
        }
    }
}

/// Conditions seen during a run. The first occurrence of each is kept.
#[derive(Debug, Default)]
struct NoticeConditions {
    horizon: Option<(ProviderId, i64)>,
    missing_credential: Option<ProviderId>,
    hard_disabled: Option<(ProviderId, ProviderErrorKind, Option<u16>)>,
    fallback: Option<ProviderId>,
}

impl NoticeConditions {
    /// horizon-exceeded > missing-credential > hard-disabled > fallback.
    fn into_notice(self) -> Option<SystemicNotice> {
        if let Some((provider, days)) = self.horizon {
            return Some(SystemicNotice {
                horizon_days: Some(days),
                ..SystemicNotice::new(NoticeSeverity::Warn, NoticeKind::HorizonExceeded, provider)
            });
        }
        if let Some(provider) = self.missing_credential {
            return Some(SystemicNotice::new(
                NoticeSeverity::Error,
                NoticeKind::MissingCredential,
                provider,
            ));
        }
        if let Some((provider, kind, status)) = self.hard_disabled {
            return Some(SystemicNotice {
                error_kind: Some(kind),
                status,
                ..SystemicNotice::new(NoticeSeverity::Error, NoticeKind::HardDisabled, provider)
            });
        }
        self.fallback
            .map(|p| SystemicNotice::new(NoticeSeverity::Warn, NoticeKind::Fallback, p))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RunStats {
    pub samples: usize,
    pub cache_hits: usize,
    pub network_calls: usize,
    /// Samples served by a provider other than the requested one.
    pub fallbacks: usize,
    /// Samples left without data.
    pub blanks: usize,
    pub elapsed_ms: u64,
}

/// One orchestration run: observations in sample order plus its notice.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FetchRun {
    pub run_id: Uuid,
    #[schema(value_type = String)]
    pub selector: ProviderSelector,
    pub observations: Vec<WeatherObservation>,
    pub notice: Option<SystemicNotice>,
    pub provider_segments: Vec<ProviderSegment>,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompareRow {
    #[schema(value_type = String)]
    pub selector: ProviderSelector,
    pub run: FetchRun,
    pub summary: RouteSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Ok,
    MissingCredential,
    InvalidCredential,
    QuotaExceeded,
    Forbidden,
    Http,
    Network,
}

impl From<ProviderErrorKind> for ProbeOutcome {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::InvalidCredential => ProbeOutcome::InvalidCredential,
            ProviderErrorKind::QuotaExceeded => ProbeOutcome::QuotaExceeded,
            ProviderErrorKind::Forbidden => ProbeOutcome::Forbidden,
            ProviderErrorKind::Http => ProbeOutcome::Http,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProbeResult {
    pub provider: ProviderId,
    pub outcome: ProbeOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("{kind} (HTTP {status})")]
    Provider {
        kind: ProviderErrorKind,
        status: u16,
    },
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("unparseable response: {0}")]
    Malformed(String),
    #[error("cancelled")]
    Cancelled,
}

/// Mutable state owned by one run.
struct RunState<'a> {
    selector: ProviderSelector,
    units: Units,
    credentials: &'a Credentials,
    cancel: &'a CancelToken,
    now: DateTime<Utc>,
    delay: Duration,
    failures: FailureTracker,
    conditions: NoticeConditions,
    stats: RunStats,
}

#[derive(Clone)]
pub struct FetchOrchestrator {
    transport: Arc<dyn HttpTransport>,
    cache: CacheStore,
    clock: Arc<dyn Clock>,
    endpoints: Endpoints,
    options: OrchestratorOptions,
}

impl FetchOrchestrator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        cache: CacheStore,
        clock: Arc<dyn Clock>,
        endpoints: Endpoints,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            transport,
            cache,
            clock,
            endpoints,
            options,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Run `selector` over `samples`.
    pub async fn run(
        &self,
        samples: &[Sample],
        selector: ProviderSelector,
        units: Units,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<FetchRun, RunError> {
        self.run_with_delay(
            samples,
            selector,
            units,
            credentials,
            cancel,
            self.options.request_delay,
        )
        .await
    }

    /// Run every compare selector concurrently over the same samples.
    pub async fn run_compare(
        &self,
        samples: &[Sample],
        units: Units,
        credentials: &Credentials,
        cancel: &CancelToken,
    ) -> Result<Vec<CompareRow>, RunError> {
        let delay = self.options.compare_request_delay;
        let runs = join_all(COMPARE_SELECTORS.iter().map(|selector| {
            self.run_with_delay(samples, *selector, units, credentials, cancel, delay)
        }))
        .await;

        runs.into_iter()
            .map(|run| {
                run.map(|run| CompareRow {
                    selector: run.selector,
                    summary: summarize(&run.observations),
                    run,
                })
            })
            .collect()
    }

    /// Issue one request with `credential` to check whether it works.
    pub async fn probe_credential(
        &self,
        provider: ProviderId,
        credential: Option<&str>,
        at: LatLon,
    ) -> ProbeResult {
        let result = |outcome, status, message| ProbeResult {
            provider,
            outcome,
            status,
            message,
        };
        let credentials = Credentials::single(provider, credential);
        if provider.capability().requires_credential && !credentials.has(provider) {
            return result(ProbeOutcome::MissingCredential, None, None);
        }

        let sample = Sample {
            sequence_index: 0,
            lat: at.lat,
            lon: at.lon,
            timestamp: self.clock.now(),
            cumulative_distance_m: 0.0,
        };
        let request = build_request(
            provider,
            &sample,
            credentials.usable(provider),
            TempUnit::C,
            &self.endpoints,
        );

        match self.transport.get(&request.url).await {
            Ok(resp) if resp.is_success() => {
                tracing::info!("{} credential check passed", provider.display_name());
                result(ProbeOutcome::Ok, Some(resp.status), None)
            }
            Ok(resp) => {
                let kind = classify_provider_error(provider, resp.status, &resp.body);
                tracing::warn!(
                    "{} credential check failed: {} (HTTP {})",
                    provider.display_name(),
                    kind,
                    resp.status
                );
                result(kind.into(), Some(resp.status), None)
            }
            Err(e) => {
                tracing::warn!("{} credential check: {}", provider.display_name(), e);
                result(ProbeOutcome::Network, None, Some(e.to_string()))
            }
        }
    }

    async fn run_with_delay(
        &self,
        samples: &[Sample],
        selector: ProviderSelector,
        units: Units,
        credentials: &Credentials,
        cancel: &CancelToken,
        delay: Duration,
    ) -> Result<FetchRun, RunError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let mut state = RunState {
            selector,
            units,
            credentials,
            cancel,
            now: self.clock.now(),
            delay,
            failures: FailureTracker::new(self.options.fail_limit),
            conditions: NoticeConditions::default(),
            stats: RunStats::default(),
        };
        tracing::info!(
            "Run {} started: {} samples with {}",
            run_id,
            samples.len(),
            selector
        );

        let mut observations = Vec::with_capacity(samples.len());
        for sample in samples {
            if cancel.is_cancelled() {
                tracing::info!("Run {} cancelled after {} samples", run_id, observations.len());
                return Err(RunError::Cancelled);
            }
            observations.push(self.process_sample(sample, &mut state).await?);
        }

        let providers: Vec<ProviderId> =
            observations.iter().map(|o| o.effective_provider).collect();
        let times: Vec<DateTime<Utc>> = observations.iter().map(|o| o.sample.timestamp).collect();
        let mut stats = state.stats;
        stats.samples = observations.len();
        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            "Run {} finished: {} samples, {} cache hits, {} network calls, {} fallbacks in {} ms",
            run_id,
            stats.samples,
            stats.cache_hits,
            stats.network_calls,
            stats.fallbacks,
            stats.elapsed_ms
        );

        Ok(FetchRun {
            run_id,
            selector,
            observations,
            notice: state.conditions.into_notice(),
            provider_segments: summarize_provider_segments(&providers, &times),
            stats,
        })
    }

    async fn process_sample(
        &self,
        sample: &Sample,
        state: &mut RunState<'_>,
    ) -> Result<WeatherObservation, RunError> {
        let res = resolve(
            state.selector,
            sample,
            state.now,
            state.credentials,
            &state.failures,
        );
        tracing::debug!(
            "Sample {} at {}: requested {}, resolved {}",
            sample.sequence_index,
            sample.timestamp,
            res.requested,
            res.provider
        );

        if beyond_baseline_horizon(sample.timestamp, state.now) {
            state
                .conditions
                .horizon
                .get_or_insert((ProviderId::OpenMeteo, OPENMETEO_MAX_DAYS));
            state.stats.blanks += 1;
            return Ok(WeatherObservation {
                fallback_reason: Some(FallbackReason::HorizonExceeded),
                ..WeatherObservation::blank(sample, res.requested, ProviderId::OpenMeteo)
            });
        }

        match res.reason {
            Some(FallbackReason::MissingCredential) => {
                state.conditions.missing_credential.get_or_insert(res.requested);
            }
            Some(FallbackReason::HorizonExceeded) => {
                let days = res.requested.capability().max_horizon_hours / 24;
                state.conditions.horizon.get_or_insert((res.requested, days));
            }
            Some(FallbackReason::HardDisabled) | None => {}
            Some(_) => {
                state.conditions.fallback.get_or_insert(res.requested);
            }
        }
        if res.reason.is_some() {
            state.stats.fallbacks += 1;
        }

        let obs = self.observe(res.provider, sample, state).await?;
        Ok(WeatherObservation {
            provider: res.requested,
            fallback_reason: res.reason.or(obs.fallback_reason),
            ..obs
        })
    }

    /// Fetch and normalize `provider` for one sample, falling back to
    /// Open-Meteo on provider errors.
    async fn observe(
        &self,
        provider: ProviderId,
        sample: &Sample,
        state: &mut RunState<'_>,
    ) -> Result<WeatherObservation, RunError> {
        let raw = match self.fetch_raw(provider, sample, state).await {
            Ok(raw) => raw,
            Err(FetchError::Cancelled) => return Err(RunError::Cancelled),
            Err(FetchError::Provider { kind, status }) if provider != ProviderId::OpenMeteo => {
                let tripped = state.failures.record_failure(provider, kind, Some(status));
                tracing::warn!(
                    "{} failed for sample {}: {} (HTTP {}), falling back to Open-Meteo",
                    provider.display_name(),
                    sample.sequence_index,
                    kind,
                    status
                );
                if tripped {
                    let latched = state.failures.state(provider).cloned().unwrap_or_default();
                    state.conditions.hard_disabled.get_or_insert((
                        provider,
                        latched.last_error_kind.unwrap_or(kind),
                        latched.last_status,
                    ));
                } else {
                    state.conditions.fallback.get_or_insert(provider);
                }
                state.stats.fallbacks += 1;
                return self
                    .baseline(sample, state, FallbackReason::ProviderError)
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    "{} unavailable for sample {}: {}",
                    provider.display_name(),
                    sample.sequence_index,
                    e
                );
                state.stats.blanks += 1;
                return Ok(WeatherObservation::blank(sample, provider, provider));
            }
        };

        if provider == ProviderId::AromeHd {
            return self.finish_arome(&raw, sample, state).await;
        }
        Ok(normalize(provider, &raw, sample, state.units.temperature))
    }

    /// Backfill an AROME-HD payload from standard Open-Meteo, then check it.
    async fn finish_arome(
        &self,
        raw: &Value,
        sample: &Sample,
        state: &mut RunState<'_>,
    ) -> Result<WeatherObservation, RunError> {
        let mut payload = raw.clone();
        match self.fetch_raw(ProviderId::OpenMeteo, sample, state).await {
            Ok(standard) => merge_arome_backfill(&mut payload, &standard),
            Err(FetchError::Cancelled) => return Err(RunError::Cancelled),
            Err(e) => tracing::debug!(
                "AROME-HD backfill skipped for sample {}: {}",
                sample.sequence_index,
                e
            ),
        }

        if arome_payload_invalid(&payload) {
            tracing::debug!(
                "AROME-HD has no data for sample {} ({:.3}, {:.3}), substituting Open-Meteo",
                sample.sequence_index,
                sample.lat,
                sample.lon
            );
            state.conditions.fallback.get_or_insert(ProviderId::AromeHd);
            state.stats.fallbacks += 1;
            return self
                .baseline(sample, state, FallbackReason::InvalidPayload)
                .await;
        }
        Ok(normalize(
            ProviderId::AromeHd,
            &payload,
            sample,
            state.units.temperature,
        ))
    }

    /// Open-Meteo for one sample, or a blank observation if that fails too.
    async fn baseline(
        &self,
        sample: &Sample,
        state: &mut RunState<'_>,
        reason: FallbackReason,
    ) -> Result<WeatherObservation, RunError> {
        let obs = match self.fetch_raw(ProviderId::OpenMeteo, sample, state).await {
            Ok(raw) => normalize(ProviderId::OpenMeteo, &raw, sample, state.units.temperature),
            Err(FetchError::Cancelled) => return Err(RunError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    "Open-Meteo fallback failed for sample {}: {}",
                    sample.sequence_index,
                    e
                );
                state.stats.blanks += 1;
                WeatherObservation::blank(sample, ProviderId::OpenMeteo, ProviderId::OpenMeteo)
            }
        };
        Ok(WeatherObservation {
            fallback_reason: Some(reason),
            ..obs
        })
    }

    /// Raw payload for `provider` at `sample`, from the cache or the network.
    /// Successful network answers are cached.
    async fn fetch_raw(
        &self,
        provider: ProviderId,
        sample: &Sample,
        state: &mut RunState<'_>,
    ) -> Result<Arc<Value>, FetchError> {
        let key = cache_key(
            provider,
            sample,
            state.units.temperature,
            state.units.wind,
        );
        if let Some(hit) = self.cache.get(&key) {
            state.stats.cache_hits += 1;
            tracing::debug!("Cache hit {}", key);
            return Ok(hit);
        }

        let request = build_request(
            provider,
            sample,
            state.credentials.usable(provider),
            state.units.temperature,
            &self.endpoints,
        );
        if state.stats.network_calls > 0 && !state.delay.is_zero() {
            tokio::time::sleep(state.delay).await;
        }
        state.stats.network_calls += 1;

        let response = self.transport.get(&request.url).await;
        // A cancelled run must not write its late result anywhere.
        if state.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let response = response?;

        if !response.is_success() {
            return Err(FetchError::Provider {
                kind: classify_provider_error(provider, response.status, &response.body),
                status: response.status,
            });
        }
        let value: Value = serde_json::from_str(&response.body)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;

        state.failures.record_success(provider);
        Ok(self.cache.put(key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::category::WeatherCategory;
    use crate::services::clock::ManualClock;
    use crate::services::transport::tests::MockTransport;
    use crate::services::transport::ReqwestTransport;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AROME: &str = "models=arome_france_hd";
    const OPEN_METEO: &str = "api.open-meteo.com";
    const METEOBLUE: &str = "my.meteoblue.com";
    const OPENWEATHER: &str = "api.openweathermap.org";

    fn now() -> DateTime<Utc> {
        "2026-05-10T06:00:00Z".parse::<DateTime<Utc>>().unwrap()
    }

    /// `n` samples near Lyon, 30 minutes apart from `offset_hours` after now.
    fn samples(n: usize, offset_hours: i64) -> Vec<Sample> {
        (0..n)
            .map(|i| Sample {
                sequence_index: i,
                lat: 45.76,
                lon: 4.84,
                timestamp: now()
                    + ChronoDuration::hours(offset_hours)
                    + ChronoDuration::minutes(30 * i as i64),
                cumulative_distance_m: 5000.0 * i as f64,
            })
            .collect()
    }

    fn open_meteo_body() -> String {
        let times: Vec<String> = (0..12)
            .map(|h| format!("2026-05-10T{:02}:00", 6 + h))
            .collect();
        json!({
            "utc_offset_seconds": 0,
            "hourly": {
                "time": times,
                "temperature_2m": vec![15.0; 12],
                "precipitation": vec![0.0; 12],
                "precipitation_probability": vec![10; 12],
                "wind_speed_10m": vec![12.0; 12],
                "weathercode": vec![2; 12],
                "cloud_cover": vec![40; 12],
                "is_day": vec![1; 12]
            }
        })
        .to_string()
    }

    fn orchestrator(transport: Arc<MockTransport>) -> FetchOrchestrator {
        let clock = ManualClock::new(now());
        let cache = CacheStore::new(ChronoDuration::minutes(30), Arc::new(clock.clone()));
        FetchOrchestrator::new(
            transport,
            cache,
            Arc::new(clock),
            Endpoints::default(),
            OrchestratorOptions {
                request_delay: Duration::ZERO,
                compare_request_delay: Duration::ZERO,
                fail_limit: 3,
            },
        )
    }

    fn selector(p: ProviderId) -> ProviderSelector {
        ProviderSelector::Provider(p)
    }

    fn meteoblue_key() -> Credentials {
        Credentials::single(ProviderId::MeteoBlue, Some("mb-key-123"))
    }

    #[tokio::test]
    async fn test_open_meteo_run_and_cache_reuse() {
        let transport = Arc::new(MockTransport::new().on(OPEN_METEO, 200, &open_meteo_body()));
        let orch = orchestrator(transport.clone());
        let samples = samples(3, 0);
        let creds = Credentials::default();

        let run = orch
            .run(
                &samples,
                selector(ProviderId::OpenMeteo),
                Units::default(),
                &creds,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(run.observations.len(), 3);
        assert!(run.notice.is_none());
        assert_eq!(run.stats.network_calls, 3);
        assert_eq!(run.stats.cache_hits, 0);
        for (i, obs) in run.observations.iter().enumerate() {
            assert_eq!(obs.sample.sequence_index, i);
            assert_eq!(obs.effective_provider, ProviderId::OpenMeteo);
            assert_eq!(obs.temperature_c, Some(15.0));
            assert_eq!(obs.precipitation_probability_pct, None);
            assert_eq!(obs.weather_category, WeatherCategory::PartlyCloudy);
        }
        assert_eq!(run.provider_segments.len(), 1);
        assert_eq!(run.provider_segments[0].to_index, 2);

        let again = orch
            .run(
                &samples,
                selector(ProviderId::OpenMeteo),
                Units::default(),
                &creds,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(again.stats.cache_hits, 3);
        assert_eq!(again.stats.network_calls, 0);
        assert_eq!(transport.call_count(), 3);
        assert_ne!(run.run_id, again.run_id);
    }

    #[tokio::test]
    async fn test_missing_credential_falls_back_without_calling_provider() {
        let transport = Arc::new(MockTransport::new().on(OPEN_METEO, 200, &open_meteo_body()));
        let orch = orchestrator(transport.clone());

        let run = orch
            .run(
                &samples(2, 0),
                selector(ProviderId::MeteoBlue),
                Units::default(),
                &Credentials::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(transport.calls_matching(METEOBLUE), 0);
        for obs in &run.observations {
            assert_eq!(obs.provider, ProviderId::MeteoBlue);
            assert_eq!(obs.effective_provider, ProviderId::OpenMeteo);
            assert_eq!(obs.fallback_reason, Some(FallbackReason::MissingCredential));
        }
        let notice = run.notice.unwrap();
        assert_eq!(notice.kind, NoticeKind::MissingCredential);
        assert_eq!(notice.severity, NoticeSeverity::Error);
        assert_eq!(notice.provider, ProviderId::MeteoBlue);
        assert_eq!(notice.provider_name, "MeteoBlue");
    }

    #[tokio::test]
    async fn test_hard_disable_after_three_failures() {
        let transport = Arc::new(
            MockTransport::new()
                .on(METEOBLUE, 401, "Invalid API key")
                .on(OPEN_METEO, 200, &open_meteo_body()),
        );
        let orch = orchestrator(transport.clone());

        let run = orch
            .run(
                &samples(5, 0),
                selector(ProviderId::MeteoBlue),
                Units::default(),
                &meteoblue_key(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(transport.calls_matching(METEOBLUE), 3);
        assert_eq!(run.observations.len(), 5);
        for obs in &run.observations[..3] {
            assert_eq!(obs.effective_provider, ProviderId::OpenMeteo);
            assert_eq!(obs.fallback_reason, Some(FallbackReason::ProviderError));
            assert_eq!(obs.temperature_c, Some(15.0));
        }
        for obs in &run.observations[3..] {
            assert_eq!(obs.fallback_reason, Some(FallbackReason::HardDisabled));
        }
        let notice = run.notice.unwrap();
        assert_eq!(notice.kind, NoticeKind::HardDisabled);
        assert_eq!(notice.error_kind, Some(ProviderErrorKind::InvalidCredential));
        assert_eq!(notice.status, Some(401));
        assert_eq!(run.stats.fallbacks, 5);

        // A new run starts with a clean tracker.
        let next = orch
            .run(
                &samples(1, 4),
                selector(ProviderId::MeteoBlue),
                Units::default(),
                &meteoblue_key(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(transport.calls_matching(METEOBLUE), 4);
        assert_eq!(next.notice.unwrap().kind, NoticeKind::Fallback);
    }

    #[tokio::test]
    async fn test_transport_errors_blank_without_disabling() {
        let transport = Arc::new(
            MockTransport::new()
                .fail(OPENWEATHER, TransportError::Timeout)
                .on(OPEN_METEO, 200, &open_meteo_body()),
        );
        let orch = orchestrator(transport.clone());
        let creds = Credentials::single(ProviderId::OpenWeather, Some("ow-key-123"));

        let run = orch
            .run(
                &samples(4, 0),
                selector(ProviderId::OpenWeather),
                Units::default(),
                &creds,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(transport.calls_matching(OPENWEATHER), 4);
        assert_eq!(transport.calls_matching(OPEN_METEO), 0);
        for obs in &run.observations {
            assert!(obs.is_blank());
            assert_eq!(obs.effective_provider, ProviderId::OpenWeather);
            assert_eq!(obs.weather_category, WeatherCategory::Default);
        }
        assert!(run.notice.is_none());
        assert_eq!(run.stats.blanks, 4);
    }

    #[tokio::test]
    async fn test_http_error_below_limit_gives_fallback_notice() {
        let transport = Arc::new(
            MockTransport::new()
                .on(OPENWEATHER, 500, "boom")
                .on(OPEN_METEO, 200, &open_meteo_body()),
        );
        let orch = orchestrator(transport);
        let creds = Credentials::single(ProviderId::OpenWeather, Some("ow-key-123"));

        let run = orch
            .run(
                &samples(1, 0),
                selector(ProviderId::OpenWeather),
                Units::default(),
                &creds,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        let obs = &run.observations[0];
        assert_eq!(obs.provider, ProviderId::OpenWeather);
        assert_eq!(obs.effective_provider, ProviderId::OpenMeteo);
        let notice = run.notice.unwrap();
        assert_eq!(notice.kind, NoticeKind::Fallback);
        assert_eq!(notice.severity, NoticeSeverity::Warn);
    }

    #[tokio::test]
    async fn test_invalid_arome_payload_substitutes_open_meteo() {
        let transport = Arc::new(
            MockTransport::new()
                .on(AROME, 200, r#"{"hourly":{"time":[],"temperature_2m":[]}}"#)
                .on(OPEN_METEO, 200, &open_meteo_body()),
        );
        let orch = orchestrator(transport.clone());

        let run = orch
            .run(
                &samples(2, 0),
                selector(ProviderId::AromeHd),
                Units::default(),
                &Credentials::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        for obs in &run.observations {
            assert_eq!(obs.provider, ProviderId::AromeHd);
            assert_eq!(obs.effective_provider, ProviderId::OpenMeteo);
            assert_eq!(obs.fallback_reason, Some(FallbackReason::InvalidPayload));
            assert_eq!(obs.temperature_c, Some(15.0));
        }
        // One AROME call and one Open-Meteo call per sample; the substitution
        // reuses the backfill response from the cache.
        assert_eq!(transport.calls_matching(AROME), 2);
        assert_eq!(transport.call_count(), 4);
        assert_eq!(run.notice.unwrap().kind, NoticeKind::Fallback);
    }

    #[tokio::test]
    async fn test_arome_backfill_fills_missing_code() {
        let arome = json!({
            "utc_offset_seconds": 0,
            "hourly": {
                "time": ["2026-05-10T06:00"],
                "temperature_2m": [9.5],
                "precipitation": [0.0],
                "weathercode": [null],
                "cloud_cover": [null]
            }
        })
        .to_string();
        let standard = json!({
            "utc_offset_seconds": 0,
            "hourly": {
                "time": ["2026-05-10T06:00"],
                "temperature_2m": [11.0],
                "weathercode": [1],
                "cloud_cover": [95],
                "is_day": [1]
            }
        })
        .to_string();
        let transport = Arc::new(
            MockTransport::new()
                .on(AROME, 200, &arome)
                .on(OPEN_METEO, 200, &standard),
        );
        let orch = orchestrator(transport);

        let run = orch
            .run(
                &samples(1, 0),
                selector(ProviderId::AromeHd),
                Units::default(),
                &Credentials::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        let obs = &run.observations[0];
        assert_eq!(obs.effective_provider, ProviderId::AromeHd);
        assert_eq!(obs.temperature_c, Some(9.5));
        assert_eq!(obs.cloud_cover_pct, Some(95.0));
        assert_eq!(obs.weather_category, WeatherCategory::Overcast);
        assert!(run.notice.is_none());
    }

    #[tokio::test]
    async fn test_beyond_open_meteo_horizon_is_blank_without_fetch() {
        let transport = Arc::new(MockTransport::new().on(OPEN_METEO, 200, &open_meteo_body()));
        let orch = orchestrator(transport.clone());

        let run = orch
            .run(
                &samples(2, 15 * 24),
                selector(ProviderId::MeteoBlue),
                Units::default(),
                &Credentials::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(transport.call_count(), 0);
        for obs in &run.observations {
            assert!(obs.is_blank());
            assert_eq!(obs.effective_provider, ProviderId::OpenMeteo);
            assert_eq!(obs.fallback_reason, Some(FallbackReason::HorizonExceeded));
        }
        let notice = run.notice.unwrap();
        assert_eq!(notice.kind, NoticeKind::HorizonExceeded);
        assert_eq!(notice.horizon_days, Some(14));
        assert_eq!(notice.severity, NoticeSeverity::Warn);
    }

    #[tokio::test]
    async fn test_chain_switches_provider_by_elapsed_time() {
        // 06:00Z, 07:00Z, 08:00Z
        let openweather_body = json!({
            "hourly": ([1_778_392_800_i64, 1_778_396_400, 1_778_400_000]
                .iter()
                .map(|dt| json!({"dt": dt, "temp": 11.0, "pop": 0.0}))
                .collect::<Vec<_>>())
        })
        .to_string();
        let transport = Arc::new(
            MockTransport::new()
                .on(OPENWEATHER, 200, &openweather_body)
                .on(AROME, 200, &open_meteo_body())
                .on(OPEN_METEO, 200, &open_meteo_body()),
        );
        let orch = orchestrator(transport);
        let creds = Credentials::single(ProviderId::OpenWeather, Some("ow-key-123"));
        let samples = samples(6, 0);

        let run = orch
            .run(
                &samples,
                ProviderSelector::Chain(ChainId::Ow2AromeOpenmeteo),
                Units::default(),
                &creds,
                &CancelToken::new(),
            )
            .await
            .unwrap();
        let served: Vec<ProviderId> =
            run.observations.iter().map(|o| o.effective_provider).collect();
        // Samples 0..=3 are within the first two hours; 4 and 5 are on AROME.
        assert_eq!(&served[..4], &[ProviderId::OpenWeather; 4]);
        assert!(run.observations[..4].iter().all(|o| o.temperature_c == Some(11.0)));
        assert_eq!(&served[4..], &[ProviderId::AromeHd; 2]);
        assert_eq!(run.provider_segments.len(), 2);
        assert!(run.notice.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_run_returns_error() {
        let transport = Arc::new(MockTransport::new().on(OPEN_METEO, 200, &open_meteo_body()));
        let orch = orchestrator(transport.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = orch
            .run(
                &samples(3, 0),
                selector(ProviderId::OpenMeteo),
                Units::default(),
                &Credentials::default(),
                &cancel,
            )
            .await;
        tokio_test::assert_err!(&result);
        assert_eq!(result.unwrap_err(), RunError::Cancelled);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_compare_runs_every_row() {
        let transport = Arc::new(
            MockTransport::new()
                .on(AROME, 200, &open_meteo_body())
                .on(OPEN_METEO, 200, &open_meteo_body()),
        );
        let orch = orchestrator(transport);

        let rows = orch
            .run_compare(
                &samples(3, 0),
                Units::default(),
                &Credentials::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        let selectors: Vec<ProviderSelector> = rows.iter().map(|r| r.selector).collect();
        assert_eq!(selectors, COMPARE_SELECTORS.to_vec());
        for row in &rows {
            assert_eq!(row.run.observations.len(), 3);
            assert_eq!(row.summary.temperature_median_c, Some(15.0));
        }
        let meteoblue = &rows[2];
        assert_eq!(meteoblue.run.notice.as_ref().unwrap().kind, NoticeKind::MissingCredential);
    }

    #[tokio::test]
    async fn test_probe_credential_outcomes() {
        let transport = Arc::new(
            MockTransport::new()
                .on("apikey=mb-good", 200, "{}")
                .on("apikey=mb-quota", 403, "Daily quota limit reached")
                .on("apikey=mb-bad", 403, "Access denied")
                .fail(OPENWEATHER, TransportError::Network("dns".to_string())),
        );
        let orch = orchestrator(transport.clone());
        let at = DEFAULT_PROBE_POINT;

        let missing = orch.probe_credential(ProviderId::MeteoBlue, Some("  ab "), at).await;
        assert_eq!(missing.outcome, ProbeOutcome::MissingCredential);
        assert_eq!(transport.call_count(), 0);

        let ok = orch.probe_credential(ProviderId::MeteoBlue, Some("mb-good-1"), at).await;
        assert_eq!(ok.outcome, ProbeOutcome::Ok);

        let quota = orch.probe_credential(ProviderId::MeteoBlue, Some("mb-quota-1"), at).await;
        assert_eq!(quota.outcome, ProbeOutcome::QuotaExceeded);
        assert_eq!(quota.status, Some(403));

        let bad = orch.probe_credential(ProviderId::MeteoBlue, Some("mb-bad-1"), at).await;
        assert_eq!(bad.outcome, ProbeOutcome::InvalidCredential);

        let net = orch.probe_credential(ProviderId::OpenWeather, Some("ow-key-123"), at).await;
        assert_eq!(net.outcome, ProbeOutcome::Network);
        assert!(net.message.unwrap().contains("dns"));
    }

    #[tokio::test]
    async fn test_end_to_end_against_mock_open_meteo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("timezone", "auto"))
            .respond_with(ResponseTemplate::new(200).set_body_string(open_meteo_body()))
            .expect(2)
            .mount(&server)
            .await;

        let clock = ManualClock::new(now());
        let transport =
            ReqwestTransport::new("RouteWeather/test", Duration::from_secs(5)).unwrap();
        let orch = FetchOrchestrator::new(
            Arc::new(transport),
            CacheStore::new(ChronoDuration::minutes(30), Arc::new(clock.clone())),
            Arc::new(clock),
            Endpoints {
                open_meteo: server.uri(),
                ..Endpoints::default()
            },
            OrchestratorOptions {
                request_delay: Duration::from_millis(1),
                ..OrchestratorOptions::default()
            },
        );

        let run = orch
            .run(
                &samples(2, 1),
                selector(ProviderId::OpenMeteo),
                Units::default(),
                &Credentials::default(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(run.stats.network_calls, 2);
        assert!(run.observations.iter().all(|o| o.temperature_c == Some(15.0)));
    }
}
