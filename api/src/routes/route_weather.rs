//! Route weather HTTP endpoints.
//!
//! - POST /api/v1/route-weather
//! - POST /api/v1/route-weather/compare
//! - POST /api/v1/route-weather/samples

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::services::geo::LatLon;
use crate::services::normalizer::DisplayObservation;
use crate::services::orchestrator::{CancelToken, CompareRow, FetchOrchestrator, FetchRun};
use crate::services::policy::{Credentials, ProviderId, ProviderSelector};
use crate::services::resolver::{
    pick_providers_for_route, summarize_provider_segments, ProviderSegment,
};
use crate::services::segmenter::{parse_start_time, segment_route, Sample, SegmentParams};
use crate::services::summary::{summarize, RouteSummary};
use crate::services::units::Units;

/// Shared application state for all endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) orchestrator: FetchOrchestrator,
    /// Server-side keys from the environment.
    pub(crate) default_credentials: Credentials,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RouteWeatherRequest {
    /// Route vertices in travel order (at least 2 valid ones)
    pub track: Vec<LatLon>,
    /// Departure time (RFC 3339). Absent or past → next quarter hour.
    pub start_time: Option<String>,
    /// Average riding speed in km/h
    pub speed_kmh: f64,
    /// Minutes between samples
    pub interval_minutes: u32,
    /// Provider id (`openmeteo`, `aromehd`, `meteoblue`, `openweather`) or
    /// chain id (`ow2_arome_openmeteo`, `arome_openmeteo`)
    #[schema(value_type = String)]
    pub provider: ProviderSelector,
    #[serde(default)]
    pub units: Units,
    /// Per-request API keys; override the server-side ones
    #[serde(default)]
    pub credentials: Credentials,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RouteWeatherResponse {
    pub start_time: DateTime<Utc>,
    pub units: Units,
    /// Observations converted to `units`
    pub rows: Vec<DisplayObservation>,
    pub summary: RouteSummary,
    /// Canonical run output (°C, km/h, mm)
    pub run: FetchRun,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompareResponse {
    pub start_time: DateTime<Utc>,
    pub units: Units,
    pub rows: Vec<CompareRow>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SamplesResponse {
    pub start_time: DateTime<Utc>,
    pub samples: Vec<Sample>,
    /// Provider each sample would use, before any fetch
    pub providers: Vec<ProviderId>,
    pub provider_segments: Vec<ProviderSegment>,
}

/// Segment the request's route and merge its credentials with the defaults.
fn prepare(
    state: &AppState,
    req: &RouteWeatherRequest,
) -> Result<(DateTime<Utc>, Vec<Sample>, Credentials), AppError> {
    let now = state.orchestrator.now();
    let start = parse_start_time(req.start_time.as_deref(), now)?;
    let samples = segment_route(
        &req.track,
        &SegmentParams {
            start,
            speed_kmh: req.speed_kmh,
            interval_minutes: req.interval_minutes,
        },
    )?;
    let credentials = req.credentials.clone().or(&state.default_credentials);
    Ok((start, samples, credentials))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Weather along a route from one provider or chain.
///
/// Segments the route into timed samples, then fetches each sample
/// sequentially. Provider failures fall back to Open-Meteo per sample and
/// are reported once in `run.notice`.
#[utoipa::path(
    post,
    path = "/api/v1/route-weather",
    tag = "Route weather",
    request_body = RouteWeatherRequest,
    responses(
        (status = 200, description = "Observations for every sample", body = RouteWeatherResponse),
        (
            status = 400,
            description = "Invalid track, start time, speed, interval or ride length",
            body = ErrorResponse
        ),
    )
)]
pub async fn route_weather(
    State(state): State<AppState>,
    Json(req): Json<RouteWeatherRequest>,
) -> Result<Json<RouteWeatherResponse>, AppError> {
    let (start_time, samples, credentials) = prepare(&state, &req)?;
    let run = state
        .orchestrator
        .run(&samples, req.provider, req.units, &credentials, &CancelToken::new())
        .await?;

    Ok(Json(RouteWeatherResponse {
        start_time,
        units: req.units,
        rows: run.observations.iter().map(|o| o.to_display(&req.units)).collect(),
        summary: summarize(&run.observations),
        run,
    }))
}

/// Weather along a route from every provider side by side.
#[utoipa::path(
    post,
    path = "/api/v1/route-weather/compare",
    tag = "Route weather",
    request_body = RouteWeatherRequest,
    responses(
        (status = 200, description = "One run per provider and chain", body = CompareResponse),
        (
            status = 400,
            description = "Invalid track, start time, speed, interval or ride length",
            body = ErrorResponse
        ),
    )
)]
pub async fn compare_route_weather(
    State(state): State<AppState>,
    Json(req): Json<RouteWeatherRequest>,
) -> Result<Json<CompareResponse>, AppError> {
    let (start_time, samples, credentials) = prepare(&state, &req)?;
    let rows = state
        .orchestrator
        .run_compare(&samples, req.units, &credentials, &CancelToken::new())
        .await?;

    Ok(Json(CompareResponse {
        start_time,
        units: req.units,
        rows,
    }))
}

/// Samples and provider preview for a route, without fetching weather.
#[utoipa::path(
    post,
    path = "/api/v1/route-weather/samples",
    tag = "Route weather",
    request_body = RouteWeatherRequest,
    responses(
        (status = 200, description = "Timed samples and planned providers", body = SamplesResponse),
        (
            status = 400,
            description = "Invalid track, start time, speed, interval or ride length",
            body = ErrorResponse
        ),
    )
)]
pub async fn route_samples(
    State(state): State<AppState>,
    Json(req): Json<RouteWeatherRequest>,
) -> Result<Json<SamplesResponse>, AppError> {
    let (start_time, samples, credentials) = prepare(&state, &req)?;
    let providers =
        pick_providers_for_route(req.provider, &samples, state.orchestrator.now(), &credentials);
    let times: Vec<DateTime<Utc>> = samples.iter().map(|s| s.timestamp).collect();

    Ok(Json(SamplesResponse {
        start_time,
        provider_segments: summarize_provider_segments(&providers, &times),
        samples,
        providers,
    }))
}
