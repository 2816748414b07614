//! Provider catalogue and credential check.
//!
//! - GET  /api/v1/providers
//! - POST /api/v1/providers/check

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::route_weather::AppState;
use crate::services::geo::LatLon;
use crate::services::orchestrator::{ProbeResult, DEFAULT_PROBE_POINT};
use crate::services::policy::{BoundingBox, ChainBucket, ChainId, ProviderId};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub name: String,
    pub max_horizon_hours: i64,
    /// Null for global coverage
    pub coverage: Option<BoundingBox>,
    pub requires_credential: bool,
    /// Whether the server holds a usable key for this provider
    pub server_credential: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChainInfo {
    pub id: ChainId,
    pub label: String,
    pub buckets: Vec<ChainBucket>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
    pub chains: Vec<ChainInfo>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CredentialCheckRequest {
    pub provider: ProviderId,
    /// Key to test. When absent, the server-side key is tested.
    pub credential: Option<String>,
    /// Probe location; defaults to Barcelona
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

/// List providers with their limits, and the available chains.
#[utoipa::path(
    get,
    path = "/api/v1/providers",
    tag = "Providers",
    responses(
        (status = 200, description = "Provider policy table", body = ProvidersResponse),
    )
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    let providers = ProviderId::ALL
        .into_iter()
        .map(|p| {
            let cap = p.capability();
            ProviderInfo {
                id: p,
                name: p.display_name().to_string(),
                max_horizon_hours: cap.max_horizon_hours,
                coverage: cap.coverage,
                requires_credential: cap.requires_credential,
                server_credential: state.default_credentials.has(p),
            }
        })
        .collect();
    let chains = ChainId::ALL
        .into_iter()
        .map(|c| ChainInfo {
            id: c,
            label: c.label().to_string(),
            buckets: c.buckets().to_vec(),
        })
        .collect();

    Json(ProvidersResponse { providers, chains })
}

/// Check a provider API key with one live request.
#[utoipa::path(
    post,
    path = "/api/v1/providers/check",
    tag = "Providers",
    request_body = CredentialCheckRequest,
    responses(
        (status = 200, description = "Probe outcome", body = ProbeResult),
        (status = 400, description = "Invalid probe location", body = ErrorResponse),
    )
)]
pub async fn check_credential(
    State(state): State<AppState>,
    Json(req): Json<CredentialCheckRequest>,
) -> Result<Json<ProbeResult>, AppError> {
    let at = match (req.lat, req.lon) {
        (Some(lat), Some(lon)) => LatLon::new(lat, lon),
        (None, None) => DEFAULT_PROBE_POINT,
        _ => {
            return Err(AppError::BadRequest(
                "lat and lon must be given together".to_string(),
            ))
        }
    };
    if !at.is_valid() {
        return Err(AppError::BadRequest(format!(
            "Invalid coordinates ({}, {})",
            at.lat, at.lon
        )));
    }

    let credential = req
        .credential
        .as_deref()
        .or_else(|| state.default_credentials.get(req.provider));
    let result = state
        .orchestrator
        .probe_credential(req.provider, credential, at)
        .await;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::route_weather::tests::state_with;
    use crate::services::orchestrator::ProbeOutcome;
    use crate::services::policy::Credentials;
    use crate::services::transport::tests::MockTransport;

    #[tokio::test]
    async fn test_list_providers() {
        let state = state_with(
            MockTransport::new(),
            Credentials::single(ProviderId::MeteoBlue, Some("mb-server-key")),
        );
        let Json(resp) = list_providers(State(state)).await;
        assert_eq!(resp.providers.len(), 4);
        let open_meteo = &resp.providers[0];
        assert_eq!(open_meteo.id, ProviderId::OpenMeteo);
        assert!(open_meteo.coverage.is_none());
        assert!(!open_meteo.requires_credential);
        let meteoblue = resp
            .providers
            .iter()
            .find(|p| p.id == ProviderId::MeteoBlue)
            .unwrap();
        assert!(meteoblue.server_credential);
        assert_eq!(resp.chains.len(), 2);
        assert_eq!(resp.chains[0].buckets.len(), 3);
    }

    #[tokio::test]
    async fn test_check_uses_server_key_when_none_given() {
        let transport = MockTransport::new().on("appid=ow-server-key", 401, "bad key");
        let state = state_with(
            transport,
            Credentials::single(ProviderId::OpenWeather, Some("ow-server-key")),
        );
        let req = CredentialCheckRequest {
            provider: ProviderId::OpenWeather,
            credential: None,
            lat: None,
            lon: None,
        };
        let Json(result) = check_credential(State(state), Json(req)).await.unwrap();
        assert_eq!(result.outcome, ProbeOutcome::InvalidCredential);
        assert_eq!(result.status, Some(401));
    }

    #[tokio::test]
    async fn test_check_rejects_half_location() {
        let state = state_with(MockTransport::new(), Credentials::default());
        let req = CredentialCheckRequest {
            provider: ProviderId::MeteoBlue,
            credential: Some("mb-key-123".to_string()),
            lat: Some(45.0),
            lon: None,
        };
        let err = check_credential(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
