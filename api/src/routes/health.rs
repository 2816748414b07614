use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::routes::route_weather::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok")
    pub status: String,
    /// API version
    pub version: String,
    /// Provider responses currently held in the cache (stale ones included)
    pub cached_responses: usize,
}

/// Health check endpoint.
///
/// Returns the API status and version. The service has no external
/// dependency that must be up, so the status is always "ok".
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cached_responses: state.orchestrator.cache().entry_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::route_weather::tests::state_with;
    use crate::services::policy::Credentials;
    use crate::services::transport::tests::MockTransport;

    #[tokio::test]
    async fn test_health_check() {
        let state = state_with(MockTransport::new(), Credentials::default());
        let Json(resp) = health_check(State(state)).await;
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(resp.cached_responses, 0);
    }
}
