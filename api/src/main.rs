// Route Weather API v0.1
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::route_weather::AppState;
use services::cache::CacheStore;
use services::clock::SystemClock;
use services::orchestrator::{FetchOrchestrator, OrchestratorOptions};
use services::transport::ReqwestTransport;

/// OpenAPI document for the Route Weather API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Route Weather API",
        version = "0.1.0",
        description = "Weather along cycling routes. Splits a route into timed samples \
            at the rider's expected position, then fetches each sample from Open-Meteo, \
            Météo-France AROME HD, MeteoBlue or OpenWeather (or a time-based chain of \
            them), falling back to Open-Meteo whenever a provider cannot serve a sample.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Providers", description = "Provider policy and credential checks"),
        (name = "Route weather", description = "Weather along a route"),
    ),
    paths(
        routes::health::health_check,
        routes::providers::list_providers,
        routes::providers::check_credential,
        routes::route_weather::route_weather,
        routes::route_weather::compare_route_weather,
        routes::route_weather::route_samples,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::providers::ProviderInfo,
            routes::providers::ChainInfo,
            routes::providers::ProvidersResponse,
            routes::providers::CredentialCheckRequest,
            routes::route_weather::RouteWeatherRequest,
            routes::route_weather::RouteWeatherResponse,
            routes::route_weather::CompareResponse,
            routes::route_weather::SamplesResponse,
            services::orchestrator::FetchRun,
            services::orchestrator::CompareRow,
            services::orchestrator::SystemicNotice,
            services::orchestrator::ProbeResult,
            services::normalizer::WeatherObservation,
            services::normalizer::DisplayObservation,
            services::summary::RouteSummary,
            services::category::WeatherCategory,
            services::resolver::ProviderSegment,
            services::resolver::FallbackReason,
            services::policy::ProviderId,
            services::policy::Credentials,
            services::units::Units,
            services::geo::LatLon,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing; LOG_FORMAT=json for structured output
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "route_weather_api=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = AppConfig::from_env();

    let transport = ReqwestTransport::new(
        &config.http_user_agent,
        Duration::from_secs(config.http_timeout_secs),
    )
    .expect("Failed to build HTTP client");

    let clock = Arc::new(SystemClock);
    let cache = CacheStore::new(chrono::Duration::minutes(config.cache_ttl_mins), clock.clone());
    let orchestrator = FetchOrchestrator::new(
        Arc::new(transport),
        cache,
        clock,
        config.endpoints.clone(),
        OrchestratorOptions {
            request_delay: Duration::from_millis(config.request_delay_ms),
            compare_request_delay: Duration::from_millis(config.compare_request_delay_ms),
            fail_limit: config.provider_fail_limit,
        },
    );

    for provider in services::policy::ProviderId::ALL {
        if provider.capability().requires_credential && !config.default_credentials.has(provider) {
            tracing::info!(
                "No server-side key for {}; requests must bring their own",
                provider.display_name()
            );
        }
    }

    let app_state = AppState {
        orchestrator,
        default_credentials: config.default_credentials.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/providers", get(routes::providers::list_providers))
        .route(
            "/api/v1/providers/check",
            post(routes::providers::check_credential),
        )
        .route(
            "/api/v1/route-weather",
            post(routes::route_weather::route_weather),
        )
        .route(
            "/api/v1/route-weather/compare",
            post(routes::route_weather::compare_route_weather),
        )
        .route(
            "/api/v1/route-weather/samples",
            post(routes::route_weather::route_samples),
        )
        .fallback(errors::not_found)
        .with_state(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
