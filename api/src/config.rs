use std::str::FromStr;

use crate::services::cache::DEFAULT_CACHE_TTL_MINS;
use crate::services::failures::DEFAULT_FAIL_LIMIT;
use crate::services::orchestrator::{DEFAULT_COMPARE_REQUEST_DELAY_MS, DEFAULT_REQUEST_DELAY_MS};
use crate::services::policy::Credentials;
use crate::services::request::{
    Endpoints, DEFAULT_METEOBLUE_BASE_URL, DEFAULT_OPENWEATHER_BASE_URL,
    DEFAULT_OPEN_METEO_BASE_URL,
};
use crate::services::transport::DEFAULT_HTTP_TIMEOUT_SECS;

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub http_user_agent: String,
    pub http_timeout_secs: u64,
    pub request_delay_ms: u64,
    pub compare_request_delay_ms: u64,
    pub cache_ttl_mins: i64,
    pub provider_fail_limit: u32,
    /// Server-side keys, used when a request carries none.
    pub default_credentials: Credentials,
    pub endpoints: Endpoints,
}

/// Read `name`, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value '{}' for {}, using {}", raw, name, default);
            default
        }),
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 8080),
            http_user_agent: env_string("HTTP_USER_AGENT", "RouteWeather/0.1"),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            request_delay_ms: env_or("REQUEST_DELAY_MS", DEFAULT_REQUEST_DELAY_MS),
            compare_request_delay_ms: env_or(
                "COMPARE_REQUEST_DELAY_MS",
                DEFAULT_COMPARE_REQUEST_DELAY_MS,
            ),
            cache_ttl_mins: env_or("CACHE_TTL_MINS", DEFAULT_CACHE_TTL_MINS),
            provider_fail_limit: env_or("PROVIDER_FAIL_LIMIT", DEFAULT_FAIL_LIMIT),
            default_credentials: Credentials {
                meteoblue: env_opt("METEOBLUE_API_KEY"),
                openweather: env_opt("OPENWEATHER_API_KEY"),
            },
            endpoints: Endpoints {
                open_meteo: env_string("OPEN_METEO_BASE_URL", DEFAULT_OPEN_METEO_BASE_URL),
                meteoblue: env_string("METEOBLUE_BASE_URL", DEFAULT_METEOBLUE_BASE_URL),
                openweather: env_string("OPENWEATHER_BASE_URL", DEFAULT_OPENWEATHER_BASE_URL),
            },
        }
    }
}
