//! HTTP transport abstraction so fetches can be mocked.
//!
//! Non-2xx answers are NOT errors at this layer: the orchestrator needs the
//! status and body to classify provider failures. Only timeouts and
//! connection-level failures surface as `TransportError`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

/// Default request timeout (seconds).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport used in production.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| TransportError::Network(format!("Invalid User-Agent: {}", e)))?,
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    type Route = (String, Result<TransportResponse, TransportError>);

    /// Scripted transport. Answers by the first route whose key occurs in the
    /// URL; records every URL it is asked for.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<Vec<Route>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, url_contains: &str, status: u16, body: &str) -> Self {
            self.routes.lock().unwrap().push((
                url_contains.to_string(),
                Ok(TransportResponse {
                    status,
                    body: body.to_string(),
                }),
            ));
            self
        }

        pub fn fail(self, url_contains: &str, err: TransportError) -> Self {
            self.routes
                .lock()
                .unwrap()
                .push((url_contains.to_string(), Err(err)));
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls_matching(&self, needle: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|u| u.contains(needle))
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(url.to_string());
            let routes = self.routes.lock().unwrap();
            let (_, result) = routes
                .iter()
                .find(|(k, _)| url.contains(k.as_str()))
                .unwrap_or_else(|| panic!("unexpected request: {}", url));
            result.clone()
        }
    }

    #[tokio::test]
    async fn test_reqwest_transport_returns_body_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("latitude", "45.76"))
            .and(header("user-agent", "RouteWeather/test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"hourly":{}}"#))
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::new("RouteWeather/test", Duration::from_secs(5)).unwrap();
        let url = format!("{}/v1/forecast?latitude=45.76", server.uri());
        let resp = transport.get(&url).await.unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.body, r#"{"hourly":{}}"#);
    }

    #[tokio::test]
    async fn test_reqwest_transport_passes_error_status_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::new("RouteWeather/test", Duration::from_secs(5)).unwrap();
        let resp = tokio_test::assert_ok!(transport.get(&server.uri()).await);
        assert_eq!(resp.status, 401);
        assert!(!resp.is_success());
        assert_eq!(resp.body, "Invalid API key");
    }

    #[tokio::test]
    async fn test_reqwest_transport_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport =
            ReqwestTransport::new("RouteWeather/test", Duration::from_millis(50)).unwrap();
        let err = transport.get(&server.uri()).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test]
    async fn test_reqwest_transport_connection_refused() {
        let transport =
            ReqwestTransport::new("RouteWeather/test", Duration::from_secs(1)).unwrap();
        let err = transport.get("http://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[tokio::test]
    async fn test_mock_transport_routes_by_substring() {
        let mock = MockTransport::new()
            .on("models=arome", 200, "arome")
            .on("open-meteo", 200, "std");
        let a = mock.get("https://api.open-meteo.com/x&models=arome").await.unwrap();
        let b = mock.get("https://api.open-meteo.com/x").await.unwrap();
        assert_eq!(a.body, "arome");
        assert_eq!(b.body, "std");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.calls_matching("models=arome"), 1);
    }
}
