//! HTTP transport for QUIVER stores.
//!
//! [`HttpTransport`] performs the store's requests with `reqwest`. The store
//! hands over root-relative URLs; the transport resolves them against the
//! API origin it was built with.

use async_trait::async_trait;
use quiver_core::{
    Method, StoreConfig, Transport, TransportFailure, TransportRequest, TransportResponse,
};
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error)]
pub enum HttpTransportError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    origin: String,
}

impl HttpTransport {
    /// Build a transport for the API at `origin` (scheme, host and port).
    pub fn new(origin: impl Into<String>) -> Result<Self, HttpTransportError> {
        let origin = origin.into();
        if !origin.starts_with("http://") && !origin.starts_with("https://") {
            return Err(HttpTransportError::Config(format!(
                "origin must be an absolute http(s) URL, got {:?}",
                origin
            )));
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, HttpTransportError> {
        let origin = config
            .origin
            .as_deref()
            .ok_or_else(|| HttpTransportError::Config("origin is not set".to_string()))?;
        Self::new(origin)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Absolute URL for a request URL; absolute URLs pass through.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.origin, url)
        } else {
            format!("{}/{}", self.origin, url)
        }
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn classify(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::timeout()
    } else {
        TransportFailure::network(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse, TransportFailure> {
        let url = self.resolve(&request.url);
        trace!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(http_method(request.method), &url)
            .timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(classify)?;
        let body = (!text.is_empty()).then_some(text);

        debug!(method = %request.method, url = %url, status, "Response received");
        if (200..300).contains(&status) {
            Ok(TransportResponse::new(status, body))
        } else {
            Err(TransportFailure::status(status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::{FailureKind, Headers};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port; `None` never answers.
    async fn serve_once(response: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            match response {
                Some(response) => {
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.ok();
                }
                None => tokio::time::sleep(Duration::from_secs(5)).await,
            }
        });
        format!("http://{}", addr)
    }

    fn get(url: &str, timeout: Duration) -> TransportRequest {
        TransportRequest {
            url: url.to_string(),
            method: Method::Get,
            headers: Headers::json_defaults(),
            timeout,
            body: None,
        }
    }

    #[test]
    fn test_resolve_against_origin() {
        let transport = HttpTransport::new("https://api.example.com/").unwrap();
        assert_eq!(transport.origin(), "https://api.example.com");
        assert_eq!(transport.resolve("/v1/widgets"), "https://api.example.com/v1/widgets");
        assert_eq!(transport.resolve("v1/widgets"), "https://api.example.com/v1/widgets");
        assert_eq!(
            transport.resolve("https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_origin_is_required() {
        assert!(matches!(
            HttpTransport::from_config(&StoreConfig::default()),
            Err(HttpTransportError::Config(_))
        ));
        assert!(matches!(
            HttpTransport::new("/relative"),
            Err(HttpTransportError::Config(_))
        ));
        let config = StoreConfig::default().with_origin("http://localhost:8080");
        assert!(HttpTransport::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let origin = serve_once(Some(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 11\r\nconnection: close\r\n\r\n{\"ok\":true}",
        ))
        .await;
        let transport = HttpTransport::new(origin).unwrap();
        let response = transport
            .perform(get("/v1/ping", Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.as_deref(), Some("{\"ok\":true}"));
    }

    #[tokio::test]
    async fn test_error_status_is_a_failure_with_body() {
        let origin = serve_once(Some(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 4\r\nconnection: close\r\n\r\ngone",
        ))
        .await;
        let transport = HttpTransport::new(origin).unwrap();
        let failure = transport
            .perform(get("/v1/missing", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Status);
        assert_eq!(failure.status, Some(404));
        assert_eq!(failure.body.as_deref(), Some("gone"));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let origin = serve_once(None).await;
        let transport = HttpTransport::new(origin).unwrap();
        let failure = transport
            .perform(get("/v1/slow", Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Timeout);
    }
}
