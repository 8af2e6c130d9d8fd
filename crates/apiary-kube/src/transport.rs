//! Raw HTTP exchange with the API server
//!
//! [`Transport`] is the seam between the API client and the wire:
//! - [`HttpTransport`]: plain `reqwest` against a base URL (proxies, test servers)
//! - [`KubeTransport`]: the `kube` client, configured from kubeconfig or in-cluster

use async_trait::async_trait;
use http::Method;
use std::time::Duration;

use crate::error::{KubeError, Result};

pub const JSON: &str = "application/json";
pub const MERGE_PATCH: &str = "application/merge-patch+json";

/// A request relative to the API server root
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path and query, starting with `/`
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub content_type: &'static str,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            content_type: JSON,
        }
    }

    pub fn with_body(method: Method, path: impl Into<String>, body: Vec<u8>, content_type: &'static str) -> Self {
        Self {
            method,
            path: path.into(),
            body: Some(body),
            content_type,
        }
    }
}

/// Status and body of an answered request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, in seconds
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the API server.
///
/// Non-2xx answers are returned as responses; only connection-level failures
/// are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// `reqwest`-based transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base: &str, token: Option<String>, insecure: bool) -> Result<Self> {
        let parsed = url::Url::parse(base)
            .map_err(|e| KubeError::InvalidConfig(format!("invalid API URL '{}': {}", base, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(KubeError::InvalidConfig(format!(
                "unsupported API URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| KubeError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base, request.path);
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .header(reqwest::header::ACCEPT, JSON);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, request.content_type)
                .body(body);
        }

        let response = builder.send().await.map_err(|e| KubeError::Transport {
            message: format!("{} {}: {}", request.method, request.path, e),
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(|e| KubeError::Transport {
            message: format!("reading response body: {}", e),
        })?;

        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

/// Transport over a configured `kube::Client`
#[derive(Clone)]
pub struct KubeTransport {
    client: kube::Client,
}

impl KubeTransport {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Infer the configuration from kubeconfig or the in-cluster environment
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(kube::Client::try_default().await?))
    }

    pub fn client(&self) -> &kube::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for KubeTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let http_request = http::Request::builder()
            .method(request.method.clone())
            .uri(request.path.as_str())
            .header(http::header::ACCEPT, JSON)
            .header(http::header::CONTENT_TYPE, request.content_type)
            .body(request.body.unwrap_or_default())
            .map_err(|e| KubeError::InvalidResource(format!("invalid request: {}", e)))?;

        match self.client.request_text(http_request).await {
            Ok(body) => Ok(ApiResponse {
                status: 200,
                body,
                retry_after: None,
            }),
            Err(kube::Error::Api(response)) => Ok(ApiResponse {
                status: response.code,
                body: response.message,
                retry_after: None,
            }),
            Err(e) => Err(KubeError::Transport {
                message: format!("{} {}: {}", request.method, request.path, e),
            }),
        }
    }
}
