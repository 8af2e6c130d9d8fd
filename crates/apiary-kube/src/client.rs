//! Rate-limited Kubernetes API client
//!
//! Key features:
//! - Discovery of REST paths, cached for the client lifetime
//! - Idempotent apply: GET, then merge PATCH when present or POST when absent
//! - Every HTTP call waits on the shared [`RateLimiter`]
//! - Bounded exponential backoff on network errors, 5xx and 429

use async_trait::async_trait;
use http::Method;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use apiary_core::{ApiaryConfig, RetryConfig};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;

use crate::discovery::{self, DiscoveryCache, ResourceInfo, api_prefix};
use crate::error::{KubeError, Result};
use crate::rate_limit::RateLimiter;
use crate::resource::ResourceRef;
use crate::transport::{ApiRequest, ApiResponse, JSON, MERGE_PATCH, Transport};

/// Result of an apply call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Configured,
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Configured => write!(f, "configured"),
        }
    }
}

/// Result of a delete call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Operations the orchestrator needs from the cluster
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Create or update an object
    async fn apply(&self, object: &Value) -> Result<ApplyOutcome>;

    /// Current state of an object, `None` when absent
    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>>;

    async fn delete(&self, resource: &ResourceRef) -> Result<DeleteOutcome>;
}

/// Client behaviour settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub namespace: String,
    pub dry_run: bool,
    pub field_manager: String,
    pub propagation_policy: String,
    pub grace_period_seconds: Option<i64>,
    pub retry: RetryConfig,
    /// `kind -> collection path` overrides
    pub resource_mapping: IndexMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ApiaryConfig::default())
    }
}

impl From<&ApiaryConfig> for ClientOptions {
    fn from(config: &ApiaryConfig) -> Self {
        Self {
            namespace: config.kube.namespace.clone(),
            dry_run: config.kube.dry_run,
            field_manager: config.kube.field_manager.clone(),
            propagation_policy: config.kube.propagation_policy.clone(),
            grace_period_seconds: config.kube.grace_period_seconds,
            retry: config.retry.clone(),
            resource_mapping: config.kube.resource_mapping.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOptions<'a> {
    kind: &'static str,
    api_version: &'static str,
    propagation_policy: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    grace_period_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dry_run: Vec<&'static str>,
}

/// Kubernetes API client over a [`Transport`]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    options: ClientOptions,
    discovery: DiscoveryCache,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>, options: ClientOptions) -> Self {
        let discovery = DiscoveryCache::new(options.resource_mapping.clone());
        Self {
            transport,
            limiter,
            options,
            discovery,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Forget every discovered endpoint
    pub fn clear_cache(&self) {
        self.discovery.clear();
    }

    // ========== Discovery ==========

    /// Resolve the REST location of an apiVersion/kind
    pub async fn resolve(&self, api_version: &str, kind: &str) -> Result<ResourceInfo> {
        if let Some(info) = self.discovery.mapped(kind) {
            return Ok(info);
        }
        if let Some(info) = self.discovery.get(api_version, kind) {
            return Ok(info);
        }

        let list = match self.discovery.list(api_version) {
            Some(list) => list,
            None => {
                let list = self.fetch_resource_list(api_version).await?;
                self.discovery.insert_list(api_version, list.clone());
                list
            }
        };

        let info = list
            .as_ref()
            .and_then(|l| discovery::from_resource_list(l, api_version, kind))
            .unwrap_or_else(|| {
                tracing::debug!(api_version, kind, "kind not advertised by the server, guessing its endpoint");
                discovery::fallback(api_version, kind)
            });
        self.discovery.insert(api_version, kind, info.clone());
        Ok(info)
    }

    async fn fetch_resource_list(&self, api_version: &str) -> Result<Option<APIResourceList>> {
        let request = ApiRequest::get(api_prefix(api_version));
        let response = self.execute(&request).await?;
        match response.status {
            404 => Ok(None),
            _ if response.is_success() => Ok(Some(serde_json::from_str(&response.body)?)),
            _ => Err(http_error(&request, &response)),
        }
    }

    // ========== Requests ==========

    /// Send a request through the rate limiter, retrying transient failures.
    ///
    /// Returns any non-retryable response, including 4xx, for the caller to interpret.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let retry = &self.options.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut backoff = retry.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.limiter.acquire().await;

            let (error, hint) = match self.transport.send(request.clone()).await {
                Ok(response) if response.status == 429 || response.status >= 500 => {
                    let hint = response.retry_after;
                    (http_error(request, &response), hint)
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => (e, None),
                Err(e) => return Err(e),
            };

            if attempt >= max_attempts {
                return Err(KubeError::RetriesExhausted {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            // a server hint never exceeds the configured ceiling
            let wait = hint.map(|h| h.min(retry.max_backoff)).unwrap_or(backoff);
            tracing::warn!(
                attempt,
                max_attempts,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "transient API failure, retrying"
            );
            tokio::time::sleep(wait).await;
            backoff = next_backoff(backoff, retry.max_backoff);
        }
    }

    fn query(&self, with_field_manager: bool) -> String {
        let mut params = Vec::new();
        if with_field_manager {
            params.push(format!("fieldManager={}", self.options.field_manager));
        }
        if self.options.dry_run {
            params.push("dryRun=All".to_string());
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }

    async fn locate(&self, resource: &ResourceRef) -> Result<(ResourceInfo, String)> {
        let info = self.resolve(&resource.api_version, &resource.kind).await?;
        let namespace = resource
            .namespace
            .clone()
            .unwrap_or_else(|| self.options.namespace.clone());
        Ok((info, namespace))
    }

    async fn patch(&self, path: &str, body: Vec<u8>) -> Result<ApiResponse> {
        let request = ApiRequest::with_body(
            Method::PATCH,
            format!("{}{}", path, self.query(true)),
            body,
            MERGE_PATCH,
        );
        let response = self.execute(&request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(http_error(&request, &response))
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn http_error(request: &ApiRequest, response: &ApiResponse) -> KubeError {
    let message = serde_json::from_str::<Value>(&response.body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| response.body.chars().take(512).collect());
    KubeError::Http {
        status: response.status,
        method: request.method.to_string(),
        path: request.path.clone(),
        message,
    }
}

#[async_trait]
impl ResourceClient for ApiClient {
    async fn apply(&self, object: &Value) -> Result<ApplyOutcome> {
        let resource = ResourceRef::from_object(object)?;
        let (info, namespace) = self.locate(&resource).await?;

        let mut object = object.clone();
        if info.is_namespaced()
            && resource.namespace.is_none()
            && let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut)
        {
            metadata.insert("namespace".to_string(), Value::String(namespace.clone()));
        }
        let body = serde_json::to_vec(&object)?;
        let item_path = info.item_path(&namespace, &resource.name);

        let existing = self.execute(&ApiRequest::get(item_path.clone())).await?;
        match existing.status {
            200..=299 => {
                self.patch(&item_path, body).await?;
                tracing::info!(resource = %resource, "configured");
                Ok(ApplyOutcome::Configured)
            }
            404 => {
                let request = ApiRequest::with_body(
                    Method::POST,
                    format!("{}{}", info.collection_path(&namespace), self.query(true)),
                    body.clone(),
                    JSON,
                );
                let created = self.execute(&request).await?;
                if created.is_success() {
                    tracing::info!(resource = %resource, "created");
                    return Ok(ApplyOutcome::Created);
                }
                if created.status == 409 {
                    tracing::debug!(resource = %resource, "created concurrently, patching instead");
                    self.patch(&item_path, body).await?;
                    return Ok(ApplyOutcome::Configured);
                }
                Err(http_error(&request, &created))
            }
            _ => Err(http_error(&ApiRequest::get(item_path), &existing)),
        }
    }

    async fn get(&self, resource: &ResourceRef) -> Result<Option<Value>> {
        let (info, namespace) = self.locate(resource).await?;
        let request = ApiRequest::get(info.item_path(&namespace, &resource.name));
        let response = self.execute(&request).await?;
        match response.status {
            404 => Ok(None),
            _ if response.is_success() => Ok(Some(serde_json::from_str(&response.body)?)),
            _ => Err(http_error(&request, &response)),
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> Result<DeleteOutcome> {
        let (info, namespace) = self.locate(resource).await?;
        let options = DeleteOptions {
            kind: "DeleteOptions",
            api_version: "v1",
            propagation_policy: &self.options.propagation_policy,
            grace_period_seconds: self.options.grace_period_seconds,
            dry_run: if self.options.dry_run { vec!["All"] } else { Vec::new() },
        };
        let request = ApiRequest::with_body(
            Method::DELETE,
            format!("{}{}", info.item_path(&namespace, &resource.name), self.query(false)),
            serde_json::to_vec(&options)?,
            JSON,
        );
        let response = self.execute(&request).await?;
        match response.status {
            404 => {
                tracing::debug!(resource = %resource, "already deleted");
                Ok(DeleteOutcome::NotFound)
            }
            _ if response.is_success() => {
                tracing::info!(resource = %resource, "deleted");
                Ok(DeleteOutcome::Deleted)
            }
            _ => Err(http_error(&request, &response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpTransport;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> ClientOptions {
        ClientOptions {
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
            },
            ..ClientOptions::default()
        }
    }

    fn client(server: &MockServer, options: ClientOptions) -> ApiClient {
        let transport = HttpTransport::new(&server.uri(), None, false).unwrap();
        let limiter = RateLimiter::with_system_clock(1000, Duration::from_secs(1));
        ApiClient::new(Arc::new(transport), Arc::new(limiter), options)
    }

    fn configmap() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "web-cfg"},
            "data": {"a": "b"}
        })
    }

    async fn mount_core_discovery(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "APIResourceList",
                "groupVersion": "v1",
                "resources": [
                    {"name": "configmaps", "singularName": "configmap", "namespaced": true, "kind": "ConfigMap", "verbs": ["get", "create", "patch", "delete"]},
                    {"name": "namespaces", "singularName": "namespace", "namespaced": false, "kind": "Namespace", "verbs": ["get", "create"]}
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_apply_creates_missing_resource() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/default/configmaps"))
            .and(query_param("fieldManager", "apiary"))
            .and(body_partial_json(json!({"metadata": {"namespace": "default"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, options());
        assert_eq!(client.apply(&configmap()).await.unwrap(), ApplyOutcome::Created);
    }

    #[tokio::test]
    async fn test_apply_patches_existing_resource() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(configmap()))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(configmap()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, options());
        assert_eq!(client.apply(&configmap()).await.unwrap(), ApplyOutcome::Configured);
    }

    #[tokio::test]
    async fn test_apply_conflict_on_create_retries_as_patch() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({"message": "already exists"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, options());
        assert_eq!(client.apply(&configmap()).await.unwrap(), ApplyOutcome::Configured);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "forbidden"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server, options());
        let err = client.apply(&configmap()).await.unwrap_err();
        match err {
            KubeError::Http { status, message, .. } => {
                assert_eq!(status, 403);
                assert_eq!(message, "forbidden");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_server_errors_retried_then_exhausted() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = client(&server, options());
        let resource = ResourceRef::from_object(&configmap()).unwrap();
        let err = client.get(&resource).await.unwrap_err();
        assert!(matches!(err, KubeError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(configmap()))
            .mount(&server)
            .await;

        let client = client(&server, options());
        let resource = ResourceRef::from_object(&configmap()).unwrap();
        let current = client.get(&resource).await.unwrap().unwrap();
        assert_eq!(current["data"]["a"], "b");
    }

    #[tokio::test]
    async fn test_retry_after_capped_by_max_backoff() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "86400"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(configmap()))
            .mount(&server)
            .await;

        let client = client(&server, options());
        let resource = ResourceRef::from_object(&configmap()).unwrap();
        let started = std::time::Instant::now();
        let current = tokio::time::timeout(Duration::from_secs(10), client.get(&resource))
            .await
            .expect("Retry-After must be capped")
            .unwrap();

        assert!(current.is_some());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server, options());
        let resource = ResourceRef::from_object(&configmap()).unwrap();
        assert!(client.get(&resource).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_sends_options() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/namespaces/default/configmaps/web-cfg"))
            .and(query_param("dryRun", "All"))
            .and(body_partial_json(json!({
                "propagationPolicy": "Foreground",
                "gracePeriodSeconds": 5,
                "dryRun": ["All"]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut options = options();
        options.dry_run = true;
        options.grace_period_seconds = Some(5);
        let client = client(&server, options);
        let resource = ResourceRef::from_object(&configmap()).unwrap();
        assert_eq!(client.delete(&resource).await.unwrap(), DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let server = MockServer::start().await;
        mount_core_discovery(&server).await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server, options());
        let resource = ResourceRef::from_object(&configmap()).unwrap();
        assert_eq!(client.delete(&resource).await.unwrap(), DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_discovery_cached_until_cleared() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/apps/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "groupVersion": "apps/v1",
                "resources": [
                    {"name": "deployments", "singularName": "deployment", "namespaced": true, "kind": "Deployment", "verbs": ["get"]}
                ]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&server, options());
        let first = client.resolve("apps/v1", "Deployment").await.unwrap();
        let second = client.resolve("apps/v1", "Deployment").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.item_path("ns", "web"), "/apis/apps/v1/namespaces/ns/deployments/web");

        client.clear_cache();
        client.resolve("apps/v1", "Deployment").await.unwrap();
    }

    #[tokio::test]
    async fn test_discovery_falls_back_on_unknown_group() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/acme.io/v1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client(&server, options());
        let info = client.resolve("acme.io/v1", "Widget").await.unwrap();
        assert_eq!(info.collection_path("apps"), "/apis/acme.io/v1/namespaces/apps/widgets");
    }

    #[tokio::test]
    async fn test_resource_mapping_bypasses_discovery() {
        let server = MockServer::start().await;
        let mut options = options();
        options
            .resource_mapping
            .insert("Widget".to_string(), "/custom/{namespace}/widgetz".to_string());
        let client = client(&server, options);
        let info = client.resolve("acme.io/v1", "Widget").await.unwrap();
        assert_eq!(info.item_path("apps", "w1"), "/custom/apps/widgetz/w1");
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[test]
    fn test_backoff_is_bounded() {
        let max = Duration::from_millis(300);
        let mut current = Duration::from_millis(100);
        current = next_backoff(current, max);
        assert_eq!(current, Duration::from_millis(200));
        current = next_backoff(current, max);
        assert_eq!(current, max);
        assert_eq!(next_backoff(current, max), max);
    }
}
