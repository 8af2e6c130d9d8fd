//! Runtime configuration
//!
//! Loaded from a YAML file; every field has a default so an empty file is valid.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiaryConfig {
    #[serde(default)]
    pub kube: KubeConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default, rename = "await")]
    pub await_config: AwaitConfig,

    #[serde(default)]
    pub operator: OperatorConfig,

    /// Global placeholder layer
    #[serde(default)]
    pub placeholders: IndexMap<String, String>,

    #[serde(default)]
    pub labels: LabelConfig,
}

impl ApiaryConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CoreError::InvalidConfig {
                message: format!("configuration file not found: {}", path.display()),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rate_limit.capacity == 0 {
            return Err(CoreError::InvalidConfig {
                message: "rateLimit.capacity must be greater than zero".to_string(),
            });
        }
        if self.rate_limit.window.is_zero() {
            return Err(CoreError::InvalidConfig {
                message: "rateLimit.window must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(CoreError::InvalidConfig {
                message: "retry.maxAttempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Kubernetes API settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfig {
    /// Base URL; when unset the kubeconfig / in-cluster environment is used
    #[serde(default)]
    pub api: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bearer token sent with plain HTTP transport
    #[serde(default)]
    pub token: Option<String>,

    /// Skip TLS verification on plain HTTP transport
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default = "default_field_manager")]
    pub field_manager: String,

    /// `kind -> collection path template` overrides bypassing discovery
    #[serde(default)]
    pub resource_mapping: IndexMap<String, String>,

    #[serde(default = "default_propagation_policy")]
    pub propagation_policy: String,

    #[serde(default)]
    pub grace_period_seconds: Option<i64>,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api: None,
            namespace: default_namespace(),
            token: None,
            insecure: false,
            dry_run: false,
            field_manager: default_field_manager(),
            resource_mapping: IndexMap::new(),
            propagation_policy: default_propagation_policy(),
            grace_period_seconds: None,
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_field_manager() -> String {
    "apiary".to_string()
}

fn default_propagation_policy() -> String {
    "Foreground".to_string()
}

/// Outbound call budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window: default_window(),
        }
    }
}

fn default_capacity() -> u32 {
    100
}

fn default_window() -> Duration {
    Duration::from_secs(1)
}

/// Retry budget for transient API failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(10)
}

/// Default polling for await conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitConfig {
    #[serde(default = "default_await_interval", with = "humantime_serde")]
    pub interval: Duration,

    #[serde(default = "default_await_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AwaitConfig {
    fn default() -> Self {
        Self {
            interval: default_await_interval(),
            timeout: default_await_timeout(),
        }
    }
}

fn default_await_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_await_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Custom resource watched by the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default = "default_plural")]
    pub plural: String,

    /// Watched namespace; the kube namespace when unset
    #[serde(default)]
    pub namespace: Option<String>,

    /// File persisting the last seen resource version
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    #[serde(default = "default_reconnect_backoff", with = "humantime_serde")]
    pub reconnect_backoff: Duration,

    #[serde(default = "default_max_reconnect_backoff", with = "humantime_serde")]
    pub max_reconnect_backoff: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            group: default_group(),
            version: default_version(),
            kind: default_kind(),
            plural: default_plural(),
            namespace: None,
            state_file: None,
            reconnect_backoff: default_reconnect_backoff(),
            max_reconnect_backoff: default_max_reconnect_backoff(),
        }
    }
}

fn default_group() -> String {
    "apiary.io".to_string()
}

fn default_version() -> String {
    "v1".to_string()
}

fn default_kind() -> String {
    "Alveolus".to_string()
}

fn default_plural() -> String {
    "alveoli".to_string()
}

fn default_reconnect_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_max_reconnect_backoff() -> Duration {
    Duration::from_secs(30)
}

/// Labels injected into applied objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelConfig {
    #[serde(default = "default_true")]
    pub inject_timestamp: bool,

    #[serde(default = "default_true")]
    pub inject_metadata: bool,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            inject_timestamp: true,
            inject_metadata: true,
        }
    }
}

fn default_true() -> bool {
    true
}
