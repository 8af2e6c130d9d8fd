//! Composition root: configuration, sources, lookups and cluster access

use apiary_core::{ApiaryConfig, Environment, FilesystemSource, Placeholders};
use apiary_engine::{ConfigLookup, EnvLayer, LayeredConfig, MapLayer};
use apiary_kube::{
    ApiClient, ClientOptions, HttpTransport, KubeTransport, OrchestratorOptions, RateLimiter,
    Transport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CliError, Result};

/// Configuration file picked up from the working directory
const DEFAULT_CONFIG: &str = "apiary.yaml";

pub struct Context {
    pub config: ApiaryConfig,
    pub source: Arc<FilesystemSource>,
}

impl Context {
    /// Load the configuration and open the bundle roots (`.` when none given)
    pub fn load(config: Option<&Path>, bundles: &[PathBuf]) -> Result<Self> {
        let config = match config {
            Some(path) => ApiaryConfig::load(path)?,
            None if Path::new(DEFAULT_CONFIG).is_file() => ApiaryConfig::load(Path::new(DEFAULT_CONFIG))?,
            None => ApiaryConfig::default(),
        };

        let roots = if bundles.is_empty() {
            vec![PathBuf::from(".")]
        } else {
            bundles.to_vec()
        };
        let source = FilesystemSource::open(&roots)?;
        if source.is_empty() {
            tracing::warn!(roots = ?roots, "no bundle found");
        }

        Ok(Self {
            config,
            source: Arc::new(source),
        })
    }

    /// Lookup chain: command line values, configuration placeholders, environment
    pub fn lookup(&self, overrides: &Placeholders) -> Arc<dyn ConfigLookup> {
        Arc::new(
            LayeredConfig::new()
                .push(overrides.iter().collect::<MapLayer>())
                .push(self.config.placeholders.iter().collect::<MapLayer>())
                .push(EnvLayer::from_process()),
        )
    }

    /// Snapshot of the process environment for `includeIf` evaluation
    pub fn environment(&self) -> Environment {
        std::env::vars().collect()
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions::from(&self.config)
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::with_system_clock(
            self.config.rate_limit.capacity,
            self.config.rate_limit.window,
        ))
    }

    /// `kube::Client` from kubeconfig or the cluster environment, pointed at
    /// `kube.api` when configured
    pub async fn kube_client(&self) -> Result<kube::Client> {
        let mut config = kube::Config::infer().await.map_err(|e| {
            CliError::config_with_help(
                format!("cannot load a Kubernetes configuration: {}", e),
                "set KUBECONFIG or kube.api in the configuration file",
            )
        })?;
        if let Some(api) = &self.config.kube.api {
            config.cluster_url = api
                .parse::<http::Uri>()
                .map_err(|e| CliError::config(format!("invalid kube.api '{}': {}", api, e)))?;
            config.accept_invalid_certs = self.config.kube.insecure;
        }
        kube::Client::try_from(config).map_err(|e| CliError::config(e.to_string()))
    }

    /// Plain HTTP transport when `kube.api` is set, kubeconfig otherwise
    pub async fn transport(&self) -> Result<Arc<dyn Transport>> {
        match &self.config.kube.api {
            Some(api) => {
                tracing::debug!(api = %api, "using plain HTTP transport");
                Ok(Arc::new(HttpTransport::new(
                    api,
                    self.config.kube.token.clone(),
                    self.config.kube.insecure,
                )?))
            }
            None => Ok(Arc::new(KubeTransport::new(self.kube_client().await?))),
        }
    }

    pub async fn client(&self) -> Result<Arc<ApiClient>> {
        Ok(Arc::new(ApiClient::new(
            self.transport().await?,
            self.limiter(),
            ClientOptions::from(&self.config),
        )))
    }
}
