//! Run handler executing apply/delete plans for reconcile events

use apiary_core::{Environment, ManifestSource, PlanRequest};
use apiary_engine::{ConfigLookup, LayeredConfig, MapLayer};
use apiary_kube::{
    ApiClient, ClientOptions, Orchestrator, OrchestratorOptions, RateLimiter, ResourceClient,
    Transport,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{OperatorError, Result};
use crate::event::{ReconcileEvent, RunArgs};
use crate::reconciler::RunHandler;

/// Resolves the plan described by an event's args and runs it.
///
/// Clients are cached per target namespace and share one transport and one
/// rate limiter, so concurrent runs draw from a single request budget.
pub struct OrchestratorHandler {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    client_options: ClientOptions,
    source: Arc<dyn ManifestSource>,
    lookup: Arc<dyn ConfigLookup>,
    options: OrchestratorOptions,
    environment: Environment,
    clients: Mutex<HashMap<String, Arc<ApiClient>>>,
}

impl OrchestratorHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        client_options: ClientOptions,
        source: Arc<dyn ManifestSource>,
        lookup: Arc<dyn ConfigLookup>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            transport,
            limiter,
            client_options,
            source,
            lookup,
            options,
            environment: Environment::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Environment used to evaluate `includeIf` blocks
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    fn client_for(&self, namespace: Option<&str>) -> Arc<ApiClient> {
        let namespace = namespace.unwrap_or(&self.client_options.namespace).to_string();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients
            .entry(namespace.clone())
            .or_insert_with(|| {
                let options = ClientOptions {
                    namespace,
                    ..self.client_options.clone()
                };
                Arc::new(ApiClient::new(self.transport.clone(), self.limiter.clone(), options))
            })
            .clone()
    }
}

#[async_trait]
impl RunHandler for OrchestratorHandler {
    async fn handle(&self, event: ReconcileEvent, cancel: CancellationToken) -> Result<()> {
        let args = RunArgs::parse(&event.args)?;
        let request = PlanRequest {
            alveolus: args.alveolus.clone(),
            version: args.version.clone(),
            overrides: args.placeholders.clone(),
            excludes: args.excludes.clone(),
            environment: self.environment.clone(),
        };
        let plan = request.resolve(self.source.as_ref())?;

        // Without a root, overrides can only reach descriptors as a global layer
        let lookup: Arc<dyn ConfigLookup> = if args.alveolus.is_none() && !args.placeholders.is_empty() {
            Arc::new(
                LayeredConfig::new()
                    .push(args.placeholders.iter().collect::<MapLayer>())
                    .push(self.lookup.clone()),
            )
        } else {
            self.lookup.clone()
        };

        let client: Arc<dyn ResourceClient> = self.client_for(args.namespace.as_deref());
        let orchestrator = Orchestrator::new(client, self.source.clone(), lookup, self.options.clone());
        let report = orchestrator
            .run(event.event_type.command(), &plan, &cancel)
            .await;

        tracing::info!(
            resource = %event.name,
            command = %report.command,
            execution_id = %report.execution_id,
            summary = %report.summary(),
            "run finished"
        );

        match report.failure {
            None => Ok(()),
            Some(failure) => Err(OperatorError::RunFailed {
                resource: event.name,
                entry: failure.entry,
                message: failure.error.to_string(),
            }),
        }
    }
}
