//! Operator command - watch the custom resource and reconcile each event

use apiary_kube::{ClientOptions, HttpTransport, KubeTransport, Transport};
use apiary_operator::{
    Backoff, KubeWatchSource, OrchestratorHandler, Reconciler, ResourceVersionStore, WatchLoop,
};
use console::style;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::error::Result;

/// Run the operator until interrupted
pub async fn run(ctx: Context) -> Result<()> {
    let kube_client = ctx.kube_client().await?;
    let transport: Arc<dyn Transport> = match &ctx.config.kube.api {
        Some(api) => Arc::new(HttpTransport::new(
            api,
            ctx.config.kube.token.clone(),
            ctx.config.kube.insecure,
        )?),
        None => Arc::new(KubeTransport::new(kube_client.clone())),
    };

    let handler = OrchestratorHandler::new(
        transport,
        ctx.limiter(),
        ClientOptions::from(&ctx.config),
        ctx.source.clone(),
        ctx.lookup(&Default::default()),
        ctx.orchestrator_options(),
    )
    .with_environment(ctx.environment());

    let cancel = CancellationToken::new();
    let reconciler = Arc::new(Reconciler::new(Arc::new(handler), cancel.clone()));

    let operator = &ctx.config.operator;
    let namespace = operator
        .namespace
        .clone()
        .unwrap_or_else(|| ctx.config.kube.namespace.clone());
    let source = KubeWatchSource::new(
        kube_client,
        &namespace,
        &operator.group,
        &operator.version,
        &operator.kind,
        &operator.plural,
    );
    let watch = WatchLoop::new(
        Arc::new(source),
        reconciler,
        ResourceVersionStore::new(operator.state_file.clone()),
        Backoff {
            initial: operator.reconnect_backoff,
            max: operator.max_reconnect_backoff,
        },
    );

    println!(
        "{} Watching {}.{}/{} in namespace {}",
        style("→").blue().bold(),
        operator.plural,
        operator.group,
        operator.version,
        style(&namespace).cyan()
    );

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            on_signal.cancel();
        }
    });

    watch.run(cancel).await?;
    println!("{} Operator stopped", style("✓").green().bold());
    Ok(())
}
