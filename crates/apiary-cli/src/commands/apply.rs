//! Apply command - resolve a plan and apply it in dependency order

use apiary_kube::{Command, Orchestrator};
use console::style;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::Selection;
use crate::context::Context;
use crate::display;
use crate::error::{CliError, Result};

/// Cluster-facing flags shared by `apply` and `delete`
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub namespace: Option<String>,
    pub dry_run: bool,
}

/// Run the apply command
pub async fn run(config: Option<&Path>, selection: &Selection, target: &Target) -> Result<()> {
    run_pipeline(config, selection, target, Command::Apply).await
}

/// Resolve, render and drive a plan against the cluster
pub(crate) async fn run_pipeline(
    config: Option<&Path>,
    selection: &Selection,
    target: &Target,
    command: Command,
) -> Result<()> {
    let mut ctx = Context::load(config, &selection.bundles)?;
    if let Some(namespace) = &target.namespace {
        ctx.config.kube.namespace = namespace.clone();
    }
    if target.dry_run {
        ctx.config.kube.dry_run = true;
    }

    let plan = selection.request(&ctx)?.resolve(ctx.source.as_ref())?;
    display::print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }
    if ctx.config.kube.dry_run {
        println!(
            "{} Server-side dry run, nothing will be persisted",
            style("→").blue().bold()
        );
    }

    let client = ctx.client().await?;
    let orchestrator = Orchestrator::new(
        client,
        ctx.source.clone(),
        ctx.lookup(&selection.overrides()?),
        ctx.orchestrator_options(),
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current request");
            on_signal.cancel();
        }
    });

    let report = orchestrator.run(command, &plan, &cancel).await;
    println!();
    display::print_report(&report);

    match report.failure {
        Some(failure) => Err(CliError::from_run_failure(failure.entry, failure.error)),
        None => Ok(()),
    }
}
