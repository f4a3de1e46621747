mod cli;

use argo_app_gate::{
    application::RefreshType,
    context::Context,
    errors::Error,
    normalize::normalize_application_spec,
    permissions::{validate_permissions, ClusterRegistry},
    project::get_app_project,
    refresh::{refresh_app, wait_for_refresh},
    values::resolve_helm_values,
};
use clap::Parser;
use kube::api::ResourceExt;
use lazy_static::lazy_static;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::EnvFilter, fmt};

lazy_static! {
    static ref DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    // setup logging
    let level_filter = cli.log_level;
    let filter_layer = EnvFilter::from_default_env()
        .add_directive(level_filter.into())
        .add_directive("hyper=off".parse().unwrap()) // this crate generates tracing events we don't care about
        .add_directive("tower=off".parse().unwrap()); // this crate generates tracing events we don't care about
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let ctx = Context::new(cli.kubeconfig.as_deref(), &cli.namespace).await?;

    match cli.command {
        cli::Command::Refresh {
            app,
            hard,
            wait,
            timeout,
        } => refresh(&ctx, &app, hard, wait, timeout).await?,
        cli::Command::Check { app } => check(&ctx, &app).await?,
    }

    Ok(())
}

async fn refresh(
    ctx: &Context,
    name: &str,
    hard: bool,
    wait: bool,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let apps = ctx.applications_api();
    let refresh_type = if hard {
        RefreshType::Hard
    } else {
        RefreshType::Normal
    };
    refresh_app(&apps, name, refresh_type).await?;
    if !wait {
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, no longer waiting for the refresh");
            on_signal.cancel();
        }
    });

    let timeout = match timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(*DEFAULT_WAIT_TIMEOUT),
    };
    let app = wait_for_refresh(&apps, name, timeout, &cancel).await?;
    info!(application = app.name_any(), "refresh processed by the controller");

    Ok(())
}

async fn check(ctx: &Context, name: &str) -> anyhow::Result<()> {
    let apps = ctx.applications_api();
    let app = apps
        .get(name)
        .await
        .map_err(|e| Error::from_kube(e, "Application", name))?;
    let spec = normalize_application_spec(&app.spec);

    let projects = ctx.project_snapshot().await?;
    let project = get_app_project(&spec, &projects, ctx.namespace())?;
    let clusters = ctx.cluster_registry();
    let conditions =
        validate_permissions(&spec, &project, Some(&clusters as &dyn ClusterRegistry)).await?;
    if !conditions.is_empty() {
        for condition in &conditions {
            println!("{:?}: {}", condition.type_, condition.message);
        }
        anyhow::bail!("application '{name}' is not allowed to be synced");
    }

    let values = resolve_helm_values(&ctx.client(), ctx.namespace(), &spec).await?;
    println!("Application '{name}' is allowed to be synced, Helm values:");
    print!("{values}");

    Ok(())
}
