//! capstan daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use capstan_core::{Engine, RuntimeAdapter, VcsAdapter};
use capstan_daemon::runtime_docker::DockerCli;
use capstan_daemon::vcs_git::GitCli;
use capstan_daemon::{config_file, http};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Continuous deployment control plane: watches source repositories,
/// rebuilds container images on new commits, and rolls the running
/// container fleet.
#[derive(Debug, Parser)]
#[command(name = "capstan-daemon", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "/etc/capstan/config.toml")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config_file::load(&cli.config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: config_file::DaemonConfig) -> Result<()> {
    let vcs: Arc<dyn VcsAdapter> = Arc::new(GitCli::new(config.subprocess_timeout()));
    let container_runtime: Arc<dyn RuntimeAdapter> =
        Arc::new(DockerCli::new(config.subprocess_timeout()));
    let (engine, handle) = Engine::new(
        &config.workdir_root,
        &config.projects,
        config.engine_settings(),
        vcs,
        container_runtime,
    )?;

    let webhook_listener = tokio::net::TcpListener::bind(config.webhook_addr)
        .await
        .with_context(|| format!("binding webhook receiver to {}", config.webhook_addr))?;
    info!(addr = %config.webhook_addr, "webhook receiver listening");
    let webhook_router = http::webhook_router(handle.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(webhook_listener, webhook_router).await {
            error!(error = %err, "webhook server failed");
        }
    });

    let status_listener = tokio::net::TcpListener::bind(config.status_addr)
        .await
        .with_context(|| format!("binding status surface to {}", config.status_addr))?;
    info!(addr = %config.status_addr, "status surface listening");
    let status_router = http::status_router(handle.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(status_listener, status_router).await {
            error!(error = %err, "status server failed");
        }
    });

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_handle.shutdown();
        }
    });

    engine.run().await.context("engine terminated abnormally")
}
