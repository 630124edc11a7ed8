//! llm-deploy - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use llm_deploy::{CandleLoader, ManagerConfig, ModelManager, api, metrics};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "llm-deploy")]
#[command(about = "Single-model LLM deployment service", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override API port
    #[arg(long)]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
    }

    tracing::info!("Starting llm-deploy");

    // Load configuration
    let mut config = ManagerConfig::load(cli.config)?;

    // CLI overrides
    if let Some(port) = cli.port {
        config.api_port = port;
    }

    config.validate()?;

    tracing::info!(
        host = %config.host,
        api_port = config.api_port,
        cache_dir = ?config.cache_dir,
        hf_token = config.hf_token.is_some(),
        preload = ?config.preload.as_ref().map(|spec| &spec.identifier),
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;
    metrics::set_model_loaded(false);

    let loader = Arc::new(CandleLoader::new());
    let manager = Arc::new(ModelManager::from_config(&config, loader));

    // Preload in the background so the API is reachable during the download
    if let Some(spec) = config.preload.clone() {
        let manager = manager.clone();
        tokio::spawn(async move {
            let identifier = spec.identifier.clone();
            if let Err(e) = manager.deploy(spec).await {
                tracing::error!(
                    model = %identifier,
                    error = %e,
                    "Failed to preload model"
                );
            }
        });
    }

    // Setup API
    let app_state = api::AppState {
        manager: manager.clone(),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = format!("{}:{}", config.host, config.api_port);
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server to {addr}"))?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutting down...");

    match manager.undeploy().await {
        Ok(outcome) => tracing::info!(
            model = %outcome.identifier,
            freed_bytes = ?outcome.freed_bytes,
            "Released model"
        ),
        Err(llm_deploy::ManagerError::NothingToUndeploy) => {}
        Err(e) => tracing::error!(error = %e, "Failed to release model during shutdown"),
    }

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
