mod archive;
mod config;
mod forge;
mod health;
mod http;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::archive::ExclusionList;
use crate::config::Config;
use crate::forge::rate_limit::RateLimitState;
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "repozip", about = "Browse GitHub repositories and download branches as ZIP")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/repozip/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: MetricsRegistry,
    /// Plain client for health probes; the forge keeps its own.
    pub http_client: reqwest::Client,
    /// GitHub API backend.
    pub forge: Arc<dyn forge::ForgeBackend>,
    /// Upstream API rate-limit state shared with the forge backend.
    pub rate_limit: RateLimitState,
    /// Names left out of every archive.
    pub exclusions: ExclusionList,
}

/// Assemble [`AppState`] from a loaded configuration.
pub fn build_state(config: Arc<Config>) -> Result<AppState> {
    let http_client = reqwest::Client::builder()
        .user_agent(config.github.user_agent.as_str())
        .timeout(Duration::from_secs(config.github.request_timeout_secs))
        .build()
        .context("failed to build reqwest client")?;

    let rate_limit = RateLimitState::new();
    let forge: Arc<dyn forge::ForgeBackend> =
        Arc::from(forge::build_backend(&config, rate_limit.clone())?);
    let exclusions = ExclusionList::new(&config.archive.excluded_files);

    Ok(AppState {
        config,
        metrics: MetricsRegistry::new(),
        http_client,
        forge,
        rate_limit,
        exclusions,
    })
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let listen_addr: std::net::SocketAddr = state
        .config
        .server
        .http_listen
        .parse()
        .context("invalid http_listen address")?;

    let app = http::handler::create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = Arc::new(config::load_config(&cli.config)?);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting repozip");
    if config.github.token().is_none() {
        tracing::warn!(
            token_env = %config.github.token_env,
            "no GitHub token configured, anonymous rate limits apply"
        );
    }

    // ---- App state ----
    let state = build_state(Arc::clone(&config))?;
    tracing::info!(
        user = %config.github.username,
        batch_size = config.archive.batch_size,
        "GitHub backend initialised"
    );

    run_http_server(state).await?;

    tracing::info!("repozip shut down cleanly");
    Ok(())
}
