//! sitehist server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use sitehist_build::SitePipeline;
use sitehist_cache::PeerPicker;
use sitehist_core::config::AppConfig;
use sitehist_server::{AppState, create_router};
use sitehist_storage::ArtifactStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sitehist - builds static sites from repository commits and serves them
#[derive(Parser, Debug)]
#[command(name = "sitehistd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SITEHIST_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("sitehist v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    // Check for SITEHIST_ environment variables (excluding SITEHIST_CONFIG which is just the path)
    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("SITEHIST_") && key != "SITEHIST_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: sitehistd --config /path/to/config.toml\n  \
             2. Environment variables: SITEHIST_SERVER__DOMAIN=sites.example \
             SITEHIST_STORAGE__TYPE=filesystem SITEHIST_STORAGE__PATH=/var/lib/sitehist sitehistd\n\n\
             Set SITEHIST_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SITEHIST_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    // Register Prometheus metrics
    sitehist_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = sitehist_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Verify storage connectivity before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let artifacts = Arc::new(ArtifactStore::new(storage, config.cache.compress_min_size));

    // Build pipeline: archive fetch, generator, artifact store
    let pipeline = SitePipeline::from_config(&config.build, artifacts.clone())
        .context("failed to initialize build pipeline")?;
    tracing::info!(
        work_dir = %config.build.work_dir.display(),
        "Build pipeline initialized"
    );

    // Fleet membership
    let peers = PeerPicker::from_config(&config.peers).context("failed to initialize peers")?;
    match &peers {
        Some(picker) => tracing::info!(
            self_url = picker.self_url(),
            peers = picker.len(),
            "Peer forwarding enabled"
        ),
        None => tracing::info!("Running as a single node"),
    }

    // Create application state
    let state = AppState::new(config.clone(), artifacts, Arc::new(pipeline), peers);

    // Create router
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!(domain = %config.server.domain, "Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolve on Ctrl-C. In-flight builds are abandoned with the process.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
