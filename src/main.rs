//! Analog ensemble forecasting service
//!
//! This is the main entry point for the application.

use analog_ensemble::{
    config::{self, CorpusSource, Settings},
    corpus::{CorpusLoader, DirectoryCorpusLoader, HashEmbedder, SyntheticCorpusLoader},
    web::{create_router, AppState},
    ForecastService,
};
use anyhow::{anyhow, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const ENV_HELP: &str = "\
Environment variables:
    ANALOG_GENERAL__DEBUG                  Enable debug logging (true/false)
    ANALOG_SERVER__PORT                    Server port
    ANALOG_SERVER__BIND_ADDRESS            Bind address
    ANALOG_POOL__CAPACITY                  Number of pooled search engines
    ANALOG_RESILIENCE__FALLBACK_ENABLED    Allow labeled fallback forecasts
    RUST_LOG                               Log filter (overrides the debug flag)";

/// Analog ensemble forecasting service
#[derive(Parser, Debug)]
#[command(name = "analog-ensemble", version, about, after_help = ENV_HELP)]
struct Args {
    /// Path to settings.yml; searched for in the usual places when omitted
    #[arg(short, long, env = "ANALOG_SETTINGS_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Settings come first so the debug flag can pick the default log level
    let settings_path = config::locate_settings(args.config);
    let settings = Settings::load(settings_path.as_deref())?;

    let default_level = if settings.general.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting analog-ensemble v{}", analog_ensemble::VERSION);
    match &settings_path {
        Some(path) => info!("Loaded settings from: {}", path.display()),
        None => info!("No settings file found, using defaults"),
    }

    let loader: Box<dyn CorpusLoader> = match settings.corpus.source {
        CorpusSource::Synthetic => Box::new(SyntheticCorpusLoader::new(
            settings.corpus.synthetic_size,
            settings.corpus.seed,
            settings.synthesis.variables.clone(),
        )),
        CorpusSource::Directory => {
            let root = settings
                .corpus
                .path
                .clone()
                .ok_or_else(|| anyhow!("corpus.path is required for a directory corpus"))?;
            Box::new(DirectoryCorpusLoader::new(root))
        }
    };
    let embedder = Arc::new(HashEmbedder::new(settings.search.dimension));

    let addr = SocketAddr::new(settings.server.bind_address.parse()?, settings.server.port);

    let service = Arc::new(ForecastService::build(settings, loader.as_ref(), embedder).await?);
    if service.is_degraded() {
        warn!("Service started degraded; forecasts are served by the fallback path");
    }

    let app = create_router(AppState::new(service.clone()));

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let state = service.shutdown().await;
    info!("Stopped ({} workers outstanding)", state.in_use);

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
