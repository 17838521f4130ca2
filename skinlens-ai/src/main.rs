//! skinlens-ai - Skin Analysis Orchestration Service
//!
//! Accepts face images, fans them out to external analysis providers,
//! merges the results into one canonical record and caches it by image
//! content. Integrates with clients via HTTP REST + SSE.

use anyhow::{Context, Result};
use clap::Parser;
use skinlens_common::config::{
    default_config_path, get_user_agent, load_toml_config, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use skinlens_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skinlens_ai::config::{OrchestratorConfig, ProviderCredentials};
use skinlens_ai::db::{RecordStore, SqliteRecordStore};
use skinlens_ai::enrichment::{DepthEstimator, LightingSimulator};
use skinlens_ai::registry::ProviderRegistry;
use skinlens_ai::{AnalysisOrchestrator, AppState};

const MODULE_NAME: &str = "skinlens-ai";

#[derive(Debug, Parser)]
#[command(name = "skinlens-ai", version, about = "Skin analysis orchestration service")]
struct Args {
    /// Root folder holding the database
    #[arg(long, env = "SKINLENS_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// HTTP port (overrides the TOML config)
    #[arg(long)]
    port: Option<u16>,

    /// TOML config file (default: <config dir>/skinlens/skinlens-ai.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep analysis records in memory only
    #[arg(long)]
    no_persist: bool,
}

fn init_tracing(config: &TomlConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(MODULE_NAME));
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)?,
        None => TomlConfig::default(),
    };

    init_tracing(&toml_config);

    info!("Starting skinlens-ai (Skin Analysis) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(toml_config.root_folder.clone())
        .resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Open or create database
    let store: Option<Arc<dyn RecordStore>> = if args.no_persist {
        warn!("Record persistence disabled; GET /analyses/:id will return 404");
        None
    } else {
        let db_path = initializer.database_path();
        info!("Database: {}", db_path.display());
        let pool = skinlens_ai::db::init_database_pool(&db_path).await?;
        info!("Database connection established");
        let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(pool));
        Some(store)
    };

    // Step 4: Providers and enrichment
    let client = reqwest::Client::builder()
        .user_agent(get_user_agent())
        .connect_timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    let credentials = ProviderCredentials::resolve(&toml_config);
    let registry = ProviderRegistry::from_credentials(client.clone(), &credentials);
    let available = registry.available_names();
    if available.is_empty() {
        warn!("No analysis provider configured; every analysis will use the fallback");
    } else {
        info!("Analysis providers: {}", available.join(", "));
    }

    let orchestrator_config = OrchestratorConfig::from_toml(&toml_config);
    let event_bus = EventBus::new(100);

    let mut builder = AnalysisOrchestrator::builder(registry, orchestrator_config)
        .event_bus(event_bus)
        .enrichment(Arc::new(LightingSimulator::new(
            client.clone(),
            credentials.enrichment_service_url.clone(),
        )))
        .enrichment(Arc::new(DepthEstimator::new(
            client,
            credentials.enrichment_service_url.clone(),
        )));
    if let Some(store) = &store {
        builder = builder.record_store(Arc::clone(store));
    }
    let orchestrator = builder.build();

    // Step 5: Background cache sweep
    let shutdown = CancellationToken::new();
    let sweeper = orchestrator.spawn_cache_sweeper(shutdown.clone());

    let state = AppState::new(orchestrator, store);
    let app = skinlens_ai::build_router(state);

    let port = args.port.unwrap_or(toml_config.port);
    let addr = format!("127.0.0.1:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Cache sweeper ended abnormally: {}", e);
    }

    Ok(())
}
