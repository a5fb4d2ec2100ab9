//! dd-analyzer - due diligence document analysis service
//!
//! Ingests data-room ZIP uploads, classifies documents against a
//! transaction blueprint and runs the checkpointed multi-pass LLM pipeline.
//! REST + SSE on port 5740 by default.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dd_analyzer::services::{BlueprintRegistry, DocumentStore, LlmProvider, OpenAiCompatibleClient};
use dd_analyzer::AppState;
use dd_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use dd_common::events::EventBus;

/// Name of the per-user config file (`~/.config/dd-analyzer/config.toml`)
const USER_CONFIG_NAME: &str = "config";
/// Name of the config file inside the root folder
const ROOT_CONFIG_NAME: &str = "dd-analyzer";

#[derive(Debug, Parser)]
#[command(name = "dd-analyzer", version, about = "Due diligence document analysis service")]
struct Cli {
    /// Root folder holding the database, documents and blueprints
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Config file (default: <root>/dd-analyzer.toml, then ~/.config/dd-analyzer/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (overrides [server] host)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides [server] port)
    #[arg(long)]
    port: Option<u16>,
}

/// First existing candidate, else the root folder copy (where the API key is mirrored)
fn select_config_path(cli: &Cli, initializer: &RootFolderInitializer) -> PathBuf {
    if let Some(path) = &cli.config {
        return path.clone();
    }

    let root_config = initializer.config_path(ROOT_CONFIG_NAME);
    if root_config.exists() {
        return root_config;
    }

    dd_common::config::user_config_path(USER_CONFIG_NAME)
        .filter(|p| p.exists())
        .unwrap_or(root_config)
}

fn init_logging(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Step 1: Resolve root folder and config before logging so the
    // configured level applies from the first line
    let root_folder = RootFolderResolver::new(USER_CONFIG_NAME)
        .with_cli_arg(cli.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    let config_path = select_config_path(&cli, &initializer);
    let config_error = if config_path.exists() {
        TomlConfig::from_file(&config_path).err()
    } else {
        None
    };
    let toml_config = TomlConfig::load_or_default(&config_path);

    init_logging(&toml_config)?;

    info!("Starting dd-analyzer (due diligence analysis)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Root folder: {}", initializer.root_folder().display());
    info!("Config: {}", config_path.display());
    if let Some(e) = config_error {
        warn!("Config file unreadable, using defaults: {}", e);
    }

    // Step 2: Create root folder directory if missing
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = dd_analyzer::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 4: Blueprints
    let blueprints = BlueprintRegistry::load(&initializer.blueprints_dir())?;
    info!(
        "Blueprints: {}",
        blueprints.keys().collect::<Vec<_>>().join(", ")
    );

    // Step 5: LLM client (the service starts without one; analysis needs it)
    let llm: Option<Arc<dyn LlmProvider>> =
        match dd_analyzer::config::resolve_llm_api_key(&db_pool, &toml_config).await {
            Ok((key, source)) => {
                if let Err(e) =
                    dd_analyzer::config::migrate_key_to_database(&key, source, &db_pool, &config_path).await
                {
                    warn!("Failed to persist LLM API key: {}", e);
                }
                match OpenAiCompatibleClient::new(&toml_config.llm, key) {
                    Ok(client) => {
                        info!(model = %toml_config.llm.model, base_url = %toml_config.llm.base_url, "LLM client ready");
                        Some(Arc::new(client) as Arc<dyn LlmProvider>)
                    }
                    Err(e) => {
                        warn!("LLM client unavailable: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

    // Step 6: Runs left executing by a previous process
    let interrupted = dd_analyzer::db::runs::mark_running_as_interrupted(&db_pool).await?;
    if !interrupted.is_empty() {
        info!(count = interrupted.len(), "Marked unfinished runs as interrupted");
    }

    let event_bus = EventBus::new(1000);
    let server = toml_config.server.clone();
    let auto_resume = toml_config.pipeline.auto_resume;

    let state = AppState::new(
        db_pool,
        event_bus,
        Arc::new(blueprints),
        DocumentStore::new(initializer.documents_dir()),
        toml_config,
        config_path,
    )
    .with_llm(llm);

    if auto_resume {
        for run_id in &interrupted {
            match state.launch_run(*run_id).await {
                Ok(()) => info!(run_id = %run_id, "Auto-resuming interrupted run"),
                Err(e) => warn!(run_id = %run_id, error = %e, "Auto-resume skipped"),
            }
        }
    }

    let app = dd_analyzer::build_router(state);

    let host = cli.host.unwrap_or(server.host);
    let port = cli.port.unwrap_or(server.port);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("dd-analyzer stopped");
    Ok(())
}
