//! dbsage - A conversational database assistant for the terminal.

use dbsage::cli::Cli;
use dbsage::config::{Config, Settings};
use dbsage::connection::ConnectionRegistry;
use dbsage::db::SqlxConnector;
use dbsage::error::Result;
use dbsage::llm::{OpenAiClient, OpenAiConfig};
use dbsage::orchestrator::Orchestrator;
use dbsage::persistence::ConnectionStore;
use dbsage::tools::ToolCatalog;
use dbsage::{logging, tui};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Could not read .env file: {e}");
        }
    }

    let cli = Cli::parse_args();

    if cli.log_stderr {
        logging::init_stderr_logging();
    } else {
        logging::init_file_logging();
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    let settings = Settings::resolve(&cli, &config)?;

    info!(model = %settings.model, base_url = %settings.base_url, "LLM endpoint");
    let llm = Arc::new(OpenAiClient::new(OpenAiConfig::from_settings(&settings))?);

    info!(
        "Loading connections from: {}",
        settings.connections_path.display()
    );
    let store = ConnectionStore::new(&settings.connections_path);
    let registry = Arc::new(ConnectionRegistry::load(store, Arc::new(SqlxConnector))?);
    if registry.is_empty().await {
        warn!("No saved connections");
    }

    let catalog = Arc::new(ToolCatalog::new());
    let (orchestrator, events) = Orchestrator::new(
        llm,
        catalog,
        registry.clone(),
        settings.turn_timeout,
    );

    let session = tui::Session {
        orchestrator,
        events,
        registry: Arc::clone(&registry),
        tick_rate: settings.tick_rate,
    };

    let result = tui::run(session).await;
    registry.close_all().await;
    info!("Goodbye");
    result
}
