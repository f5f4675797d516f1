use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lmchat::chat::{self, GenerationConfig};
use lmchat::config::Settings;
use lmchat::engine;
use lmchat::server::ApiServer;
use lmchat::session::{FilePreferences, ModelCatalog};
use lmchat::ChatRuntime;

/// Local language-model chat with a managed engine session.
#[derive(Parser)]
#[command(name = "lmchat", version, about)]
struct Cli {
    /// Directory holding default.toml and an optional local.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server in the background and an interactive chat.
    Run,
    /// Start only the HTTP server.
    Serve,
    /// Start only the interactive chat.
    Chat,
    /// Print the model catalog.
    Models,
}

/// Main entry point for lmchat
///
/// Loads the settings, installs logging, builds the runtime and dispatches
/// to the requested front-end. The engine is released before exit.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load settings first
    let settings = match &cli.config {
        Some(dir) => Settings::from_dir(dir)?,
        None => Settings::new()?,
    };

    let log_path = settings
        .logging
        .file
        .as_deref()
        .unwrap_or_else(|| Path::new("logs"));
    std::fs::create_dir_all(log_path)?;
    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        log_path,
        "lmchat",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Disable ANSI colors for cleaner log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.to_lowercase())),
        )
        .init();

    info!("lmchat starting up...");
    info!("Log directory: {}", std::fs::canonicalize(log_path)?.display());

    let catalog = Arc::new(ModelCatalog::new(settings.models.catalog.clone()));
    let command = cli.command.unwrap_or(Command::Run);
    if let Command::Models = command {
        chat::display_catalog(&catalog, None);
        return Ok(());
    }

    let loader = engine::build_loader(&settings)?;
    info!("Engine backend: {}", settings.engine.backend);
    let preferences = Arc::new(FilePreferences::new(settings.storage.preferences.clone()));
    let runtime = ChatRuntime::new(
        loader,
        preferences,
        GenerationConfig::from(&settings.inference),
    );

    // Persisted selection wins over the configured default
    let startup_model = runtime
        .session()
        .selected_model
        .or_else(|| settings.models.default.clone())
        .filter(|id| catalog.get(id).is_some());

    let result = match command {
        Command::Serve => serve(&settings, runtime.clone(), catalog, startup_model).await,
        Command::Chat => interactive(runtime.clone(), catalog, startup_model).await,
        _ => {
            let server = ApiServer::new(
                runtime.clone(),
                Arc::clone(&catalog),
                settings.server.host.clone(),
                settings.server.port,
            );
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Server error: {}", e);
                    eprintln!("Server error: {}", e);
                }
            });
            interactive(runtime.clone(), catalog, startup_model).await
        }
    };

    runtime.shutdown().await;
    info!("lmchat stopped");
    result
}

async fn interactive(
    runtime: ChatRuntime,
    catalog: Arc<ModelCatalog>,
    startup_model: Option<String>,
) -> anyhow::Result<()> {
    if let Some(model) = startup_model {
        chat::initialize_with_progress(&runtime, &catalog, &model).await;
    }
    chat::chat_loop(runtime, catalog.as_ref().clone()).await
}

async fn serve(
    settings: &Settings,
    runtime: ChatRuntime,
    catalog: Arc<ModelCatalog>,
    startup_model: Option<String>,
) -> anyhow::Result<()> {
    if let Some(model) = startup_model {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.initialize(&model).await {
                error!("Failed to initialize {} on start: {}", model, e);
            }
        });
    }

    let server = ApiServer::new(
        runtime,
        catalog,
        settings.server.host.clone(),
        settings.server.port,
    );
    tokio::select! {
        result = server.start() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
