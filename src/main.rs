use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image_muse::config::Config;
use image_muse::server::{self, AppState};
use image_muse::store::SqliteAiLogStore;

#[derive(Parser, Debug)]
#[command(
    name = "image-muse-server",
    version,
    about = "Image Muse AI service: image titles, captions and tags with Gemini → OpenRouter → HuggingFace fallback"
)]
struct Cli {
    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Address to listen on (overrides config and PORT)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// SQLite file for diagnostic logs (overrides config and DATABASE_PATH)
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if let Err(e) = dotenvy::dotenv() {
        log::debug!("No .env file loaded: {e}");
    }

    // Load config, then environment, then CLI flags
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env();
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(database) = cli.database {
        config.server.database_path = database.display().to_string();
    }

    let enabled = config.enabled_providers();
    if enabled.is_empty() {
        log::warn!(
            "No server-side AI keys configured; requests must send x-gemini-key, x-openrouter-key or x-huggingface-key, or will get the offline fallback"
        );
    } else {
        log::info!("AI chain: {}", enabled.join(" → "));
    }

    let logs = SqliteAiLogStore::connect(Path::new(&config.server.database_path)).await?;
    let bind = config.server.bind.clone();
    let state = Arc::new(AppState::new(config, Arc::new(logs))?);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;
    log::info!("Listening on {bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}
