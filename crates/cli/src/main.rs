use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use orchestrator::CampaignPipeline;
use provider::{AnthropicClient, Provider};
use server::config::{HooklineConfig, CONFIG_FILE};
use server::routes::sse::spawn_event_recorder;
use server::{create_router, state::AppState};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hookline")]
#[command(about = "Multi-phase marketing content generation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the config file.
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the database.
    Init,
    /// Run the HTTP API and the background batch worker.
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Poll and harvest every in-flight batch once.
    Reconcile,
    /// List campaigns and their status.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Some(Commands::Init) => init_project(&cli.config).await,
        Some(Commands::Serve { port }) => serve(&cli.config, port).await,
        Some(Commands::Reconcile) => reconcile(&cli.config).await,
        Some(Commands::Status) => status(&cli.config).await,
        None => serve(&cli.config, None).await,
    }
}

async fn init_project(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let config = HooklineConfig::default();
    config
        .write(config_path)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    open_database(&config).await?;

    println!();
    println!("Initialized Hookline Studio");
    println!();
    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}", config.server.database_url);
    println!();
    println!("Next steps:");
    println!("  1. export {}=<your key>", config.provider.api_key_env);
    println!("  2. Run 'hookline serve' to start the server");

    Ok(())
}

async fn serve(config_path: &Path, port: Option<u16>) -> Result<()> {
    let config = HooklineConfig::read(config_path).await;
    let port = port.unwrap_or(config.server.port);

    let pool = open_database(&config).await?;
    let provider = build_provider(&config)?;
    let state = AppState::new(pool, provider, config.pipeline_config());

    let recorder = spawn_event_recorder(&state);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = state.pipeline.worker().spawn(shutdown_rx);

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    println!();
    println!("Hookline Studio");
    println!("════════════════════════════════════════");
    println!();
    println!("  API Server:  http://localhost:{}", port);
    println!("  Swagger UI:  http://localhost:{}/swagger-ui", port);
    println!("  Events:      http://localhost:{}/api/events", port);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        tracing::warn!("Batch worker ended abnormally: {}", e);
    }
    recorder.abort();

    Ok(())
}

async fn reconcile(config_path: &Path) -> Result<()> {
    let config = HooklineConfig::read(config_path).await;
    let pool = open_database(&config).await?;
    let provider = build_provider(&config)?;
    let pipeline = CampaignPipeline::new(pool, provider, config.pipeline_config());

    let pass = pipeline
        .worker()
        .run_once()
        .await
        .context("Reconciliation pass failed")?;

    println!(
        "Visited {} campaigns: {} harvested, {} failed, {} resubmitted, {} released, {} errors",
        pass.visited, pass.harvested, pass.failed, pass.resubmitted, pass.released, pass.errors
    );
    Ok(())
}

async fn status(config_path: &Path) -> Result<()> {
    let config = HooklineConfig::read(config_path).await;
    let pool = open_database(&config).await?;
    let campaigns = db::CampaignRepository::new(pool).find_all().await?;

    println!();
    if campaigns.is_empty() {
        println!("No campaigns yet.");
    } else {
        println!("Campaigns ({}):", campaigns.len());
        for campaign in &campaigns {
            let status = campaign.status.as_str();
            let status_icon = match status {
                "draft" | "product_info_ready" => "○",
                "angles_generated" => "◔",
                "hooks_batch_submitted" | "hooks_batch_completed" => "◑",
                "scripts_batch_submitted" | "scripts_batch_completed" => "◕",
                "completed" => "●",
                "partially_completed" | "paused" => "◌",
                "failed" => "✗",
                _ => "?",
            };
            println!(
                "  {} [{}] {} ({} angles, {} hooks, {} scripts)",
                status_icon,
                status,
                campaign.id,
                campaign.angles.len(),
                campaign.hooks.len(),
                campaign.scripts.len()
            );
            if let Some(message) = campaign.error_message.as_ref().or(campaign.batch_error.as_ref()) {
                println!("      {}", message);
            }
        }
    }
    println!();

    Ok(())
}

async fn open_database(config: &HooklineConfig) -> Result<db::SqlitePool> {
    let database_url = &config.server.database_url;
    if let Some(dir) = database_url
        .strip_prefix("sqlite:")
        .map(Path::new)
        .and_then(Path::parent)
    {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    tracing::info!("Database: {}", database_url);
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

fn build_provider(config: &HooklineConfig) -> Result<Arc<dyn Provider>> {
    let api_key = config
        .api_key()
        .with_context(|| format!("{} is not set", config.provider.api_key_env))?;
    let client = AnthropicClient::new(config.anthropic_config(api_key))
        .context("Failed to build provider client")?;
    tracing::info!(model = %client.config().model, "Provider ready");
    Ok(Arc::new(client))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "hookline=info,server=info,orchestrator=info,provider=info,tower_http=info".into()
    });

    if json_logs {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(filter)
            .init();
    }
}
