use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gatekeeper::{
    auth::{hash_password, StaticDirectory},
    config::{Settings, DEFAULT_CONFIG_FILE},
    delivery::OutboxDelivery,
    router, store, AppState,
};

/// Credential and session service
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "GATEKEEPER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the bind address from the configuration
    #[arg(long)]
    bind: Option<SocketAddr>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read a password from stdin and print its hash for the principals file
    HashPassword,
}

fn print_password_hash() -> anyhow::Result<()> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    anyhow::ensure!(!password.is_empty(), "empty password");
    println!("{}", hash_password(password)?);
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if settings.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if let Some(Command::HashPassword) = args.command {
        return print_password_hash();
    }

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    init_tracing(&settings);

    let store = store::open(&settings.redis.url, settings.store_timeout())
        .await
        .context("connecting to the key-value store")?;
    let directory = StaticDirectory::load(&settings.principals_file)
        .await
        .with_context(|| format!("loading principals from {}", settings.principals_file.display()))?;
    tracing::info!(principals = directory.len(), "principal directory loaded");
    let delivery = OutboxDelivery::new(&settings.outbox_file);

    let addr = settings.bind_addr;
    let state = AppState::new(settings, store, Arc::new(directory), Arc::new(delivery));
    let app = router::create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
