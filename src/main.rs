// src/main.rs
// Server entry point: state construction, background loops, axum serve

use anyhow::Result;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use recall_backend::api::create_router;
use recall_backend::config::CONFIG;
use recall_backend::scheduler::run_dispatcher;
use recall_backend::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "recall-backend", about = "Personal knowledge-base service")]
struct Args {
    /// Bind host (overrides HOST)
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Bind port (overrides PORT)
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

/// How often conversation buffers are checked for TTL flushes
const BUFFER_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// How often expired conversations are pruned
const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    info!("Starting recall backend...");

    // SQLite with WAL and foreign keys, creating the file if needed
    let options = SqliteConnectOptions::from_str(&CONFIG.database.url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(CONFIG.database.max_connections)
        .connect_with(options)
        .await?;

    let state = Arc::new(AppState::new(pool).await?);

    // Plugin discovery: settings registration, then enabled plugins
    state.plugins.register_settings().await?;
    state.plugins.load_enabled().await;

    // Background loops
    {
        let tasks = state.tasks.clone();
        let rag = state.rag.clone();
        tokio::spawn(async move {
            run_dispatcher(tasks, rag).await;
        });
    }
    {
        let rag = state.rag.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(BUFFER_FLUSH_INTERVAL);
            loop {
                tick.tick().await;
                rag.flush_stale_buffers().await;
            }
        });
    }
    {
        let sessions = state.sessions.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SESSION_PRUNE_INTERVAL);
            loop {
                tick.tick().await;
                if let Err(e) = sessions.prune_expired().await {
                    warn!("Session pruning failed: {}", e);
                }
            }
        });
    }

    let host = args.host.unwrap_or_else(|| CONFIG.server.host.clone());
    let port = args.port.unwrap_or(CONFIG.server.port);
    let bind_address = format!("{}:{}", host, port);

    let router = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Listening on {}", bind_address);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(state.clone()))
    .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down, stopping plugins...");
    state.plugins.shutdown_all().await;
}
