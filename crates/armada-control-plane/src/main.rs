use anyhow::Result;
use armada_control_plane::api::{self, AppState};
use armada_control_plane::config::Config;
use armada_control_plane::{dispatcher, scheduler, store};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "armada-control-plane", about = "Armada fleet control-plane service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Serve {
        /// TOML config file; flags override its values.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Serve { config, port, db_path } => {
            let mut config = match config {
                Some(path) => Config::load(&path)?,
                None => Config::default(),
            };
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(db_path) = db_path {
                config.db_path = db_path;
            }
            serve(config).await?;
        }
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let connection = store::open(&config.db_path)?;
    let state = AppState { db: Arc::new(Mutex::new(connection)) };

    spawn_scheduler_loop(state.clone(), config.scheduler_interval_secs);
    spawn_dispatch_loop(state.clone(), config.dispatch_interval_secs);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("control-plane listening on http://{}", addr);
    info!("sqlite database at {}", config.db_path.display());
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn spawn_scheduler_loop(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let db = state.db.lock().await;
            match scheduler::tick(&db, Utc::now()) {
                Ok(created) if !created.is_empty() => {
                    info!(count = created.len(), "auto-schedule pass created runs");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "auto-schedule pass failed"),
            }
        }
    });
}

fn spawn_dispatch_loop(state: AppState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let db = state.db.lock().await;
            match dispatcher::dispatch(&db) {
                Ok(promoted) if !promoted.is_empty() => {
                    info!(count = promoted.len(), "dispatch pass queued runs");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "dispatch pass failed"),
            }
        }
    });
}
