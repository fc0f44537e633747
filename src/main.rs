//! Taskroom server entry point.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::net::TcpListener;

use taskroom::domain::ports::{DocsTool, NullDocsTool, TaskStore};
use taskroom::infrastructure::config::ConfigLoader;
use taskroom::infrastructure::database::{
    DatabaseConnection, RetryPolicy, SqliteRoomStateStore, SqliteTaskStore,
};
use taskroom::infrastructure::logging;
use taskroom::room::{RoomDeps, RoomRegistry};
use taskroom::server::HttpServer;
use taskroom::services::{HttpDocsTool, TaskService};

#[derive(Parser)]
#[command(name = "taskroom", about = "Multi-agent coordination room server", version)]
struct Cli {
    /// Path to a configuration file (defaults to taskroom.yaml discovery)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination server
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
        /// Override the configured database path
        #[arg(long)]
        database: Option<String>,
    },
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    logging::init(&config.logging)?;

    match cli.command {
        Commands::Migrate => {
            let db = connect(&config.database.path, config.database.max_connections).await?;
            db.migrate().await.context("Failed to run database migrations")?;
            println!("migrations applied to {}", config.database.path);
            db.close().await;
            Ok(())
        }
        Commands::Serve { host, port, database } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(database) = database {
                config.database.path = database;
            }
            ConfigLoader::validate(&config)?;

            let db = connect(&config.database.path, config.database.max_connections).await?;
            db.migrate().await.context("Failed to run database migrations")?;

            let store: Arc<dyn TaskStore> = Arc::new(SqliteTaskStore::new(db.pool().clone()));
            let room_store = Arc::new(SqliteRoomStateStore::new(db.pool().clone()));
            let docs: Arc<dyn DocsTool> = match &config.docs.endpoint {
                Some(endpoint) => Arc::new(HttpDocsTool::new(endpoint.clone(), config.docs.timeout_ms)),
                None => Arc::new(NullDocsTool),
            };
            let service = Arc::new(TaskService::new(store.clone(), &config));

            let registry = Arc::new(RoomRegistry::new(RoomDeps {
                store,
                room_store,
                docs,
                service,
                config: config.room.clone(),
                retry: RetryPolicy::from_config(config.store_retry),
            }));

            let bind = format!("{}:{}", config.server.host, config.server.port);
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {bind}"))?;

            let server = HttpServer::new(
                registry,
                config.server.broadcast_secret.clone(),
                config.server.enable_cors,
            );
            server
                .serve_with_shutdown(listener, shutdown_signal())
                .await
                .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

            db.close().await;
            Ok(())
        }
    }
}

async fn connect(path: &str, max_connections: u32) -> Result<DatabaseConnection> {
    let database_url = if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{path}")
    };
    DatabaseConnection::new(&database_url, max_connections)
        .await
        .context("Failed to connect to database")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
