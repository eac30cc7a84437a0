use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use palaver_server::ServerConfig;
use palaver_store::{Database, SqliteGateway};

/// Real-time messaging relay.
#[derive(Parser, Debug)]
#[command(name = "palaver", version, about)]
struct Args {
    /// Listen host.
    #[arg(long, env = "PALAVER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port.
    #[arg(long, env = "PALAVER_PORT", default_value_t = 8090)]
    port: u16,

    /// Path to the SQLite database file.
    #[arg(long, env = "PALAVER_DB", default_value = "palaver.db")]
    db: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let db = Database::open(&args.db)
        .with_context(|| format!("failed to open database at {}", args.db.display()))?;
    tracing::info!(path = %args.db.display(), "Database opened");

    let gateway = Arc::new(SqliteGateway::new(db));
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        ..Default::default()
    };
    let handle = palaver_server::start(config, gateway)
        .await
        .context("failed to start relay server")?;
    tracing::info!(port = handle.port, "Relay ready");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!("Shutting down");
    Ok(())
}
