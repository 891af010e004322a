//! Hushline relay binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory relay (state lost on restart)
//! hushline-server --bind 0.0.0.0:7878
//!
//! # Durable relay
//! hushline-server --bind 0.0.0.0:7878 --db /var/lib/hushline/relay.redb
//! ```

use std::path::PathBuf;

use clap::Parser;
use hushline_server::{
    DriverConfig, MemoryStorage, RedbStorage, Server, ServerRuntimeConfig, Storage,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Hushline zero-knowledge relay
#[derive(Parser, Debug)]
#[command(name = "hushline-server")]
#[command(about = "Zero-knowledge end-to-end encrypted chat relay")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:7878")]
    bind: String,

    /// Redb database file. Without it, state is kept in memory
    #[arg(long)]
    db: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Hushline relay starting");

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        driver: DriverConfig { max_connections: args.max_connections, ..Default::default() },
    };

    match args.db {
        Some(path) => {
            tracing::info!("using durable storage at {}", path.display());
            serve(config, RedbStorage::open(&path)?).await
        },
        None => {
            tracing::warn!("no --db given, relay state will not survive restart");
            serve(config, MemoryStorage::new()).await
        },
    }
}

async fn serve<S: Storage>(
    config: ServerRuntimeConfig,
    storage: S,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config, storage).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
