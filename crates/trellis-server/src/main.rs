//! Trellis realtime server binary.
//!
//! # Usage
//!
//! ```bash
//! trellis-server --bind 0.0.0.0:8080
//!
//! # Tune the connection limit and session reaper
//! trellis-server --bind 0.0.0.0:8080 --max-connections 5000 --reap-interval-secs 600
//! ```

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use trellis_core::{MemorySessionStore, SessionValidator, SystemClock, ValidatorConfig};
use trellis_server::{Broker, BrokerConfig, MemoryOrgDirectory, transport};

/// Trellis realtime server
#[derive(Parser, Debug)]
#[command(name = "trellis-server")]
#[command(about = "Realtime connection and notification broker")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Seconds between expired-session sweeps
    #[arg(long, default_value = "900")]
    reap_interval_secs: u64,

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

    tracing::info!("Trellis realtime server starting");
    tracing::info!("Binding to {}", args.bind);

    let clock = SystemClock;
    let validator =
        SessionValidator::new(MemorySessionStore::new(), clock.clone(), ValidatorConfig::default());
    let directory = MemoryOrgDirectory::new();
    let config = BrokerConfig { max_connections: args.max_connections, ..Default::default() };
    let broker = Broker::new(validator, directory, clock, config);

    // Periodic sweep of expired and inactive sessions.
    let reaper = broker.clone();
    let reap_interval = Duration::from_secs(args.reap_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reap_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match reaper.validator().reap(None).await {
                Ok(0) => {},
                Ok(deleted) => tracing::info!(deleted, "reaped expired sessions"),
                Err(e) => tracing::warn!(error = %e, "session reap failed"),
            }
        }
    });

    let listener = TcpListener::bind(&args.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    tokio::select! {
        result = transport::serve(listener, broker.clone()) => {
            result?;
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            let closed = broker.shutdown();
            tracing::info!(closed, "closed live connections");
        },
    }

    Ok(())
}
