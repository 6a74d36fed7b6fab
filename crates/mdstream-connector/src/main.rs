//! mdstream-connector: normalized market data streaming binary
//!
//! Streams one exchange feed and writes normalized and derived records to
//! stdout as JSON lines. Logs go to stderr.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mdstream_connector_lib::{
    exchange_for, JsonLinesWriter, Runner, ServerState, SUPPORTED_EXCHANGES,
};
use mdstream_metadata::Feed;

#[derive(Parser, Debug)]
#[command(name = "mdstream-connector")]
#[command(about = "Normalized market data streaming connector")]
struct Args {
    /// Path to feed configuration file
    #[arg(short, long)]
    feed: PathBuf,

    /// Health server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let feed = Feed::load(&args.feed)?;
    info!(
        exchange = %feed.exchange,
        filters = feed.filters.len(),
        computations = feed.compute.len(),
        "Loaded feed configuration"
    );

    let exchange = exchange_for(&feed.exchange, feed.endpoint.as_deref()).ok_or_else(|| {
        format!(
            "unsupported exchange {} (supported: {})",
            feed.exchange,
            SUPPORTED_EXCHANGES.join(", ")
        )
    })?;

    let health_addr: SocketAddr = args.health_addr.parse()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    let runner = Runner::new(&feed, exchange, JsonLinesWriter::stdout())?;

    let server_state = ServerState::new(&feed.exchange, runner.status_handle());
    tokio::spawn(async move {
        if let Err(e) = mdstream_connector_lib::run_server(health_addr, server_state).await {
            error!(error = %e, "Health server error");
        }
    });
    info!(addr = %health_addr, "Health server started");

    match runner.run(shutdown_rx).await {
        Ok(()) => {
            info!("Connector stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Connector error");
            std::process::exit(1);
        }
    }
}
