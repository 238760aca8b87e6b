//! Collector: consumes events from the Kafka topic under the configured
//! group and persists them into ClickHouse.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse::config::Config;
use pulse::consumer::Collector;
use pulse::stats::PipelineStats;
use pulse::storage::EventStore;

#[derive(Parser)]
#[command(name = "collector", about = "Telemetry collector: Kafka to ClickHouse")]
struct Args {}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let _args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let store = Arc::new(
        EventStore::connect(&config.clickhouse)
            .await
            .context("failed to connect ClickHouse")?,
    );
    let stats = Arc::new(PipelineStats::default());
    let collector = Collector::new(&config.kafka, store, stats.clone())
        .context("failed to create Kafka consumer")?;

    collector.run(shutdown).await?;
    info!(
        processed = stats.processed(),
        errors = stats.errors(),
        "collector shut down"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,collector=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
