//! Ingestion agent: runs an event transport (HTTP by default, stdin with
//! `--stdin`), forwards accepted events to the Kafka publish path, and
//! serves the query read path when running over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse::config::Config;
use pulse::producer::EventPublisher;
use pulse::stats::PipelineStats;
use pulse::storage::EventStore;
use pulse::transport::http::HttpTransport;
use pulse::transport::lines::StdinTransport;
use pulse::transport::{EventHandler, EventTransport};

#[derive(Parser)]
#[command(name = "agent", about = "Telemetry ingestion agent")]
struct Args {
    /// Read newline-delimited events from stdin instead of serving HTTP.
    #[arg(long)]
    stdin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let publisher = Arc::new(
        EventPublisher::connect(&config.kafka)
            .await
            .context("failed to connect Kafka producer")?,
    );
    let handler: EventHandler = {
        let publisher = publisher.clone();
        Arc::new(move |event| {
            let publisher = publisher.clone();
            Box::pin(async move { publisher.publish(&event).await })
        })
    };

    let stats = Arc::new(PipelineStats::default());
    let transport: Box<dyn EventTransport> = if args.stdin {
        Box::new(StdinTransport::new(stats.clone(), shutdown.clone()))
    } else {
        let store = Arc::new(
            EventStore::connect(&config.clickhouse)
                .await
                .context("failed to connect ClickHouse")?,
        );
        Box::new(HttpTransport::new(
            &config.server,
            Some(store),
            stats.clone(),
            shutdown.clone(),
        )?)
    };

    transport.set_handler(handler);
    transport.start().await.context("failed to start transport")?;

    shutdown.cancelled().await;
    transport.stop().await?;
    info!(
        processed = stats.processed(),
        errors = stats.errors(),
        "agent shut down"
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=info,agent=info,tower_http=info".into()),
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
