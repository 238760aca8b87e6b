//! Legacy line-oriented ingestion: newline-delimited JSON events from a
//! buffered stream, typically stdin. Bad lines are counted and skipped;
//! a publish failure aborts the stream since this layer cannot buffer
//! unboundedly.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{EventHandler, EventTransport, HandlerSlot};
use crate::errors::{PipelineError, Result};
use crate::models::Event;
use crate::stats::PipelineStats;

/// Progress log cadence, in processed lines.
const PROGRESS_INTERVAL: u64 = 1000;

/// Reads events from `reader` until EOF or cancellation, forwarding each
/// decoded event to `handler`. Final processed/error counts end up in
/// `stats` and are logged on completion.
pub async fn run_line_ingest<R>(
    reader: R,
    handler: EventHandler,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("line ingest cancelled");
                break;
            }
            next = lines.next_line() => match next? {
                None => break,
                Some(raw) => {
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let mut event: Event = match serde_json::from_str(&raw) {
                        Ok(event) => event,
                        Err(err) => {
                            stats.record_error();
                            warn!(error = %err, line = %raw, "skipping malformed line");
                            continue;
                        }
                    };
                    event.normalize();
                    handler(event).await?;
                    let processed = stats.record_processed();
                    if processed % PROGRESS_INTERVAL == 0 {
                        info!(processed, errors = stats.errors(), "line ingest progress");
                    }
                }
            }
        }
    }

    info!(
        processed = stats.processed(),
        errors = stats.errors(),
        "line ingest finished"
    );
    Ok(())
}

/// Stdin-backed transport. Cancels the shared token when the stream ends
/// so a piping process exits with its input.
pub struct StdinTransport {
    handler: HandlerSlot,
    stats: Arc<PipelineStats>,
    shutdown: CancellationToken,
}

impl StdinTransport {
    pub fn new(stats: Arc<PipelineStats>, shutdown: CancellationToken) -> Self {
        StdinTransport {
            handler: HandlerSlot::default(),
            stats,
            shutdown,
        }
    }
}

#[async_trait]
impl EventTransport for StdinTransport {
    async fn start(&self) -> Result<()> {
        let handler = self
            .handler
            .current()
            .ok_or_else(|| PipelineError::Config("event handler not configured".to_string()))?;
        let stats = self.stats.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let reader = BufReader::new(tokio::io::stdin());
            if let Err(err) =
                run_line_ingest(reader, handler, stats, shutdown.clone()).await
            {
                error!(error = %err, "line ingest aborted");
            }
            shutdown.cancel();
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    fn set_handler(&self, handler: EventHandler) {
        self.handler.replace(handler);
    }
}
