//! Kafka consume path: a single poll loop per process under a named group.
//! Decoded events dispatch to the storage writer through a bounded worker
//! pool, and the read position is only stored once the corresponding write
//! is confirmed, keeping delivery at-least-once across a crash.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::errors::{PipelineError, Result};
use crate::models::Event;
use crate::stats::PipelineStats;
use crate::storage::EventStore;

/// Fixed backoff after a transient broker read failure.
const READ_BACKOFF: Duration = Duration::from_secs(1);
/// Progress log cadence, in processed messages.
const PROGRESS_INTERVAL: u64 = 1000;

pub struct Collector {
    consumer: Arc<StreamConsumer>,
    store: Arc<EventStore>,
    stats: Arc<PipelineStats>,
    write_slots: Arc<Semaphore>,
    write_concurrency: usize,
}

impl Collector {
    pub fn new(
        cfg: &KafkaConfig,
        store: Arc<EventStore>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        // Offsets are stored manually after a confirmed write; the
        // background auto-commit then flushes whatever has been stored.
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("group.id", &cfg.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[&cfg.topic])?;

        info!(topic = %cfg.topic, group = %cfg.group_id, "kafka consumer subscribed");

        Ok(Collector {
            consumer: Arc::new(consumer),
            store,
            stats,
            write_slots: Arc::new(Semaphore::new(cfg.write_concurrency)),
            write_concurrency: cfg.write_concurrency,
        })
    }

    /// Polls until cancellation, then waits for in-flight writes to finish.
    /// The loop has no normal terminal state.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, draining in-flight writes");
                    break;
                }
                polled = self.consumer.recv() => match polled {
                    Err(err) => {
                        warn!(error = %err, "broker read failed, backing off");
                        tokio::time::sleep(READ_BACKOFF).await;
                    }
                    Ok(message) => self.dispatch(&message).await,
                }
            }
        }

        let _drain = self
            .write_slots
            .acquire_many(self.write_concurrency as u32)
            .await;
        info!(
            processed = self.stats.processed(),
            errors = self.stats.errors(),
            "consume loop stopped"
        );
        Ok(())
    }

    async fn dispatch(&self, message: &BorrowedMessage<'_>) {
        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();

        let event = match decode_event(message.payload()) {
            Ok(event) => event,
            Err(err) => {
                // Skip and count; an undecodable payload is never requeued
                // and never aborts the loop.
                self.stats.record_error();
                warn!(error = %err, partition, offset, "skipping undecodable message");
                if let Err(err) = self.consumer.store_offset(&topic, partition, offset) {
                    warn!(error = %err, "failed to store offset for skipped message");
                }
                return;
            }
        };

        let permit = match self.write_slots.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // pool closed, only happens during teardown
        };

        let store = self.store.clone();
        let consumer = self.consumer.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match store.insert(&event).await {
                Ok(()) => {
                    let processed = stats.record_processed();
                    if processed % PROGRESS_INTERVAL == 0 {
                        info!(processed, errors = stats.errors(), "pipeline progress");
                    }
                    if let Err(err) = consumer.store_offset(&topic, partition, offset) {
                        warn!(error = %err, partition, offset, "failed to store offset");
                    }
                }
                Err(err) => {
                    // Bounded loss: this event is dropped and counted, the
                    // loop keeps consuming. The offset is not stored, so a
                    // restart may redeliver it.
                    stats.record_error();
                    error!(
                        error = %err,
                        service = %event.service,
                        partition, offset,
                        "storage write failed, event dropped"
                    );
                }
            }
        });
    }
}

/// Decodes a broker payload into a canonical event.
pub fn decode_event(payload: Option<&[u8]>) -> Result<Event> {
    let bytes = payload.ok_or_else(|| PipelineError::Malformed("empty payload".to_string()))?;
    let text = std::str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}
