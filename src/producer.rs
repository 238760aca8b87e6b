//! Kafka publish path. Events buffer inside the producer for a bounded
//! linger window so deliveries batch, and each send targets the partition
//! with the fewest outstanding bytes. Publish errors surface synchronously
//! to the caller; there is no internal retry loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, info};

use crate::config::KafkaConfig;
use crate::errors::Result;
use crate::models::Event;

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EventPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
    /// Outstanding payload bytes per partition, used for least-loaded
    /// partition selection. The system promises non-loss, not per-key
    /// ordering, so no keyed partitioner is involved.
    in_flight: Vec<AtomicU64>,
}

impl EventPublisher {
    pub async fn connect(cfg: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &cfg.brokers)
            .set("linger.ms", cfg.linger_ms.to_string())
            .set("compression.type", "lz4")
            .set("request.timeout.ms", "30000")
            .create()?;

        let metadata = producer
            .client()
            .fetch_metadata(Some(&cfg.topic), METADATA_TIMEOUT)?;
        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == cfg.topic)
            .map(|t| t.partitions().len())
            .unwrap_or(0)
            .max(1);

        info!(topic = %cfg.topic, partitions, "kafka producer ready");

        Ok(EventPublisher {
            producer,
            topic: cfg.topic.clone(),
            send_timeout: cfg.send_timeout(),
            in_flight: (0..partitions).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// Publishes one event and awaits the broker acknowledgement.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let bytes = payload.len() as u64;
        let partition = least_loaded_partition(&self.in_flight);

        self.in_flight[partition].fetch_add(bytes, Ordering::Relaxed);
        let record = FutureRecord::<(), _>::to(&self.topic)
            .partition(partition as i32)
            .payload(&payload);
        let outcome = self.producer.send(record, self.send_timeout).await;
        self.in_flight[partition].fetch_sub(bytes, Ordering::Relaxed);

        match outcome {
            Ok((partition, offset)) => {
                debug!(partition, offset, service = %event.service, "event published");
                Ok(())
            }
            Err((err, _lost)) => Err(err.into()),
        }
    }
}

fn least_loaded_partition(loads: &[AtomicU64]) -> usize {
    loads
        .iter()
        .enumerate()
        .min_by_key(|(_, load)| load.load(Ordering::Relaxed))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loads(values: &[u64]) -> Vec<AtomicU64> {
        values.iter().map(|&v| AtomicU64::new(v)).collect()
    }

    #[test]
    fn picks_partition_with_least_outstanding_bytes() {
        let l = loads(&[300, 10, 200]);
        assert_eq!(least_loaded_partition(&l), 1);
    }

    #[test]
    fn ties_resolve_to_first_partition() {
        let l = loads(&[50, 50, 50]);
        assert_eq!(least_loaded_partition(&l), 0);
    }

    #[test]
    fn single_partition_always_selected() {
        let l = loads(&[u64::MAX]);
        assert_eq!(least_loaded_partition(&l), 0);
    }
}
