//! Telemetry event pipeline.
//!
//! Events enter through a [`transport::EventTransport`] (HTTP or a
//! line-delimited stream), are published to Kafka by the
//! [`producer::EventPublisher`], consumed by the [`consumer::Collector`]
//! and persisted into ClickHouse via the [`storage::EventStore`], which
//! also serves filtered, sorted, paginated reads over the stored history.

pub mod config;
pub mod consumer;
pub mod errors;
pub mod models;
pub mod producer;
pub mod stats;
pub mod storage;
pub mod transport;

pub use errors::{PipelineError, Result};
pub use models::{Event, PaginatedResponse, QueryOptions};
