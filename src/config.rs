use std::str::FromStr;
use std::time::Duration;

use crate::errors::{PipelineError, Result};

/// Process configuration, loaded once at startup and passed into each
/// component. Any missing required value is a startup error; there is no
/// partial startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub clickhouse: ClickHouseConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    /// Publish-side batching window in milliseconds.
    pub linger_ms: u64,
    pub send_timeout_secs: u64,
    /// Upper bound on concurrently in-flight storage writes.
    pub write_concurrency: usize,
}

impl KafkaConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub table: String,
    /// Deadline for the initial liveness probe; deliberately shorter than
    /// the per-operation budget.
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl ClickHouseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ingest_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, which keeps
    /// the parsing logic testable without touching process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let kafka = KafkaConfig {
            brokers: required(&get, "KAFKA_BROKERS")?,
            topic: required(&get, "KAFKA_TOPIC")?,
            group_id: optional(&get, "KAFKA_GROUP_ID", "pulse-collectors"),
            linger_ms: parsed(&get, "KAFKA_LINGER_MS", 25)?,
            send_timeout_secs: parsed(&get, "KAFKA_SEND_TIMEOUT_SECS", 5)?,
            write_concurrency: parsed(&get, "WRITE_CONCURRENCY", 32)?,
        };

        let clickhouse = ClickHouseConfig {
            url: required(&get, "CLICKHOUSE_URL")?,
            database: required(&get, "CLICKHOUSE_DB")?,
            username: required(&get, "CLICKHOUSE_USER")?,
            password: required(&get, "CLICKHOUSE_PASS")?,
            table: optional(&get, "CLICKHOUSE_TABLE", "logs"),
            connect_timeout_secs: parsed(&get, "CLICKHOUSE_CONNECT_TIMEOUT_SECS", 5)?,
            query_timeout_secs: parsed(&get, "CLICKHOUSE_QUERY_TIMEOUT_SECS", 30)?,
        };

        let server = ServerConfig {
            host: optional(&get, "LISTEN_HOST", "0.0.0.0"),
            port: required(&get, "LISTEN_PORT")?
                .parse()
                .map_err(|e| PipelineError::Config(format!("invalid LISTEN_PORT: {e}")))?,
            ingest_path: {
                let path = required(&get, "INGEST_PATH")?;
                if !path.starts_with('/') {
                    return Err(PipelineError::Config(
                        "INGEST_PATH must start with '/'".to_string(),
                    ));
                }
                path
            },
        };

        Ok(Config {
            kafka,
            clickhouse,
            server,
        })
    }
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    match get(key) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineError::Config(format!(
            "missing required setting {key}"
        ))),
    }
}

fn optional(get: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    match get(key) {
        Some(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(v) if !v.is_empty() => v
            .parse()
            .map_err(|e| PipelineError::Config(format!("invalid {key}: {e}"))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("KAFKA_BROKERS", "localhost:9092"),
            ("KAFKA_TOPIC", "events"),
            ("CLICKHOUSE_URL", "http://localhost:8123"),
            ("CLICKHOUSE_DB", "telemetry"),
            ("CLICKHOUSE_USER", "default"),
            ("CLICKHOUSE_PASS", "secret"),
            ("LISTEN_PORT", "8080"),
            ("INGEST_PATH", "/events"),
        ])
    }

    fn lookup(env: HashMap<&'static str, &'static str>) -> impl Fn(&str) -> Option<String> {
        move |key| env.get(key).map(|v| v.to_string())
    }

    #[test]
    fn loads_with_defaults_for_optional_settings() {
        let config = Config::from_lookup(lookup(base_env())).unwrap();
        assert_eq!(config.kafka.group_id, "pulse-collectors");
        assert_eq!(config.kafka.linger_ms, 25);
        assert_eq!(config.kafka.write_concurrency, 32);
        assert_eq!(config.clickhouse.table, "logs");
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.clickhouse.connect_timeout() < config.clickhouse.query_timeout());
    }

    #[test]
    fn missing_required_setting_is_fatal() {
        let mut env = base_env();
        env.remove("KAFKA_TOPIC");
        let err = Config::from_lookup(lookup(env)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("KAFKA_TOPIC"));
    }

    #[test]
    fn empty_required_setting_is_fatal() {
        let mut env = base_env();
        env.insert("CLICKHOUSE_URL", "");
        assert!(Config::from_lookup(lookup(env)).is_err());
    }

    #[test]
    fn malformed_numeric_setting_is_fatal() {
        let mut env = base_env();
        env.insert("LISTEN_PORT", "not-a-port");
        assert!(Config::from_lookup(lookup(env)).is_err());
    }

    #[test]
    fn ingest_path_must_be_absolute() {
        let mut env = base_env();
        env.insert("INGEST_PATH", "events");
        assert!(Config::from_lookup(lookup(env)).is_err());
    }
}
