//! ClickHouse persistence: single-row appends from the consume path and
//! filtered/sorted/paginated reads for the query path. One long-lived
//! client is shared by every caller.

use std::future::Future;
use std::time::Duration;

use clickhouse::{Client, Compression, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClickHouseConfig;
use crate::errors::{PipelineError, Result};
use crate::models::{Event, PageWindow, PaginatedResponse, QueryOptions, SortOrder};

const EVENT_COLUMNS: &str = "EventTimeMs, Service, Level, Message, Host, RequestID";

/// Storage-side projection of [`Event`]; field names map onto the table's
/// column names, in the fixed column order every insert and select uses.
#[derive(Debug, Clone, Serialize, Deserialize, Row)]
#[serde(rename_all = "PascalCase")]
struct EventRow {
    event_time_ms: u64,
    service: String,
    level: String,
    message: String,
    host: String,
    #[serde(rename = "RequestID")]
    request_id: String,
}

impl From<&Event> for EventRow {
    fn from(e: &Event) -> Self {
        EventRow {
            event_time_ms: e.event_time_ms,
            service: e.service.clone(),
            level: e.level.clone(),
            message: e.message.clone(),
            host: e.host.clone(),
            request_id: e.request_id.clone(),
        }
    }
}

impl From<EventRow> for Event {
    fn from(r: EventRow) -> Self {
        Event {
            event_time_ms: r.event_time_ms,
            service: r.service,
            level: r.level,
            message: r.message,
            host: r.host,
            request_id: r.request_id,
        }
    }
}

/// A value destined for a `?` placeholder. Predicate values are always
/// bound, never interpolated into query text.
#[derive(Debug, Clone, PartialEq)]
enum BindValue {
    Text(String),
    Uint(u64),
}

/// AND-ed predicate clauses with their bound values, one clause per
/// non-empty filter field.
#[derive(Debug, Default)]
struct Predicates {
    clauses: Vec<&'static str>,
    params: Vec<BindValue>,
}

impl Predicates {
    fn push_eq(&mut self, clause: &'static str, value: &Option<String>) {
        if let Some(v) = value {
            if !v.is_empty() {
                self.clauses.push(clause);
                self.params.push(BindValue::Text(v.clone()));
            }
        }
    }

    fn push_time(&mut self, clause: &'static str, value: Option<u64>) {
        if let Some(v) = value {
            self.clauses.push(clause);
            self.params.push(BindValue::Uint(v));
        }
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn build_predicates(opts: &QueryOptions) -> Predicates {
    let mut preds = Predicates::default();
    preds.push_eq("Service = ?", &opts.service);
    preds.push_eq("Level = ?", &opts.level);
    preds.push_eq("Host = ?", &opts.host);
    preds.push_eq("RequestID = ?", &opts.request_id);
    if let Some(search) = &opts.search {
        if !search.is_empty() {
            preds.clauses.push("Message LIKE ?");
            preds.params.push(BindValue::Text(format!("%{search}%")));
        }
    }
    // Both bounds inclusive, each independently optional.
    preds.push_time("EventTimeMs >= ?", opts.start_time);
    preds.push_time("EventTimeMs <= ?", opts.end_time);
    preds
}

fn select_sql(table: &str, preds: &Predicates, order: SortOrder, window: PageWindow) -> String {
    format!(
        "SELECT {EVENT_COLUMNS} FROM {table}{} ORDER BY EventTimeMs {} LIMIT {} OFFSET {}",
        preds.where_sql(),
        order.as_sql(),
        window.limit,
        window.offset,
    )
}

fn count_sql(table: &str, preds: &Predicates) -> String {
    format!("SELECT count() FROM {table}{}", preds.where_sql())
}

/// Table names come from configuration, not from callers, but they are
/// still spliced into DDL/DML text and get the same whitelist treatment.
fn validate_table(name: &str) -> Result<()> {
    let well_formed = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if well_formed {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("invalid table name {name:?}")))
    }
}

pub struct EventStore {
    client: Client,
    table: String,
    op_timeout: Duration,
}

impl EventStore {
    /// Connects to ClickHouse and verifies liveness under the configured
    /// connect deadline, which is shorter than the per-operation budget.
    /// Creates the events table if it does not exist yet.
    pub async fn connect(cfg: &ClickHouseConfig) -> Result<Self> {
        validate_table(&cfg.table)?;

        info!(url = %cfg.url, database = %cfg.database, "connecting to ClickHouse");

        let client = Client::default()
            .with_url(&cfg.url)
            .with_database(&cfg.database)
            .with_user(&cfg.username)
            .with_password(&cfg.password)
            .with_compression(Compression::Lz4);

        tokio::time::timeout(
            cfg.connect_timeout(),
            client.query("SELECT 1").fetch_one::<u8>(),
        )
        .await
        .map_err(|_| PipelineError::Timeout(cfg.connect_timeout()))??;

        let store = EventStore {
            client,
            table: cfg.table.clone(),
            op_timeout: cfg.query_timeout(),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    async fn ensure_table(&self) -> Result<()> {
        let ddl = format!(
            r#"CREATE TABLE IF NOT EXISTS {table} (
                EventTimeMs UInt64,
                Service LowCardinality(String),
                Level LowCardinality(String),
                Message String,
                Host LowCardinality(String),
                RequestID String
            ) ENGINE = MergeTree()
            PARTITION BY toYYYYMM(toDateTime(EventTimeMs / 1000))
            ORDER BY EventTimeMs"#,
            table = self.table,
        );
        self.deadline(self.client.query(&ddl).execute()).await?;
        debug!(table = %self.table, "events table ready");
        Ok(())
    }

    async fn deadline<T>(&self, fut: impl Future<Output = clickhouse::error::Result<T>>) -> Result<T> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| PipelineError::Timeout(self.op_timeout))?
            .map_err(PipelineError::from)
    }

    /// Appends one event as a single-row batch. Errors surface to the
    /// caller and are not retried here.
    pub async fn insert(&self, event: &Event) -> Result<()> {
        let row = EventRow::from(event);
        let fut = async {
            let mut insert = self.client.insert(&self.table)?;
            insert.write(&row).await?;
            insert.end().await
        };
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| PipelineError::Timeout(self.op_timeout))?
            .map_err(PipelineError::from)
    }

    /// Runs a filtered, sorted, paginated read. The row count for the
    /// pagination metadata comes from a separate count query over the same
    /// predicate set, independent of the page returned.
    pub async fn query(&self, opts: &QueryOptions) -> Result<PaginatedResponse> {
        let window = opts.page_window()?;
        let preds = build_predicates(opts);

        let count = count_sql(&self.table, &preds);
        let mut count_query = self.client.query(&count);
        for param in &preds.params {
            count_query = match param {
                BindValue::Text(s) => count_query.bind(s.as_str()),
                BindValue::Uint(n) => count_query.bind(*n),
            };
        }
        let total: u64 = self.deadline(count_query.fetch_one()).await?;

        let select = select_sql(&self.table, &preds, opts.sort_direction(), window);
        debug!(sql = %select, params = preds.params.len(), "executing event query");
        let mut select_query = self.client.query(&select);
        for param in &preds.params {
            select_query = match param {
                BindValue::Text(s) => select_query.bind(s.as_str()),
                BindValue::Uint(n) => select_query.bind(*n),
            };
        }
        let rows: Vec<EventRow> = self.deadline(select_query.fetch_all()).await?;

        let data = rows.into_iter().map(Event::from).collect();
        Ok(PaginatedResponse::new(data, total, window))
    }
}
