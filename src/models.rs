use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{PipelineError, Result};

/// Effective page size when the caller supplies none (or zero).
pub const DEFAULT_LIMIT: u64 = 100;

/// Canonical telemetry event. Created once at ingestion, immutable afterwards.
///
/// All fields default so partial ingest bodies still decode; the front-end
/// fills in the gaps via [`Event::normalize`] before the event moves on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Event {
    pub event_time_ms: u64,
    pub service: String,
    pub level: String,
    pub message: String,
    pub host: String,
    pub request_id: String,
}

impl Event {
    /// Enforces the ingestion invariants: a non-empty request id (caller
    /// value preserved, otherwise freshly generated) and a non-zero event
    /// time, stamped at ingestion when the producer did not supply one.
    pub fn normalize(&mut self) {
        if self.request_id.is_empty() {
            self.request_id = Uuid::new_v4().to_string();
        }
        if self.event_time_ms == 0 {
            self.event_time_ms = Utc::now().timestamp_millis() as u64;
        }
    }
}

/// Sort direction for the single supported sort key (event time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Filter, sort and pagination options for querying stored events.
///
/// Equality filters and the substring search are each optional; empty
/// strings count as absent. Exactly one pagination addressing mode is
/// honored per request, see [`QueryOptions::page_window`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub service: Option<String>,
    pub level: Option<String>,
    pub host: Option<String>,
    pub request_id: Option<String>,
    pub search: Option<String>,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub sort_order: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl QueryOptions {
    /// `desc` (case-insensitive) sorts newest-first; anything else,
    /// including unrecognized values, falls back to ascending.
    pub fn sort_direction(&self) -> SortOrder {
        match self.sort_order.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("desc") => SortOrder::Descending,
            _ => SortOrder::Ascending,
        }
    }

    /// Resolves the two pagination conventions into the canonical
    /// offset+limit window.
    ///
    /// `page`/`per_page` is converted via `offset = (page - 1) * per_page`.
    /// Supplying both pairs is rejected unless they describe the same
    /// window, so neither convention is ever silently preferred.
    pub fn page_window(&self) -> Result<PageWindow> {
        let offset_mode = self.limit.is_some() || self.offset.is_some();
        let page_mode = self.page.is_some() || self.per_page.is_some();

        let window = if page_mode {
            let per_page = effective_limit(self.per_page);
            let page = self.page.unwrap_or(1).max(1);
            // Both values are caller-controlled; an overflowing window is a
            // bad request, not a wrapped offset.
            let offset = (page - 1).checked_mul(per_page).ok_or_else(|| {
                PipelineError::InvalidQuery("pagination window out of range".to_string())
            })?;
            PageWindow {
                limit: per_page,
                offset,
            }
        } else {
            PageWindow {
                limit: effective_limit(self.limit),
                offset: self.offset.unwrap_or(0),
            }
        };

        if offset_mode && page_mode {
            let limit = effective_limit(self.limit);
            let offset = self.offset.unwrap_or(0);
            if limit != window.limit || offset != window.offset {
                return Err(PipelineError::InvalidQuery(
                    "conflicting pagination: supply limit/offset or page/per_page, not both"
                        .to_string(),
                ));
            }
        }

        Ok(window)
    }
}

fn effective_limit(requested: Option<u64>) -> u64 {
    match requested {
        Some(n) if n > 0 => n,
        _ => DEFAULT_LIMIT,
    }
}

/// Canonical pagination window: row offset plus page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: u64,
    pub offset: u64,
}

/// One page of query results plus metadata about the full result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse {
    pub data: Vec<Event>,
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
    pub from: u64,
    pub to: u64,
}

impl PaginatedResponse {
    /// `total` comes from an independent count query, so the metadata stays
    /// correct even when the returned page is truncated.
    pub fn new(data: Vec<Event>, total: u64, window: PageWindow) -> Self {
        let per_page = window.limit.max(1);
        let (from, to) = if data.is_empty() {
            (0, 0)
        } else {
            (
                window.offset.saturating_add(1),
                window.offset.saturating_add(data.len() as u64),
            )
        };
        PaginatedResponse {
            total,
            per_page,
            current_page: (window.offset / per_page).saturating_add(1),
            last_page: total.div_ceil(per_page),
            from,
            to,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            event_time_ms: 1_700_000_000_123,
            service: "api".to_string(),
            level: "error".to_string(),
            message: "boom".to_string(),
            host: "h1".to_string(),
            request_id: "req-42".to_string(),
        }
    }

    #[test]
    fn event_codec_round_trip() {
        let event = sample_event();
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_decodes_with_missing_fields() {
        let decoded: Event = serde_json::from_str(
            r#"{"service":"api","level":"error","message":"boom","host":"h1"}"#,
        )
        .unwrap();
        assert_eq!(decoded.service, "api");
        assert_eq!(decoded.event_time_ms, 0);
        assert!(decoded.request_id.is_empty());
    }

    #[test]
    fn normalize_fills_request_id_and_time() {
        let mut event = Event::default();
        event.normalize();
        assert!(!event.request_id.is_empty());
        assert!(event.event_time_ms > 0);
    }

    #[test]
    fn normalize_preserves_caller_values() {
        let mut event = sample_event();
        event.normalize();
        assert_eq!(event.request_id, "req-42");
        assert_eq!(event.event_time_ms, 1_700_000_000_123);
    }

    #[test]
    fn sort_direction_resolution() {
        let mut opts = QueryOptions::default();
        assert_eq!(opts.sort_direction(), SortOrder::Ascending);

        opts.sort_order = Some("DESC".to_string());
        assert_eq!(opts.sort_direction(), SortOrder::Descending);

        opts.sort_order = Some("desc".to_string());
        assert_eq!(opts.sort_direction(), SortOrder::Descending);

        opts.sort_order = Some("sideways".to_string());
        assert_eq!(opts.sort_direction(), SortOrder::Ascending);
    }

    #[test]
    fn default_window_when_nothing_requested() {
        let window = QueryOptions::default().page_window().unwrap();
        assert_eq!(window.limit, DEFAULT_LIMIT);
        assert_eq!(window.offset, 0);
    }

    #[test]
    fn zero_limit_falls_back_to_default() {
        let opts = QueryOptions {
            limit: Some(0),
            ..Default::default()
        };
        assert_eq!(opts.page_window().unwrap().limit, DEFAULT_LIMIT);
    }

    #[test]
    fn page_mode_converts_to_offset() {
        let opts = QueryOptions {
            page: Some(5),
            per_page: Some(50),
            ..Default::default()
        };
        let window = opts.page_window().unwrap();
        assert_eq!(window.limit, 50);
        assert_eq!(window.offset, 200);
    }

    #[test]
    fn conflicting_pagination_modes_rejected() {
        let opts = QueryOptions {
            page: Some(2),
            per_page: Some(10),
            limit: Some(25),
            offset: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            opts.page_window(),
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn consistent_pagination_modes_accepted() {
        let opts = QueryOptions {
            page: Some(3),
            per_page: Some(10),
            limit: Some(10),
            offset: Some(20),
            ..Default::default()
        };
        let window = opts.page_window().unwrap();
        assert_eq!(window.limit, 10);
        assert_eq!(window.offset, 20);
    }

    #[test]
    fn pagination_metadata_for_truncated_last_page() {
        // 237 matching rows, 50 per page; page 5 holds the final 37.
        let rows: Vec<Event> = (0..37).map(|_| sample_event()).collect();
        let window = QueryOptions {
            page: Some(5),
            per_page: Some(50),
            ..Default::default()
        }
        .page_window()
        .unwrap();

        let page = PaginatedResponse::new(rows, 237, window);
        assert_eq!(page.per_page, 50);
        assert_eq!(page.current_page, 5);
        assert_eq!(page.last_page, 5);
        assert_eq!(page.from, 201);
        assert_eq!(page.to, 237);
        assert_eq!(page.data.len(), 37);
    }

    #[test]
    fn overflowing_page_window_rejected() {
        let opts = QueryOptions {
            page: Some(u64::MAX),
            per_page: Some(100),
            ..Default::default()
        };
        assert!(matches!(
            opts.page_window(),
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn pagination_metadata_saturates_at_extreme_offsets() {
        let window = PageWindow {
            limit: 100,
            offset: u64::MAX - 10,
        };
        let rows: Vec<Event> = (0..20).map(|_| sample_event()).collect();
        let page = PaginatedResponse::new(rows, 50, window);
        assert_eq!(page.from, u64::MAX - 9);
        assert_eq!(page.to, u64::MAX);
    }

    #[test]
    fn pagination_metadata_for_empty_page() {
        let window = PageWindow {
            limit: 50,
            offset: 500,
        };
        let page = PaginatedResponse::new(Vec::new(), 237, window);
        assert_eq!(page.from, 0);
        assert_eq!(page.to, 0);
        assert_eq!(page.last_page, 5);
    }
}
