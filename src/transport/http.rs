//! HTTP transport: POST ingestion and the query read path on one router.
//! Each inbound connection is served concurrently by the runtime.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::{EventHandler, EventTransport, HandlerSlot};
use crate::config::ServerConfig;
use crate::errors::{PipelineError, Result};
use crate::models::{Event, PaginatedResponse, QueryOptions};
use crate::stats::PipelineStats;
use crate::storage::EventStore;

/// HTTP-facing error with a status code matching the error class.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidQuery(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub handler: HandlerSlot,
    /// Present only when this process also serves the query path.
    pub store: Option<Arc<EventStore>>,
    pub stats: Arc<PipelineStats>,
}

pub struct HttpTransport {
    addr: SocketAddr,
    path: String,
    state: AppState,
    shutdown: CancellationToken,
}

impl HttpTransport {
    pub fn new(
        cfg: &ServerConfig,
        store: Option<Arc<EventStore>>,
        stats: Arc<PipelineStats>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
            .parse()
            .map_err(|e| PipelineError::Config(format!("invalid listen address: {e}")))?;
        Ok(HttpTransport {
            addr,
            path: cfg.ingest_path.clone(),
            state: AppState {
                handler: HandlerSlot::default(),
                store,
                stats,
            },
            shutdown,
        })
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn start(&self) -> Result<()> {
        let app = router(self.state.clone(), &self.path);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, path = %self.path, "http transport listening");

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %err, "http server terminated");
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        info!("stopping http transport");
        self.shutdown.cancel();
        Ok(())
    }

    fn set_handler(&self, handler: EventHandler) {
        self.state.handler.replace(handler);
    }
}

pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, post(ingest_event).get(query_events))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

/// `202 Accepted` only when the handler itself reports success; malformed
/// bodies are rejected with 400 and never reach the handler.
async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let handler = state
        .handler
        .current()
        .ok_or_else(|| ApiError::Internal("event handler not configured".to_string()))?;

    let mut event: Event = serde_json::from_slice(&body).map_err(|err| {
        state.stats.record_error();
        warn!(error = %err, "rejecting malformed event body");
        ApiError::BadRequest(format!("invalid event body: {err}"))
    })?;
    event.normalize();

    handler(event).await.map_err(|err| {
        state.stats.record_error();
        ApiError::Internal(format!("failed to process event: {err}"))
    })?;

    state.stats.record_processed();
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))))
}

async fn query_events(
    State(state): State<AppState>,
    Query(opts): Query<QueryOptions>,
) -> std::result::Result<Json<PaginatedResponse>, ApiError> {
    let store = state
        .store
        .as_ref()
        .ok_or_else(|| ApiError::Internal("query path not configured".to_string()))?;
    let page = store.query(&opts).await?;
    Ok(Json(page))
}
