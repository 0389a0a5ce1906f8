//! HTTP query surface for the hub.
//!
//! Read endpoints expose the query API as JSON; `POST /api/ingest` queues a
//! decoded result; `GET /api/realtime` streams `sensor_update` and
//! `stats_update` messages as server-sent events.
//!
//! # Architecture
//!
//! ```text
//! UI ──→ GET /api/... ──→ HubHandle::call_async ──→ hub thread
//! UI ←── SSE /api/realtime ←── broadcast channel ←── EventBus
//! ```

use crate::error::HubError;
use crate::events::RealtimeMessage;
use crate::runtime::HubHandle;
use crate::sensor::{CompositeId, RawSignalResult, SensorType};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Shared server state
pub struct ServerState {
    hub: HubHandle,
    /// Identifies this agent process in health responses
    instance_id: String,
    hostname: String,
}

impl ServerState {
    pub fn new(hub: HubHandle) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            hub,
            instance_id: uuid::Uuid::new_v4().to_string(),
            hostname,
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub hostname: String,
    pub instance_id: String,
    pub hub_running: bool,
}

/// Response from ingest endpoint
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub id: Option<String>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn hub_error(e: HubError) -> ApiError {
    tracing::error!("Hub request failed: {}", e);
    api_error(StatusCode::SERVICE_UNAVAILABLE, "HUB_UNAVAILABLE", e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct SensorsQuery {
    #[serde(rename = "type")]
    pub sensor_type: Option<String>,
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: state.hostname.clone(),
        instance_id: state.instance_id.clone(),
        hub_running: state.hub.is_running(),
    })
}

/// GET /api/sensors?type=T
async fn sensors(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SensorsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Some(tag) = query.sensor_type else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "MISSING_TYPE",
            "query parameter 'type' is required",
        ));
    };
    let sensor_type: SensorType = tag
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, "INVALID_TYPE", e))?;

    let candidates = state
        .hub
        .call_async(move |hub| hub.query().sensors(sensor_type))
        .await
        .map_err(hub_error)?;
    Ok(Json(serde_json::to_value(candidates).unwrap_or_default()))
}

/// GET /api/sensors/all
async fn all_sensors(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let views = state
        .hub
        .call_async(|hub| hub.query().all_sensors())
        .await
        .map_err(hub_error)?;
    Ok(Json(serde_json::to_value(views).unwrap_or_default()))
}

/// GET /api/sensors/:id/values
async fn sensor_values(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id: CompositeId = id
        .parse()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_ID", format!("{e}")))?;

    let values = state
        .hub
        .call_async(move |hub| hub.query().sensor_values(&id))
        .await
        .map_err(hub_error)?;
    Ok(Json(serde_json::to_value(values).unwrap_or_default()))
}

/// GET /api/protocols
async fn protocols(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let infos = state
        .hub
        .call_async(|hub| hub.query().protocols())
        .await
        .map_err(hub_error)?;
    Ok(Json(serde_json::to_value(infos).unwrap_or_default()))
}

/// GET /api/statistics
async fn statistics(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = state
        .hub
        .call_async(|hub| hub.query().statistics())
        .await
        .map_err(hub_error)?;
    Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
}

/// POST /api/ingest
///
/// Accepts one decoded result and queues it on the hub.
async fn ingest(
    State(state): State<Arc<ServerState>>,
    Json(raw): Json<RawSignalResult>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let id = raw.composite_id().map(|id| id.to_string());
    state.hub.ingest(raw).map_err(hub_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "queued".to_string(),
            id,
        }),
    ))
}

/// GET /api/realtime
async fn realtime(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.hub.realtime();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    if let Some(event) = to_event(&message) {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Realtime client lagged, skipped {} message(s)", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(message: &RealtimeMessage) -> Option<Event> {
    match Event::default().event(message.name()).json_data(message) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Could not encode realtime message: {}", e);
            None
        }
    }
}

/// Build the router without binding a listener.
pub fn router(hub: HubHandle) -> Router {
    let state = Arc::new(ServerState::new(hub));

    Router::new()
        .route("/health", get(health))
        .route("/api/sensors", get(sensors))
        .route("/api/sensors/all", get(all_sensors))
        .route("/api/sensors/:id/values", get(sensor_values))
        .route("/api/protocols", get(protocols))
        .route("/api/statistics", get(statistics))
        .route("/api/ingest", post(ingest))
        .route("/api/realtime", get(realtime))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    hub: HubHandle,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(hub);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Weather sensor server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
