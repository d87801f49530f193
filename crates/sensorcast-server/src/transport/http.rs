//! HTTP API: forecast queries, ingestion and live events.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use sensorcast::SensorType;

use crate::capture::{RawCaptureLog, DEFAULT_LATEST};
use crate::events::{self, EventBus, PipelineEvent};
use crate::pipeline::ForecastPipeline;
use crate::publisher::PublishContext;
use crate::transport::feed;
use crate::types::{parse_payload, ServerError, ServerResult};

/// Shared state behind every handler.
pub struct AppState {
    pub pipeline: Arc<ForecastPipeline>,
    pub capture: Arc<RawCaptureLog>,
    pub publish: Arc<PublishContext>,
    pub events: Arc<EventBus>,
    pub data_dir: PathBuf,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        pipeline: Arc<ForecastPipeline>,
        capture: Arc<RawCaptureLog>,
        publish: Arc<PublishContext>,
        data_dir: PathBuf,
    ) -> Self {
        let events = Arc::clone(pipeline.events());
        Self {
            pipeline,
            capture,
            publish,
            events,
            data_dir,
            started_at: Instant::now(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the router with all endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/predictions", get(predictions))
        .route("/api/get_predictions", get(legacy_predictions))
        .route("/history", get(history))
        .route("/readings", post(ingest))
        .route("/latest", get(latest))
        .route("/latest-published", get(latest_published))
        .route("/events", get(events_sse))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[derive(Deserialize, Default)]
struct SensorParams {
    #[serde(rename = "sensorType")]
    sensor_type: Option<String>,
}

impl SensorParams {
    fn sensor(&self) -> ServerResult<SensorType> {
        let name = self
            .sensor_type
            .as_deref()
            .ok_or_else(|| ServerError::InvalidParams("missing 'sensorType'".to_string()))?;
        Ok(name.parse()?)
    }
}

#[derive(Deserialize, Default)]
struct TopicParams {
    topic: Option<String>,
}

#[derive(Deserialize, Default)]
struct LatestParams {
    n: Option<usize>,
}

/// Run blocking store access off the async workers.
async fn blocking<T, F>(f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServerError::Internal(format!("task failed: {e}")))?
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pipeline = Arc::clone(&state.pipeline);
    let sensors = blocking(move || Ok(pipeline.sensors_with_forecasts()))
        .await
        .unwrap_or_default();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_s": state.started_at.elapsed().as_secs_f64(),
        "data_dir": state.data_dir.display().to_string(),
        "sensors": sensors,
    }))
}

async fn predictions(
    Query(params): Query<SensorParams>,
    State(state): State<Arc<AppState>>,
) -> ServerResult<Response> {
    let sensor = params.sensor()?;
    forecast_table(&state, sensor).await
}

/// `?topic=sensor/<name>` alias of `/predictions`.
async fn legacy_predictions(
    Query(params): Query<TopicParams>,
    State(state): State<Arc<AppState>>,
) -> ServerResult<Response> {
    let topic = params
        .topic
        .ok_or_else(|| ServerError::InvalidParams("missing 'topic'".to_string()))?;
    let sensor: SensorType = topic.parse()?;
    forecast_table(&state, sensor).await
}

async fn forecast_table(state: &Arc<AppState>, sensor: SensorType) -> ServerResult<Response> {
    let pipeline = Arc::clone(&state.pipeline);
    let records = blocking(move || pipeline.predictions(sensor)).await?;
    Ok(Json(records).into_response())
}

async fn history(
    Query(params): Query<SensorParams>,
    State(state): State<Arc<AppState>>,
) -> ServerResult<Response> {
    let sensor = params.sensor()?;
    let pipeline = Arc::clone(&state.pipeline);
    let readings = blocking(move || pipeline.history(sensor)).await?;
    Ok(Json(readings).into_response())
}

/// Accept a feed payload over HTTP and report per-reading outcomes.
async fn ingest(State(state): State<Arc<AppState>>, body: String) -> ServerResult<Response> {
    let payload = parse_payload(&body)?;
    let report = feed::process_payload(&state.pipeline, &state.capture, payload).await?;
    Ok(Json(report).into_response())
}

async fn latest(
    Query(params): Query<LatestParams>,
    State(state): State<Arc<AppState>>,
) -> ServerResult<Response> {
    let n = params.n.unwrap_or(DEFAULT_LATEST);
    let capture = Arc::clone(&state.capture);
    let entries = blocking(move || capture.latest(n)).await?;
    Ok(Json(entries).into_response())
}

async fn latest_published(State(state): State<Arc<AppState>>) -> ServerResult<Response> {
    let message = state
        .publish
        .latest()
        .ok_or_else(|| ServerError::NotFound("nothing published yet".to_string()))?;
    Ok(Json(message).into_response())
}

/// Server-Sent Events stream of pipeline events, optionally per sensor type.
///
/// New subscribers first receive the latest published message, if any.
async fn events_sse(
    Query(params): Query<SensorParams>,
    State(state): State<Arc<AppState>>,
) -> ServerResult<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>> {
    let sensor_filter = match params.sensor_type {
        Some(_) => Some(params.sensor()?),
        None => None,
    };
    let mut rx = state.events.subscribe();
    let replay = state.publish.latest().map(|m| PipelineEvent::MessagePublished {
        timestamp: m.timestamp,
        payload: m.message,
    });

    let stream = async_stream::stream! {
        if let Some(event) = replay {
            if sensor_filter.map_or(true, |s| events::event_matches_sensor(&event, s)) {
                if let Ok(json) = serde_json::to_string(&event) {
                    yield Ok(Event::default().data(json));
                }
            }
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(sensor) = sensor_filter {
                        if !events::event_matches_sensor(&event, sensor) {
                            continue;
                        }
                    }
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "SSE subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
