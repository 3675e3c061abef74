//! Axum router and all HTTP handlers for glcmd-daemon.
//!
//! `build_router` wires the bare routes so the scenario tests in `tests/`
//! can drive them via `tower::ServiceExt::oneshot`; `build_app` is what
//! `main.rs` serves, with the middleware stack attached. The SSE route is
//! deliberately outside the timeout and request-logging layers because the
//! connection is long-lived.

use std::any::Any;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{BoxError, Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use glcmd_broker::{Event as BrokerEvent, EventBroker, EventKind};
use glcmd_db::MeasurementFilter;
use glcmd_schemas::SensorView;
use glcmd_service::ServiceError;
use http_body_util::Full;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, Level};
use uuid::Uuid;

use crate::api_types::{
    ApiError, DataResponse, ErrorBody, ErrorResponse, ListResponse, MetricsResponse, Pagination,
    SensorStatsResponse,
};
use crate::health;
use crate::state::{uptime_secs, AppState};

/// Deadline for every REST request. `/v1/stream` is exempt.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

// ---------------------------------------------------------------------------
// Routers
// ---------------------------------------------------------------------------

fn rest_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics))
        .route("/v1/glucose/latest", get(glucose_latest))
        .route("/v1/glucose", get(glucose_list))
        .route("/v1/glucose/stats", get(glucose_stats))
        .route("/v1/sensor/latest", get(sensor_latest))
        .route("/v1/sensor", get(sensor_list))
        .route("/v1/sensor/stats", get(sensor_stats))
        .with_state(state)
}

fn stream_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/stream", get(stream_handler))
        .with_state(state)
}

/// Bare router without middleware, for in-process tests.
pub fn build_router(state: Arc<AppState>) -> Router {
    rest_routes(Arc::clone(&state)).merge(stream_routes(state))
}

/// The served application: REST routes behind the timeout and trace layers,
/// the stream route outside them, recovery and CORS around everything.
pub fn build_app(state: Arc<AppState>) -> Router {
    let rest = rest_routes(Arc::clone(&state))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(REQUEST_TIMEOUT),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    rest.merge(stream_routes(state))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_open())
        .layer(middleware::from_fn(preflight_no_content))
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Map middleware failures into the error envelope; an elapsed request
/// deadline is 504, anything else is 500.
pub async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError::timeout().into_response()
    } else {
        error!(error = %err, "middleware failure");
        ApiError::internal().into_response()
    }
}

/// Recovered-panic response: log it, answer 500 with the error envelope.
fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response<Full<Bytes>> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "recovered panic while serving request");

    let body = serde_json::to_string(&ErrorResponse {
        error: ErrorBody {
            code: 500,
            message: "internal server error".to_string(),
        },
    })
    .expect("static error envelope must serialize");

    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::from(body))
        .expect("static response must build")
}

/// CORS: open to any origin, the standard method set, one-hour preflight
/// cache.
fn cors_open() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

/// Preflight responses carry no body, so answer them as 204.
async fn preflight_no_content(req: Request, next: Next) -> Response {
    let is_preflight = req.method() == Method::OPTIONS;
    let mut res = next.run(req).await;
    if is_preflight && res.status() == StatusCode::OK {
        *res.status_mut() = StatusCode::NO_CONTENT;
    }
    res
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health_handler(State(st): State<Arc<AppState>>) -> Response {
    let fetch = st.fetch.read().await.clone();
    let database_connected = glcmd_db::ping(&st.pool).await;
    let report = health::derive_health(
        &fetch,
        database_connected,
        st.fetch_interval,
        Utc::now(),
        uptime_secs(),
    );
    let code = health::http_status(&report);
    (code, Json(DataResponse { data: report })).into_response()
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let fetch = st.fetch.read().await.clone();
    Json(DataResponse {
        data: MetricsResponse {
            uptime_secs: uptime_secs(),
            sse_subscribers: st.broker.subscriber_count(),
            db_pool_size: st.pool.size(),
            db_pool_idle: st.pool.num_idle(),
            consecutive_errors: fetch.consecutive_errors,
            last_fetch_at: fetch.last_fetch_at,
        },
    })
}

// ---------------------------------------------------------------------------
// GET /v1/glucose/latest
// ---------------------------------------------------------------------------

pub(crate) async fn glucose_latest(
    State(st): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let m = st.glucose.latest().await.map_err(|err| match err {
        ServiceError::NotFound => ApiError::not_found("glucose measurement"),
        other => other.into(),
    })?;
    Ok(Json(DataResponse { data: m }))
}

// ---------------------------------------------------------------------------
// GET /v1/glucose
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListParams {
    start: Option<String>,
    end: Option<String>,
    color: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

pub(crate) async fn glucose_list(
    State(st): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let start = parse_opt_time("start", &params.start)?;
    let end = parse_opt_time("end", &params.end)?;
    check_time_range(start, end)?;
    let color = parse_opt_int("color", &params.color)?;
    let kind = parse_opt_int("type", &params.kind)?;
    let limit = parse_limit(&params.limit)?;
    let offset = parse_offset(&params.offset)?;

    let filter = MeasurementFilter {
        start,
        end,
        color,
        kind,
    };
    let (rows, total) = st.glucose.list(filter, limit, offset).await?;
    let pagination = Pagination::new(limit, offset, total, rows.len());
    Ok(Json(ListResponse {
        data: rows,
        pagination,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/glucose/stats
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StatsParams {
    start: Option<String>,
    end: Option<String>,
}

pub(crate) async fn glucose_stats(
    State(st): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, ApiError> {
    // The window is all-or-nothing: a half-open range is almost always a
    // caller bug, so reject it instead of guessing.
    if params.start.is_some() != params.end.is_some() {
        return Err(ApiError::validation(
            "start and end must be supplied together or not at all",
        ));
    }

    let start = parse_opt_time("start", &params.start)?;
    let end = parse_opt_time("end", &params.end)?;
    check_time_range(start, end)?;

    let targets = st.settings.glucose_targets().await.ok();
    let stats = st.glucose.statistics(start, end, targets).await?;
    Ok(Json(DataResponse { data: stats }))
}

// ---------------------------------------------------------------------------
// GET /v1/sensor/latest
// ---------------------------------------------------------------------------

pub(crate) async fn sensor_latest(
    State(st): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sensor = st.sensor.current().await.map_err(|err| match err {
        ServiceError::NotFound => ApiError::not_found("sensor"),
        other => other.into(),
    })?;
    Ok(Json(DataResponse {
        data: sensor.with_status(Utc::now()),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/sensor
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SensorListParams {
    start: Option<String>,
    end: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

pub(crate) async fn sensor_list(
    State(st): State<Arc<AppState>>,
    Query(params): Query<SensorListParams>,
) -> Result<Response, ApiError> {
    let start = parse_opt_time("start", &params.start)?;
    let end = parse_opt_time("end", &params.end)?;
    check_time_range(start, end)?;
    let limit = parse_limit(&params.limit)?;
    let offset = parse_offset(&params.offset)?;

    let (rows, total) = st.sensor.list(start, end, limit, offset).await?;
    let now = Utc::now();
    let views: Vec<SensorView> = rows.into_iter().map(|s| s.with_status(now)).collect();
    let pagination = Pagination::new(limit, offset, total, views.len());
    Ok(Json(ListResponse {
        data: views,
        pagination,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/sensor/stats
// ---------------------------------------------------------------------------

pub(crate) async fn sensor_stats(
    State(st): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let start = parse_opt_time("start", &params.start)?;
    let end = parse_opt_time("end", &params.end)?;
    check_time_range(start, end)?;

    let row = st.sensor.statistics(start, end).await?;
    Ok(Json(DataResponse {
        data: SensorStatsResponse::from(row),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamParams {
    types: Option<String>,
}

pub(crate) async fn stream_handler(
    State(st): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    let kinds = match parse_types(params.types.as_deref()) {
        Ok(kinds) => kinds,
        Err(err) => return err.into_response(),
    };

    let id = Uuid::new_v4();
    let rx = st.broker.subscribe(id, kinds);
    let stream = SubscriberStream {
        id,
        rx: ReceiverStream::new(rx),
        broker: Arc::clone(&st.broker),
    };

    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));

    (headers, Sse::new(stream)).into_response()
}

/// Comma-separated `types` query value; empty or absent subscribes to all.
fn parse_types(raw: Option<&str>) -> Result<Vec<EventKind>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut kinds = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match EventKind::parse(part) {
            Some(kind) => {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
            None => {
                return Err(ApiError::validation(format!(
                    "unknown event type '{part}' (expected glucose, sensor or keepalive)"
                )))
            }
        }
    }
    Ok(kinds)
}

/// Adapter from a broker queue to SSE frames. Dropping the stream (client
/// disconnect, server shutdown) unsubscribes.
struct SubscriberStream {
    id: Uuid,
    rx: ReceiverStream<BrokerEvent>,
    broker: Arc<EventBroker>,
}

impl Stream for SubscriberStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_next(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(Ok(SseEvent::default()
                .event(event.kind.as_str())
                .data(event.data_json())))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for SubscriberStream {
    fn drop(&mut self) {
        self.broker.unsubscribe(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Parameter validation helpers
// ---------------------------------------------------------------------------

fn parse_opt_time(
    name: &str,
    value: &Option<String>,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| {
                ApiError::validation(format!("{name} must be an RFC-3339 timestamp, got '{raw}'"))
            }),
    }
}

fn parse_opt_int(name: &str, value: &Option<String>) -> Result<Option<i32>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i32>()
            .map(Some)
            .map_err(|_| ApiError::validation(format!("{name} must be an integer, got '{raw}'"))),
    }
}

fn parse_limit(value: &Option<String>) -> Result<i64, ApiError> {
    let Some(raw) = value else {
        return Ok(DEFAULT_LIMIT);
    };
    match raw.parse::<i64>() {
        Ok(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(ApiError::validation(format!(
            "limit must be an integer between 1 and {MAX_LIMIT}, got '{raw}'"
        ))),
    }
}

fn parse_offset(value: &Option<String>) -> Result<i64, ApiError> {
    let Some(raw) = value else {
        return Ok(0);
    };
    match raw.parse::<i64>() {
        Ok(offset) if offset >= 0 => Ok(offset),
        _ => Err(ApiError::validation(format!(
            "offset must be a non-negative integer, got '{raw}'"
        ))),
    }
}

fn check_time_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ApiError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ApiError::validation("end must not be before start"));
        }
    }
    Ok(())
}
