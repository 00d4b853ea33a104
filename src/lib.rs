//! Comments API - comment storage with correlated traces, logs and metrics
//! for every request.

pub mod config;
pub mod error;
pub mod handlers;
pub mod instrument;
pub mod models;
pub mod openapi;
pub mod schema;
pub mod store;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use error::ApiError;
use instrument::Instrumentation;
use store::CommentStore;
use telemetry::MetricsState;

pub const CREATE_COMMENT_ROUTE: &str = "/api/comment/new";
pub const LIST_COMMENTS_ROUTE: &str = "/api/comment/list/{content_id}";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CommentStore>,
    pub metrics: MetricsState,
}

impl AppState {
    pub fn new(store: Arc<dyn CommentStore>, metrics: MetricsState) -> Self {
        Self { store, metrics }
    }
}

/// Builds the service. Each comment route carries its own instrumentation
/// layer labelled with the route template.
pub fn create_router(
    state: AppState,
    instrumentation: &Instrumentation,
    config: &config::Config,
) -> Router {
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let metrics_state = state.metrics.clone();

    let comment_routes = Router::new()
        .route(
            CREATE_COMMENT_ROUTE,
            post(handlers::comments::create_comment)
                .layer(instrumentation.layer(CREATE_COMMENT_ROUTE)),
        )
        .route(
            LIST_COMMENTS_ROUTE,
            get(handlers::comments::list_comments)
                .layer(instrumentation.layer(LIST_COMMENTS_ROUTE)),
        )
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .route(
            "/metrics",
            get(telemetry::metrics_handler).with_state(metrics_state),
        )
        .with_state(state);

    Router::new()
        .merge(openapi::openapi_router())
        .merge(comment_routes)
        .merge(public_routes)
        .fallback(fallback_handler)
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
}

async fn fallback_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ApiError::new("Not Found")))
}

pub use config::Config;
pub use instrument::{InstrumentLayer, Outcome, ReportStatus};
pub use telemetry::{init_telemetry, init_tracing, CorrelationContext, Telemetry, TelemetryGuard};
