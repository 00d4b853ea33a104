//! Common test utilities for integration tests.
//!
//! Each [`TestApp`] runs the full router on its own local port, backed by an
//! in-memory store and recording telemetry sinks, so tests can assert on
//! every span, log record and metric a request produced.

#![allow(dead_code)]

use std::sync::Arc;

use reqwest::{Client, Response};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use comments_api::{
    create_router,
    instrument::Instrumentation,
    models::Comment,
    store::InMemoryCommentStore,
    telemetry::{MetricsState, PrometheusMetrics, Telemetry, TelemetryCapture, UPKEEP_INTERVAL},
    AppState, Config,
};

pub struct TestApp {
    pub client: Client,
    pub base_url: String,
    pub store: Arc<InMemoryCommentStore>,
    pub capture: TelemetryCapture,
}

impl TestApp {
    /// Spawns the service with recording sinks and the pull registry disabled.
    pub async fn spawn() -> Self {
        let capture = TelemetryCapture::new();
        Self::spawn_with(capture.clone(), capture.telemetry(), MetricsState::disabled()).await
    }

    /// Spawns the service with a real Prometheus registry behind `/metrics`.
    /// Traces, logs and push metrics are still recorded.
    pub async fn spawn_with_prometheus() -> Self {
        let capture = TelemetryCapture::new();
        let registry = PrometheusMetrics::new().expect("Failed to build registry");
        let metrics = MetricsState::new(&registry);
        registry.spawn_upkeep(UPKEEP_INTERVAL);
        let telemetry = Telemetry::builder()
            .traces(capture.traces.clone())
            .logs(capture.logs.clone())
            .push_metrics(capture.push.clone())
            .pull_metrics(registry)
            .build();
        Self::spawn_with(capture, telemetry, metrics).await
    }

    async fn spawn_with(
        capture: TelemetryCapture,
        telemetry: Telemetry,
        metrics: MetricsState,
    ) -> Self {
        let store = Arc::new(InMemoryCommentStore::new());
        let config = Config::default_for_testing();
        let state = AppState::new(store.clone(), metrics);
        let app = create_router(state, &Instrumentation::new(telemetry), &config);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            client: Client::new(),
            base_url: format!("http://127.0.0.1:{}", port),
            store,
            capture,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send request")
    }

    pub async fn create_comment(&self, email: &str, comment: &str, content_id: i32) -> Response {
        self.post_json(
            "/api/comment/new",
            &json!({
                "email": email,
                "comment": comment,
                "content_id": content_id,
            }),
        )
        .await
    }

    pub async fn list_comments(&self, content_id: i32) -> Vec<Comment> {
        let response = self.get(&format!("/api/comment/list/{}", content_id)).await;
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.expect("Failed to parse comment list")
    }
}
