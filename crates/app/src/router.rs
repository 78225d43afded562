use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::enrich::Enricher;
use crate::readiness::Readiness;
use crate::{telemetry, webhook};

pub const NO_GET_HANDLER: &str = "There is no GET Handler";

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    webhook_secret: Arc<[u8]>,
    enricher: Enricher,
    readiness: Readiness,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        webhook_secret: Arc<[u8]>,
        enricher: Enricher,
        readiness: Readiness,
    ) -> Self {
        Self {
            metrics,
            webhook_secret,
            enricher,
            readiness,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn webhook_secret(&self) -> Arc<[u8]> {
        self.webhook_secret.clone()
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(webhook::handle))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn index() -> &'static str {
    NO_GET_HANDLER
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.readiness().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
