use axum::{
    extract::{FromRef, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::relay::{Relay, RelayStats};

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    /// Absent when no recorder was installed (tests, embedded use).
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(relay: Relay, metrics: Option<PrometheusHandle>) -> Self {
        Self { relay, metrics }
    }
}

impl FromRef<AppState> for Relay {
    fn from_ref(state: &AppState) -> Self {
        state.relay.clone()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

pub async fn stats_handler(State(relay): State<Relay>) -> Json<RelayStats> {
    Json(relay.snapshot())
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
