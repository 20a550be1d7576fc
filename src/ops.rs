// src/ops.rs
//! Operator view: aggregate health and Prometheus exposition.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::registry::{AggregateStats, SourceRegistry};
use crate::source::SourceHealth;

#[derive(Clone)]
pub struct OpsState {
    pub registry: Arc<SourceRegistry>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub stats: AggregateStats,
    pub sources: BTreeMap<String, SourceHealth>,
}

pub fn router(registry: Arc<SourceRegistry>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(OpsState { registry, metrics })
}

async fn health(State(state): State<OpsState>) -> Json<HealthOut> {
    Json(HealthOut {
        stats: state.registry.aggregate_stats(),
        sources: state.registry.all_health(),
    })
}

async fn render_metrics(State(state): State<OpsState>) -> impl IntoResponse {
    match state.metrics {
        Some(h) => (StatusCode::OK, h.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
