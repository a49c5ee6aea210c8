//! Operational endpoints: health and Prometheus metrics.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use message_bus::MessageBus;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{OrderStore, SubscriptionStore};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub bus_connected: bool,
}

/// GET /health: 200 while the bus is connected, 503 otherwise.
pub async fn health<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    let bus_connected = state.bus().is_connected();
    let (code, status) = if bus_connected {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status,
            bus_connected,
        }),
    )
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
