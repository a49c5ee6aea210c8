//! HTTP API server for the order saga orchestrator.
//!
//! Exposes order and subscription endpoints under [`API_PREFIX`], plus
//! `/health` and Prometheus `/metrics`.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{OrderStore, SubscriptionStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, create_default_state};

/// Path prefix of the order and subscription endpoints.
pub const API_PREFIX: &str = "/api/orders/v1";

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router
where
    S: OrderStore + SubscriptionStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::prometheus))
        .with_state(metrics_handle);

    let api = Router::new()
        .route("/order/create", post(routes::orders::create::<S>))
        .route("/order/decline", post(routes::orders::decline::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/order/{id}", get(routes::orders::get::<S>))
        .route(
            "/order-by-reference/{reference_id}",
            get(routes::orders::get_by_reference::<S>),
        )
        .route(
            "/subscription",
            post(routes::subscriptions::update::<S>).get(routes::subscriptions::status::<S>),
        )
        .route("/subscriptions", get(routes::subscriptions::list::<S>));

    Router::new()
        .nest(API_PREFIX, api)
        .route("/health", get(routes::ops::health::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
