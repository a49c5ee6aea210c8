//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{OrderId, ReferenceId};
use order_store::{Order, OrderStatus, OrderStore, SubscriptionStore};
use saga::DeliveryDetails;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub reference_id: String,
    #[serde(flatten)]
    pub details: DeliveryDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclineOrderRequest {
    #[serde(default)]
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub status: bool,
    pub order: Order,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub status: bool,
    pub orders: Vec<Order>,
}

fn found(order: Order) -> Json<OrderResponse> {
    Json(OrderResponse {
        status: true,
        order,
    })
}

fn found_or_no_content(order: Option<Order>) -> Response {
    match order {
        Some(order) => found(order).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::BadRequest("orderId is required".to_string()));
    }
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid orderId: {e}")))
}

// -- Handlers --

/// POST /order/create: Run the order saga for the caller's basket.
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn create<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let Json(req) = payload?;
    let order = state
        .orchestrator
        .create_order(&user_id, &ReferenceId::new(req.reference_id), &req.details)
        .await?;
    Ok(found(order))
}

/// POST /order/decline: Cancel an order and compensate it.
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn decline<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    payload: Result<Json<DeclineOrderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let Json(req) = payload?;
    let order_id = parse_order_id(&req.order_id)?;
    let order = state.orchestrator.decline_order(&user_id, order_id).await?;
    Ok(found(order))
}

/// GET /orders?status=: List the caller's orders.
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn list<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let status = query
        .status
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let orders = state.orchestrator.list_orders(&user_id, status).await?;
    Ok(Json(OrderListResponse {
        status: true,
        orders,
    }))
}

/// GET /order/{id}: Load one of the caller's orders; 204 if absent.
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn get<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orchestrator.get_order(order_id, &user_id).await?;
    Ok(found_or_no_content(order))
}

/// GET /order-by-reference/{reference_id}: Load an order by the caller's
/// reference; 204 if absent.
#[tracing::instrument(skip_all, fields(user_id = %user_id))]
pub async fn get_by_reference<S: OrderStore + SubscriptionStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(reference_id): Path<String>,
) -> Result<Response, ApiError> {
    let order = state
        .orchestrator
        .get_order_by_reference(&ReferenceId::new(reference_id), &user_id)
        .await?;
    Ok(found_or_no_content(order))
}
