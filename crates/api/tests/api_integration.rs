//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use message_bus::{InMemoryMessageBus, MessageBus};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderStore, OrderItem, OrderStatus};
use saga::{SagaConfig, SagaMessage};
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const PREFIX: &str = "/api/orders/v1";

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup_with_state() -> (axum::Router, Arc<api::AppState<InMemoryOrderStore>>) {
    let state = api::create_default_state(
        InMemoryOrderStore::new(),
        Arc::new(InMemoryMessageBus::new()),
        SagaConfig::default(),
    );
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

fn setup() -> axum::Router {
    setup_with_state().0
}

fn post(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("{PREFIX}{uri}"))
        .header("content-type", "application/json")
        .header("x-user-id", user)
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn create_order(user: &str, reference: &str) -> Request<Body> {
    post("/order/create", user, json!({ "referenceId": reference }))
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("{PREFIX}{uri}"))
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["busConnected"], true);
}

#[tokio::test]
async fn test_health_reports_closed_bus() {
    let (app, state) = setup_with_state();
    state.bus().close().await.unwrap();

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_missing_user_header_is_unauthorized() {
    let app = setup();

    let request = Request::builder()
        .uri(format!("{PREFIX}/orders"))
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["status"], false);
    assert_eq!(json["code"], 401);
}

#[tokio::test]
async fn test_empty_basket_is_not_found() {
    let (app, state) = setup_with_state();

    let (status, json) = send(&app, create_order("u1", "r1")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["status"], false);
    assert_eq!(json["code"], 404);
    assert_eq!(json["message"], "Not Found");
    assert!(json["detail"].is_string());

    let (status, json) = send(&app, get("/order-by-reference/r1", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order"]["status"], "FAILED");
    assert_eq!(
        state
            .bus()
            .published_count(&state.orchestrator.config().queues.warehouse_decline)
            .await,
        0
    );
}

#[tokio::test]
async fn test_create_order_and_complete() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-1", 1, 1999)]);

    let (status, json) = send(
        &app,
        post(
            "/order/create",
            "u1",
            json!({ "referenceId": "r2", "deliveryType": "COURIER", "address": "1 Main St" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], true);
    assert_eq!(json["order"]["status"], "CONFIRMING");
    assert_eq!(json["order"]["totalAmount"], 1999);
    let order_id = json["order"]["orderId"].as_str().unwrap().to_string();

    let actions = state
        .bus()
        .published(&state.orchestrator.config().queues.delivery_order_action)
        .await;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].payload["deliveryType"], "COURIER");
    assert_eq!(actions[0].payload["orderId"], order_id.as_str());

    let order_id = common::OrderId::parse(&order_id).unwrap();
    state
        .orchestrator
        .on_status_event(&SagaMessage::status_update(order_id, OrderStatus::Completed))
        .await
        .unwrap();

    let (status, json) = send(&app, get(&format!("/order/{order_id}"), "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order"]["status"], "COMPLETED");
    assert_eq!(json["order"]["totalAmount"], 1999);
}

#[tokio::test]
async fn test_create_order_forwards_structured_pickup_point() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-1", 1, 500)]);

    let cdek = json!({ "code": "MSK123", "city": "Moscow" });
    let (status, _) = send(
        &app,
        post(
            "/order/create",
            "u1",
            json!({ "referenceId": "r1", "deliveryType": "CDEK", "cdek": cdek.clone() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let actions = state
        .bus()
        .published(&state.orchestrator.config().queues.delivery_order_action)
        .await;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].payload["cdek"], cdek);
}

#[tokio::test]
async fn test_duplicate_reference_is_conflict() {
    let (app, state) = setup_with_state();
    let user = common::UserId::new("u1");
    state
        .warehouse
        .set_basket(&user, vec![OrderItem::new("SKU-1", 1, 100)]);
    let (status, _) = send(&app, create_order("u1", "r1")).await;
    assert_eq!(status, StatusCode::OK);

    state
        .warehouse
        .set_basket(&user, vec![OrderItem::new("SKU-1", 1, 100)]);
    let (status, json) = send(&app, create_order("u1", "r1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], 409);
}

#[tokio::test]
async fn test_unavailable_product_is_conflict() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-9", 1, 100)]);
    state.warehouse.mark_unavailable("SKU-9");

    let (status, _) = send(&app, create_order("u1", "r1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_bind_failure_is_unprocessable() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-1", 1, 100)]);
    state.warehouse.set_fail_on_bind(true);

    let (status, _) = send(&app, create_order("u1", "r1")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_warehouse_outage_is_service_unavailable() {
    let (app, state) = setup_with_state();
    state.warehouse.set_fail_on_check(true);

    let (status, json) = send(&app, create_order("u1", "r1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json.get("detail").is_none());
}

#[tokio::test]
async fn test_create_requires_reference() {
    let app = setup();

    let (status, _) = send(&app, post("/order/create", "u1", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri(format!("{PREFIX}/order/create"))
        .header("content-type", "application/json")
        .header("x-user-id", "u1")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], false);
}

#[tokio::test]
async fn test_get_missing_order_is_no_content() {
    let app = setup();

    let (status, _) = send(
        &app,
        get(&format!("/order/{}", common::OrderId::new()), "u1"),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get("/order-by-reference/nope", "u1")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get("/order/not-a-uuid", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_orders_are_scoped_by_user() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-1", 1, 100)]);
    let (_, json) = send(&app, create_order("u1", "r1")).await;
    let order_id = json["order"]["orderId"].as_str().unwrap().to_string();

    let (status, _) = send(&app, get(&format!("/order/{order_id}"), "u2")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, json) = send(&app, get("/orders", "u2")).await;
    assert_eq!(json["orders"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_decline_order() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-1", 2, 300)]);
    let (_, json) = send(&app, create_order("u1", "r1")).await;
    let order_id = json["order"]["orderId"].as_str().unwrap().to_string();

    let (status, json) = send(
        &app,
        post("/order/decline", "u1", json!({ "orderId": order_id })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["order"]["status"], "DECLINED");
    let queues = &state.orchestrator.config().queues;
    assert_eq!(state.bus().published_count(&queues.warehouse_decline).await, 1);
    assert_eq!(state.bus().published_count(&queues.delivery_decline).await, 1);
}

#[tokio::test]
async fn test_decline_errors() {
    let app = setup();

    let (status, _) = send(&app, post("/order/decline", "u1", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        &app,
        post(
            "/order/decline",
            "u1",
            json!({ "orderId": common::OrderId::new().to_string() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], 422);
}

#[tokio::test]
async fn test_list_orders_with_status_filter() {
    let (app, state) = setup_with_state();
    state
        .warehouse
        .set_basket(&"u1".into(), vec![OrderItem::new("SKU-1", 1, 100)]);
    send(&app, create_order("u1", "r1")).await;
    send(&app, create_order("u1", "r2")).await;

    let (status, json) = send(&app, get("/orders", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], true);
    assert_eq!(json["orders"].as_array().unwrap().len(), 2);

    let (_, json) = send(&app, get("/orders?status=failed", "u1")).await;
    let failed = json["orders"].as_array().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["referenceId"], "r2");

    let (status, _) = send(&app, get("/orders?status=SHIPPED", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let app = setup();

    let (status, json) = send(&app, get("/subscription", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["subscription"].is_null());

    let create = json!({ "referenceId": "s1", "status": "CREATE", "level": "BEGIN" });
    let (status, json) = send(&app, post("/subscription", "u1", create)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["subscription"]["status"], "DEACTIVATED");
    assert_eq!(json["subscription"]["level"], "BEGIN");

    let again = json!({ "referenceId": "s2", "status": "CREATE", "level": "BEGIN" });
    let (status, _) = send(&app, post("/subscription", "u1", again)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let delete = json!({ "referenceId": "s1", "status": "DELETE" });
    let (status, _) = send(&app, post("/subscription", "u1", delete.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, post("/subscription", "u1", delete)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, json) = send(&app, get("/subscriptions", "u1")).await;
    assert_eq!(json["subscriptions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_subscription_requires_level() {
    let app = setup();

    let (status, json) = send(
        &app,
        post(
            "/subscription",
            "u1",
            json!({ "referenceId": "s1", "status": "CREATE" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["status"], false);
}

#[tokio::test]
async fn test_subscription_request_validation() {
    let app = setup();

    let unknown = json!({ "referenceId": "s1", "status": "PAUSE", "level": "BEGIN" });
    let (status, json) = send(&app, post("/subscription", "u1", unknown)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["code"], 422);

    let blank_delete = json!({ "status": "DELETE" });
    let (status, _) = send(&app, post("/subscription", "u1", blank_delete)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing_reference = json!({ "status": "CREATE", "level": "BEGIN" });
    let (status, _) = send(&app, post("/subscription", "u1", missing_reference)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    send(&app, create_order("u1", "m1")).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("saga_started_total"));
}
