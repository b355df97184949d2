use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use checkout_service::config::CheckoutConfig;
use checkout_service::countdown::ManualClock;
use checkout_service::gateway::HttpBackend;
use checkout_service::{build_router, AppState};
use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn state_for(server: &MockServer, clock: &ManualClock) -> AppState {
    let config = CheckoutConfig::for_backend(server.base_url());
    let backend = HttpBackend::new(server.base_url(), Duration::from_secs(5)).unwrap();
    AppState::with_parts(config, backend, Arc::new(clock.clone()))
}

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 14, 20, 0, 0).unwrap())
}

async fn json_of(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const BEARER: &str = "Bearer buyer-token";

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", BEARER)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn signed_get(uri: &str) -> Request<Body> {
    Request::get(uri).header("authorization", BEARER).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz_ok() {
    let server = MockServer::start_async().await;
    let app = build_router(state_for(&server, &clock()));
    let resp = app.oneshot(Request::get("/healthz").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn totals_endpoint_applies_capped_percentage() {
    let server = MockServer::start_async().await;
    let app = build_router(state_for(&server, &clock()));
    let body = json!({
        "subtotal": 10000,
        "discount": { "code": "HALF", "type": "PERCENTAGE", "value": 50, "maximumDiscount": 2000 }
    });
    let resp = app.oneshot(post_json("/checkout/totals", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_of(resp).await;
    assert_eq!(json, json!({ "subtotal": 10000, "serviceCharge": 1500, "discountAmount": 2000, "total": 9500 }));
}

#[tokio::test]
async fn empty_discount_code_is_rejected_locally() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/discounts/validate");
            then.status(200).json_body(json!({ "valid": false }));
        })
        .await;
    let app = build_router(state_for(&server, &clock()));
    let resp = app
        .oneshot(post_json("/discounts/validate", json!({ "code": " - ", "orderTotal": 1000 })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "EMPTY_CODE");
    mock.assert_hits_async(0).await;
}

#[tokio::test]
async fn unknown_session_is_not_found_and_counted() {
    let server = MockServer::start_async().await;
    let app = build_router(state_for(&server, &clock()));
    let uri = format!("/checkout/sessions/{}", Uuid::new_v4());
    let resp = app.clone().oneshot(signed_get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.headers().get("X-Error-Code").unwrap(), "session_not_found");

    let resp = app.oneshot(Request::get("/metrics").body(Body::empty()).unwrap()).await.unwrap();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("code=\"session_not_found\""));
}

#[tokio::test]
async fn session_open_then_incomplete_payer_is_unprocessable() {
    let server = MockServer::start_async().await;
    let hold_id = Uuid::new_v4();
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/holds/{hold_id}"));
            then.status(200).json_body(json!({
                "holdId": hold_id,
                "expiresAt": "2024-09-14T20:10:00Z",
                "items": [],
                "totalCents": 20000
            }));
        })
        .await;
    let orders = server
        .mock_async(|when, then| {
            when.method(POST).path("/orders");
            then.status(201).json_body(json!({ "orderId": "ord-1" }));
        })
        .await;
    let app = build_router(state_for(&server, &clock()));

    let resp = app.clone().oneshot(post_json("/checkout/sessions", json!({ "holdId": hold_id }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let view = json_of(resp).await;
    assert_eq!(view["totals"]["total"], 23000);
    assert_eq!(view["countdown"]["display"], "10:00");
    assert_eq!(view["redirectAway"], false);

    let uri = format!("/checkout/sessions/{hold_id}/pay");
    let resp = app.oneshot(post_json(&uri, json!({ "payer": { "name": "Ana" } }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_of(resp).await;
    assert_eq!(body["code"], "invalid_payer");
    assert_eq!(body["fields"].as_array().unwrap().len(), 5);
    orders.assert_hits_async(0).await;
}

#[tokio::test]
async fn backend_forbidden_on_pay_navigates_away() {
    let server = MockServer::start_async().await;
    let hold_id = Uuid::new_v4();
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/holds/{hold_id}"));
            then.status(200).json_body(json!({
                "holdId": hold_id,
                "expiresAt": "2024-09-14T20:10:00Z",
                "totalCents": 5000
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/orders");
            then.status(403).json_body(json!({ "code": "SALE_NOT_STARTED", "message": "Sales open Friday" }));
        })
        .await;
    let app = build_router(state_for(&server, &clock()));
    app.clone().oneshot(post_json("/checkout/sessions", json!({ "holdId": hold_id }))).await.unwrap();

    let payer = json!({
        "name": "Ana", "surname": "Gómez", "email": "ana@example.com", "phone": "1155550000",
        "identificationType": "DNI", "identificationNumber": "30111222"
    });
    let uri = format!("/checkout/sessions/{hold_id}/pay");
    let resp = app.clone().oneshot(post_json(&uri, json!({ "payer": payer }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = json_of(resp).await;
    assert_eq!(body["navigate"], "away");
    assert_eq!(body["code"], "sale_not_open");

    let resp = app.oneshot(signed_get(&format!("/checkout/sessions/{hold_id}"))).await.unwrap();
    assert_eq!(json_of(resp).await["redirecting"], false);
}

#[tokio::test]
async fn anonymous_caller_cannot_touch_sessions() {
    let server = MockServer::start_async().await;
    let hold_id = Uuid::new_v4();
    server
        .mock_async(|when, then| {
            when.method(GET).path(format!("/holds/{hold_id}"));
            then.status(200).json_body(json!({
                "holdId": hold_id,
                "expiresAt": "2024-09-14T20:10:00Z",
                "totalCents": 5000
            }));
        })
        .await;
    let app = build_router(state_for(&server, &clock()));
    let resp = app.clone().oneshot(post_json("/checkout/sessions", json!({ "holdId": hold_id }))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let uri = format!("/checkout/sessions/{hold_id}");
    let resp = app.clone().oneshot(Request::get(&uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(resp).await["navigate"], "login");

    let restore = Request::post(format!("{uri}/restore")).body(Body::empty()).unwrap();
    assert_eq!(app.clone().oneshot(restore).await.unwrap().status(), StatusCode::UNAUTHORIZED);
    let remove = Request::delete(format!("{uri}/discount")).body(Body::empty()).unwrap();
    assert_eq!(app.clone().oneshot(remove).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let resp = app.oneshot(signed_get(&uri)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
