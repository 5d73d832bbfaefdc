//! Request-shape tests for the API surface.
//!
//! These exercise validation and identity checks, which reject before any
//! database work; the router runs over a lazily-connected pool that is
//! never dialed. Storage-backed paths are covered by the database
//! integration tests.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use tower::ServiceExt;
use uuid::Uuid;

use eventhub_api::server::create_test_router;
use eventhub_core::RealClock;

fn router() -> axum::Router {
    create_test_router(Arc::new(RealClock::new()))
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-actor-id", Uuid::new_v4().to_string())
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    value["error"]["code"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn register_without_identity_is_unauthorized() {
    let event_id = Uuid::new_v4();
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/events/{event_id}/registrations"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"Ada","email":"u@x.test"}"#))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "unauthorized");
}

#[tokio::test]
async fn register_rejects_blank_fields() {
    let event_id = Uuid::new_v4();

    let response = router()
        .oneshot(json_request(
            Method::POST,
            &format!("/events/{event_id}/registrations"),
            serde_json::json!({"name": "  ", "email": "u@x.test"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router()
        .oneshot(json_request(
            Method::POST,
            &format!("/events/{event_id}/registrations"),
            serde_json::json!({"name": "Ada", "email": "not-an-address"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_request");
}

#[tokio::test]
async fn register_rejects_malformed_event_id() {
    let response = router()
        .oneshot(json_request(
            Method::POST,
            "/events/not-a-uuid/registrations",
            serde_json::json!({"name": "Ada", "email": "u@x.test"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_rejects_bad_run_at() {
    let event_id = Uuid::new_v4();

    let response = router()
        .oneshot(json_request(
            Method::POST,
            &format!("/events/{event_id}/publish?runAt=yesterday"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_query");

    let response = router()
        .oneshot(json_request(
            Method::POST,
            &format!("/events/{event_id}/publish?runAt=2020-01-01T00:00:00Z"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "clearly in the past");
}

#[tokio::test]
async fn publish_without_identity_is_unauthorized() {
    let event_id = Uuid::new_v4();
    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/events/{event_id}/publish"))
        .body(Body::empty())
        .unwrap();

    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_list_validates_limit_and_status_and_cursor() {
    let response = router()
        .oneshot(Request::builder().uri("/admin/jobs?limit=0").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router()
        .oneshot(Request::builder().uri("/admin/jobs?limit=500").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router()
        .oneshot(
            Request::builder().uri("/admin/jobs?status=delivering").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_query");

    let response = router()
        .oneshot(
            Request::builder().uri("/admin/jobs?cursor=%21%21garbage").body(Body::empty()).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let response = router()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn caller_request_id_is_echoed() {
    let response = router()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .header("x-request-id", "req-abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-abc-123");
}
