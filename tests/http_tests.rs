//! Router tests driven through `tower::ServiceExt::oneshot`
//!
//! Run with: cargo test --test http_tests

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{harness, Harness};
use memdc::server::MemoryServer;

fn app(h: &Harness) -> Router {
    MemoryServer::router(h.service.clone())
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_ok() {
    let h = harness();
    let (status, body) = send(app(&h), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "index": "memory"}));
}

#[tokio::test]
async fn create_then_get_and_search() {
    let h = harness();

    let (status, body) = send(
        app(&h),
        Method::POST,
        "/memories:create",
        Some(json!({"text": "Alice loves hiking", "type": "hobby", "userId": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dc_status"], "accepted");
    let id = body["redis_status"].as_str().unwrap().to_string();

    let (status, memory) = send(app(&h), Method::GET, &format!("/memories/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(memory["text"], "Alice loves hiking");
    assert_eq!(memory["type"], "hobby");
    assert_eq!(memory["userId"], "alice");
    assert!(memory["score"].is_null());

    let (status, results) = send(
        app(&h),
        Method::GET,
        "/memories:search?query=hiking&k=1&type=hobby&user_id=alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], id.as_str());
    let score = results[0]["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
}

#[tokio::test]
async fn create_with_blank_text_is_400() {
    let h = harness();
    let (status, body) = send(
        app(&h),
        Method::POST,
        "/memories:create",
        Some(json!({"text": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("text"));
    assert_eq!(h.auth.calls(), 0);
}

#[tokio::test]
async fn create_with_malformed_body_is_400() {
    let h = harness();
    let (status, body) = send(
        app(&h),
        Method::POST,
        "/memories:create",
        Some(json!({"type": "hobby"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn search_with_bad_k_is_400() {
    let h = harness();
    for uri in [
        "/memories:search?query=hiking&k=0",
        "/memories:search?query=hiking&k=21",
        "/memories:search?query=hiking&k=many",
        "/memories:search",
    ] {
        let (status, body) = send(app(&h), Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["detail"].is_string());
    }
}

#[tokio::test]
async fn get_missing_is_404() {
    let h = harness();
    let (status, body) = send(app(&h), Method::GET, "/memories/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["detail"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn delete_reports_found_and_missing() {
    let h = harness();
    send(
        app(&h),
        Method::POST,
        "/memories:create",
        Some(json!({"text": "to delete", "memory_id": "d1"})),
    )
    .await;

    let (status, body) = send(app(&h), Method::DELETE, "/memories/d1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, body) = send(app(&h), Method::DELETE, "/memories/d1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["deleted"], false);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn upstream_failure_is_500_with_detail() {
    let h = common::harness_with(common::STUB_USER, true);
    let (status, body) = send(
        MemoryServer::router(h.service.clone()),
        Method::POST,
        "/memories:create",
        Some(json!({"text": "mirrored"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn warehouse_search_returns_hits() {
    let h = harness();
    let (status, body) = send(
        app(&h),
        Method::GET,
        "/memories:search-dc?query=hiking&user_id=alice&limit=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["record_id"], "r1");
    assert_eq!(h.warehouse.searches()[0].limit, 2);
}
