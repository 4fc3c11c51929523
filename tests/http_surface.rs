mod common;

use std::{net::SocketAddr, sync::Arc};

use axum::{body::Body, extract::connect_info::MockConnectInfo};
use common::MockHttpClient;
use hotgate::{ConfigStore, GatewayService, HttpHandler, adapters::router, config::RawDocument};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

const DOC: &str = r#"
security:
  ipWhitelist:
    enabled: true
    list: ["10.1.0.0/16"]
  auth:
    enabled: false
routes:
  - id: items
    pathPattern: /items/**
    targets: ["http://items"]
    requireAuth: false
"#;

fn app(client: Arc<MockHttpClient>) -> axum::Router {
    let store = Arc::new(ConfigStore::new());
    store.apply_document(&RawDocument::yaml(DOC)).unwrap();
    let service = Arc::new(GatewayService::new(store, client));
    let addr: SocketAddr = "10.1.2.3:40000".parse().unwrap();
    router(Arc::new(HttpHandler::new(service, None))).layer(MockConnectInfo(addr))
}

#[tokio::test]
async fn socket_address_feeds_the_whitelist() {
    let client = MockHttpClient::ok();
    let response = app(client.clone())
        .oneshot(
            Request::builder()
                .uri("/items/7?expand=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-trace-id"].len(), 32);
    let sent = client.last_request().unwrap();
    assert_eq!(sent.url, "http://items/items/7?expand=true");
    assert_eq!(sent.headers["x-real-ip"], "10.1.2.3");
}

#[tokio::test]
async fn forwarded_client_outside_whitelist_is_rejected() {
    let client = MockHttpClient::ok();
    let response = app(client.clone())
        .oneshot(
            Request::builder()
                .uri("/items/7")
                .header("x-forwarded-for", "198.51.100.4, 10.1.2.3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], 403);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn admin_health_is_served_without_the_pipeline() {
    let client = MockHttpClient::ok();
    let response = app(client.clone())
        .oneshot(
            Request::builder()
                .uri("/_gateway/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-trace-id"].len(), 32);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn admin_refresh_from_outside_whitelist_is_403() {
    let client = MockHttpClient::ok();
    let response = app(client.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/_gateway/config/refresh")
                .header("x-forwarded-for", "198.51.100.4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], 403);
    assert!(client.requests().is_empty());
}

#[tokio::test]
async fn oversized_body_is_413() {
    let client = MockHttpClient::ok();
    let body = vec![b'x'; hotgate::adapters::http_handler::MAX_BODY_BYTES + 1];
    let response = app(client.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/items")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()["x-trace-id"].len(), 32);
    assert!(client.requests().is_empty());
}
