mod common;

use std::sync::Arc;

use bytes::Bytes;
use common::{MockHttpClient, get};
use hotgate::{ConfigStore, GatewayService, config::RawDocument, ports::http_client::OutboundResponse};
use http::{HeaderMap, StatusCode};

const READERS: usize = 100;
const GENERATIONS: u64 = 50;

fn document(generation: u64) -> String {
    format!(
        r#"
security:
  auth:
    enabled: false
rateLimit:
  enabled: false
routes:
  - id: echo
    pathPattern: /echo/**
    targets: ["http://gen-{generation}"]
    requireAuth: false
    headerTransforms:
      X-Generation: "{generation}"
"#
    )
}

/// Echoes `<host generation>|<header generation>` so a response shows which
/// snapshot built the target URL and which one built the headers.
fn echo_client() -> Arc<MockHttpClient> {
    MockHttpClient::new(|req| {
        let from_url = req
            .url
            .trim_start_matches("http://gen-")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let from_header = req
            .headers
            .get("x-generation")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(OutboundResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(format!("{from_url}|{from_header}")),
        })
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_mixed_snapshot() {
    let store = Arc::new(ConfigStore::new());
    store
        .apply_document(&RawDocument::yaml(document(0)))
        .unwrap();
    let service = Arc::new(GatewayService::new(store.clone(), echo_client()));

    let publisher = {
        let store = store.clone();
        tokio::spawn(async move {
            for generation in 1..=GENERATIONS {
                store
                    .apply_document(&RawDocument::yaml(document(generation)))
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::with_capacity(READERS);
    for _ in 0..READERS {
        let service = service.clone();
        readers.push(tokio::spawn(async move {
            let mut last_seen = 0u64;
            for _ in 0..20 {
                let response = service.handle(get("/echo/ping")).await;
                assert_eq!(response.status, StatusCode::OK);

                let body = String::from_utf8(response.body.to_vec()).unwrap();
                let (from_url, from_header) = body.split_once('|').unwrap();
                assert_eq!(from_url, from_header, "mixed snapshot: {body}");

                let seen: u64 = from_url.parse().unwrap();
                assert!(seen >= last_seen, "went back from {last_seen} to {seen}");
                last_seen = seen;
                tokio::task::yield_now().await;
            }
        }));
    }

    publisher.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    // Document generation N was the (N+1)th publish.
    assert_eq!(store.current().generation(), GENERATIONS + 1);
    let after = service.handle(get("/echo/ping")).await;
    assert_eq!(
        &after.body[..],
        format!("{GENERATIONS}|{GENERATIONS}").as_bytes()
    );
}

#[tokio::test]
async fn route_removal_takes_effect_on_next_request() {
    let store = Arc::new(ConfigStore::new());
    store
        .apply_document(&RawDocument::yaml(document(1)))
        .unwrap();
    let service = GatewayService::new(store.clone(), echo_client());
    assert_eq!(service.handle(get("/echo/x")).await.status, StatusCode::OK);

    store
        .apply_document(&RawDocument::yaml(
            "security: {auth: {skipPaths: [\"/echo/**\"]}}\nroutes: []",
        ))
        .unwrap();
    assert_eq!(
        service.handle(get("/echo/x")).await.status,
        StatusCode::NOT_FOUND
    );
}
