//! End-to-end cache behavior through the public router.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware,
    routing::get,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use cantina::{
    application::menu::{MenuError, MenuProvider},
    cache::{
        CacheCategory, CacheState, CacheStore, CacheTtls, CacheWarmer, MemoryStore, PolicyTable,
        RouteCache, StoreError, StoreResult, is_mobile, response_cache,
    },
    infra::http::{HttpState, build_router},
};

struct StubMenu;

#[async_trait]
impl MenuProvider for StubMenu {
    async fn list_categories(&self) -> Result<Vec<String>, MenuError> {
        Ok(vec!["sandwiches".to_string(), "salads".to_string()])
    }

    async fn list_items(&self, category_id: &str) -> Result<Value, MenuError> {
        if category_id == "broken" {
            return Err(MenuError::Status {
                status: 500,
                path: format!("/categories/{category_id}/items"),
            });
        }
        Ok(json!([
            { "id": format!("{category_id}-club"), "name": "Club", "price_cents": 1150 }
        ]))
    }

    async fn search(&self, query: &str) -> Result<Value, MenuError> {
        Ok(json!([{ "matched": query }]))
    }
}

struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn set_with_ttl(&self, _key: &str, _value: &[u8], _ttl: Duration) -> StoreResult<()> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn delete_matching(&self, _pattern: &str) -> StoreResult<u64> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn key_count(&self) -> StoreResult<u64> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn memory_stats(&self) -> StoreResult<String> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    async fn remove_unexpiring(&self) -> StoreResult<u64> {
        Err(StoreError::Connection("connection refused".to_string()))
    }
}

fn cache_state(store: Arc<dyn CacheStore>, ttls: &CacheTtls) -> CacheState {
    let policies = Arc::new(PolicyTable::new(ttls).expect("policy table"));
    CacheState::new(store, policies, true)
}

fn public_router(store: Arc<dyn CacheStore>, ttls: &CacheTtls) -> (Router, CacheState) {
    let cache = cache_state(store, ttls);
    let router = build_router(HttpState {
        menu: Arc::new(StubMenu),
        cache: cache.clone(),
    });
    (router, cache)
}

async fn send(router: &Router, uri: &str, user: Option<&str>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let mut builder = Request::builder().uri(uri);
    if let Some(id) = user {
        builder = builder.header("x-user-id", id);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).expect("request"))
        .await
        .expect("response");

    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.expect("body");
    (parts.status, parts.headers, bytes.to_vec())
}

fn cache_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-cache").and_then(|value| value.to_str().ok())
}

/// The miss-path cache write is detached from the response; wait for it.
async fn wait_for_keys(store: &MemoryStore, expected: u64) {
    for _ in 0..100 {
        if store.key_count().await.expect("key count") >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("store never reached {expected} keys");
}

#[tokio::test]
async fn second_request_is_served_from_cache_with_identical_body() {
    let store = Arc::new(MemoryStore::new());
    let (router, _) = public_router(store.clone(), &CacheTtls::default());

    let (status, headers, first_body) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header(&headers), Some("MISS"));
    assert!(headers.contains_key("x-cache-key"));
    assert_eq!(
        headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("public, max-age=86400")
    );

    wait_for_keys(&store, 1).await;

    let (status, headers, second_body) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header(&headers), Some("HIT"));
    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn invalidating_the_menu_namespace_resets_to_miss() {
    let store = Arc::new(MemoryStore::new());
    let (router, cache) = public_router(store.clone(), &CacheTtls::default());

    send(&router, "/menu/category/sandwiches", None).await;
    wait_for_keys(&store, 1).await;

    let (_, headers, _) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(cache_header(&headers), Some("HIT"));

    let removed = cache.invalidate("menu:*").await.expect("invalidate");
    assert_eq!(removed, 1);
    assert_eq!(cache.invalidate("menu:*").await.expect("invalidate"), 0);

    let (_, headers, _) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
}

#[tokio::test]
async fn store_failures_are_invisible_to_the_caller() {
    let (router, _) = public_router(Arc::new(FailingStore), &CacheTtls::default());

    let (status, headers, body) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header(&headers), Some("MISS"));

    let payload: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(payload["success"], json!(true));
}

#[tokio::test]
async fn upstream_failures_propagate_and_are_never_cached() {
    let store = Arc::new(MemoryStore::new());
    let (router, _) = public_router(store.clone(), &CacheTtls::default());

    let (status, headers, _) = send(&router, "/menu/category/broken", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(cache_header(&headers), None);

    // Nothing was written for the failed response.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.key_count().await.expect("key count"), 0);

    let (status, headers, _) = send(&router, "/menu/category/broken", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(cache_header(&headers), None);
}

#[tokio::test]
async fn callers_do_not_share_cache_entries() {
    let store = Arc::new(MemoryStore::new());
    let (router, cache) = public_router(store.clone(), &CacheTtls::default());

    let (_, headers, _) = send(&router, "/menu/categories", Some("alice")).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
    wait_for_keys(&store, 1).await;

    // A different caller misses even though the path is already cached.
    let (_, headers, _) = send(&router, "/menu/categories", Some("bob")).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
    wait_for_keys(&store, 2).await;

    let (_, headers, _) = send(&router, "/menu/categories", Some("alice")).await;
    assert_eq!(cache_header(&headers), Some("HIT"));

    // Purging alice leaves bob's entry behind.
    let removed = cache
        .invalidate_caller(&cantina::cache::CallerIdentity::new("alice"))
        .await
        .expect("invalidate");
    assert_eq!(removed, 1);

    let (_, headers, _) = send(&router, "/menu/categories", Some("alice")).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
    let (_, headers, _) = send(&router, "/menu/categories", Some("bob")).await;
    assert_eq!(cache_header(&headers), Some("HIT"));
}

#[tokio::test]
async fn search_queries_are_keyed_order_insensitively() {
    let store = Arc::new(MemoryStore::new());
    let (router, _) = public_router(store.clone(), &CacheTtls::default());

    let (_, headers, _) = send(&router, "/menu/search?q=taco&limit=5", None).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
    wait_for_keys(&store, 1).await;

    let (_, headers, _) = send(&router, "/menu/search?limit=5&q=taco", None).await;
    assert_eq!(cache_header(&headers), Some("HIT"));

    let (_, headers, _) = send(&router, "/menu/search?q=burrito&limit=5", None).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
}

#[tokio::test]
async fn oversized_keys_collapse_to_a_fixed_length_digest() {
    let store = Arc::new(MemoryStore::new());
    let (router, _) = public_router(store.clone(), &CacheTtls::default());

    let uri = format!("/menu/search?q={}", "x".repeat(300));
    let (_, headers, _) = send(&router, &uri, None).await;

    let key = headers
        .get("x-cache-key")
        .and_then(|value| value.to_str().ok())
        .expect("cache key header");
    assert!(key.starts_with("search:"));
    assert_eq!(key.len(), "search:".len() + 32);
}

#[tokio::test]
async fn entries_expire_after_the_category_ttl() {
    let store = Arc::new(MemoryStore::new());
    let ttls = CacheTtls {
        menu: Duration::from_millis(80),
        ..CacheTtls::default()
    };
    let (router, _) = public_router(store.clone(), &ttls);

    send(&router, "/menu/category/sandwiches", None).await;
    wait_for_keys(&store, 1).await;

    let (_, headers, _) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(cache_header(&headers), Some("HIT"));

    tokio::time::sleep(Duration::from_millis(150)).await;

    let (_, headers, _) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(cache_header(&headers), Some("MISS"));
}

#[tokio::test]
async fn warmed_entries_are_served_as_hits() {
    let store = Arc::new(MemoryStore::new());
    let (router, cache) = public_router(store.clone(), &CacheTtls::default());

    let warmer = CacheWarmer::new(Arc::new(StubMenu), cache);
    let summary = warmer.warm_menu().await.expect("warm");
    assert_eq!(summary.warmed, 2);
    assert_eq!(store.key_count().await.expect("key count"), 2);

    // The very first organic request hits the warmed entry, and its body
    // matches what the handler would have produced.
    let (status, headers, body) = send(&router, "/menu/category/sandwiches", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_header(&headers), Some("HIT"));

    let payload: Value = serde_json::from_slice(&body).expect("json body");
    assert_eq!(payload["success"], json!(true));
    assert_eq!(payload["data"][0]["id"], json!("sandwiches-club"));
}

#[tokio::test]
async fn conditional_layer_only_caches_matching_requests() {
    let store = Arc::new(MemoryStore::new());
    let cache = cache_state(store.clone(), &CacheTtls::default());

    let router = Router::new()
        .route(
            "/menu/specials",
            get(|| async { Json(json!({ "special": "al pastor" })) }),
        )
        .layer(middleware::from_fn_with_state(
            RouteCache::new(cache, CacheCategory::GenericApi).when(is_mobile),
            response_cache,
        ));

    let desktop = Request::builder()
        .uri("/menu/specials")
        .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64)")
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(desktop).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!response.headers().contains_key("x-cache"));

    let mobile = |uri: &str| {
        Request::builder()
            .uri(uri)
            .header(header::USER_AGENT, "Mozilla/5.0 (iPhone) Mobile/15E148")
            .body(Body::empty())
            .expect("request")
    };
    let response = router
        .clone()
        .oneshot(mobile("/menu/specials"))
        .await
        .expect("response");
    assert_eq!(
        response
            .headers()
            .get("x-cache")
            .and_then(|v| v.to_str().ok()),
        Some("MISS")
    );

    wait_for_keys(&store, 1).await;

    let response = router
        .clone()
        .oneshot(mobile("/menu/specials"))
        .await
        .expect("response");
    assert_eq!(
        response
            .headers()
            .get("x-cache")
            .and_then(|v| v.to_str().ok()),
        Some("HIT")
    );
}
