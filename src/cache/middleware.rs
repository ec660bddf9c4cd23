//! Response cache middleware.
//!
//! Wraps a downstream handler per route: GET requests are looked up in the
//! store and served from it on a hit; on a miss the handler runs, its body is
//! buffered, and the captured response is written back with the category TTL
//! on a detached task. Store failures degrade to an uncached request, never
//! an error response.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, error, instrument, warn};

use super::{
    key::{CacheKey, CallerIdentity, derive_key},
    policy::{CacheCategory, PolicyTable},
    store::{CacheEntry, CacheStore},
};

pub const CACHE_STATUS_HEADER: &str = "x-cache";
pub const CACHE_KEY_HEADER: &str = "x-cache-key";

/// Responses larger than this are delivered but not cached.
const MAX_CACHEABLE_BODY_BYTES: usize = 1024 * 1024;

/// Shared cache handle: the injected store plus the validated policy table.
#[derive(Clone)]
pub struct CacheState {
    pub store: Arc<dyn CacheStore>,
    pub policies: Arc<PolicyTable>,
    pub enabled: bool,
}

impl CacheState {
    pub fn new(store: Arc<dyn CacheStore>, policies: Arc<PolicyTable>, enabled: bool) -> Self {
        Self {
            store,
            policies,
            enabled,
        }
    }
}

/// Request predicate for the conditional middleware variant.
pub type CachePredicate = fn(&Request<Body>) -> bool;

/// Per-route middleware state: which category's policy applies, and an
/// optional gate deciding whether a request participates in caching at all.
#[derive(Clone)]
pub struct RouteCache {
    state: CacheState,
    category: CacheCategory,
    predicate: Option<CachePredicate>,
}

impl RouteCache {
    pub fn new(state: CacheState, category: CacheCategory) -> Self {
        Self {
            state,
            category,
            predicate: None,
        }
    }

    /// Only cache requests for which `predicate` returns true; everything
    /// else passes through untouched.
    pub fn when(mut self, predicate: CachePredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }
}

/// Predicate for the mobile-only cache variant.
pub fn is_mobile(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|agent| agent.contains("Mobile"))
}

/// Middleware entry point, mounted with `axum::middleware::from_fn_with_state`.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn response_cache(
    State(route): State<RouteCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !route.state.enabled {
        return next.run(request).await;
    }

    if request.method() != Method::GET {
        return next.run(request).await;
    }

    if let Some(predicate) = route.predicate
        && !predicate(&request)
    {
        return next.run(request).await;
    }

    let policy = route.state.policies.policy(route.category);
    let caller = request
        .extensions()
        .get::<CallerIdentity>()
        .cloned()
        .unwrap_or_default();
    let key = derive_key(
        policy.prefix,
        request.method(),
        request.uri().path(),
        request.uri().query().unwrap_or(""),
        &caller,
    );

    match route.state.store.get(key.as_str()).await {
        Ok(Some(raw)) => match hit_response(&raw) {
            Ok(mut response) => {
                debug!(key = %key, category = %route.category, "cache hit");
                counter!("cantina_cache_hit_total").increment(1);
                apply_cache_headers(&mut response, "HIT", &key, policy.ttl.as_secs());
                return response;
            }
            Err(err) => {
                // Corrupt entry: fall through to the miss path, whose write
                // replaces it.
                warn!(key = %key, error = %err, "discarding malformed cache entry");
            }
        },
        Ok(None) => {
            debug!(key = %key, category = %route.category, "cache miss");
        }
        Err(err) => {
            counter!("cantina_cache_store_error_total").increment(1);
            error!(key = %key, error = %err, "cache store unavailable, serving uncached");
        }
    }

    counter!("cantina_cache_miss_total").increment(1);

    let response = next.run(request).await;
    if !should_store(&response) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_CACHEABLE_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(key = %key, error = %err, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let entry = CacheEntry::new(
        parts.status.as_u16(),
        parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        &bytes,
    );

    // Detached so a client disconnect cannot abandon a half-written entry.
    let store = route.state.store.clone();
    let write_key = key.clone();
    let ttl = policy.ttl;
    tokio::spawn(async move {
        let payload = match entry.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key = %write_key, error = %err, "failed to encode cache entry");
                return;
            }
        };
        if let Err(err) = store.set_with_ttl(write_key.as_str(), &payload, ttl).await {
            counter!("cantina_cache_store_error_total").increment(1);
            error!(key = %write_key, error = %err, "cache write failed");
        }
    });

    let mut response = Response::from_parts(parts, Body::from(bytes));
    apply_cache_headers(&mut response, "MISS", &key, policy.ttl.as_secs());
    response
}

/// Only successful, non-streaming, cookie-free responses are stored.
fn should_store(response: &Response) -> bool {
    if response.status() != StatusCode::OK {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    if response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return false;
    }

    true
}

fn hit_response(raw: &[u8]) -> Result<Response, super::store::EntryError> {
    let entry = CacheEntry::decode(raw)?;
    let body = entry.body_bytes()?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() =
        StatusCode::from_u16(entry.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if let Some(content_type) = entry.content_type.as_deref()
        && let Ok(value) = HeaderValue::from_str(content_type)
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn apply_cache_headers(response: &mut Response, status: &'static str, key: &CacheKey, ttl_secs: u64) {
    let headers = response.headers_mut();
    headers.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
    if let Ok(value) = HeaderValue::from_str(key.as_str()) {
        headers.insert(CACHE_KEY_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={ttl_secs}")) {
        headers.insert(header::CACHE_CONTROL, value);
    }
}
