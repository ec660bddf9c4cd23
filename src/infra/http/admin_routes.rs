//! Operator-facing admin surface, served on its own listener.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    application::{error::HttpError, menu::api_envelope},
    cache::{CacheCategory, CacheState, CacheWarmer, CallerIdentity},
};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub cache: CacheState,
    pub warmer: Arc<CacheWarmer>,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/cache/stats", get(cache_stats))
        .route("/admin/cache/cleanup", post(cache_cleanup))
        .route("/admin/cache/invalidate", post(cache_invalidate))
        .route("/admin/cache/warm", post(cache_warm))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn cache_stats(State(state): State<AdminState>) -> Result<Json<Value>, HttpError> {
    let diagnostics = state
        .cache
        .diagnostics()
        .await
        .map_err(|err| HttpError::from_store("infra::http::cache_stats", err))?;

    let data = serde_json::to_value(diagnostics).map_err(|err| {
        HttpError::new(
            "infra::http::cache_stats",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Diagnostics serialization failed",
            err.to_string(),
        )
    })?;
    Ok(Json(api_envelope(data)))
}

async fn cache_cleanup(State(state): State<AdminState>) -> Result<Json<Value>, HttpError> {
    let removed = state
        .cache
        .cleanup()
        .await
        .map_err(|err| HttpError::from_store("infra::http::cache_cleanup", err))?;
    Ok(Json(api_envelope(serde_json::json!({ "removed": removed }))))
}

/// Exactly one of the fields selects what to purge.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct InvalidateRequest {
    category: Option<String>,
    caller: Option<String>,
    pattern: Option<String>,
}

async fn cache_invalidate(
    State(state): State<AdminState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<Value>, HttpError> {
    const SOURCE: &str = "infra::http::cache_invalidate";

    let removed = match (request.category, request.caller, request.pattern) {
        (Some(name), None, None) => {
            let category: CacheCategory = name.parse().map_err(|err| {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "Unknown cache category",
                    &err,
                )
            })?;
            state.cache.invalidate_category(category).await
        }
        (None, Some(caller), None) => {
            state
                .cache
                .invalidate_caller(&CallerIdentity::new(caller))
                .await
        }
        (None, None, Some(pattern)) => state.cache.invalidate(&pattern).await,
        _ => {
            return Err(HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Exactly one of `category`, `caller`, `pattern` is required",
                "invalid selector combination",
            ));
        }
    }
    .map_err(|err| HttpError::from_store(SOURCE, err))?;

    Ok(Json(api_envelope(serde_json::json!({ "removed": removed }))))
}

async fn cache_warm(State(state): State<AdminState>) -> Result<Json<Value>, HttpError> {
    let summary = state
        .warmer
        .warm_menu()
        .await
        .map_err(|err| HttpError::from_menu("infra::http::cache_warm", err))?;

    let data = serde_json::to_value(summary).map_err(|err| {
        HttpError::new(
            "infra::http::cache_warm",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Warm summary serialization failed",
            err.to_string(),
        )
    })?;
    Ok(Json(api_envelope(data)))
}
