//! Public HTTP surface: the cached menu routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::get,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    application::{
        error::HttpError,
        menu::{MenuProvider, api_envelope},
    },
    cache::{CacheCategory, CacheState, RouteCache, response_cache},
};

use super::middleware::{attach_caller_identity, log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub menu: Arc<dyn MenuProvider>,
    pub cache: CacheState,
}

pub fn build_router(state: HttpState) -> Router {
    let menu_routes = Router::new()
        .route("/menu/categories", get(list_categories))
        .route("/menu/category/{id}", get(category_items))
        .layer(middleware::from_fn_with_state(
            RouteCache::new(state.cache.clone(), CacheCategory::Menu),
            response_cache,
        ));

    let search_routes = Router::new()
        .route("/menu/search", get(search_menu))
        .layer(middleware::from_fn_with_state(
            RouteCache::new(state.cache.clone(), CacheCategory::Search),
            response_cache,
        ));

    Router::new()
        .merge(menu_routes)
        .merge(search_routes)
        .route("/health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        // Identity must be attached before the cache layers read it.
        .layer(middleware::from_fn(attach_caller_identity))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuery {
    q: String,
}

async fn list_categories(State(state): State<HttpState>) -> Result<Json<Value>, HttpError> {
    let ids = state
        .menu
        .list_categories()
        .await
        .map_err(|err| HttpError::from_menu("infra::http::list_categories", err))?;
    Ok(Json(api_envelope(json!(ids))))
}

async fn category_items(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, HttpError> {
    let items = state
        .menu
        .list_items(&id)
        .await
        .map_err(|err| HttpError::from_menu("infra::http::category_items", err))?;
    Ok(Json(api_envelope(items)))
}

async fn search_menu(
    State(state): State<HttpState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, HttpError> {
    let results = state
        .menu
        .search(&query.q)
        .await
        .map_err(|err| HttpError::from_menu("infra::http::search_menu", err))?;
    Ok(Json(api_envelope(results)))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
