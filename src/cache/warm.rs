//! Proactive cache warming.
//!
//! The warmer populates the menu category from the upstream provider,
//! bypassing the request path. It derives keys and payload envelopes exactly
//! the way the middleware does, so a warmed entry is the entry organic
//! traffic reads. Warming may race live requests for the same key; both
//! writes carry fresh data and the last one wins.

use std::sync::Arc;

use axum::http::Method;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::menu::{MenuError, MenuProvider, api_envelope};

use super::{
    key::{CallerIdentity, derive_key},
    middleware::CacheState,
    policy::CacheCategory,
    store::{CacheEntry, EntryError, StoreError},
};

#[derive(Debug, Error)]
enum WarmError {
    #[error(transparent)]
    Menu(#[from] MenuError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Encode(#[from] EntryError),
    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Outcome of one warming run.
#[derive(Debug, Default, Serialize)]
pub struct WarmSummary {
    pub warmed: u64,
    pub failed: u64,
}

pub struct CacheWarmer {
    menu: Arc<dyn MenuProvider>,
    cache: CacheState,
}

impl CacheWarmer {
    pub fn new(menu: Arc<dyn MenuProvider>, cache: CacheState) -> Self {
        Self { menu, cache }
    }

    /// Warm every menu category. A failing category is logged and skipped;
    /// warming only fails outright when the category listing itself is
    /// unavailable.
    pub async fn warm_menu(&self) -> Result<WarmSummary, MenuError> {
        let categories = self.menu.list_categories().await?;
        info!(categories = categories.len(), "warming menu cache");

        let mut summary = WarmSummary::default();
        for category_id in categories {
            match self.warm_category(&category_id).await {
                Ok(()) => summary.warmed += 1,
                Err(err) => {
                    summary.failed += 1;
                    warn!(
                        category_id = %category_id,
                        error = %err,
                        "skipping menu category during warm"
                    );
                }
            }
        }

        counter!("cantina_cache_warmed_total").increment(summary.warmed);
        info!(
            warmed = summary.warmed,
            failed = summary.failed,
            "menu cache warm completed"
        );
        Ok(summary)
    }

    async fn warm_category(&self, category_id: &str) -> Result<(), WarmError> {
        let items = self.menu.list_items(category_id).await?;

        let policy = self.cache.policies.policy(CacheCategory::Menu);
        let key = derive_key(
            policy.prefix,
            &Method::GET,
            &format!("/menu/category/{category_id}"),
            "",
            &CallerIdentity::anonymous(),
        );

        let body = serde_json::to_vec(&api_envelope(items))?;
        let entry = CacheEntry::new(200, Some("application/json".to_string()), &body);
        let payload = entry.encode()?;

        self.cache
            .store
            .set_with_ttl(key.as_str(), &payload, policy.ttl)
            .await?;
        Ok(())
    }
}
