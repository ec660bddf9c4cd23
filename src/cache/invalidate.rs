//! Targeted cache invalidation.
//!
//! Patterns are derived from the same key composition the middleware uses,
//! so invalidation cannot drift out of sync with key derivation. Invalidating
//! a pattern that matches nothing is a no-op returning 0.

use metrics::counter;
use tracing::info;

use super::{
    key::{CallerIdentity, caller_pattern, prefix_pattern},
    middleware::CacheState,
    policy::CacheCategory,
    store::StoreResult,
};

impl CacheState {
    /// Purge every key matching `pattern`. Idempotent.
    pub async fn invalidate(&self, pattern: &str) -> StoreResult<u64> {
        let removed = self.store.delete_matching(pattern).await?;
        if removed > 0 {
            counter!("cantina_cache_invalidated_total").increment(removed);
            info!(pattern, removed, "invalidated cache keys");
        }
        Ok(removed)
    }

    /// Purge every key in a category's namespace. Called whenever upstream
    /// mutates data the category depends on.
    pub async fn invalidate_category(&self, category: CacheCategory) -> StoreResult<u64> {
        let prefix = self.policies.policy(category).prefix;
        self.invalidate(&prefix_pattern(prefix)).await
    }

    /// Purge every key derived for `caller`, across all categories.
    pub async fn invalidate_caller(&self, caller: &CallerIdentity) -> StoreResult<u64> {
        self.invalidate(&caller_pattern(caller)).await
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::http::Method;

    use crate::cache::{
        key::derive_key,
        policy::{CacheTtls, PolicyTable},
        store::{CacheStore, MemoryStore},
    };

    use super::*;

    fn state(store: Arc<MemoryStore>) -> CacheState {
        let policies = Arc::new(PolicyTable::new(&CacheTtls::default()).expect("policies"));
        CacheState::new(store, policies, true)
    }

    async fn seed(store: &MemoryStore, prefix: &str, path: &str, caller: &CallerIdentity) {
        let key = derive_key(prefix, &Method::GET, path, "", caller);
        store
            .set_with_ttl(key.as_str(), b"v", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn category_invalidation_only_removes_its_namespace() {
        let store = Arc::new(MemoryStore::new());
        let cache = state(store.clone());

        let anon = CallerIdentity::anonymous();
        seed(&store, "menu", "/menu/category/sandwiches", &anon).await;
        seed(&store, "menu", "/menu/category/salads", &anon).await;
        seed(&store, "search", "/menu/search", &anon).await;

        let removed = cache.invalidate_category(CacheCategory::Menu).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.key_count().await.unwrap(), 1);

        // Second pass has nothing left to remove.
        let removed = cache.invalidate_category(CacheCategory::Menu).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn caller_invalidation_spans_categories_but_spares_other_callers() {
        let store = Arc::new(MemoryStore::new());
        let cache = state(store.clone());

        let alice = CallerIdentity::new("alice");
        let bob = CallerIdentity::new("bob");
        seed(&store, "menu", "/menu/categories", &alice).await;
        seed(&store, "user_prefs", "/preferences", &alice).await;
        seed(&store, "menu", "/menu/categories", &bob).await;

        let removed = cache.invalidate_caller(&alice).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.key_count().await.unwrap(), 1);
    }
}
