//! Cantina cache system.
//!
//! TTL-based HTTP response caching behind an injectable key-value store:
//!
//! - **Key derivation**: deterministic keys from method, path, sorted query,
//!   and caller identity, with a digest fallback for oversized keys
//! - **Policies**: per-category TTL and key namespace, validated at startup
//! - **Middleware**: per-route hit/miss flow with fail-open store handling
//! - **Invalidation**: pattern purges derived from the key composition
//! - **Warming**: proactive population of the menu namespace
//!
//! ## Configuration
//!
//! Behavior is controlled via `cantina.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! warm_on_startup = true
//! warm_interval_seconds = 3600
//! menu_ttl_seconds = 86400
//! ```

mod admin;
mod invalidate;
mod key;
mod middleware;
mod policy;
mod store;
mod warm;

pub use admin::CacheDiagnostics;
pub use key::{ANONYMOUS_CALLER, CacheKey, CallerIdentity, caller_pattern, derive_key, prefix_pattern};
pub use middleware::{
    CACHE_KEY_HEADER, CACHE_STATUS_HEADER, CachePredicate, CacheState, RouteCache, is_mobile,
    response_cache,
};
pub use policy::{CacheCategory, CachePolicy, CacheTtls, PolicyError, PolicyTable};
pub use store::{CacheEntry, CacheStore, EntryError, MemoryStore, RedisStore, StoreError, StoreResult};
pub use warm::{CacheWarmer, WarmSummary};
