//! Cache key derivation.
//!
//! A key is composed from the category prefix, the request method, the path,
//! the canonicalized query string, and the caller identity. Two semantically
//! equivalent requests (same method, path, query parameter set in any order,
//! same caller) always map to the same key.

use std::fmt;

use axum::http::Method;
use sha2::{Digest, Sha256};

/// Identity sentinel for unauthenticated requests.
pub const ANONYMOUS_CALLER: &str = "anonymous";

/// Separator between the composed key fields.
///
/// The caller identity is always the final field, which is what
/// [`caller_pattern`] relies on. Keep the two in sync.
const FIELD_SEPARATOR: char = ':';

/// Composed keys longer than this collapse to `prefix:<128-bit hex digest>`.
const MAX_COMPOSED_LEN: usize = 200;

/// The authenticated caller attached to a request by the upstream auth step.
///
/// Used only as a key component; this subsystem never persists it elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self(ANONYMOUS_CALLER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallerIdentity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A derived cache key. Always non-empty and prefixed with the category
/// prefix, whether composed verbatim or collapsed to a digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a request.
///
/// `raw_query` is the request's query string as received; parameter order is
/// insignificant because pairs are sorted before composition. Pure, no
/// failure modes.
pub fn derive_key(
    prefix: &str,
    method: &Method,
    path: &str,
    raw_query: &str,
    caller: &CallerIdentity,
) -> CacheKey {
    let query = canonicalize_query(raw_query);
    let s = FIELD_SEPARATOR;
    let composed = format!("{prefix}{s}{method}{s}{path}{s}{query}{s}{caller}");

    if composed.len() > MAX_COMPOSED_LEN {
        return CacheKey(format!("{prefix}{s}{}", digest128(&composed)));
    }

    CacheKey(composed)
}

/// Pattern matching every key derived for `caller`, for per-caller
/// invalidation.
///
/// Derived from the same composition as [`derive_key`]: the identity is the
/// final `:`-separated field, so a suffix match is sufficient. Keys that
/// collapsed to a digest lose their identity field and are not matched; those
/// expire on their own TTL.
pub fn caller_pattern(caller: &CallerIdentity) -> String {
    format!("*{FIELD_SEPARATOR}{caller}")
}

/// Pattern matching every key in the namespace of `prefix`.
pub fn prefix_pattern(prefix: &str) -> String {
    format!("{prefix}{FIELD_SEPARATOR}*")
}

/// Sort query pairs by name (then value) and re-join as `k=v&k=v`.
fn canonicalize_query(raw_query: &str) -> String {
    if raw_query.is_empty() {
        return String::new();
    }

    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw_query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut out = String::with_capacity(raw_query.len());
    for (i, (name, value)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(name);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// First 16 bytes of the SHA-256 of `input`, lowercase hex.
fn digest128(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..16])
}
