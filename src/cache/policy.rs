//! Cache categories and their TTL policies.
//!
//! Every category is a variant of a closed enum and the policy table is
//! validated for completeness when it is built, so a missing policy is a
//! startup failure rather than a runtime surprise.

use std::{fmt, str::FromStr, time::Duration};

use thiserror::Error;

const DEFAULT_MENU_TTL: Duration = Duration::from_secs(60 * 60 * 24);
const DEFAULT_USER_PREFERENCES_TTL: Duration = Duration::from_secs(60 * 60 * 4);
const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(60 * 15);
const DEFAULT_GENERIC_API_TTL: Duration = Duration::from_secs(60 * 5);
const DEFAULT_STATIC_ASSET_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Named cache policy grouping. Controls TTL and key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Menu,
    UserPreferences,
    Search,
    GenericApi,
    StaticAsset,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 5] = [
        CacheCategory::Menu,
        CacheCategory::UserPreferences,
        CacheCategory::Search,
        CacheCategory::GenericApi,
        CacheCategory::StaticAsset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheCategory::Menu => "menu",
            CacheCategory::UserPreferences => "user-preferences",
            CacheCategory::Search => "search",
            CacheCategory::GenericApi => "generic-api",
            CacheCategory::StaticAsset => "static-asset",
        }
    }

    /// Key namespace for this category. Prefixes are fixed at compile time;
    /// only TTLs are configurable.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            CacheCategory::Menu => "menu",
            CacheCategory::UserPreferences => "user_prefs",
            CacheCategory::Search => "search",
            CacheCategory::GenericApi => "api",
            CacheCategory::StaticAsset => "static",
        }
    }

    fn ordinal(&self) -> usize {
        match self {
            CacheCategory::Menu => 0,
            CacheCategory::UserPreferences => 1,
            CacheCategory::Search => 2,
            CacheCategory::GenericApi => 3,
            CacheCategory::StaticAsset => 4,
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheCategory {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownCategory {
                name: s.to_string(),
            })
    }
}

/// TTL and key namespace for one category.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub prefix: &'static str,
}

/// Per-category TTLs, overridable via configuration.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub menu: Duration,
    pub user_preferences: Duration,
    pub search: Duration,
    pub generic_api: Duration,
    pub static_asset: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            menu: DEFAULT_MENU_TTL,
            user_preferences: DEFAULT_USER_PREFERENCES_TTL,
            search: DEFAULT_SEARCH_TTL,
            generic_api: DEFAULT_GENERIC_API_TTL,
            static_asset: DEFAULT_STATIC_ASSET_TTL,
        }
    }
}

impl CacheTtls {
    fn for_category(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Menu => self.menu,
            CacheCategory::UserPreferences => self.user_preferences,
            CacheCategory::Search => self.search,
            CacheCategory::GenericApi => self.generic_api,
            CacheCategory::StaticAsset => self.static_asset,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("cache category `{category}` has a zero TTL")]
    ZeroTtl { category: CacheCategory },
    #[error("cache categories `{first}` and `{second}` share the key prefix `{prefix}`")]
    DuplicatePrefix {
        first: CacheCategory,
        second: CacheCategory,
        prefix: String,
    },
    #[error("unknown cache category `{name}`")]
    UnknownCategory { name: String },
}

/// Total mapping from [`CacheCategory`] to [`CachePolicy`], checked once at
/// startup.
#[derive(Debug)]
pub struct PolicyTable {
    policies: [CachePolicy; CacheCategory::ALL.len()],
}

impl PolicyTable {
    /// Build and validate the table. Zero TTLs and duplicate prefixes are
    /// configuration errors, fatal before serving traffic.
    pub fn new(ttls: &CacheTtls) -> Result<Self, PolicyError> {
        let policies = CacheCategory::ALL.map(|category| CachePolicy {
            ttl: ttls.for_category(category),
            prefix: category.key_prefix(),
        });

        Self::validate(&policies)?;

        Ok(Self { policies })
    }

    pub fn policy(&self, category: CacheCategory) -> &CachePolicy {
        &self.policies[category.ordinal()]
    }

    fn validate(policies: &[CachePolicy; CacheCategory::ALL.len()]) -> Result<(), PolicyError> {
        for (category, policy) in CacheCategory::ALL.into_iter().zip(policies.iter()) {
            if policy.ttl.is_zero() {
                return Err(PolicyError::ZeroTtl { category });
            }
        }

        for (i, first) in CacheCategory::ALL.into_iter().enumerate() {
            for second in CacheCategory::ALL.into_iter().skip(i + 1) {
                if policies[first.ordinal()].prefix == policies[second.ordinal()].prefix {
                    return Err(PolicyError::DuplicatePrefix {
                        first,
                        second,
                        prefix: policies[first.ordinal()].prefix.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        // Defaults are statically valid; validation cannot fail here.
        Self {
            policies: CacheCategory::ALL.map(|category| CachePolicy {
                ttl: CacheTtls::default().for_category(category),
                prefix: category.key_prefix(),
            }),
        }
    }
}
