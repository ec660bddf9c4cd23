use super::*;

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("defaults");

    assert_eq!(settings.server.public_addr.port(), DEFAULT_PUBLIC_PORT);
    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert!(settings.cache.enabled);
    assert!(settings.cache.warm_on_startup);
    assert!(settings.cache.warm_interval.is_none());
    assert!(settings.redis.url.is_none());
    assert_eq!(settings.cache.ttls.menu, Duration::from_secs(86_400));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.cache.enabled = Some(true);

    let overrides = Overrides {
        public_port: Some(5000),
        cache_enabled: Some(false),
        redis_url: Some("redis://cache.internal:6379".to_string()),
        ..Overrides::default()
    };
    raw.apply_overrides(&overrides);

    let settings = Settings::from_raw(raw).expect("settings");
    assert_eq!(settings.server.public_addr.port(), 5000);
    assert!(!settings.cache.enabled);
    assert_eq!(
        settings.redis.url.as_deref(),
        Some("redis://cache.internal:6379")
    );
}

#[test]
fn zero_ttl_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.search_ttl_seconds = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero ttl");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.search_ttl_seconds",
            ..
        }
    ));
}

#[test]
fn zero_warm_interval_disables_scheduled_warming() {
    let mut raw = RawSettings::default();
    raw.cache.warm_interval_seconds = Some(0);
    let settings = Settings::from_raw(raw).expect("settings");
    assert!(settings.cache.warm_interval.is_none());

    let mut raw = RawSettings::default();
    raw.cache.warm_interval_seconds = Some(3600);
    let settings = Settings::from_raw(raw).expect("settings");
    assert_eq!(settings.cache.warm_interval, Some(Duration::from_secs(3600)));
}

#[test]
fn invalid_host_is_rejected() {
    let mut raw = RawSettings::default();
    raw.server.host = Some("not-an-address".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "server.host",
            ..
        })
    ));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn empty_redis_url_means_no_redis() {
    let mut raw = RawSettings::default();
    raw.redis.url = Some(String::new());

    let settings = Settings::from_raw(raw).expect("settings");
    assert!(settings.redis.url.is_none());
}
