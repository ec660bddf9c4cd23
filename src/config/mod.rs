//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheTtls;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cantina";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_MENU_BASE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the Cantina binary.
#[derive(Debug, Parser)]
#[command(name = "cantina", version, about = "Cantina ordering backend")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CANTINA_CONFIG_FILE", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Cantina HTTP services.
    Serve(Box<ServeArgs>),
    /// Warm the menu cache once and exit.
    Warm(WarmArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the upstream menu service base URL.
    #[arg(long = "upstream-menu-base-url", value_name = "URL")]
    pub upstream_menu_base_url: Option<String>,

    /// Toggle response caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Toggle cache warming at startup.
    #[arg(
        long = "cache-warm-on-startup",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_warm_on_startup: Option<bool>,

    /// Override the scheduled warm interval; 0 disables it.
    #[arg(long = "cache-warm-interval-seconds", value_name = "SECONDS")]
    pub cache_warm_interval_seconds: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub redis: RedisSettings,
    pub cache: CacheSettings,
    pub upstream: UpstreamSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// When absent, the service falls back to the in-process store.
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub warm_on_startup: bool,
    /// `None` disables scheduled warming.
    pub warm_interval: Option<Duration>,
    pub ttls: CacheTtls,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub menu_base_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("CANTINA").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_overrides(&args.overrides),
        Some(Command::Warm(args)) => raw.apply_overrides(&args.overrides),
        None => raw.apply_overrides(&Overrides::default()),
    }

    Settings::from_raw(raw)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
    upstream: RawUpstreamSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(url) = overrides.upstream_menu_base_url.as_ref() {
            self.upstream.menu_base_url = Some(url.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(warm) = overrides.cache_warm_on_startup {
            self.cache.warm_on_startup = Some(warm);
        }
        if let Some(seconds) = overrides.cache_warm_interval_seconds {
            self.cache.warm_interval_seconds = Some(seconds);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    warm_on_startup: Option<bool>,
    warm_interval_seconds: Option<u64>,
    menu_ttl_seconds: Option<u64>,
    user_preferences_ttl_seconds: Option<u64>,
    search_ttl_seconds: Option<u64>,
    generic_api_ttl_seconds: Option<u64>,
    static_asset_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    menu_base_url: Option<String>,
    request_timeout_seconds: Option<u64>,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let host: IpAddr = raw
            .server
            .host
            .as_deref()
            .unwrap_or(DEFAULT_HOST)
            .parse()
            .map_err(|err| LoadError::invalid("server.host", format!("{err}")))?;

        let server = ServerSettings {
            public_addr: SocketAddr::new(
                host,
                raw.server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT),
            ),
            admin_addr: SocketAddr::new(host, raw.server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT)),
            graceful_shutdown: Duration::from_secs(
                raw.server
                    .graceful_shutdown_seconds
                    .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
            ),
        };

        let level = match raw.logging.level.as_deref() {
            Some(value) => LevelFilter::from_str(value)
                .map_err(|err| LoadError::invalid("logging.level", format!("{err}")))?,
            None => LevelFilter::INFO,
        };
        let logging = LoggingSettings {
            level,
            format: if raw.logging.json.unwrap_or(false) {
                LogFormat::Json
            } else {
                LogFormat::Compact
            },
        };

        let redis = RedisSettings {
            url: raw.redis.url.filter(|url| !url.is_empty()),
        };

        let defaults = CacheTtls::default();
        let ttls = CacheTtls {
            menu: ttl_from_raw("cache.menu_ttl_seconds", raw.cache.menu_ttl_seconds, defaults.menu)?,
            user_preferences: ttl_from_raw(
                "cache.user_preferences_ttl_seconds",
                raw.cache.user_preferences_ttl_seconds,
                defaults.user_preferences,
            )?,
            search: ttl_from_raw(
                "cache.search_ttl_seconds",
                raw.cache.search_ttl_seconds,
                defaults.search,
            )?,
            generic_api: ttl_from_raw(
                "cache.generic_api_ttl_seconds",
                raw.cache.generic_api_ttl_seconds,
                defaults.generic_api,
            )?,
            static_asset: ttl_from_raw(
                "cache.static_asset_ttl_seconds",
                raw.cache.static_asset_ttl_seconds,
                defaults.static_asset,
            )?,
        };

        let cache = CacheSettings {
            enabled: raw.cache.enabled.unwrap_or(true),
            warm_on_startup: raw.cache.warm_on_startup.unwrap_or(true),
            warm_interval: raw
                .cache
                .warm_interval_seconds
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
            ttls,
        };

        let menu_base_url = raw
            .upstream
            .menu_base_url
            .unwrap_or_else(|| DEFAULT_UPSTREAM_MENU_BASE_URL.to_string());
        if menu_base_url.is_empty() {
            return Err(LoadError::invalid(
                "upstream.menu_base_url",
                "must not be empty",
            ));
        }
        let upstream = UpstreamSettings {
            menu_base_url,
            request_timeout: Duration::from_secs(
                raw.upstream
                    .request_timeout_seconds
                    .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            ),
        };

        Ok(Settings {
            server,
            logging,
            redis,
            cache,
            upstream,
        })
    }
}

fn ttl_from_raw(
    key: &'static str,
    raw: Option<u64>,
    default: Duration,
) -> Result<Duration, LoadError> {
    match raw {
        Some(0) => Err(LoadError::invalid(key, "TTL must be a positive integer")),
        Some(seconds) => Ok(Duration::from_secs(seconds)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests;
