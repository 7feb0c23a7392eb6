//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU64, str::FromStr, time::Duration};

use axum::http::HeaderName;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "multicache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_ROUTE_LIMIT: u64 = 500;
const DEFAULT_DATA_LIMIT: u64 = 1000;
const DEFAULT_COMPONENT_LIMIT: u64 = 1000;
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
const DEFAULT_CDN_CONTROL_HEADER: &str = "Surrogate-Control";
const DEFAULT_CDN_TAG_HEADER: &str = "Cache-Tag";
pub(crate) const DEFAULT_API_PREFIX: &str = "/__multi_cache";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub cdn: CdnSettings,
    pub api: ApiSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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
pub struct CacheSettings {
    pub enable_route: bool,
    pub enable_data: bool,
    pub enable_component: bool,
    pub route_limit: usize,
    pub data_limit: usize,
    pub component_limit: usize,
    pub key_prefix: String,
    pub max_body_bytes: NonZeroU64,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CdnSettings {
    pub enabled: bool,
    pub cache_control_header: HeaderName,
    pub cache_tag_header: HeaderName,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub enabled: bool,
    pub prefix: String,
    pub authorization: ApiAuthorizationSetting,
    pub cache_tag_invalidation_delay: Duration,
}

/// File-expressible authorization for the management API.
#[derive(Clone, PartialEq, Eq)]
pub enum ApiAuthorizationSetting {
    /// Nothing configured; every API request is refused.
    Missing,
    /// Explicitly disabled with `authorization = false`.
    Disabled,
    Token(String),
}

impl std::fmt::Debug for ApiAuthorizationSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("Missing"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Token(_) => f.write_str("Token(<redacted>)"),
        }
    }
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

    builder = builder.add_source(Environment::with_prefix("MULTICACHE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    cdn: RawCdnSettings,
    api: RawApiSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.api_enabled {
            self.api.enabled = Some(enabled);
        }
        if let Some(token) = overrides.api_token.as_ref() {
            self.api.authorization = Some(RawAuthorization::Token(token.clone()));
        }
        if let Some(enabled) = overrides.cdn_enabled {
            self.cdn.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.tag_invalidation_delay_seconds {
            self.api.cache_tag_invalidation_delay_secs = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            cdn,
            api,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let cdn = build_cdn_settings(cdn)?;
        let api = build_api_settings(api)?;

        Ok(Self {
            server,
            logging,
            cache,
            cdn,
            api,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_body_bytes = NonZeroU64::new(cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES))
        .ok_or_else(|| LoadError::invalid("cache.max_body_bytes", "must be greater than zero"))?;

    let sweep_ms = cache.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
    if sweep_ms == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enable_route: cache.enable_route.unwrap_or(true),
        enable_data: cache.enable_data.unwrap_or(true),
        enable_component: cache.enable_component.unwrap_or(true),
        route_limit: capacity(cache.route_limit, DEFAULT_ROUTE_LIMIT, "cache.route_limit")?,
        data_limit: capacity(cache.data_limit, DEFAULT_DATA_LIMIT, "cache.data_limit")?,
        component_limit: capacity(
            cache.component_limit,
            DEFAULT_COMPONENT_LIMIT,
            "cache.component_limit",
        )?,
        key_prefix: cache.key_prefix.unwrap_or_default(),
        max_body_bytes,
        sweep_interval: Duration::from_millis(sweep_ms),
    })
}

fn build_cdn_settings(cdn: RawCdnSettings) -> Result<CdnSettings, LoadError> {
    let cache_control_header = header_name(
        cdn.cache_control_header.as_deref(),
        DEFAULT_CDN_CONTROL_HEADER,
        "cdn.cache_control_header",
    )?;
    let cache_tag_header = header_name(
        cdn.cache_tag_header.as_deref(),
        DEFAULT_CDN_TAG_HEADER,
        "cdn.cache_tag_header",
    )?;

    Ok(CdnSettings {
        enabled: cdn.enabled.unwrap_or(false),
        cache_control_header,
        cache_tag_header,
    })
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let prefix = api
        .prefix
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());
    if !prefix.starts_with('/') {
        return Err(LoadError::invalid("api.prefix", "must start with `/`"));
    }
    if prefix.len() > 1 && prefix.ends_with('/') {
        return Err(LoadError::invalid("api.prefix", "must not end with `/`"));
    }
    if prefix == "/" {
        return Err(LoadError::invalid("api.prefix", "must not be the root path"));
    }

    let authorization = match api.authorization {
        None => ApiAuthorizationSetting::Missing,
        Some(RawAuthorization::Flag(false)) => ApiAuthorizationSetting::Disabled,
        Some(RawAuthorization::Flag(true)) => {
            return Err(LoadError::invalid(
                "api.authorization",
                "`true` is not a valid value; use `false` or a token",
            ));
        }
        Some(RawAuthorization::Token(token)) => {
            let token = token.trim();
            if token.eq_ignore_ascii_case("false") {
                ApiAuthorizationSetting::Disabled
            } else if token.eq_ignore_ascii_case("true") {
                return Err(LoadError::invalid(
                    "api.authorization",
                    "`true` is not a valid value; use `false` or a token",
                ));
            } else if token.is_empty() {
                return Err(LoadError::invalid("api.authorization", "token must not be empty"));
            } else {
                ApiAuthorizationSetting::Token(token.to_string())
            }
        }
    };

    Ok(ApiSettings {
        enabled: api.enabled.unwrap_or(false),
        prefix,
        authorization,
        cache_tag_invalidation_delay: Duration::from_secs(
            api.cache_tag_invalidation_delay_secs.unwrap_or(0),
        ),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
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
struct RawCacheSettings {
    enable_route: Option<bool>,
    enable_data: Option<bool>,
    enable_component: Option<bool>,
    route_limit: Option<u64>,
    data_limit: Option<u64>,
    component_limit: Option<u64>,
    key_prefix: Option<String>,
    max_body_bytes: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCdnSettings {
    enabled: Option<bool>,
    cache_control_header: Option<String>,
    cache_tag_header: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    enabled: Option<bool>,
    prefix: Option<String>,
    authorization: Option<RawAuthorization>,
    cache_tag_invalidation_delay_secs: Option<u64>,
}

/// `authorization = false` or `authorization = "token"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAuthorization {
    Flag(bool),
    Token(String),
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// LRU capacities are clamped to at least one entry.
fn capacity(value: Option<u64>, default: u64, key: &'static str) -> Result<usize, LoadError> {
    let value = value.unwrap_or(default).max(1);
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

fn header_name(
    value: Option<&str>,
    default: &str,
    key: &'static str,
) -> Result<HeaderName, LoadError> {
    let value = value.map(str::trim).unwrap_or(default);
    HeaderName::from_bytes(value.as_bytes())
        .map_err(|err| LoadError::invalid(key, format!("not a valid header name: {err}")))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
