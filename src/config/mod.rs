//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::ExecutionContext;

mod cli;

pub use cli::{
    ArticleArgs, ClearArgs, CliArgs, Command, InvalidateArgs, MaintainArgs, Overrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "gazette";
const ENV_PREFIX: &str = "GAZETTE";

const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_COMPRESS_THRESHOLD_BYTES: u64 = 10 * 1024;
const DEFAULT_REMOTE_HOST: &str = "127.0.0.1";
const DEFAULT_REMOTE_PORT: u16 = 6379;
const DEFAULT_KEY_PREFIX: &str = "gazette:";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 500;
const DEFAULT_LOCAL_QUOTA_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_DATABASE_NAME: &str = "gazette-cache";
const DEFAULT_MIN_TTL_SECS: u64 = 60;
const DEFAULT_FRESH_CEILING_SECS: u64 = 900;
const DEFAULT_RECENT_CEILING_SECS: u64 = 3600;
const DEFAULT_POPULARITY_MULTIPLIER: f64 = 2.0;
const DEFAULT_POPULAR_VIEW_THRESHOLD: u64 = 10_000;
const DEFAULT_CATEGORY_INDEX_LIMIT: u64 = 100;
const DEFAULT_AUTHOR_INDEX_LIMIT: u64 = 50;
const DEFAULT_TRENDING_LIMIT: u64 = 50;
const DEFAULT_RANKING_LIMIT: u64 = 1000;
const DEFAULT_MAINTENANCE_CADENCE_SECS: u64 = 300;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub remote: RemoteSettings,
    pub local: LocalSettings,
    pub articles: ArticleSettings,
    pub maintenance: MaintenanceSettings,
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
    pub context: ExecutionContext,
    pub default_ttl_seconds: u64,
    pub schema_version: String,
    pub compress_threshold_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub key_prefix: String,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub quota_bytes: u64,
    pub database_name: String,
    pub structured: bool,
}

#[derive(Debug, Clone)]
pub struct ArticleSettings {
    pub min_ttl_seconds: u64,
    pub fresh_ceiling_seconds: u64,
    pub recent_ceiling_seconds: u64,
    pub popularity_multiplier: f64,
    pub popular_view_threshold: u64,
    pub category_index_limit: usize,
    pub author_index_limit: usize,
    pub trending_limit: usize,
    pub ranking_limit: usize,
}

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub cadence: Duration,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);
    if let Command::Maintain(args) = &cli.command {
        raw.apply_maintain_overrides(args);
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    remote: RawRemoteSettings,
    local: RawLocalSettings,
    articles: RawArticleSettings,
    maintenance: RawMaintenanceSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(context) = overrides.context {
            self.cache.context = Some(context.as_str().to_string());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(host) = overrides.remote_host.as_ref() {
            self.remote.host = Some(host.clone());
        }
        if let Some(port) = overrides.remote_port {
            self.remote.port = Some(port);
        }
        if let Some(db) = overrides.remote_db {
            self.remote.db = Some(db);
        }
        if let Some(strict) = overrides.remote_strict {
            self.remote.strict = Some(strict);
        }
        if let Some(name) = overrides.local_database.as_ref() {
            self.local.database_name = Some(name.clone());
        }
        if let Some(quota) = overrides.local_quota_bytes {
            self.local.quota_bytes = Some(quota);
        }
    }

    fn apply_maintain_overrides(&mut self, args: &MaintainArgs) {
        if let Some(seconds) = args.cadence_seconds {
            self.maintenance.cadence_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            remote,
            local,
            articles,
            maintenance,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let remote = build_remote_settings(remote)?;
        let local = build_local_settings(local)?;
        let articles = build_article_settings(articles)?;
        let maintenance = build_maintenance_settings(maintenance)?;

        Ok(Self {
            logging,
            cache,
            remote,
            local,
            articles,
            maintenance,
        })
    }
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
    let context = match cache.context.as_deref().map(str::trim) {
        None | Some("") => ExecutionContext::default(),
        Some(value) => parse_context(value)
            .ok_or_else(|| LoadError::invalid("cache.context", "expected `server` or `client`"))?,
    };

    let default_ttl_seconds = positive(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;

    let schema_version = non_blank(cache.schema_version)
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    Ok(CacheSettings {
        context,
        default_ttl_seconds,
        schema_version,
        compress_threshold_bytes: cache
            .compress_threshold_bytes
            .unwrap_or(DEFAULT_COMPRESS_THRESHOLD_BYTES),
    })
}

fn build_remote_settings(remote: RawRemoteSettings) -> Result<RemoteSettings, LoadError> {
    let host = non_blank(remote.host).unwrap_or_else(|| DEFAULT_REMOTE_HOST.to_string());

    let port = remote.port.unwrap_or(DEFAULT_REMOTE_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "remote.port",
            "port must be greater than zero",
        ));
    }

    let db = remote.db.unwrap_or(0);
    if db < 0 {
        return Err(LoadError::invalid("remote.db", "must not be negative"));
    }

    let connect_timeout_ms = positive(
        remote
            .connect_timeout_ms
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        "remote.connect_timeout_ms",
    )?;
    let command_timeout_ms = positive(
        remote
            .command_timeout_ms
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
        "remote.command_timeout_ms",
    )?;

    Ok(RemoteSettings {
        host,
        port,
        username: non_blank(remote.username),
        password: remote.password.filter(|value| !value.is_empty()),
        db,
        key_prefix: remote
            .key_prefix
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
        connect_timeout_ms,
        command_timeout_ms,
        strict: remote.strict.unwrap_or(false),
    })
}

fn build_local_settings(local: RawLocalSettings) -> Result<LocalSettings, LoadError> {
    let quota_bytes = positive(
        local.quota_bytes.unwrap_or(DEFAULT_LOCAL_QUOTA_BYTES),
        "local.quota_bytes",
    )?;
    let database_name =
        non_blank(local.database_name).unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());

    Ok(LocalSettings {
        quota_bytes,
        database_name,
        structured: local.structured.unwrap_or(true),
    })
}

fn build_article_settings(articles: RawArticleSettings) -> Result<ArticleSettings, LoadError> {
    let min_ttl_seconds = positive(
        articles.min_ttl_seconds.unwrap_or(DEFAULT_MIN_TTL_SECS),
        "articles.min_ttl_seconds",
    )?;
    let fresh_ceiling_seconds = positive(
        articles
            .fresh_ceiling_seconds
            .unwrap_or(DEFAULT_FRESH_CEILING_SECS),
        "articles.fresh_ceiling_seconds",
    )?;
    let recent_ceiling_seconds = positive(
        articles
            .recent_ceiling_seconds
            .unwrap_or(DEFAULT_RECENT_CEILING_SECS),
        "articles.recent_ceiling_seconds",
    )?;
    if fresh_ceiling_seconds > recent_ceiling_seconds {
        return Err(LoadError::invalid(
            "articles.fresh_ceiling_seconds",
            "must not exceed recent_ceiling_seconds",
        ));
    }

    let popularity_multiplier = articles
        .popularity_multiplier
        .unwrap_or(DEFAULT_POPULARITY_MULTIPLIER);
    if !popularity_multiplier.is_finite() || popularity_multiplier < 1.0 {
        return Err(LoadError::invalid(
            "articles.popularity_multiplier",
            "must be a finite value of at least 1.0",
        ));
    }

    Ok(ArticleSettings {
        min_ttl_seconds,
        fresh_ceiling_seconds,
        recent_ceiling_seconds,
        popularity_multiplier,
        popular_view_threshold: articles
            .popular_view_threshold
            .unwrap_or(DEFAULT_POPULAR_VIEW_THRESHOLD),
        category_index_limit: limit(
            articles
                .category_index_limit
                .unwrap_or(DEFAULT_CATEGORY_INDEX_LIMIT),
            "articles.category_index_limit",
        )?,
        author_index_limit: limit(
            articles
                .author_index_limit
                .unwrap_or(DEFAULT_AUTHOR_INDEX_LIMIT),
            "articles.author_index_limit",
        )?,
        trending_limit: limit(
            articles.trending_limit.unwrap_or(DEFAULT_TRENDING_LIMIT),
            "articles.trending_limit",
        )?,
        ranking_limit: limit(
            articles.ranking_limit.unwrap_or(DEFAULT_RANKING_LIMIT),
            "articles.ranking_limit",
        )?,
    })
}

fn build_maintenance_settings(
    maintenance: RawMaintenanceSettings,
) -> Result<MaintenanceSettings, LoadError> {
    let seconds = positive(
        maintenance
            .cadence_seconds
            .unwrap_or(DEFAULT_MAINTENANCE_CADENCE_SECS),
        "maintenance.cadence_seconds",
    )?;
    Ok(MaintenanceSettings {
        cadence: Duration::from_secs(seconds),
    })
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
    context: Option<String>,
    default_ttl_seconds: Option<u64>,
    schema_version: Option<String>,
    compress_threshold_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    db: Option<i64>,
    key_prefix: Option<String>,
    connect_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    strict: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLocalSettings {
    quota_bytes: Option<u64>,
    database_name: Option<String>,
    structured: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArticleSettings {
    min_ttl_seconds: Option<u64>,
    fresh_ceiling_seconds: Option<u64>,
    recent_ceiling_seconds: Option<u64>,
    popularity_multiplier: Option<f64>,
    popular_view_threshold: Option<u64>,
    category_index_limit: Option<u64>,
    author_index_limit: Option<u64>,
    trending_limit: Option<u64>,
    ranking_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMaintenanceSettings {
    cadence_seconds: Option<u64>,
}

fn parse_context(value: &str) -> Option<ExecutionContext> {
    match value.to_ascii_lowercase().as_str() {
        "server" => Some(ExecutionContext::Server),
        "client" => Some(ExecutionContext::Client),
        _ => None,
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn limit(value: u64, key: &'static str) -> Result<usize, LoadError> {
    let value = positive(value, key)?;
    value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

#[cfg(test)]
mod tests;
