//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashMap, net::SocketAddr, num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    DEFAULT_MEMORY_CAPACITY, DEFAULT_VIEW_CACHE_KEY_PREFIX, DEFAULT_VIEW_CACHE_TIMEOUT,
    KeyTemplate,
};

mod cli;

pub use cli::{
    CacheOverrides, ClearArgs, CliArgs, Command, KeyArgs, RequestKeyArgs, ServeArgs,
    ServeOverrides, StoreOverride,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cachet";
const ENV_PREFIX: &str = "CACHET";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STORE_URL: &str = "memory://";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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
pub struct StoreSettings {
    pub url: String,
    pub memory_capacity: NonZeroUsize,
}

impl StoreSettings {
    /// Whether other processes see the same entries; `memory://` lives and
    /// dies with this one.
    pub fn is_shared(&self) -> bool {
        !self.url.starts_with("memory://")
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub view_cache_key_tpl: KeyTemplate,
    pub view_cache_key_prefix: String,
    pub view_cache_timeout: Duration,
    pub fragment_cache_timeout: Option<Duration>,
    pub auto_model_cache_key: bool,
    pub cache_model_attrs: HashMap<String, Vec<String>>,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Key(args)) => raw.apply_cache_overrides(&args.request.cache),
        Some(Command::Clear(args)) => {
            raw.apply_store_override(&args.store);
            raw.apply_cache_overrides(&args.request.cache);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    let settings = Settings::from_raw(raw)?;
    check_command(cli.command.as_ref(), &settings)?;
    Ok(settings)
}

/// Command-specific checks on otherwise valid settings.
fn check_command(command: Option<&Command>, settings: &Settings) -> Result<(), LoadError> {
    if let Some(Command::Clear(_)) = command {
        if !settings.store.is_shared() {
            return Err(LoadError::invalid(
                "store.url",
                "clear needs a shared store",
            ));
        }
    }
    Ok(())
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(capacity) = overrides.store_memory_capacity {
            self.store.memory_capacity = Some(capacity);
        }
        if let Some(seconds) = overrides.cache_view_timeout_seconds {
            self.cache.view_cache_timeout = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_fragment_timeout_seconds {
            self.cache.fragment_cache_timeout = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_auto_model_cache_key {
            self.cache.auto_model_cache_key = Some(enabled);
        }

        self.apply_store_override(&overrides.store);
        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(template) = overrides.view_cache_key_tpl.as_ref() {
            self.cache.view_cache_key_tpl = Some(template.clone());
        }
        if let Some(prefix) = overrides.view_cache_key_prefix.as_ref() {
            self.cache.view_cache_key_prefix = Some(prefix.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
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

    Ok(ServerSettings { addr })
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let url = store
        .url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());

    match url.split_once("://").map(|(scheme, _)| scheme) {
        Some("memory") => {}
        Some("redis" | "rediss") if cfg!(feature = "redis") => {}
        Some("redis" | "rediss") => {
            return Err(LoadError::invalid(
                "store.url",
                "redis support requires the `redis` feature",
            ));
        }
        _ => {
            return Err(LoadError::invalid(
                "store.url",
                format!("unsupported store url `{url}`"),
            ));
        }
    }

    let capacity = store.memory_capacity.unwrap_or(DEFAULT_MEMORY_CAPACITY);
    let memory_capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
        LoadError::invalid("store.memory_capacity", "must be greater than zero")
    })?;

    Ok(StoreSettings {
        url,
        memory_capacity,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let view_cache_key_tpl = match cache.view_cache_key_tpl {
        Some(template) => KeyTemplate::parse(&template)
            .map_err(|err| LoadError::invalid("cache.view_cache_key_tpl", err.to_string()))?,
        None => KeyTemplate::default(),
    };

    let view_cache_key_prefix = cache
        .view_cache_key_prefix
        .unwrap_or_else(|| DEFAULT_VIEW_CACHE_KEY_PREFIX.to_string());

    let view_cache_timeout = match cache.view_cache_timeout {
        Some(seconds) => non_zero_seconds(seconds, "cache.view_cache_timeout")?,
        None => DEFAULT_VIEW_CACHE_TIMEOUT,
    };
    let fragment_cache_timeout = cache
        .fragment_cache_timeout
        .map(|seconds| non_zero_seconds(seconds, "cache.fragment_cache_timeout"))
        .transpose()?;

    let cache_model_attrs = cache.cache_model_attrs.unwrap_or_default();
    if cache_model_attrs
        .values()
        .flatten()
        .any(|attr| attr.trim().is_empty())
    {
        return Err(LoadError::invalid(
            "cache.cache_model_attrs",
            "attribute names must not be empty",
        ));
    }

    Ok(CacheSettings {
        view_cache_key_tpl,
        view_cache_key_prefix,
        view_cache_timeout,
        fragment_cache_timeout,
        auto_model_cache_key: cache.auto_model_cache_key.unwrap_or(true),
        cache_model_attrs,
    })
}

fn non_zero_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    candidate
        .parse()
        .map_err(|err| format!("failed to parse `{candidate}`: {err}"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    url: Option<String>,
    memory_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    view_cache_key_tpl: Option<String>,
    view_cache_key_prefix: Option<String>,
    /// Seconds.
    view_cache_timeout: Option<u64>,
    /// Seconds.
    fragment_cache_timeout: Option<u64>,
    auto_model_cache_key: Option<bool>,
    cache_model_attrs: Option<HashMap<String, Vec<String>>>,
}
