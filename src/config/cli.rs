use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Cachet binary.
#[derive(Debug, Parser)]
#[command(name = "cachet", version, about = "Versioned fragment and request cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CACHET_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the demo HTTP server.
    Serve(Box<ServeArgs>),
    /// Print the request cache key for an endpoint.
    Key(KeyArgs),
    /// Delete the request cache entry for an endpoint.
    Clear(ClearArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StoreOverride {
    /// Override the key-value store URL (`memory://` or `redis://...`).
    #[arg(long = "store-url", value_name = "URL")]
    pub store_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the request key template.
    #[arg(long = "cache-key-template", value_name = "TEMPLATE")]
    pub view_cache_key_tpl: Option<String>,

    /// Override the value substituted for `{prefix}`.
    #[arg(long = "cache-key-prefix", value_name = "PREFIX")]
    pub view_cache_key_prefix: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub store: StoreOverride,

    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Override the in-process store capacity.
    #[arg(long = "store-memory-capacity", value_name = "COUNT")]
    pub store_memory_capacity: Option<usize>,

    /// Override the default response lifetime.
    #[arg(long = "cache-view-timeout-seconds", value_name = "SECONDS")]
    pub cache_view_timeout_seconds: Option<u64>,

    /// Override the default fragment lifetime.
    #[arg(long = "cache-fragment-timeout-seconds", value_name = "SECONDS")]
    pub cache_fragment_timeout_seconds: Option<u64>,

    /// Toggle the hooks that rotate version tags on insert and update.
    #[arg(
        long = "cache-auto-model-cache-key",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_auto_model_cache_key: Option<bool>,
}

/// Describes a request whose cache key should be computed.
#[derive(Debug, Args, Clone)]
pub struct RequestKeyArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Endpoint (route pattern) substituted for `{endpoint}`.
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// Request path; defaults to the endpoint.
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Request method.
    #[arg(long, value_name = "METHOD", default_value = "GET")]
    pub method: String,

    /// Key template replacing the configured one.
    #[arg(long, value_name = "TEMPLATE")]
    pub key: Option<String>,

    /// Namespace segment; repeat for several.
    #[arg(long = "namespace", value_name = "SEGMENT")]
    pub namespace: Vec<String>,

    /// Trailing facet; repeat for several.
    #[arg(long = "facet", value_name = "FACET")]
    pub facets: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub request: RequestKeyArgs,
}

#[derive(Debug, Args, Clone)]
pub struct ClearArgs {
    #[command(flatten)]
    pub store: StoreOverride,

    #[command(flatten)]
    pub request: RequestKeyArgs,
}
