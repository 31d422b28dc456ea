//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, OutputCacheOptions};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vercache";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_OUTPUT_CACHE_SECS: i64 = 60;

/// Command-line arguments for the vercache binary.
#[derive(Debug, Parser)]
#[command(name = "vercache", version, about = "Version-coherent output cache demo server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VERCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the demo HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Run in debug mode; output caching is skipped unless enabled for debug.
    #[arg(
        long = "debug",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub debug: Option<bool>,

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

    /// Override the maximum number of cached responses.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<usize>,

    /// Override the expired-entry sweep interval.
    #[arg(long = "cache-sweep-interval-ms", value_name = "MS")]
    pub cache_sweep_interval_ms: Option<u64>,

    /// Override the output cache duration; zero or negative disables caching.
    #[arg(
        long = "output-cache-duration-seconds",
        value_name = "SECONDS",
        allow_negative_numbers = true
    )]
    pub output_cache_duration_seconds: Option<i64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
    pub output_cache: OutputCacheOptions,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub debug: bool,
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

    builder = builder.add_source(Environment::with_prefix("VERCACHE").separator("__"));

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
    output_cache: RawOutputCacheSettings,
}

impl RawSettings {
    /// CLI flags win over every file and environment source.
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        overlay(&mut self.server.host, overrides.server_host.clone());
        overlay(&mut self.server.port, overrides.server_port);
        overlay(&mut self.server.debug, overrides.debug);
        overlay(&mut self.logging.level, overrides.log_level.clone());
        overlay(&mut self.logging.json, overrides.log_json);
        overlay(&mut self.cache.capacity, overrides.cache_capacity);
        overlay(
            &mut self.cache.sweep_interval_ms,
            overrides.cache_sweep_interval_ms,
        );
        overlay(
            &mut self.output_cache.duration_seconds,
            overrides.output_cache_duration_seconds,
        );
    }
}

fn overlay<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            output_cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            output_cache: build_output_cache_settings(output_cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let port = match server.port.unwrap_or(DEFAULT_PORT) {
        0 => return Err(LoadError::invalid("server.port", "must be greater than zero")),
        port => port,
    };
    let host = server.host.as_deref().unwrap_or(DEFAULT_HOST);
    let addr =
        parse_socket_addr(host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings {
        addr,
        debug: server.debug.unwrap_or_default(),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = logging
        .level
        .as_deref()
        .map(LevelFilter::from_str)
        .transpose()
        .map_err(|err| LoadError::invalid("logging.level", format!("unrecognised level: {err}")))?
        .unwrap_or(LevelFilter::INFO);
    let format = match logging.json {
        Some(true) => LogFormat::Json,
        Some(false) | None => LogFormat::Compact,
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let capacity = cache.capacity.unwrap_or(defaults.capacity);
    if capacity == 0 {
        return Err(LoadError::invalid(
            "cache.capacity",
            "must be greater than zero",
        ));
    }

    let sweep_interval_ms = cache.sweep_interval_ms.unwrap_or(defaults.sweep_interval_ms);
    if sweep_interval_ms == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_ms",
            "must be greater than zero",
        ));
    }

    let version_key = non_empty(cache.version_key, defaults.version_key, "cache.version_key")?;
    let namespace = non_empty(cache.namespace, defaults.namespace, "cache.namespace")?;

    let default_scheme = cache
        .default_scheme
        .unwrap_or(defaults.default_scheme)
        .to_ascii_lowercase();
    if default_scheme != "http" && default_scheme != "https" {
        return Err(LoadError::invalid(
            "cache.default_scheme",
            format!("unsupported scheme `{default_scheme}`"),
        ));
    }

    Ok(CacheConfig {
        capacity,
        sweep_interval_ms,
        version_key,
        namespace,
        max_body_bytes: cache.max_body_bytes.unwrap_or(defaults.max_body_bytes),
        default_scheme,
    })
}

fn build_output_cache_settings(
    output_cache: RawOutputCacheSettings,
) -> Result<OutputCacheOptions, LoadError> {
    let mut options = OutputCacheOptions::with_duration(
        output_cache
            .duration_seconds
            .unwrap_or(DEFAULT_OUTPUT_CACHE_SECS),
    )
    .disable_for_authenticated(output_cache.disable_for_authenticated.unwrap_or(false))
    .enable_in_debug(output_cache.enable_in_debug.unwrap_or(false));

    if let Some(keys) = output_cache.dependency_keys {
        if keys.iter().any(|key| key.trim().is_empty()) {
            return Err(LoadError::invalid(
                "output_cache.dependency_keys",
                "dependency keys must not be empty",
            ));
        }
        options = options.dependency_keys(keys);
    }

    Ok(options)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    debug: Option<bool>,
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
    capacity: Option<usize>,
    sweep_interval_ms: Option<u64>,
    version_key: Option<String>,
    namespace: Option<String>,
    max_body_bytes: Option<usize>,
    default_scheme: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOutputCacheSettings {
    duration_seconds: Option<i64>,
    disable_for_authenticated: Option<bool>,
    enable_in_debug: Option<bool>,
    dependency_keys: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty(
    value: Option<String>,
    default: String,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or(default);
    if value.trim().is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(value)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
