//! Configuration for the server and client binaries.
//!
//! Positional arguments carry the essentials (`server <port>`,
//! `client <host> <port>`). An optional TOML file can tune the rest.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(version = "0.1.0")]
#[command(about = "Fixed-frame TCP echo server", long_about = None)]
pub struct ServerArgs {
    /// Port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the config
    /// file's level, then "info"
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the heartbeat client
#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(version = "0.1.0")]
#[command(about = "Fixed-frame TCP heartbeat client", long_about = None)]
pub struct ClientArgs {
    /// Server host name or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stop after this many exchanges (runs forever if omitted)
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Per-endpoint connect deadline in milliseconds (0 = none)
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error); defaults to the config
    /// file's level, then "info"
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Interface to bind to
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Throughput sampling period in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Echo frames that may queue behind an in-flight write
    #[serde(default = "default_pipeline_depth")]
    pub pipeline_depth: usize,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            sample_interval_ms: default_sample_interval_ms(),
            pipeline_depth: default_pipeline_depth(),
            nodelay: default_nodelay(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    /// Per-endpoint connect deadline in milliseconds (0 = none)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Exchanges before the client stops
    pub count: Option<u64>,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            count: None,
            nodelay: default_nodelay(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_sample_interval_ms() -> u64 {
    1000 // 1 second
}

fn default_pipeline_depth() -> usize {
    64
}

fn default_nodelay() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub sample_interval: Duration,
    pub pipeline_depth: usize,
    pub nodelay: bool,
    pub log_level: String,
}

impl ServerConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load(args: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml(args.config.as_deref())?;
        Self::merge(args, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(args: ServerArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;
        let host: IpAddr = server
            .bind_host
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(server.bind_host.clone()))?;

        Ok(ServerConfig {
            listen: SocketAddr::new(host, args.port),
            sample_interval: Duration::from_millis(server.sample_interval_ms.max(1)),
            pipeline_depth: server.pipeline_depth.max(1),
            nodelay: server.nodelay,
            log_level: pick_log_level(args.log_level, toml_config.logging.level),
        })
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub count: Option<u64>,
    pub nodelay: bool,
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load(args: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml(args.config.as_deref())?;
        Ok(Self::merge(args, toml_config))
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(args: ClientArgs, toml_config: TomlConfig) -> Self {
        let client = toml_config.client;
        let timeout_ms = args
            .connect_timeout_ms
            .unwrap_or(client.connect_timeout_ms);

        ClientConfig {
            host: args.host,
            port: args.port,
            connect_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            count: args.count.or(client.count),
            nodelay: client.nodelay,
            log_level: pick_log_level(args.log_level, toml_config.logging.level),
        }
    }
}

fn read_toml(path: Option<&Path>) -> Result<TomlConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(TomlConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

fn pick_log_level(cli: Option<String>, file: String) -> String {
    cli.unwrap_or(file)
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidAddress(host) => {
                write!(f, "Invalid bind address '{host}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
