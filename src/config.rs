//! Configuration module for the ncpaste server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Identifier allocation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdPolicy {
    /// Sequential hexadecimal ids backed by a counter file
    #[default]
    Counter,
    /// Random decimal ids (collisions overwrite)
    Random,
}

/// Command-line arguments for the paste server
#[derive(Parser, Debug)]
#[command(name = "ncpaste")]
#[command(author = "ncpaste authors")]
#[command(version = "0.1.0")]
#[command(about = "A netcat-friendly paste bin", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind both listeners to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port for raw TCP paste ingestion
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Port for the HTTP retrieval server
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Host name used when building paste URLs (defaults to the bind host)
    #[arg(long)]
    pub public_host: Option<String>,

    /// Directory where pastes are stored
    #[arg(short = 'd', long)]
    pub paste_dir: Option<PathBuf>,

    /// Maximum paste size in bytes
    #[arg(short = 'm', long)]
    pub max_size: Option<usize>,

    /// Identifier allocation policy
    #[arg(long, value_enum)]
    pub id_policy: Option<IdPolicy>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ids: IdsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    pub public_host: Option<String>,
    /// Listen backlog for the ingestion socket
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Keep reading until EOF (or the size limit) instead of a single read
    #[serde(default)]
    pub read_to_eof: bool,
    /// Ingestion read deadline in seconds (0 = wait forever)
    #[serde(default)]
    pub read_timeout_secs: u64,
    /// Idle window in milliseconds during which further segments are still
    /// collected after the first read (0 = a single read)
    #[serde(default = "default_read_settle_ms")]
    pub read_settle_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http_port: default_http_port(),
            public_host: None,
            backlog: default_backlog(),
            read_to_eof: false,
            read_timeout_secs: 0,
            read_settle_ms: default_read_settle_ms(),
        }
    }
}

/// Storage-related configuration
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_paste_dir")]
    pub paste_dir: PathBuf,
    /// Maximum paste size in bytes
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            paste_dir: default_paste_dir(),
            max_size: default_max_size(),
        }
    }
}

/// Identifier allocation configuration
#[derive(Debug, Deserialize)]
pub struct IdsConfig {
    #[serde(default)]
    pub policy: IdPolicy,
    /// Number of ids the counter policy may issue
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    #[serde(default = "default_counter_file")]
    pub counter_file: PathBuf,
    /// Digits per id under the random policy
    #[serde(default = "default_random_length")]
    pub random_length: usize,
}

impl Default for IdsConfig {
    fn default() -> Self {
        Self {
            policy: IdPolicy::default(),
            capacity: default_capacity(),
            counter_file: default_counter_file(),
            random_length: default_random_length(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5254
}

fn default_http_port() -> u16 {
    5255
}

fn default_backlog() -> i32 {
    5
}

fn default_read_settle_ms() -> u64 {
    100
}

fn default_paste_dir() -> PathBuf {
    PathBuf::from("pastes")
}

fn default_max_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_capacity() -> u64 {
    0x1_0000 // four hex digits
}

fn default_counter_file() -> PathBuf {
    PathBuf::from("count.txt")
}

fn default_random_length() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub http_port: u16,
    pub public_host: String,
    pub backlog: i32,
    pub read_to_eof: bool,
    pub read_timeout: Option<Duration>,
    pub read_settle: Option<Duration>,
    pub paste_dir: PathBuf,
    pub max_size: usize,
    pub id_policy: IdPolicy,
    pub id_capacity: u64,
    pub counter_file: PathBuf,
    pub random_id_length: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let TomlConfig {
            server,
            storage,
            ids,
            logging,
        } = toml_config;

        let host = cli.host.unwrap_or(server.host);
        let public_host = cli
            .public_host
            .or(server.public_host)
            .unwrap_or_else(|| host.clone());

        Config {
            host,
            port: cli.port.unwrap_or(server.port),
            http_port: cli.http_port.unwrap_or(server.http_port),
            public_host,
            backlog: server.backlog,
            read_to_eof: server.read_to_eof,
            read_timeout: match server.read_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            read_settle: match server.read_settle_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            paste_dir: cli.paste_dir.unwrap_or(storage.paste_dir),
            max_size: cli.max_size.unwrap_or(storage.max_size),
            id_policy: cli.id_policy.unwrap_or(ids.policy),
            id_capacity: ids.capacity,
            counter_file: ids.counter_file,
            random_id_length: ids.random_length,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                logging.level
            },
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
