//! Configuration module for pipe-worker.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// What to do with in-flight tasks when the worker is interrupted.
///
/// End of input always drains; this only applies to interruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Stop immediately; in-flight tasks produce no response.
    #[default]
    Abandon,
    /// Wait up to the drain timeout for in-flight tasks to respond.
    Drain,
}

/// Command-line arguments for the worker
#[derive(Parser, Debug)]
#[command(name = "pipe-worker")]
#[command(author = "pipe-worker authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Runs each stdin request line as a concurrent task and writes correlated responses to stdout",
    long_about = None
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of tasks running at once (unbounded if unset)
    #[arg(short = 'j', long)]
    pub max_concurrency: Option<usize>,

    /// Delay before the readiness line is written, in milliseconds
    #[arg(long)]
    pub startup_delay_ms: Option<u64>,

    /// Longest accepted request line in bytes
    #[arg(long)]
    pub max_line_bytes: Option<usize>,

    /// In-flight task policy on interrupt
    #[arg(long, value_enum)]
    pub shutdown: Option<ShutdownPolicy>,

    /// How long a draining shutdown waits for in-flight tasks, in milliseconds
    #[arg(long)]
    pub drain_timeout_ms: Option<u64>,

    /// Delay before `ping` answers, in milliseconds
    #[arg(long)]
    pub ping_delay_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker-related configuration
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of concurrently running tasks
    pub max_concurrency: Option<usize>,
    /// Delay before the readiness line, in milliseconds
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Longest accepted request line in bytes
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// In-flight task policy on interrupt
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
    /// Drain timeout in milliseconds
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            startup_delay_ms: 0,
            max_line_bytes: default_max_line_bytes(),
            shutdown: ShutdownPolicy::default(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

/// Built-in command configuration
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    /// Delay before `ping` answers, in milliseconds
    #[serde(default = "default_ping_delay_ms")]
    pub ping_delay_ms: u64,
    /// Longest string `random` will generate
    #[serde(default = "default_max_random_length")]
    pub max_random_length: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            ping_delay_ms: default_ping_delay_ms(),
            max_random_length: default_max_random_length(),
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

fn default_max_line_bytes() -> usize {
    crate::protocol::MAX_LINE_BYTES
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_ping_delay_ms() -> u64 {
    2_000
}

fn default_max_random_length() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub max_concurrency: Option<usize>,
    pub startup_delay_ms: u64,
    pub max_line_bytes: usize,
    pub shutdown: ShutdownPolicy,
    pub drain_timeout_ms: u64,
    pub ping_delay_ms: u64,
    pub max_random_length: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config::merge(CliArgs::default_args(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve configuration from already-parsed CLI arguments.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Config {
        Config {
            max_concurrency: cli.max_concurrency.or(toml_config.worker.max_concurrency),
            startup_delay_ms: cli
                .startup_delay_ms
                .unwrap_or(toml_config.worker.startup_delay_ms),
            max_line_bytes: cli
                .max_line_bytes
                .unwrap_or(toml_config.worker.max_line_bytes),
            shutdown: cli.shutdown.unwrap_or(toml_config.worker.shutdown),
            drain_timeout_ms: cli
                .drain_timeout_ms
                .unwrap_or(toml_config.worker.drain_timeout_ms),
            ping_delay_ms: cli
                .ping_delay_ms
                .unwrap_or(toml_config.commands.ping_delay_ms),
            max_random_length: toml_config.commands.max_random_length,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_line_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl CliArgs {
    fn default_args() -> Self {
        CliArgs {
            config: None,
            max_concurrency: None,
            startup_delay_ms: None,
            max_line_bytes: None,
            shutdown: None,
            drain_timeout_ms: None,
            ping_delay_ms: None,
            log_level: default_log_level(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
