//! Configuration loading and logging bootstrap.
//!
//! Configuration is discovered in this order:
//! 1. The file named by the `TASKKIT_CONFIG` environment variable
//! 2. `./taskkit.toml` in the current directory
//! 3. Built-in defaults

use crate::group::WaitStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Environment variable pointing at a configuration file
pub const CONFIG_ENV_VAR: &str = "TASKKIT_CONFIG";

/// File name looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "taskkit.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KitConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Task queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Tasks allowed to run at once; unlimited when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_tasks: Option<usize>,

    /// Hold submitted tasks until the queue is resumed
    #[serde(default)]
    pub start_suspended: bool,
}

fn default_queue_name() -> String {
    "taskkit".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            max_concurrent_tasks: None,
            start_suspended: false,
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = Some(max.max(1));
        self
    }

    pub fn with_start_suspended(mut self, suspended: bool) -> Self {
        self.start_suspended = suspended;
        self
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub with_target: bool,
}

fn default_filter() -> String {
    "taskkit=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            with_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// Retry settings used by `RetryTask::from_config`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub wait: WaitStrategyConfig,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait: WaitStrategyConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_wait(mut self, wait: WaitStrategyConfig) -> Self {
        self.wait = wait;
        self
    }
}

/// Serializable form of `WaitStrategy`, in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitStrategyConfig {
    #[default]
    Immediate,
    Constant {
        millis: u64,
    },
    Random {
        min_millis: u64,
        max_millis: u64,
    },
    Incrementing {
        initial_millis: i64,
        increment_millis: i64,
    },
    Fibonacci {
        period_millis: u64,
        max_millis: u64,
    },
    Exponential {
        power: f64,
        period_millis: u64,
        max_millis: u64,
    },
}

impl WaitStrategyConfig {
    pub fn to_strategy(&self) -> WaitStrategy {
        match *self {
            WaitStrategyConfig::Immediate => WaitStrategy::Immediate,
            WaitStrategyConfig::Constant { millis } => {
                WaitStrategy::Constant(Duration::from_millis(millis))
            }
            WaitStrategyConfig::Random {
                min_millis,
                max_millis,
            } => WaitStrategy::Random {
                min: Duration::from_millis(min_millis),
                max: Duration::from_millis(max_millis),
            },
            WaitStrategyConfig::Incrementing {
                initial_millis,
                increment_millis,
            } => WaitStrategy::Incrementing {
                initial: chrono::Duration::milliseconds(initial_millis),
                increment: chrono::Duration::milliseconds(increment_millis),
            },
            WaitStrategyConfig::Fibonacci {
                period_millis,
                max_millis,
            } => WaitStrategy::Fibonacci {
                period: Duration::from_millis(period_millis),
                max: Duration::from_millis(max_millis),
            },
            WaitStrategyConfig::Exponential {
                power,
                period_millis,
                max_millis,
            } => WaitStrategy::Exponential {
                power,
                period: Duration::from_millis(period_millis),
                max: Duration::from_millis(max_millis),
            },
        }
    }
}

impl KitConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Discover and load configuration, falling back to defaults
    pub fn discover() -> Result<Self> {
        match Self::find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                Self::load(path)
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// First existing candidate in discovery order
    pub fn find_config_file() -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            candidates.push(PathBuf::from(path));
        }
        if let Ok(current_dir) = std::env::current_dir() {
            candidates.push(current_dir.join(CONFIG_FILE_NAME));
        }

        for candidate in candidates {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

/// Install a `tracing` subscriber for `config`.
///
/// `RUST_LOG` takes precedence over the configured filter. Returns `false`
/// when a global subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .try_init()
        .is_ok()
}
