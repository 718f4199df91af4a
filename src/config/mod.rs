//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod messaging;
mod server;
mod storage;

pub use messaging::{AmqpSettings, DispatcherSettings, MessagingConfig, MessagingType, RpcSettings};
pub use server::{ConfigError, ShutdownSettings};
pub use storage::{SqliteConfig, StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "shelterhub.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SHELTERHUB_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SHELTERHUB";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SHELTERHUB_LOG";
/// Longest accepted request timeout and shutdown drain, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 60 * 60;

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker configuration.
    pub messaging: MessagingConfig,
    /// Request/reply client configuration.
    pub rpc: RpcSettings,
    /// Queue consumer configuration.
    pub dispatcher: DispatcherSettings,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Graceful shutdown configuration.
    pub shutdown: ShutdownSettings,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `shelterhub.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix and `__`
    ///    separators, e.g. `SHELTERHUB__RPC__TIMEOUT_SECS=5`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.prefetch == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.prefetch must be at least 1".to_string(),
            ));
        }
        if self.rpc.timeout_secs == 0 || self.rpc.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "rpc.timeout_secs must be between 1 and {}",
                MAX_TIMEOUT_SECS
            )));
        }
        if self.shutdown.drain_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "shutdown.drain_timeout_secs must be at most {}",
                MAX_TIMEOUT_SECS
            )));
        }
        if self.messaging.amqp.connect_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "messaging.amqp.connect_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing: in-memory broker, short timeouts.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.messaging.messaging_type = MessagingType::Channel;
        config.rpc.timeout_secs = 5;
        config.rpc.reap_interval_ms = 50;
        config.shutdown.drain_timeout_secs = 1;
        config
    }
}
