use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use crate::{
    error::{GateError, Result},
    limiter::{FailurePolicy, DEFAULT_FAILURE_RETRY_AFTER_SECS},
    registry::{LimitRegistry, DEFAULT_KEY_PREFIX},
    store::RedisConfig,
    utils::parse_window,
};

/// Limit declarations, read once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub limits: Vec<LimitDefinition>,
}

/// One declared limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitDefinition {
    pub window: Window,
    pub max_count: u64,
    pub resource: Option<String>,
    pub operation: Option<String>,
}

/// Window length: plain seconds or a unit-suffixed string such as `6h`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Window {
    Seconds(u64),
    Text(String),
}

impl Window {
    pub fn to_seconds(&self) -> Result<u64> {
        match self {
            Window::Seconds(secs) => Ok(*secs),
            Window::Text(text) => parse_window(text),
        }
    }
}

impl LimitsConfig {
    /// Register every declared limit, in file order, into a fresh registry
    pub fn build_registry(&self, key_prefix: &str) -> Result<LimitRegistry> {
        let mut registry = LimitRegistry::with_prefix(key_prefix);

        for (index, definition) in self.limits.iter().enumerate() {
            let window_secs = definition
                .window
                .to_seconds()
                .map_err(|e| GateError::Config(format!("limit #{}: {}", index + 1, e)))?;

            registry
                .register(
                    window_secs,
                    definition.max_count,
                    definition.resource.as_deref(),
                    definition.operation.as_deref(),
                )
                .map_err(|e| GateError::Config(format!("limit #{}: {}", index + 1, e)))?;
        }

        Ok(registry)
    }
}

/// Load limit declarations from a YAML string
pub fn load_limits_from_yaml(yaml: &str) -> Result<LimitsConfig> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load limit declarations from a YAML file
pub fn load_limits_from_file(path: &str) -> Result<LimitsConfig> {
    let content = std::fs::read_to_string(path)?;
    load_limits_from_yaml(&content)
}

/// Where counters live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Single-process only
    Memory,
}

/// Environment variable prefix for service settings
pub const ENV_PREFIX: &str = "RATELIMIT";

/// Service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_http_addr")]
    pub http_addr: String,

    pub limits_path: Option<String>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub store: StoreBackend,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_failure_retry_after_secs")]
    pub failure_retry_after_secs: u64,

    #[serde(default = "default_connection_timeout_ms")]
    pub redis_connection_timeout_ms: u64,

    #[serde(default = "default_command_timeout_ms")]
    pub redis_command_timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_failure_retry_after_secs() -> u64 {
    DEFAULT_FAILURE_RETRY_AFTER_SECS
}

fn default_connection_timeout_ms() -> u64 {
    5000
}

fn default_command_timeout_ms() -> u64 {
    1000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            http_addr: default_http_addr(),
            limits_path: None,
            key_prefix: default_key_prefix(),
            store: StoreBackend::default(),
            failure_policy: FailurePolicy::default(),
            failure_retry_after_secs: default_failure_retry_after_secs(),
            redis_connection_timeout_ms: default_connection_timeout_ms(),
            redis_command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file named by `RATELIMIT_CONFIG_FILE`,
    /// overridden by `RATELIMIT_*` environment variables.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var(format!("{}_CONFIG_FILE", ENV_PREFIX)) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .map_err(|e| GateError::Config(e.to_string()))?;

        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        config
            .try_deserialize()
            .map_err(|e| GateError::Config(e.to_string()))
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.http_addr
            .parse()
            .map_err(|e| GateError::Config(format!("http_addr '{}': {}", self.http_addr, e)))
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.redis_url.clone(),
            connection_timeout: Some(Duration::from_millis(self.redis_connection_timeout_ms)),
            command_timeout: Some(Duration::from_millis(self.redis_command_timeout_ms)),
            ..Default::default()
        }
    }

    /// Read the limits file, if any, into a registry
    pub fn load_registry(&self) -> Result<LimitRegistry> {
        let limits = match &self.limits_path {
            Some(path) => load_limits_from_file(path)?,
            None => LimitsConfig::default(),
        };
        limits.build_registry(&self.key_prefix)
    }
}
