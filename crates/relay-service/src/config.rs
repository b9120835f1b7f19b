//! Relay service configuration.
//!
//! Configuration is loaded from environment variables. Every setting has a
//! default; values that are present but unparseable are rejected rather than
//! silently replaced.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Default client WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default orphaned-channel grace period in seconds.
pub const DEFAULT_ORPHAN_GRACE_PERIOD_SECONDS: u64 = 300;

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Default interval between reaper passes in seconds.
pub const DEFAULT_REAPER_INTERVAL_SECONDS: u64 = 30;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "relay";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "RELAY_LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// Relay service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Client WebSocket bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// How long a channel without a provider survives (default: 300). Zero
    /// closes the channel as soon as its provider disconnects.
    pub orphan_grace_period_seconds: u64,

    /// Per-connection outbound queue capacity (default: 256).
    pub outbound_queue_capacity: usize,

    /// Seconds between reaper passes (default: 30).
    pub reaper_interval_seconds: u64,

    /// Unique identifier for this instance, for logs.
    pub instance_id: String,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let orphan_grace_period_seconds = parse_var(
            vars,
            "RELAY_ORPHAN_GRACE_PERIOD_SECONDS",
            DEFAULT_ORPHAN_GRACE_PERIOD_SECONDS,
        )?;

        let outbound_queue_capacity = parse_var(
            vars,
            "RELAY_OUTBOUND_QUEUE_CAPACITY",
            DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        )?;
        if outbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_OUTBOUND_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let reaper_interval_seconds = parse_var(
            vars,
            "RELAY_REAPER_INTERVAL_SECONDS",
            DEFAULT_REAPER_INTERVAL_SECONDS,
        )?;
        if reaper_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "RELAY_REAPER_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let log_format = match vars.get("RELAY_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::default(),
        };

        let instance_id = vars.get("RELAY_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            health_bind_address,
            orphan_grace_period_seconds,
            outbound_queue_capacity,
            reaper_interval_seconds,
            instance_id,
            log_format,
        })
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{name} must be a non-negative integer, got '{raw}'"))
        }),
        None => Ok(default),
    }
}
