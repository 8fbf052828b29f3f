//! Room controller configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; none of the values are required.

use crate::engine::{AudioObserverSettings, WorkerSettings};
use std::collections::HashMap;
use std::env;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default number of media workers in the pool.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// Default IP announced in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

/// Default base RTC port.
pub const DEFAULT_RTC_PORT_BASE: u16 = 40_000;

/// Default audio-level threshold in dBvo.
pub const DEFAULT_AUDIO_LEVEL_THRESHOLD: i8 = -80;

/// Default audio-level reporting interval in milliseconds.
pub const DEFAULT_AUDIO_LEVEL_INTERVAL_MS: u64 = 800;

/// Default number of loudest producers reported per interval. One entry
/// means the room tracks a single active speaker.
pub const DEFAULT_AUDIO_LEVEL_MAX_ENTRIES: usize = 1;

/// Default RC instance ID prefix.
pub const DEFAULT_RC_ID_PREFIX: &str = "rc";

/// Room controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Number of media workers started at boot (default: 4).
    pub worker_pool_size: usize,

    /// IP announced in ICE candidates (default: "127.0.0.1").
    pub announced_ip: String,

    /// First RTC port handed to workers (default: 40000).
    pub rtc_port_base: u16,

    /// Audio-level threshold in dBvo (default: -80).
    pub audio_level_threshold: i8,

    /// Audio-level reporting interval in milliseconds (default: 800).
    pub audio_level_interval_ms: u64,

    /// Loudest producers reported per interval (default: 1).
    pub audio_level_max_entries: usize,

    /// Deployment region identifier (e.g., "us-east-1").
    pub region: String,

    /// Unique identifier for this RC instance.
    pub rc_id: String,
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
        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let worker_pool_size = parse_or(vars, "RC_WORKER_POOL_SIZE", DEFAULT_WORKER_POOL_SIZE)?;
        if worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "RC_WORKER_POOL_SIZE must be at least 1".to_string(),
            ));
        }

        let announced_ip = vars
            .get("RC_ANNOUNCED_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ANNOUNCED_IP.to_string());

        let rtc_port_base = parse_or(vars, "RC_RTC_PORT_BASE", DEFAULT_RTC_PORT_BASE)?;

        let audio_level_threshold = parse_or(
            vars,
            "RC_AUDIO_LEVEL_THRESHOLD",
            DEFAULT_AUDIO_LEVEL_THRESHOLD,
        )?;
        let audio_level_interval_ms = parse_or(
            vars,
            "RC_AUDIO_LEVEL_INTERVAL_MS",
            DEFAULT_AUDIO_LEVEL_INTERVAL_MS,
        )?;
        let audio_level_max_entries = parse_or(
            vars,
            "RC_AUDIO_LEVEL_MAX_ENTRIES",
            DEFAULT_AUDIO_LEVEL_MAX_ENTRIES,
        )?;

        let region = vars
            .get("RC_REGION")
            .cloned()
            .unwrap_or_else(|| "us-east-1".to_string());

        // Generate RC instance ID
        let rc_id = vars.get("RC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_RC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            health_bind_address,
            worker_pool_size,
            announced_ip,
            rtc_port_base,
            audio_level_threshold,
            audio_level_interval_ms,
            audio_level_max_entries,
            region,
            rc_id,
        })
    }

    /// Worker settings derived from this configuration.
    #[must_use]
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            announced_ip: self.announced_ip.clone(),
            rtc_port_base: self.rtc_port_base,
        }
    }

    /// Audio observer settings derived from this configuration.
    #[must_use]
    pub fn audio_observer_settings(&self) -> AudioObserverSettings {
        AudioObserverSettings {
            max_entries: self.audio_level_max_entries,
            threshold: self.audio_level_threshold,
            interval_ms: self.audio_level_interval_ms,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}
