//! Gateway configuration.
//!
//! Defaults, then an optional JSON file named by `WA_GATEWAY_CONFIG`, then
//! individual environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use wa_socket::WebClientConfig;

pub const CONFIG_PATH_ENV: &str = "WA_GATEWAY_CONFIG";
pub const HOST_ENV: &str = "WA_GATEWAY_HOST";
pub const PORT_ENV: &str = "WA_GATEWAY_PORT";
pub const FALLBACK_PORT_ENV: &str = "PORT";
pub const AUTH_DIR_ENV: &str = "WA_GATEWAY_AUTH_DIR";
pub const LOG_LEVEL_ENV: &str = "WA_GATEWAY_LOG";
pub const LOG_JSON_ENV: &str = "WA_GATEWAY_LOG_JSON";
pub const PRINT_QR_ENV: &str = "WA_GATEWAY_PRINT_QR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Top-level gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding the session credentials.
    pub auth_dir: PathBuf,
    pub print_qr_terminal: bool,
    /// Timeout for remote media downloads. `None` waits indefinitely.
    pub fetch_timeout_secs: Option<u64>,
    pub reconnect: ReconnectPolicy,
    pub socket: WebClientConfig,
    pub log: LogConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            auth_dir: PathBuf::from("auth"),
            print_qr_terminal: true,
            fetch_timeout_secs: None,
            reconnect: ReconnectPolicy::default(),
            socket: WebClientConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Backoff between reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Unbounded when absent.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt: `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exp).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(&lookup)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env_overrides(
        &mut self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }

        let port = lookup(PORT_ENV)
            .map(|v| (PORT_ENV, v))
            .or_else(|| lookup(FALLBACK_PORT_ENV).map(|v| (FALLBACK_PORT_ENV, v)));
        if let Some((var, value)) = port {
            self.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var, value })?;
        }

        if let Some(dir) = lookup(AUTH_DIR_ENV) {
            self.auth_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            self.log.level = level;
        }
        if let Some(value) = lookup(LOG_JSON_ENV) {
            self.log.json = parse_bool(LOG_JSON_ENV, value)?;
        }
        if let Some(value) = lookup(PRINT_QR_ENV) {
            self.print_qr_terminal = parse_bool(PRINT_QR_ENV, value)?;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(var: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { var, value }),
    }
}
