//! Configuration management for Permastore Server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub packaging: PackagingConfig,
    pub usage: UsageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest multipart request body accepted
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Gateway API, also the base of raw data URLs
    pub api_url: String,
    /// Human-viewable explorer, used for transaction links
    pub explorer_url: String,
    /// Applies to each network call, not to a whole pipeline
    pub timeout_secs: u64,
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackagingConfig {
    /// Value of the `Packaging-Agent` manifest tag
    pub agent: String,
    /// Parent of per-request staging directories (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
    /// Keep archives on disk after upload instead of deleting them
    pub retain_archives: bool,
    /// Record a `Bagging-Date` in each manifest
    pub bagging_date: bool,
    /// Cap on a fetched archive, applied to the download and again to its unpacked size
    pub max_fetch_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageConfig {
    /// Where usage events are posted; logged only when unset
    pub sink_url: Option<String>,
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                max_upload_bytes: 500 * 1024 * 1024,
            },
            ledger: LedgerConfig {
                api_url: "https://arweave.net".to_string(),
                explorer_url: "https://viewblock.io/arweave".to_string(),
                timeout_secs: 60,
            },
            packaging: PackagingConfig {
                agent: "permastore".to_string(),
                staging_dir: None,
                retain_archives: false,
                bagging_date: true,
                max_fetch_bytes: 1024 * 1024 * 1024,
            },
            usage: UsageConfig {
                sink_url: None,
                queue_capacity: 1024,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let text = |name: &str, default: String| lookup(name).unwrap_or(default);
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Config {
            server: ServerConfig {
                host: text("SERVER_HOST", defaults.server.host),
                port: parsed(&lookup, "SERVER_PORT", defaults.server.port)?,
                max_upload_bytes: parsed(
                    &lookup,
                    "MAX_UPLOAD_BYTES",
                    defaults.server.max_upload_bytes,
                )?,
            },
            ledger: LedgerConfig {
                api_url: text("LEDGER_API_URL", defaults.ledger.api_url),
                explorer_url: text("LEDGER_EXPLORER_URL", defaults.ledger.explorer_url),
                timeout_secs: parsed(&lookup, "LEDGER_TIMEOUT_SECS", defaults.ledger.timeout_secs)?,
            },
            packaging: PackagingConfig {
                agent: text("PACKAGING_AGENT", defaults.packaging.agent),
                staging_dir: optional("STAGING_DIR").map(PathBuf::from),
                retain_archives: flag(&lookup, "RETAIN_ARCHIVES", defaults.packaging.retain_archives)?,
                bagging_date: flag(&lookup, "BAGGING_DATE", defaults.packaging.bagging_date)?,
                max_fetch_bytes: parsed(
                    &lookup,
                    "MAX_FETCH_BYTES",
                    defaults.packaging.max_fetch_bytes,
                )?,
            },
            usage: UsageConfig {
                sink_url: optional("USAGE_SINK_URL"),
                queue_capacity: parsed(
                    &lookup,
                    "USAGE_QUEUE_CAPACITY",
                    defaults.usage.queue_capacity,
                )?,
            },
        })
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(var) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { var, value }),
        },
        None => Ok(default),
    }
}
