//! Configuration loading and data folder resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is never fatal: defaults are used and startup continues.
//! A TOML file that exists but does not parse or validate is a configuration
//! error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name used under the platform config/data directories
pub const APP_DIR_NAME: &str = "tz-archiver";

/// Environment variable overriding the data folder
pub const DATA_DIR_ENV: &str = "TZA_DATA_DIR";

/// Environment variable pointing at a TOML config file
pub const CONFIG_PATH_ENV: &str = "TZA_CONFIG";

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_RATE_PER_MINUTE: u32 = 12;
pub const DEFAULT_JS_BEHAVIOR_TIMEOUT_SECS: u64 = 7;
/// One year, in seconds
pub const DEFAULT_IF_NOT_ARCHIVED_WITHIN_SECS: u64 = 31_536_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.fileship.xyz";
pub const DEFAULT_TZKT_BASE_URL: &str = "https://api.tzkt.io/v1";
pub const DEFAULT_TZKT_REQUESTS_PER_SECOND: u32 = 10;
pub const DEFAULT_TOKEN_LIMIT: usize = 10_000;
pub const DEFAULT_SPIDER_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_SPIDER_DELAY_MS: u64 = 500;

/// Bootstrap configuration loaded from TOML file
///
/// Every section is optional; absent keys fall back to compiled defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Folder holding `processed_cids.json` and `errors_cids.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub archive: ArchiveSettings,

    #[serde(default)]
    pub discovery: DiscoverySettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Wayback Machine submission settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSettings {
    /// Maximum simultaneous in-flight submissions
    pub concurrency: usize,
    /// Submission ceiling per minute (paced evenly)
    pub rate_per_minute: u32,
    /// Client-side render timeout requested from the service
    pub js_behavior_timeout_secs: u64,
    /// Skip capture if the URL was archived within this window
    pub if_not_archived_within_secs: u64,
    /// Ask the service to delay availability of the capture
    pub delay_availability: bool,
    /// HTTP timeout for a single request
    pub request_timeout_secs: u64,
    /// IPFS gateway used to build archive targets
    pub gateway: String,
    /// Query the availability API before submitting
    pub check_availability_first: bool,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            js_behavior_timeout_secs: DEFAULT_JS_BEHAVIOR_TIMEOUT_SECS,
            if_not_archived_within_secs: DEFAULT_IF_NOT_ARCHIVED_WITHIN_SECS,
            delay_availability: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            check_availability_first: true,
        }
    }
}

/// TzKT indexer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub base_url: String,
    pub requests_per_second: u32,
    pub token_limit: usize,
    pub spider_batch_size: usize,
    pub spider_delay_ms: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TZKT_BASE_URL.to_string(),
            requests_per_second: DEFAULT_TZKT_REQUESTS_PER_SECOND,
            token_limit: DEFAULT_TOKEN_LIMIT,
            spider_batch_size: DEFAULT_SPIDER_BATCH_SIZE,
            spider_delay_ms: DEFAULT_SPIDER_DELAY_MS,
        }
    }
}

impl TomlConfig {
    /// Reject values that would stall or misdirect a run
    pub fn validate(&self) -> Result<()> {
        let archive = &self.archive;
        if archive.concurrency == 0 {
            return Err(Error::Config("archive.concurrency must be at least 1".to_string()));
        }
        if archive.rate_per_minute == 0 {
            return Err(Error::Config("archive.rate_per_minute must be at least 1".to_string()));
        }
        if archive.request_timeout_secs == 0 {
            return Err(Error::Config(
                "archive.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if !is_http_url(&archive.gateway) {
            return Err(Error::Config(format!(
                "archive.gateway must be an http(s) URL, got '{}'",
                archive.gateway
            )));
        }

        let discovery = &self.discovery;
        if !is_http_url(&discovery.base_url) {
            return Err(Error::Config(format!(
                "discovery.base_url must be an http(s) URL, got '{}'",
                discovery.base_url
            )));
        }
        if discovery.requests_per_second == 0 {
            return Err(Error::Config(
                "discovery.requests_per_second must be at least 1".to_string(),
            ));
        }
        if discovery.token_limit == 0 || discovery.spider_batch_size == 0 {
            return Err(Error::Config(
                "discovery.token_limit and discovery.spider_batch_size must be at least 1"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    (value.starts_with("https://") && value.len() > "https://".len())
        || (value.starts_with("http://") && value.len() > "http://".len())
}

/// Platform config file location (`~/.config/tz-archiver/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("./tz-archiver-data"))
}

/// Load the TOML config
///
/// An explicitly requested file (argument or `TZA_CONFIG`) must exist. The
/// platform default file is optional: when absent, compiled defaults are used.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);

    let (path, required) = match explicit.map(Path::to_path_buf).or(env_path) {
        Some(path) => (path, true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => {
                warn!("Could not determine config directory, using defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    if !path.exists() {
        if required {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        info!("No config file at {}, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.validate()?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Resolve the data folder: CLI → `TZA_DATA_DIR` → TOML → OS default
pub fn resolve_data_dir(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.data_dir {
        return path.clone();
    }

    default_data_dir()
}

/// Write a TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::fs::write_atomic(path, content.as_bytes())
}
