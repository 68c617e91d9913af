//! Archiver configuration
//!
//! Turns the shared [`TomlConfig`] plus command-line overrides into one
//! immutable [`ArchiverConfig`], and reads archive credentials from the
//! environment (a `.env` file is loaded by `main` before this runs).

use crate::archive::{Credentials, SaveOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tza_common::config::{resolve_data_dir, TomlConfig};
use tza_common::{Error, Result};

/// Environment variable holding the archive access key
pub const ACCESS_KEY_ENV: &str = "ARCHIVE_ACCESS";

/// Environment variable holding the archive secret key
pub const SECRET_KEY_ENV: &str = "ARCHIVE_SECRET";

/// Address prefixes accepted for `--wallet`
pub const WALLET_PREFIXES: &[&str] = &["tz1", "tz2", "tz3", "KT1"];

/// Values given on the command line; `None` defers to lower tiers
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub data_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub gateway: Option<String>,
    pub no_availability_check: bool,
}

/// TzKT discovery settings
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryConfig {
    pub base_url: String,
    pub requests_per_second: u32,
    pub token_limit: usize,
    pub spider_batch_size: usize,
    pub spider_delay: Duration,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiverConfig {
    pub data_dir: PathBuf,
    pub concurrency: usize,
    pub rate_per_minute: u32,
    pub save_options: SaveOptions,
    pub request_timeout: Duration,
    pub gateway: String,
    pub check_availability_first: bool,
    pub discovery: DiscoveryConfig,
}

impl ArchiverConfig {
    /// Merge CLI overrides over the TOML config
    pub fn resolve(toml_config: &TomlConfig, cli: &CliOverrides) -> Result<Self> {
        let mut merged = toml_config.clone();
        if let Some(concurrency) = cli.concurrency {
            merged.archive.concurrency = concurrency;
        }
        if let Some(gateway) = &cli.gateway {
            merged.archive.gateway = gateway.clone();
        }
        if cli.no_availability_check {
            merged.archive.check_availability_first = false;
        }
        merged.validate()?;

        let data_dir = resolve_data_dir(cli.data_dir.as_deref(), &merged);
        Ok(Self::from_toml(&merged, data_dir))
    }

    /// Build from an already validated TOML config
    pub fn from_toml(toml_config: &TomlConfig, data_dir: PathBuf) -> Self {
        let archive = &toml_config.archive;
        let discovery = &toml_config.discovery;

        Self {
            data_dir,
            concurrency: archive.concurrency,
            rate_per_minute: archive.rate_per_minute,
            save_options: SaveOptions {
                js_behavior_timeout: Duration::from_secs(archive.js_behavior_timeout_secs),
                if_not_archived_within: Duration::from_secs(archive.if_not_archived_within_secs),
                delay_availability: archive.delay_availability,
            },
            request_timeout: Duration::from_secs(archive.request_timeout_secs),
            gateway: archive.gateway.clone(),
            check_availability_first: archive.check_availability_first,
            discovery: DiscoveryConfig {
                base_url: discovery.base_url.clone(),
                requests_per_second: discovery.requests_per_second,
                token_limit: discovery.token_limit,
                spider_batch_size: discovery.spider_batch_size,
                spider_delay: Duration::from_millis(discovery.spider_delay_ms),
            },
        }
    }

    /// Spacing that keeps dispatches under `rate_per_minute`
    pub fn min_dispatch_spacing(&self) -> Duration {
        Duration::from_secs(60) / self.rate_per_minute.max(1)
    }
}

/// Read archive credentials from the environment
pub fn resolve_credentials() -> Result<Credentials> {
    let access = std::env::var(ACCESS_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let secret = std::env::var(SECRET_KEY_ENV).ok().filter(|k| is_valid_key(k));

    match (access, secret) {
        (Some(access), Some(secret)) => {
            info!("Archive credentials loaded from environment");
            Ok(Credentials::new(access.trim(), secret.trim()))
        }
        _ => Err(Error::Config(format!(
            "Archive credentials not configured. Set both of:\n\
             1. Environment: {}=your-access-key and {}=your-secret-key\n\
             2. A .env file in the working directory with the same keys\n\
             \n\
             Obtain keys at: https://archive.org/account/s3.php",
            ACCESS_KEY_ENV, SECRET_KEY_ENV
        ))),
    }
}

/// Check if a key is valid (non-empty after trimming)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Accept Tezos implicit (tz1/tz2/tz3) and originated (KT1) addresses
pub fn validate_wallet_address(address: &str) -> Result<()> {
    if WALLET_PREFIXES
        .iter()
        .any(|prefix| address.starts_with(prefix))
    {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "Invalid wallet address '{}': must start with one of {}",
            address,
            WALLET_PREFIXES.join(", ")
        )))
    }
}

/// Token limit must be at least 1
pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(Error::InvalidInput("Limit must be at least 1".to_string()));
    }
    Ok(())
}
