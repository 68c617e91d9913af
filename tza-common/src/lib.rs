//! # tz-archiver Common Library
//!
//! Shared code for the tz-archiver crates:
//! - Error type and result alias
//! - TOML configuration loading and data folder resolution
//! - Atomic file writes (temp file + rename)

pub mod config;
pub mod error;
pub mod fs;

pub use error::{Error, Result};
