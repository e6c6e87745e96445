//! Configuration for the pkgcdn package proxy
//!
//! This crate handles parsing and validation of the optional `pkgcdn.toml`
//! file and layers command-line / environment overrides on top of it,
//! producing the effective [`ServeConfig`].

pub mod merge;
pub mod toml;

// Re-export main types
pub use crate::merge::{ConfigLoader, ConfigOverrides, ConfigSource};
pub use crate::toml::{load_from_file, parse_config, validate_config, ServeConfig, LOG_LEVELS};

use pkgcdn_core::error::CdnError;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, CdnError>;
