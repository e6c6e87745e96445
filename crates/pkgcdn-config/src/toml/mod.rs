//! `pkgcdn.toml` parsing and validation

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use pkgcdn_core::error::CdnError;
use serde::{Deserialize, Serialize};

use crate::ConfigResult;

/// Accepted values for `log_level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Longest accepted interval or timeout, one year
pub const MAX_SECONDS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Effective server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServeConfig {
    /// Address to bind to
    pub host: String,

    /// Port to listen to for requests
    pub port: u16,

    /// Location to store package metadata and archives
    pub storage: Utf8PathBuf,

    /// Upstream npm registry
    pub registry: String,

    /// URL prefix packages are served under
    pub prefix: String,

    /// Directory served as static files outside the prefix
    pub document_root: Utf8PathBuf,

    /// Value of the `Cache-Control: max-age` header, in seconds
    pub max_age: u32,

    /// Send CORS headers
    pub cors: bool,

    /// Fixed `Access-Control-Allow-Origin`; the request origin is echoed when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,

    /// Seconds after which cached metadata is refreshed from upstream
    pub update_interval: f64,

    /// Seconds to wait for another request's in-flight download
    pub lock_timeout: f64,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Emit logs as JSON
    pub log_json: bool,

    /// Suppress the startup banner
    pub quiet: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2998,
            storage: Utf8PathBuf::from("./packages"),
            registry: "https://registry.npmjs.org".to_string(),
            prefix: "/package/".to_string(),
            document_root: Utf8PathBuf::from("."),
            max_age: 30,
            cors: false,
            cors_origin: None,
            update_interval: 1.0,
            lock_timeout: 10.0,
            log_level: "info".to_string(),
            log_json: false,
            quiet: false,
        }
    }
}

impl ServeConfig {
    /// Metadata time-to-live in the memory tier
    pub fn update_interval(&self) -> Duration {
        seconds(self.update_interval)
    }

    /// Bound on waiting for another caller's in-flight fetch
    pub fn lock_timeout(&self) -> Duration {
        seconds(self.lock_timeout)
    }

    /// Registry base URL without a trailing slash
    pub fn registry_url(&self) -> &str {
        self.registry.trim_end_matches('/')
    }

    /// Force the prefix to start and end with `/`
    pub fn normalize(&mut self) {
        let trimmed = self.prefix.trim_matches('/');
        self.prefix = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        };
        self.log_level = self.log_level.to_lowercase();
    }
}

/// Parse TOML string to ServeConfig
pub fn parse_config(content: &str) -> ConfigResult<ServeConfig> {
    let mut config: ServeConfig = ::toml::from_str(content).map_err(|e| {
        let (line, column) = e
            .span()
            .map(|span| line_and_column(content, span.start))
            .unwrap_or((0, 0));
        CdnError::ConfigParse {
            message: e.message().to_string(),
            line,
            column,
        }
    })?;

    config.normalize();
    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration values
pub fn validate_config(config: &ServeConfig) -> ConfigResult<()> {
    if config.port == 0 {
        return Err(invalid("port", "Port must be between 1 and 65535".to_string()));
    }

    match url::Url::parse(&config.registry) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {},
        Ok(url) => {
            return Err(invalid(
                "registry",
                format!("Registry must be an http(s) URL, got scheme '{}'", url.scheme()),
            ))
        },
        Err(e) => return Err(invalid("registry", format!("Invalid registry URL: {}", e))),
    }

    if !is_positive_seconds(config.update_interval) {
        return Err(invalid(
            "update_interval",
            format!("Update interval must be a positive number of seconds up to {}", MAX_SECONDS),
        ));
    }

    if !is_positive_seconds(config.lock_timeout) {
        return Err(invalid(
            "lock_timeout",
            format!("Lock timeout must be a positive number of seconds up to {}", MAX_SECONDS),
        ));
    }

    if !LOG_LEVELS.contains(&config.log_level.as_str()) {
        return Err(invalid(
            "log_level",
            format!("Unknown log level '{}', expected one of {}", config.log_level, LOG_LEVELS.join(", ")),
        ));
    }

    if config.storage.as_str().is_empty() {
        return Err(invalid("storage", "Storage directory must not be empty".to_string()));
    }

    Ok(())
}

/// Load and parse a config file
pub async fn load_from_file(path: &Utf8Path) -> ConfigResult<ServeConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CdnError::io(format!("Failed to read {}", path), e))?;

    parse_config(&content).map_err(|e| match e {
        CdnError::ConfigParse { message, line, column } => CdnError::ConfigParse {
            message: format!("In file {}: {}", path, message),
            line,
            column,
        },
        CdnError::ConfigValidation { field, reason } => CdnError::ConfigValidation {
            field,
            reason: format!("In file {}: {}", path, reason),
        },
        other => other,
    })
}

fn is_positive_seconds(value: f64) -> bool {
    value > 0.0 && value <= MAX_SECONDS
}

/// Unvalidated values are clamped into `0..=MAX_SECONDS`, NaN reads as zero
fn seconds(value: f64) -> Duration {
    if value > MAX_SECONDS {
        return Duration::from_secs_f64(MAX_SECONDS);
    }
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

fn invalid(field: &str, reason: String) -> CdnError {
    CdnError::ConfigValidation {
        field: field.to_string(),
        reason,
    }
}

/// 1-based line and column of a byte offset
fn line_and_column(content: &str, offset: usize) -> (usize, usize) {
    let before = &content[..offset.min(content.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}
