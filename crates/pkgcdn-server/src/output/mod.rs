//! Terminal output: the startup banner and startup errors.

pub mod colors;
pub mod errors;

use std::net::SocketAddr;

use pkgcdn_config::{ConfigSource, ServeConfig};

use colors::ColorSupport;

/// Effective configuration, one setting per line
pub fn banner(config: &ServeConfig, source: &ConfigSource, address: SocketAddr, colors: ColorSupport) -> String {
    let cors = match (config.cors, &config.cors_origin) {
        (false, _) => "disabled".to_string(),
        (true, Some(origin)) => format!("enabled for {}", origin),
        (true, None) => "enabled".to_string(),
    };
    let source = match source {
        ConfigSource::Defaults => "defaults".to_string(),
        ConfigSource::File(path) => path.to_string(),
    };

    let rows = [
        ("config", source),
        ("log level", config.log_level.clone()),
        ("package prefix", config.prefix.clone()),
        ("storage", config.storage.to_string()),
        ("registry", config.registry.clone()),
        ("static files", config.document_root.to_string()),
        ("cache max-age", format!("{}s", config.max_age)),
        ("update interval", format!("{}s", config.update_interval)),
        ("cors headers", cors),
    ];

    let mut output = format!(
        "{} {} listening on {}\n",
        colors.bold("pkgcdn"),
        colors.dim(concat!("v", env!("CARGO_PKG_VERSION"))),
        colors.cyan(&format!("http://{}", address)),
    );
    for (label, value) in rows {
        output.push_str(&format!("  {} {:<16} {}\n", colors.dim("*"), label, value));
    }
    output
}
