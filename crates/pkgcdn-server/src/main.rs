//! # pkgcdn
//!
//! Caching proxy serving files out of npm package archives.
//!
//! Parses the command line, layers it over the optional config file, sets up
//! logging and runs the HTTP server until Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pkgcdn_config::{ConfigLoader, ConfigOverrides, ServeConfig};
use pkgcdn_server::output::colors::ColorSupport;
use pkgcdn_server::output::errors::ErrorFormatter;
use pkgcdn_server::{output, serve, HttpService};

/// Serve files straight out of npm packages
#[derive(Parser, Debug)]
#[command(name = "pkgcdn", version, about = "Caching proxy serving files out of npm packages")]
pub struct Cli {
    /// Directory served as static files outside the package prefix
    #[arg(value_name = "DOCUMENT_ROOT", env = "PKGCDN_DOCUMENT_ROOT")]
    pub document_root: Option<Utf8PathBuf>,

    /// Config file (TOML)
    #[arg(short, long, env = "PKGCDN_CONFIG")]
    pub config: Option<Utf8PathBuf>,

    /// Address to bind to
    #[arg(long, env = "PKGCDN_HOST")]
    pub host: Option<String>,

    /// Port to listen to for requests [default: 2998]
    #[arg(short, long, env = "PKGCDN_PORT")]
    pub port: Option<u16>,

    /// Location to store packages [default: ./packages]
    #[arg(short, long, env = "PKGCDN_STORAGE")]
    pub storage: Option<Utf8PathBuf>,

    /// Upstream npm registry [default: https://registry.npmjs.org]
    #[arg(short, long, env = "PKGCDN_REGISTRY")]
    pub registry: Option<String>,

    /// Prefix for serving packages [default: /package/]
    #[arg(short = 'P', long, env = "PKGCDN_PREFIX")]
    pub prefix: Option<String>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(short = 'L', long, alias = "loglevel", env = "PKGCDN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, env = "PKGCDN_LOG_JSON")]
    pub log_json: bool,

    /// Send CORS headers
    #[arg(short = 'C', long, env = "PKGCDN_CORS")]
    pub cors: bool,

    /// Fixed Access-Control-Allow-Origin instead of echoing the request's Origin
    #[arg(short = 'O', long, env = "PKGCDN_CORS_ORIGIN")]
    pub cors_origin: Option<String>,

    /// Seconds browsers may cache a file [default: 30]
    #[arg(short = 'M', long, alias = "maxage", env = "PKGCDN_MAX_AGE")]
    pub max_age: Option<u32>,

    /// Seconds before package metadata is refreshed from upstream [default: 1]
    #[arg(short = 'U', long, alias = "update-interval", env = "PKGCDN_NPM_UPDATE_INTERVAL")]
    pub npm_update_interval: Option<f64>,

    /// Seconds to wait for another request's download [default: 10]
    #[arg(long, env = "PKGCDN_LOCK_TIMEOUT")]
    pub lock_timeout: Option<f64>,

    /// Suppress the startup banner
    #[arg(short, long, env = "PKGCDN_QUIET")]
    pub quiet: bool,
}

impl Cli {
    /// Values given on the command line; unset flags leave the file's values alone
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port,
            storage: self.storage.clone(),
            registry: self.registry.clone(),
            prefix: self.prefix.clone(),
            document_root: self.document_root.clone(),
            max_age: self.max_age,
            cors: self.cors.then_some(true),
            cors_origin: self.cors_origin.clone(),
            update_interval: self.npm_update_interval,
            lock_timeout: self.lock_timeout,
            log_level: self.log_level.clone(),
            log_json: self.log_json.then_some(true),
            quiet: self.quiet.then_some(true),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let colors = ColorSupport::detect();

    setup_panic_handler();

    let result = tokio::runtime::Runtime::new()
        .context("Failed to create async runtime")
        .and_then(|runtime| runtime.block_on(run(cli, colors)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", ErrorFormatter::new(colors).format_error(&e));
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli, colors: ColorSupport) -> anyhow::Result<()> {
    let loader = ConfigLoader::new(cli.config.clone());
    let (config, source) = loader.load(cli.overrides()).await?;

    setup_logging(&config);

    tokio::fs::create_dir_all(&config.storage)
        .await
        .with_context(|| format!("Failed to create storage directory {}", config.storage))?;

    let service = Arc::new(HttpService::from_config(&config)?);

    let address = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    let local_address = listener.local_addr()?;

    if !config.quiet {
        println!("{}", output::banner(&config, &source, local_address, colors));
    }
    info!("Server started on {}", local_address);

    serve(listener, service, shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

fn setup_logging(config: &ServeConfig) {
    let level = &config.log_level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,pkgcdn={0},pkgcdn_server={0},pkgcdn_core={0},pkgcdn_registry={0},pkgcdn_cache={0},pkgcdn_config={0}",
            level
        ))
    });

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("pkgcdn encountered an unexpected error: {}", panic_info);
        eprintln!("pkgcdn crashed! This is a bug.");
        eprintln!("Error: {}", panic_info);
    }));
}
