//! HTTP client for the upstream registry with connection pooling and retry logic

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, ClientBuilder, StatusCode};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use pkgcdn_core::error::CdnError;
use pkgcdn_core::types::{PackageCoordinates, PackageMetadata};

use crate::RegistryResult;

/// Bound on one request attempt, from connecting to the last body byte
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for exponential backoff retry logic
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Client for one npm registry
#[derive(Debug, Clone)]
pub struct RegistryClient {
    /// Underlying HTTP client with connection pooling
    client: Client,
    /// Retry configuration
    retry_config: RetryConfig,
    /// Registry base URL, without a trailing slash
    base_url: String,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`
    pub fn new(base_url: &str) -> RegistryResult<Self> {
        Self::with_retry_config(base_url, RetryConfig::default())
    }

    /// Create a client with custom retry behavior
    pub fn with_retry_config(base_url: &str, retry_config: RetryConfig) -> RegistryResult<Self> {
        Self::with_timeout(base_url, retry_config, REQUEST_TIMEOUT)
    }

    /// Create a client whose attempts give up after `timeout`
    pub fn with_timeout(base_url: &str, retry_config: RetryConfig, timeout: Duration) -> RegistryResult<Self> {
        url::Url::parse(base_url).map_err(|e| CdnError::ConfigValidation {
            field: "registry".to_string(),
            reason: format!("Invalid registry URL '{}': {}", base_url, e),
        })?;

        let client = ClientBuilder::new()
            // Connection pooling configuration
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!("pkgcdn/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CdnError::network(format!("Failed to create HTTP client: {}", e), e))?;

        Ok(Self {
            client,
            retry_config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{registry}/{fullname}`
    pub fn metadata_url(&self, fullname: &str) -> String {
        format!("{}/{}", self.base_url, fullname)
    }

    /// `{registry}/[{scope}/]{name}/-/{name}-{version}.tgz`
    pub fn tarball_url(&self, scope: Option<&str>, name: &str, version: &str) -> String {
        match scope {
            Some(scope) => format!("{}/{}/{}/-/{}-{}.tgz", self.base_url, scope, name, name, version),
            None => format!("{}/{}/-/{}-{}.tgz", self.base_url, name, name, version),
        }
    }

    /// Execute HTTP request with exponential backoff retry logic
    async fn with_retry<F, Fut, T>(&self, operation: F) -> RegistryResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = RegistryResult<T>>,
    {
        let mut delay = self.retry_config.initial_delay;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                // Missing packages and malformed documents won't get better by asking again
                Err(error) if !error.is_recoverable() || attempt >= self.retry_config.max_retries => {
                    return Err(error)
                },
                Err(error) => {
                    attempt += 1;
                    debug!("Retrying after {:?} (attempt {}): {}", delay, attempt, error);
                    tokio::time::sleep(delay).await;

                    delay = std::cmp::min(
                        Duration::from_millis((delay.as_millis() as f64 * self.retry_config.multiplier) as u64),
                        self.retry_config.max_delay,
                    );
                },
            }
        }
    }

    /// Fetch the metadata document of a package.
    ///
    /// A 404 or a document carrying an `error` field means the package does
    /// not exist.
    pub async fn fetch_metadata(&self, fullname: &str) -> RegistryResult<PackageMetadata> {
        let url = self.metadata_url(fullname);

        self.with_retry(|| async {
            let response = self
                .client
                .get(&url)
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|e| CdnError::network(format!("Failed to fetch metadata of {}: {}", fullname, e), e))?;

            match response.status() {
                StatusCode::NOT_FOUND => return Err(CdnError::PackageNotFound { name: fullname.to_string() }),
                status if !status.is_success() => {
                    return Err(CdnError::Network {
                        message: format!("Registry returned status {} for {}", status, fullname),
                        source: None,
                    })
                },
                _ => {},
            }

            let document = response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| CdnError::network(format!("Failed to read metadata of {}: {}", fullname, e), e))?;

            parse_metadata(fullname, document)
        })
        .await
    }

    /// Download the archive of `version` to `destination`.
    ///
    /// The archive is streamed into a temporary file next to `destination`
    /// and only moved into place once complete, so `destination` never
    /// holds a partial download.
    pub async fn download_tarball(
        &self,
        coordinates: &PackageCoordinates,
        version: &str,
        destination: &Path,
    ) -> RegistryResult<()> {
        let url = self.tarball_url(coordinates.scope.as_deref(), &coordinates.name, version);
        let directory = destination.parent().unwrap_or_else(|| Path::new("."));

        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| CdnError::io(format!("Failed to create {}", directory.display()), e))?;

        self.with_retry(|| async {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| CdnError::network(format!("Failed to download {}: {}", url, e), e))?;

            match response.status() {
                StatusCode::NOT_FOUND => {
                    return Err(CdnError::VersionNotFound {
                        name: coordinates.fullname.clone(),
                        requested: version.to_string(),
                    })
                },
                status if !status.is_success() => {
                    return Err(CdnError::Network {
                        message: format!("Failed to download {}: status {}", url, status),
                        source: None,
                    })
                },
                _ => {},
            }

            let temp = tempfile::NamedTempFile::new_in(directory)
                .map_err(|e| CdnError::io(format!("Failed to create temporary file in {}", directory.display()), e))?;
            let (file, temp_path) = temp.into_parts();
            let mut file = tokio::fs::File::from_std(file);

            let mut stream = response.bytes_stream();
            let mut size = 0usize;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| CdnError::network(format!("Failed to read {}: {}", url, e), e))?;
                size += chunk.len();
                file.write_all(&chunk)
                    .await
                    .map_err(|e| CdnError::io(format!("Failed to write {}", temp_path.display()), e))?;
            }
            file.flush()
                .await
                .map_err(|e| CdnError::io(format!("Failed to write {}", temp_path.display()), e))?;
            drop(file);

            temp_path
                .persist(destination)
                .map_err(|e| CdnError::io(format!("Failed to store {}", destination.display()), e.error))?;

            debug!("Downloaded {} ({} bytes) to {}", url, size, destination.display());
            Ok(())
        })
        .await
        .map_err(|e| {
            warn!("Download of {}@{} failed: {}", coordinates.fullname, version, e);
            e
        })
    }
}

/// Turn a registry document into metadata, recognizing error payloads
fn parse_metadata(fullname: &str, document: serde_json::Value) -> RegistryResult<PackageMetadata> {
    if document.get("error").is_some() {
        return Err(CdnError::PackageNotFound { name: fullname.to_string() });
    }

    let mut metadata: PackageMetadata =
        serde_json::from_value(document).map_err(|e| CdnError::InvalidMetadata {
            name: fullname.to_string(),
            message: e.to_string(),
        })?;

    if metadata.name.is_empty() {
        metadata.name = fullname.to_string();
    }

    Ok(metadata)
}
