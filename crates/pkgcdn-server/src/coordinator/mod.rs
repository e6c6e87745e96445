//! Answers one package file request.
//!
//! Coordinates are parsed and resolved to a concrete version and path. A
//! request that was not already fully qualified is redirected to the
//! canonical location, so every cacheable response maps to exactly one
//! immutable archive entry. Fully qualified requests are served from the
//! archive, downloading it first if needed.

use std::sync::Arc;

use tracing::{debug, info};

use pkgcdn_cache::{ArchiveStore, EntryStream};
use pkgcdn_config::ServeConfig;
use pkgcdn_core::error::{CdnError, CdnResult};
use pkgcdn_core::lock::LockRegistry;
use pkgcdn_core::types::PackageCoordinates;
use pkgcdn_registry::{DiskCache, MemoryCache, MetadataResolver, RegistryClient};

/// What to answer a package request with
pub enum Reply {
    /// Send the client to the fully qualified coordinates
    Redirect { location: String },
    /// The client's copy is current
    NotModified { etag: String, max_age: u32 },
    /// File contents streamed out of the archive
    File {
        content_type: String,
        etag: String,
        max_age: u32,
        body: EntryStream,
    },
}

/// Orchestrates metadata resolution, redirects and archive access
#[derive(Clone)]
pub struct RequestCoordinator {
    resolver: MetadataResolver,
    archives: ArchiveStore,
    /// URL prefix redirects are built under, with leading and trailing `/`
    prefix: String,
    max_age: u32,
}

impl RequestCoordinator {
    pub fn new(resolver: MetadataResolver, archives: ArchiveStore, prefix: impl Into<String>, max_age: u32) -> Self {
        Self {
            resolver,
            archives,
            prefix: prefix.into(),
            max_age,
        }
    }

    /// Wire up the registry client, cache tiers and locks described by `config`
    pub fn from_config(config: &ServeConfig) -> CdnResult<Self> {
        let client = RegistryClient::new(config.registry_url())?;
        let disk = DiskCache::new(config.storage.clone());
        let locks = Arc::new(LockRegistry::new(config.lock_timeout()));
        let memory = MemoryCache::new(config.update_interval());

        let resolver = MetadataResolver::new(client.clone(), memory, disk.clone(), locks.clone());
        let archives = ArchiveStore::new(client, disk, locks);

        Ok(Self::new(resolver, archives, config.prefix.clone(), config.max_age))
    }

    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    /// Handle a request for `coordinates` (the part of the URL after the
    /// prefix), given the client's `If-None-Match` header
    pub async fn handle(&self, coordinates: &str, if_none_match: Option<&str>) -> CdnResult<Reply> {
        let requested = PackageCoordinates::parse(coordinates);
        if requested.name.is_empty() {
            return Err(CdnError::PackageNotFound { name: requested.fullname });
        }

        let metadata = self.resolver.resolve(&requested.fullname).await?;

        let version = metadata
            .resolve_version(requested.version.as_deref())
            .ok_or_else(|| CdnError::VersionNotFound {
                name: requested.fullname.clone(),
                requested: requested.version.clone().unwrap_or_else(|| "latest".to_string()),
            })?;

        let path = match requested.path {
            Some(ref path) => path.clone(),
            None => metadata
                .main_entry(&version)
                .ok_or_else(|| CdnError::Unprocessable {
                    package: requested.fullname.clone(),
                    version: version.clone(),
                })?,
        };

        if requested.version.as_deref() != Some(version.as_str()) || requested.path.as_deref() != Some(path.as_str()) {
            let location = format!("{}{}@{}/{}", self.prefix, requested.fullname, version, path);
            debug!("Redirecting {} to {}", requested, location);
            return Ok(Reply::Redirect { location });
        }

        self.archives.download(&requested, &version).await?;
        let etag = self.archives.etag(&requested.fullname, &version).await?;

        if if_none_match.map_or(false, |header| etag_matches(header, &etag)) {
            debug!("{} not modified", requested);
            return Ok(Reply::NotModified {
                etag,
                max_age: self.max_age,
            });
        }

        let body = self.archives.open(&requested.fullname, &version, &path).await?;
        info!("Serving {}", requested);

        Ok(Reply::File {
            content_type: content_type(&path),
            etag,
            max_age: self.max_age,
            body,
        })
    }
}

/// `Content-Type` for a file, by extension
pub fn content_type(path: &str) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// Check an `If-None-Match` header against an ETag.
///
/// Accepts quoted, unquoted and weak forms as well as lists.
pub fn etag_matches(header: &str, etag: &str) -> bool {
    header.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/").trim_matches('"') == etag
    })
}
