//! Metadata lookup through the cache tiers.
//!
//! Memory first, then disk, then the registry. A fresh memory hit costs no
//! I/O. An outdated one is returned as is while a refresh runs in the
//! background. Cold loads run under the package's metadata lock, so
//! concurrent requests for an uncached package share one registry fetch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use pkgcdn_core::lock::LockRegistry;
use pkgcdn_core::types::PackageMetadata;

use crate::cache::{CacheHit, MemoryCache};
use crate::client::RegistryClient;
use crate::disk::DiskCache;
use crate::RegistryResult;

/// Read-through chain over the memory tier, the disk tier and the registry
#[derive(Clone)]
pub struct MetadataResolver {
    client: RegistryClient,
    memory: Arc<MemoryCache>,
    disk: DiskCache,
    locks: Arc<LockRegistry>,
}

impl MetadataResolver {
    pub fn new(client: RegistryClient, memory: MemoryCache, disk: DiskCache, locks: Arc<LockRegistry>) -> Self {
        Self {
            client,
            memory: Arc::new(memory),
            disk,
            locks,
        }
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Resolve the metadata of a package
    pub async fn resolve(&self, fullname: &str) -> RegistryResult<Arc<PackageMetadata>> {
        match self.memory.get(fullname) {
            Some(CacheHit::Fresh(metadata)) => return Ok(metadata),
            Some(CacheHit::Stale(metadata)) => {
                self.schedule_refresh(fullname);
                return Ok(metadata);
            },
            None => {},
        }

        let lock = self.locks.get(fullname);
        let this = self.clone();
        let name = fullname.to_string();
        lock.metadata(move || async move { this.load(&name).await }).await
    }

    /// Refresh an outdated entry without making anyone wait for it
    fn schedule_refresh(&self, fullname: &str) {
        let lock = self.locks.get(fullname);
        if lock.is_refreshing() {
            return;
        }

        let worker = self.clone();
        let name = fullname.to_string();
        tokio::spawn(async move {
            let key = name.clone();
            let result = lock.metadata(move || async move { worker.refresh(&key).await }).await;

            // The outdated entry stays in place until a refresh succeeds
            if let Err(e) = result {
                warn!("Background refresh of {} failed: {}", name, e);
            }
        });
    }

    /// Cold load: disk snapshot if there is one, registry otherwise
    async fn load(&self, fullname: &str) -> RegistryResult<Arc<PackageMetadata>> {
        // Memory may have been filled between the lookup and this flight
        if let Some(hit) = self.memory.get(fullname) {
            return Ok(hit.metadata().clone());
        }

        if let Some(metadata) = self.disk.get(fullname).await? {
            debug!("Loaded metadata of {} from disk", fullname);
            let metadata = Arc::new(metadata);
            self.memory.set(fullname, Some(metadata.clone()));
            return Ok(metadata);
        }

        debug!("Fetching metadata of {} from the registry", fullname);
        match self.client.fetch_metadata(fullname).await {
            Ok(metadata) => Ok(self.store(fullname, metadata).await),
            Err(e) if e.is_not_found() => {
                info!("Package {} not found", fullname);
                self.memory.set(fullname, None);
                if let Err(e) = self.disk.set(fullname, None).await {
                    warn!("Failed to drop metadata snapshot of {}: {}", fullname, e);
                }
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    async fn refresh(&self, fullname: &str) -> RegistryResult<Arc<PackageMetadata>> {
        let metadata = self.client.fetch_metadata(fullname).await?;
        let metadata = self.store(fullname, metadata).await;
        debug!("Metadata of {} updated", fullname);
        Ok(metadata)
    }

    /// Write through to disk, then memory
    async fn store(&self, fullname: &str, metadata: PackageMetadata) -> Arc<PackageMetadata> {
        if let Err(e) = self.disk.set(fullname, Some(&metadata)).await {
            warn!("Failed to store metadata snapshot of {}: {}", fullname, e);
        }
        let metadata = Arc::new(metadata);
        self.memory.set(fullname, Some(metadata.clone()));
        metadata
    }
}

#[cfg(test)]
mod tests;
