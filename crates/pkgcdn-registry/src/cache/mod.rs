//! In-memory metadata tier with TTL support

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use pkgcdn_core::types::PackageMetadata;

/// Source of the current instant for staleness checks
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_nanos: AtomicU64::new(0),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.elapsed_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }
}

/// Cache entry; replaced wholesale on refresh, never mutated
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached metadata
    pub metadata: Arc<PackageMetadata>,
    /// When the entry was stored
    pub stored_at: Instant,
}

/// Outcome of a memory lookup
#[derive(Debug, Clone)]
pub enum CacheHit {
    /// Younger than the TTL
    Fresh(Arc<PackageMetadata>),
    /// Older than the TTL; still served while a refresh runs
    Stale(Arc<PackageMetadata>),
}

impl CacheHit {
    pub fn metadata(&self) -> &Arc<PackageMetadata> {
        match self {
            CacheHit::Fresh(metadata) | CacheHit::Stale(metadata) => metadata,
        }
    }

    pub fn is_outdated(&self) -> bool {
        matches!(self, CacheHit::Stale(_))
    }
}

/// In-memory metadata cache with TTL
#[derive(Debug)]
pub struct MemoryCache {
    /// Cache storage
    entries: DashMap<String, CacheEntry>,
    /// Age after which an entry is outdated
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    /// Create a cache whose entries go stale after `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_cached(&self, fullname: &str) -> bool {
        self.entries.contains_key(fullname)
    }

    /// Look up metadata, telling fresh and outdated entries apart.
    ///
    /// Outdated entries are kept; only [`MemoryCache::set`] replaces them.
    pub fn get(&self, fullname: &str) -> Option<CacheHit> {
        let entry = self.entries.get(fullname)?;
        let age = self.clock.now().saturating_duration_since(entry.stored_at);
        let metadata = entry.metadata.clone();

        Some(if age > self.ttl {
            CacheHit::Stale(metadata)
        } else {
            CacheHit::Fresh(metadata)
        })
    }

    /// Check whether the entry of `fullname` is older than the TTL
    pub fn is_outdated(&self, fullname: &str) -> bool {
        self.get(fullname).map_or(false, |hit| hit.is_outdated())
    }

    /// Store metadata, or evict the entry when `metadata` is `None`
    pub fn set(&self, fullname: &str, metadata: Option<Arc<PackageMetadata>>) {
        match metadata {
            Some(metadata) => {
                let entry = CacheEntry {
                    metadata,
                    stored_at: self.clock.now(),
                };
                self.entries.insert(fullname.to_string(), entry);
            },
            None => {
                self.entries.remove(fullname);
            },
        }
    }

    /// Number of cached packages
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests;
