//! npm registry client and metadata tiers for pkgcdn
//!
//! This crate fetches package metadata and archives from the upstream
//! registry and keeps metadata in two cache tiers: an in-memory map with a
//! time-to-live and a snapshot directory on disk. [`MetadataResolver`] chains
//! the tiers in front of the registry.

pub mod cache;
pub mod client;
pub mod disk;
pub mod resolver;

// Re-export main types
pub use cache::{CacheHit, Clock, ManualClock, MemoryCache, SystemClock};
pub use client::{RegistryClient, RetryConfig};
pub use disk::DiskCache;
pub use resolver::MetadataResolver;

use pkgcdn_core::error::CdnError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, CdnError>;
