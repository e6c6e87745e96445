//! Archive storage for pkgcdn
//!
//! This crate keeps downloaded package archives on disk and serves single
//! files out of them by scanning the gzipped tarball, so no archive is ever
//! unpacked.

pub mod store;
pub mod tarball;

// Re-export main types
pub use store::{ArchiveStore, EntryStream};
pub use tarball::extract_entry;

use pkgcdn_core::error::CdnError;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CdnError>;
