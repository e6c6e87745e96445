//! # pkgcdn-core
//!
//! Core types and utilities shared across all pkgcdn crates.
//!
//! This crate provides:
//! - Package coordinates parsing (`@scope/name@version/path`)
//! - The structured version model used to resolve loose version requests
//! - Registry metadata document types
//! - CdnError enum for unified error handling
//! - Per-package single-flight locks
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `types`: Core data types (Coordinates, Version, PackageMetadata)
//! - `error`: Error types and result aliases
//! - `lock`: Keyed single-flight execution
//! - `utils`: Utility functions and helpers

pub mod error;
pub mod lock;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{CdnError, CdnResult};
pub use lock::{LockRegistry, PackageLock, SingleFlight};
pub use types::{PackageCoordinates, PackageMetadata, Version, VersionManifest};
