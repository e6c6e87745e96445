//! Core data types for pkgcdn.
//!
//! This module provides the fundamental types used throughout the proxy:
//! - Package coordinates parsed from request paths
//! - The structured version model
//! - Registry metadata documents

pub mod coordinates;
pub mod package;
pub mod version;

// Re-export all public types
pub use coordinates::PackageCoordinates;
pub use package::{PackageMetadata, VersionManifest};
pub use version::Version;
