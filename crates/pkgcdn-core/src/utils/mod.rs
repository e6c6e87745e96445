//! Utility functions and helpers.
//!
//! Common functionality used across multiple pkgcdn crates.

pub mod hash;
pub mod path;

// Re-export commonly used utilities
pub use hash::{etag_for_file, etag_for_mtime};
pub use path::{archive_entry_name, normalize_path, safe_join};
