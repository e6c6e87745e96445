//! Path utilities for request paths.
//!
//! Request paths and archive entry names always use `/`, whatever the host
//! platform, so these helpers work on strings rather than `std::path`.

use std::path::{Path, PathBuf};

/// Directory every npm tarball wraps its files in
pub const ARCHIVE_ROOT: &str = "package";

/// Normalize a `/`-separated relative path, resolving `.` and `..`.
///
/// Returns `None` when the path climbs above its root.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut components: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => {},
            ".." => {
                components.pop()?;
            },
            other => components.push(other),
        }
    }

    Some(components.join("/"))
}

/// Name of the tarball entry holding `path`, e.g. `package/dist/index.js`
pub fn archive_entry_name(path: &str) -> Option<String> {
    let normalized = normalize_path(path)?;
    if normalized.is_empty() {
        return None;
    }
    Some(format!("{}/{}", ARCHIVE_ROOT, normalized))
}

/// Join a request path onto `base`, refusing anything that escapes it
pub fn safe_join(base: &Path, path: &str) -> Option<PathBuf> {
    let normalized = normalize_path(path)?;
    if normalized.split('/').any(|part| part.contains('\\') || part.contains(':')) {
        return None;
    }
    Some(base.join(normalized))
}
