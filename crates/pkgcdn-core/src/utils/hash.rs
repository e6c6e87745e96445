//! ETag computation for cached archives.
//!
//! An archive never changes once written, so its modification time is a
//! sufficient fingerprint: the ETag is the SHA-1 of the mtime rendered as an
//! RFC 3339 timestamp with millisecond precision.

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use sha1::{Digest, Sha1};

use crate::error::{CdnError, CdnResult};

/// Compute the ETag for a modification time
pub fn etag_for_mtime(mtime: SystemTime) -> String {
    let stamp = DateTime::<Utc>::from(mtime).to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut hasher = Sha1::new();
    hasher.update(stamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the ETag of a file on disk
pub async fn etag_for_file(path: &Path) -> CdnResult<String> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| CdnError::io(format!("Failed to stat {}", path.display()), e))?;
    let mtime = metadata
        .modified()
        .map_err(|e| CdnError::io(format!("No modification time for {}", path.display()), e))?;
    Ok(etag_for_mtime(mtime))
}
