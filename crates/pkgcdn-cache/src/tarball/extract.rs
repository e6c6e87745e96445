//! Single-entry tarball extraction
//!
//! Scans a gzipped tarball entry by entry and copies out the one file that
//! was asked for, without unpacking anything else to disk.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use tar::Archive;
use tracing::trace;

use pkgcdn_core::error::CdnError;
use pkgcdn_core::utils::normalize_path;

use crate::CacheResult;

/// Copy the file entry named `entry_name` out of a gzipped tarball.
///
/// Returns the number of bytes written to `output`, or `None` when the
/// archive has no such file. Entries are compared after normalization, so
/// `./package/index.js` matches `package/index.js`.
pub fn extract_entry<R: Read, W: Write + ?Sized>(
    reader: R,
    entry_name: &str,
    output: &mut W,
) -> CacheResult<Option<u64>> {
    // Decompress gzip
    let gz_decoder = GzDecoder::new(reader);
    let mut archive = Archive::new(gz_decoder);

    let entries = archive
        .entries()
        .map_err(|e| CdnError::io("Failed to read archive".to_string(), e))?;

    for entry_result in entries {
        let mut entry = entry_result.map_err(|e| CdnError::io("Failed to read archive entry".to_string(), e))?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| CdnError::io("Invalid archive entry name".to_string(), e))?
            .to_string_lossy()
            .into_owned();
        trace!("Scanning archive entry {}", name);

        if normalize_path(&name).as_deref() != Some(entry_name) {
            continue;
        }

        // Stream extraction without loading into memory
        let written = io::copy(&mut entry, output)
            .map_err(|e| CdnError::io(format!("Failed to copy {}", entry_name), e))?;
        output
            .flush()
            .map_err(|e| CdnError::io(format!("Failed to copy {}", entry_name), e))?;

        return Ok(Some(written));
    }

    Ok(None)
}
