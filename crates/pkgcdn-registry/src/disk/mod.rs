//! On-disk metadata snapshots and archive locations.
//!
//! Layout under the storage root:
//! - `{fullname}.json`: metadata snapshot, e.g. `@types/node.json`
//! - `{fullname}-{version}.tgz`: downloaded archive

use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use pkgcdn_core::error::CdnError;
use pkgcdn_core::types::PackageMetadata;

use crate::RegistryResult;

/// Disk tier keyed by package fullname
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: Utf8PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Location of the metadata snapshot of a package
    pub fn metadata_path(&self, fullname: &str) -> Utf8PathBuf {
        self.root.join(format!("{}.json", fullname))
    }

    /// Location of the archive of one package version
    pub fn archive_path(&self, fullname: &str, version: &str) -> Utf8PathBuf {
        self.root.join(format!("{}-{}.tgz", fullname, version))
    }

    pub async fn is_cached(&self, fullname: &str) -> bool {
        tokio::fs::try_exists(self.metadata_path(fullname))
            .await
            .unwrap_or(false)
    }

    /// Read the metadata snapshot of a package.
    ///
    /// A snapshot that cannot be parsed counts as absent.
    pub async fn get(&self, fullname: &str) -> RegistryResult<Option<PackageMetadata>> {
        let path = self.metadata_path(fullname);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CdnError::io(format!("Failed to read {}", path), e)),
        };

        match serde_json::from_slice(&content) {
            Ok(metadata) => Ok(Some(metadata)),
            Err(e) => {
                warn!("Ignoring unreadable metadata snapshot {}: {}", path, e);
                Ok(None)
            },
        }
    }

    /// Write the metadata snapshot of a package, or remove it when
    /// `metadata` is `None`
    pub async fn set(&self, fullname: &str, metadata: Option<&PackageMetadata>) -> RegistryResult<()> {
        let path = self.metadata_path(fullname);

        let metadata = match metadata {
            Some(metadata) => metadata,
            None => {
                return match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!("Removed metadata snapshot {}", path);
                        Ok(())
                    },
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(CdnError::io(format!("Failed to remove {}", path), e)),
                };
            },
        };

        let content = serde_json::to_vec_pretty(metadata).map_err(|e| CdnError::InvalidMetadata {
            name: fullname.to_string(),
            message: e.to_string(),
        })?;

        let directory = path.parent().unwrap_or(self.root.as_path());
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|e| CdnError::io(format!("Failed to create {}", directory), e))?;

        // Write next to the target and rename, so readers never see half a file
        let temp = tempfile::NamedTempFile::new_in(directory)
            .map_err(|e| CdnError::io(format!("Failed to create temporary file in {}", directory), e))?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        file.write_all(&content)
            .await
            .map_err(|e| CdnError::io(format!("Failed to write metadata of {}", fullname), e))?;
        file.flush()
            .await
            .map_err(|e| CdnError::io(format!("Failed to write metadata of {}", fullname), e))?;
        drop(file);

        temp_path
            .persist(&path)
            .map_err(|e| CdnError::io(format!("Failed to store {}", path), e.error))?;

        debug!("Stored metadata snapshot {}", path);
        Ok(())
    }
}
