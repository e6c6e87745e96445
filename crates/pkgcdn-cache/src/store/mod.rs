//! Archive store.
//!
//! Downloads package archives into the disk tier once and serves single
//! files out of them. Downloads of the same archive version collapse into
//! one transfer through the package's tarball lock.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use camino::Utf8PathBuf;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use pkgcdn_core::error::CdnError;
use pkgcdn_core::lock::LockRegistry;
use pkgcdn_core::types::PackageCoordinates;
use pkgcdn_core::utils::{archive_entry_name, etag_for_file};
use pkgcdn_registry::{DiskCache, RegistryClient};

use crate::tarball::extract_entry;
use crate::CacheResult;

/// Chunks in flight between the extracting task and the response
const CHANNEL_CAPACITY: usize = 16;

/// Downloaded archives and the files inside them
#[derive(Clone)]
pub struct ArchiveStore {
    client: RegistryClient,
    disk: DiskCache,
    locks: Arc<LockRegistry>,
}

impl ArchiveStore {
    pub fn new(client: RegistryClient, disk: DiskCache, locks: Arc<LockRegistry>) -> Self {
        Self { client, disk, locks }
    }

    /// Where the archive of one package version lives
    pub fn archive_path(&self, fullname: &str, version: &str) -> Utf8PathBuf {
        self.disk.archive_path(fullname, version)
    }

    /// Make sure the archive of `version` is on disk, downloading it if not.
    ///
    /// Concurrent calls for the same version share one download.
    pub async fn download(&self, coordinates: &PackageCoordinates, version: &str) -> CacheResult<Utf8PathBuf> {
        let path = self.archive_path(&coordinates.fullname, version);
        if archive_exists(path.as_std_path()).await {
            return Ok(path);
        }

        let lock = self.locks.get(&coordinates.fullname);
        let client = self.client.clone();
        let coordinates = coordinates.clone();
        let owned_version = version.to_string();
        let destination = path.clone();

        lock.tarball(version, move || async move {
            // Finished while we were getting here
            if archive_exists(destination.as_std_path()).await {
                return Ok(());
            }
            debug!("Downloading {}@{}", coordinates.fullname, owned_version);
            client
                .download_tarball(&coordinates, &owned_version, destination.as_std_path())
                .await
        })
        .await?;

        Ok(path)
    }

    /// Copy `path` out of the archive of `fullname@version` into `output`.
    ///
    /// Blocking; fails with `EntryNotFound` when the archive has no such file.
    pub fn extract<W: Write + ?Sized>(
        &self,
        fullname: &str,
        version: &str,
        path: &str,
        output: &mut W,
    ) -> CacheResult<u64> {
        let archive = self.archive_path(fullname, version);
        extract_file(archive.as_std_path(), &format!("{}@{}", fullname, version), path, output)
    }

    /// Stream `path` out of the archive of `fullname@version`.
    ///
    /// Decompression runs on the blocking pool. This resolves once the
    /// entry has been found (or the scan has failed), so a missing file is
    /// reported here rather than halfway through the body.
    pub async fn open(&self, fullname: &str, version: &str, path: &str) -> CacheResult<EntryStream> {
        let archive = self.archive_path(fullname, version).into_std_path_buf();
        let package = format!("{}@{}", fullname, version);
        let path = path.to_string();

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || {
            let mut writer = ChannelWriter { tx: tx.clone() };
            match extract_file(&archive, &package, &path, &mut writer) {
                Ok(size) => debug!("Served {} bytes of {} from {}", size, path, package),
                Err(e) => {
                    // Nobody is listening anymore if the send fails
                    let _ = tx.blocking_send(Err(e));
                },
            }
        });

        match rx.recv().await {
            Some(Ok(chunk)) => Ok(EntryStream { first: Some(chunk), rx }),
            Some(Err(e)) => Err(e),
            // Found, but empty
            None => Ok(EntryStream { first: None, rx }),
        }
    }

    /// ETag of the archive of `fullname@version`
    pub async fn etag(&self, fullname: &str, version: &str) -> CacheResult<String> {
        etag_for_file(self.archive_path(fullname, version).as_std_path()).await
    }
}

async fn archive_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn extract_file<W: Write + ?Sized>(archive: &Path, package: &str, path: &str, output: &mut W) -> CacheResult<u64> {
    let not_found = || CdnError::EntryNotFound {
        package: package.to_string(),
        path: path.to_string(),
    };

    let entry_name = archive_entry_name(path).ok_or_else(not_found)?;
    let file = File::open(archive).map_err(|e| CdnError::io(format!("Failed to open {}", archive.display()), e))?;

    extract_entry(BufReader::new(file), &entry_name, output)?.ok_or_else(not_found)
}

/// Forwards written bytes to an async receiver
struct ChannelWriter {
    tx: mpsc::Sender<CacheResult<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Response receiver closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Body of one archive entry, chunk by chunk
pub struct EntryStream {
    first: Option<Bytes>,
    rx: mpsc::Receiver<CacheResult<Bytes>>,
}

impl EntryStream {
    /// Read the whole entry into memory
    pub async fn collect(mut self) -> CacheResult<Vec<u8>> {
        let mut content = Vec::new();
        if let Some(first) = self.first.take() {
            content.extend_from_slice(&first);
        }
        while let Some(chunk) = self.rx.recv().await {
            content.extend_from_slice(&chunk?);
        }
        Ok(content)
    }
}

impl Stream for EntryStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        self.rx
            .poll_recv(cx)
            .map(|chunk| chunk.map(|result| result.map_err(|e| io::Error::new(io::ErrorKind::Other, e))))
    }
}

#[cfg(test)]
mod tests;
