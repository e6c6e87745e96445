//! Unit tests for the archive store

use super::*;

use std::time::Duration;

use futures::StreamExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pkgcdn_registry::RetryConfig;

use crate::tarball::extract::tests::build_tarball;

struct Fixture {
    server: MockServer,
    store: ArchiveStore,
    _temp_dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

    let store = ArchiveStore::new(
        RegistryClient::new(&server.uri()).unwrap(),
        DiskCache::new(root),
        Arc::new(LockRegistry::default()),
    );

    Fixture {
        server,
        store,
        _temp_dir: temp_dir,
    }
}

/// Deterministic content big enough to span many chunks
fn large_file() -> Vec<u8> {
    (0..200_000u32).map(|i| (i * 31 % 251) as u8).collect()
}

fn left_pad_tarball() -> Vec<u8> {
    let large = large_file();
    build_tarball(&[
        ("package/package.json", b"{\"name\":\"left-pad\",\"main\":\"index.js\"}"),
        ("package/index.js", b"module.exports = leftPad;"),
        ("package/dist/bundle.js", &large),
        ("package/empty.txt", b""),
    ])
}

fn install(store: &ArchiveStore, fullname: &str, version: &str, tarball: &[u8]) {
    let path = store.archive_path(fullname, version);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, tarball).unwrap();
}

#[tokio::test]
async fn test_concurrent_downloads_collapse() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad/-/left-pad-1.3.0.tgz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(left_pad_tarball())
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&fx.server)
        .await;

    let coordinates = PackageCoordinates::parse("left-pad@1.3.0/index.js");
    let (a, b) = tokio::join!(
        fx.store.download(&coordinates, "1.3.0"),
        fx.store.download(&coordinates, "1.3.0"),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(std::fs::read(&a).unwrap(), left_pad_tarball());
}

#[tokio::test]
async fn test_download_skipped_when_present() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&fx.server)
        .await;

    install(&fx.store, "@scope/pkg", "1.0.0", &left_pad_tarball());

    let coordinates = PackageCoordinates::parse("@scope/pkg@1.0.0/index.js");
    let path = fx.store.download(&coordinates, "1.0.0").await.unwrap();
    assert_eq!(path, fx.store.archive_path("@scope/pkg", "1.0.0"));
}

#[tokio::test]
async fn test_failed_download_leaves_nothing_behind() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad/-/left-pad-0.0.1.tgz"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fx.server)
        .await;

    let coordinates = PackageCoordinates::parse("left-pad@0.0.1/index.js");
    let result = fx.store.download(&coordinates, "0.0.1").await;

    assert!(matches!(result, Err(CdnError::VersionNotFound { .. })));
    assert!(!fx.store.archive_path("left-pad", "0.0.1").exists());
}

#[tokio::test]
async fn test_extract_is_byte_identical() {
    let fx = fixture().await;
    install(&fx.store, "left-pad", "1.3.0", &left_pad_tarball());

    let mut output = Vec::new();
    let size = fx
        .store
        .extract("left-pad", "1.3.0", "dist/bundle.js", &mut output)
        .unwrap();

    assert_eq!(size, large_file().len() as u64);
    assert_eq!(output, large_file());
}

#[tokio::test]
async fn test_open_streams_entry() {
    let fx = fixture().await;
    install(&fx.store, "left-pad", "1.3.0", &left_pad_tarball());

    let mut stream = fx.store.open("left-pad", "1.3.0", "dist/bundle.js").await.unwrap();
    let mut content = Vec::new();
    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        content.extend_from_slice(&chunk.unwrap());
        chunks += 1;
    }

    assert_eq!(content, large_file());
    assert!(chunks > 1);
}

#[tokio::test]
async fn test_open_small_and_empty_entries() {
    let fx = fixture().await;
    install(&fx.store, "left-pad", "1.3.0", &left_pad_tarball());

    let index = fx.store.open("left-pad", "1.3.0", "./index.js").await.unwrap();
    assert_eq!(index.collect().await.unwrap(), b"module.exports = leftPad;");

    let empty = fx.store.open("left-pad", "1.3.0", "empty.txt").await.unwrap();
    assert!(empty.collect().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_missing_entry() {
    let fx = fixture().await;
    install(&fx.store, "left-pad", "1.3.0", &left_pad_tarball());
    let before = std::fs::read(fx.store.archive_path("left-pad", "1.3.0")).unwrap();

    for path in ["missing.js", "../../etc/passwd", "dist"] {
        match fx.store.open("left-pad", "1.3.0", path).await {
            Err(CdnError::EntryNotFound { package, path: missing }) => {
                assert_eq!(package, "left-pad@1.3.0");
                assert_eq!(missing, path);
            },
            Err(e) => panic!("Expected EntryNotFound for {}, got {:?}", path, e),
            Ok(_) => panic!("Expected EntryNotFound for {}, got a stream", path),
        }
    }

    // The archive is untouched
    let after = std::fs::read(fx.store.archive_path("left-pad", "1.3.0")).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_open_without_archive() {
    let fx = fixture().await;

    let result = fx.store.open("left-pad", "9.9.9", "index.js").await;
    assert!(matches!(result, Err(CdnError::Io { .. })));
}

#[tokio::test]
async fn test_etag_is_stable() {
    let fx = fixture().await;
    install(&fx.store, "left-pad", "1.3.0", &left_pad_tarball());

    let first = fx.store.etag("left-pad", "1.3.0").await.unwrap();
    let second = fx.store.etag("left-pad", "1.3.0").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 40);
}

#[tokio::test]
async fn test_stalled_upstream_does_not_pin_the_archive() {
    let server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

    Mock::given(method("GET"))
        .and(path("/left-pad/-/left-pad-1.3.0.tgz"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(left_pad_tarball())
                .set_delay(Duration::from_secs(3600)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/left-pad/-/left-pad-1.3.0.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(left_pad_tarball()))
        .mount(&server)
        .await;

    let retries = RetryConfig {
        max_retries: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    };
    let client = RegistryClient::with_timeout(&server.uri(), retries, Duration::from_millis(200)).unwrap();
    let locks = Arc::new(LockRegistry::with_budget(Duration::from_millis(200), Duration::from_secs(2)));
    let store = Arc::new(ArchiveStore::new(client, DiskCache::new(root), locks.clone()));
    let coordinates = PackageCoordinates::parse("left-pad@1.3.0/index.js");

    // The first requester disconnects while the upstream is stalled
    let leader = {
        let store = store.clone();
        let coordinates = coordinates.clone();
        tokio::spawn(async move { store.download(&coordinates, "1.3.0").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.abort();

    let lock = locks.get("left-pad");
    let landed = async {
        while lock.is_downloading("1.3.0") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), landed)
        .await
        .expect("download stayed in flight");

    let path = store.download(&coordinates, "1.3.0").await.unwrap();
    assert!(path.exists());
    let mut output = Vec::new();
    store.extract("left-pad", "1.3.0", "index.js", &mut output).unwrap();
    assert_eq!(output, b"module.exports = leftPad;");
}
