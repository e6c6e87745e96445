//! Unit tests for the metadata resolution chain

use super::*;

use std::time::Duration;

use camino::Utf8PathBuf;
use pkgcdn_core::error::CdnError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::cache::ManualClock;
use crate::client::RetryConfig;

const TTL: Duration = Duration::from_secs(1);

struct Fixture {
    server: MockServer,
    clock: Arc<ManualClock>,
    resolver: MetadataResolver,
    _temp_dir: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let server = MockServer::start().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

    let retries = RetryConfig {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    };
    let client = RegistryClient::with_retry_config(&server.uri(), retries).unwrap();
    let clock = Arc::new(ManualClock::new());
    let memory = MemoryCache::with_clock(TTL, clock.clone());

    let resolver = MetadataResolver::new(
        client,
        memory,
        DiskCache::new(root),
        Arc::new(LockRegistry::default()),
    );

    Fixture {
        server,
        clock,
        resolver,
        _temp_dir: temp_dir,
    }
}

fn document(latest: &str) -> serde_json::Value {
    serde_json::json!({
        "name": "left-pad",
        "dist-tags": { "latest": latest },
        "versions": { latest: { "version": latest, "main": "index.js" } }
    })
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Condition not reached in time");
}

#[tokio::test]
async fn test_concurrent_cold_requests_share_one_fetch() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(document("1.3.0"))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&fx.server)
        .await;

    let (a, b, c) = tokio::join!(
        fx.resolver.resolve("left-pad"),
        fx.resolver.resolve("left-pad"),
        fx.resolver.resolve("left-pad"),
    );

    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));
    assert_eq!(a.latest(), Some("1.3.0"));

    // Written through to both tiers
    assert!(fx.resolver.memory().is_cached("left-pad"));
    assert!(fx.resolver.disk().is_cached("left-pad").await);
}

#[tokio::test]
async fn test_fresh_hit_skips_registry() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("1.3.0")))
        .expect(1)
        .mount(&fx.server)
        .await;

    let first = fx.resolver.resolve("left-pad").await.unwrap();
    let second = fx.resolver.resolve("left-pad").await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_disk_snapshot_used_on_cold_start() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&fx.server)
        .await;

    let snapshot: PackageMetadata = serde_json::from_value(document("1.1.0")).unwrap();
    fx.resolver.disk().set("left-pad", Some(&snapshot)).await.unwrap();

    let metadata = fx.resolver.resolve("left-pad").await.unwrap();
    assert_eq!(metadata.latest(), Some("1.1.0"));
    assert!(fx.resolver.memory().is_cached("left-pad"));
}

#[tokio::test]
async fn test_stale_entry_served_while_refreshing() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("1.0.0")))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("2.0.0")))
        .mount(&fx.server)
        .await;

    assert_eq!(fx.resolver.resolve("left-pad").await.unwrap().latest(), Some("1.0.0"));

    fx.clock.advance(TTL * 2);

    // The outdated value comes back right away
    assert_eq!(fx.resolver.resolve("left-pad").await.unwrap().latest(), Some("1.0.0"));

    let memory = fx.resolver.memory();
    wait_for(|| {
        memory
            .get("left-pad")
            .map_or(false, |hit| hit.metadata().latest() == Some("2.0.0"))
    })
    .await;

    assert!(!memory.is_outdated("left-pad"));
    let snapshot = fx.resolver.disk().get("left-pad").await.unwrap().unwrap();
    assert_eq!(snapshot.latest(), Some("2.0.0"));
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_entry() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("1.0.0")))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&fx.server)
        .await;

    fx.resolver.resolve("left-pad").await.unwrap();
    fx.clock.advance(TTL * 2);

    let stale = fx.resolver.resolve("left-pad").await.unwrap();
    assert_eq!(stale.latest(), Some("1.0.0"));

    // One initial fetch plus three refresh attempts
    for _ in 0..200 {
        let received = fx.server.received_requests().await.map_or(0, |requests| requests.len());
        if received >= 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let lock = fx.resolver.locks().get("left-pad");
    wait_for(|| !lock.is_refreshing()).await;

    let hit = fx.resolver.memory().get("left-pad").unwrap();
    assert!(hit.is_outdated());
    assert_eq!(hit.metadata().latest(), Some("1.0.0"));
}

#[tokio::test]
async fn test_not_found_is_not_cached() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&fx.server)
        .await;

    for _ in 0..2 {
        match fx.resolver.resolve("ghost").await {
            Err(CdnError::PackageNotFound { name }) => assert_eq!(name, "ghost"),
            other => panic!("Expected PackageNotFound error, got {:?}", other),
        }
    }

    assert!(!fx.resolver.memory().is_cached("ghost"));
    assert!(!fx.resolver.disk().is_cached("ghost").await);
}

#[tokio::test]
async fn test_corrupt_snapshot_replaced_from_registry() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/left-pad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(document("1.3.0")))
        .expect(1)
        .mount(&fx.server)
        .await;

    let snapshot_path = fx.resolver.disk().metadata_path("left-pad");
    std::fs::write(&snapshot_path, b"not json").unwrap();

    let metadata = fx.resolver.resolve("left-pad").await.unwrap();
    assert_eq!(metadata.latest(), Some("1.3.0"));

    let snapshot = fx.resolver.disk().get("left-pad").await.unwrap().unwrap();
    assert_eq!(snapshot.latest(), Some("1.3.0"));
}

#[tokio::test]
async fn test_unpublished_package_drops_snapshot() {
    let fx = fixture().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "error": "Not found" })))
        .mount(&fx.server)
        .await;

    // An unreadable leftover snapshot falls through to the registry
    let snapshot_path = fx.resolver.disk().metadata_path("gone");
    std::fs::write(&snapshot_path, b"{").unwrap();

    let result = fx.resolver.resolve("gone").await;
    assert!(matches!(result, Err(CdnError::PackageNotFound { .. })));
    assert!(!snapshot_path.exists());
}
