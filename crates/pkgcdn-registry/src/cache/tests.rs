//! Unit tests for the memory tier

use super::*;

fn create_test_metadata(latest: &str) -> Arc<PackageMetadata> {
    let mut metadata = PackageMetadata::new("test-package");
    metadata.dist_tags.insert("latest".to_string(), latest.to_string());
    Arc::new(metadata)
}

fn cache_with_clock(ttl: Duration) -> (MemoryCache, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (MemoryCache::with_clock(ttl, clock.clone()), clock)
}

#[test]
fn test_insert_and_get() {
    let (cache, _clock) = cache_with_clock(Duration::from_secs(1));
    assert!(cache.is_empty());
    assert!(!cache.is_cached("test-package"));
    assert!(cache.get("test-package").is_none());

    cache.set("test-package", Some(create_test_metadata("1.0.0")));

    assert!(cache.is_cached("test-package"));
    let hit = cache.get("test-package").unwrap();
    assert!(matches!(hit, CacheHit::Fresh(_)));
    assert_eq!(hit.metadata().latest(), Some("1.0.0"));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_entry_goes_stale_after_ttl() {
    let (cache, clock) = cache_with_clock(Duration::from_secs(1));
    cache.set("test-package", Some(create_test_metadata("1.0.0")));

    // Exactly at the TTL the entry is still fresh
    clock.advance(Duration::from_secs(1));
    assert!(!cache.is_outdated("test-package"));

    clock.advance(Duration::from_millis(1));
    assert!(cache.is_outdated("test-package"));

    // Outdated entries are still served
    let hit = cache.get("test-package").unwrap();
    assert!(hit.is_outdated());
    assert_eq!(hit.metadata().latest(), Some("1.0.0"));
    assert!(cache.is_cached("test-package"));
}

#[test]
fn test_set_replaces_and_resets_age() {
    let (cache, clock) = cache_with_clock(Duration::from_secs(1));
    cache.set("test-package", Some(create_test_metadata("1.0.0")));
    clock.advance(Duration::from_secs(5));
    assert!(cache.is_outdated("test-package"));

    cache.set("test-package", Some(create_test_metadata("1.1.0")));

    let hit = cache.get("test-package").unwrap();
    assert!(!hit.is_outdated());
    assert_eq!(hit.metadata().latest(), Some("1.1.0"));
}

#[test]
fn test_set_none_evicts() {
    let (cache, _clock) = cache_with_clock(Duration::from_secs(1));
    cache.set("test-package", Some(create_test_metadata("1.0.0")));
    cache.set("other-package", Some(create_test_metadata("2.0.0")));

    cache.set("test-package", None);

    assert!(!cache.is_cached("test-package"));
    assert!(cache.is_cached("other-package"));
    assert_eq!(cache.len(), 1);

    // Evicting an absent entry is a no-op
    cache.set("never-cached", None);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_readers_keep_their_snapshot() {
    let (cache, _clock) = cache_with_clock(Duration::from_secs(1));
    cache.set("test-package", Some(create_test_metadata("1.0.0")));

    let before = cache.get("test-package").unwrap().metadata().clone();
    cache.set("test-package", Some(create_test_metadata("2.0.0")));

    assert_eq!(before.latest(), Some("1.0.0"));
    assert_eq!(cache.get("test-package").unwrap().metadata().latest(), Some("2.0.0"));
}

#[test]
fn test_system_clock_cache() {
    let cache = MemoryCache::new(Duration::from_secs(3600));
    assert_eq!(cache.ttl(), Duration::from_secs(3600));

    cache.set("test-package", Some(create_test_metadata("1.0.0")));
    assert!(!cache.is_outdated("test-package"));
}
