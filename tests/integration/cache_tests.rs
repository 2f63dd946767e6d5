//! Tile cache integration tests.
//!
//! Tests verify:
//! - One record per key, however many layers install it
//! - Wanted (pinned) records survive capacity pressure
//! - Eviction removes the least recently touched record first
//! - Freed resources go through the dispose hook

use std::sync::{Arc, Mutex};

use deepzoom::tile::{CacheKey, CapacityStatus, DecodedTile, TileCache, TileResource};

fn key(name: &str) -> CacheKey {
    CacheKey::from_address(name, None)
}

fn resource(shade: u8) -> TileResource {
    Arc::new(DecodedTile::solid(2, 2, [shade, shade, shade, 255]))
}

#[test]
fn test_single_slot_evicts_released_record() {
    let mut cache = TileCache::new(1);

    cache.install(key("k1"), resource(1));
    cache.release(&key("k1"));
    cache.install(key("k2"), resource(2));

    assert!(!cache.contains(&key("k1")));
    assert!(cache.contains(&key("k2")));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_install_twice_keeps_one_record() {
    let mut cache = TileCache::new(10);

    let first = cache.install(key("k"), resource(1));
    let second = cache.install(key("k"), resource(2));

    // The second caller gets the resource already cached
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.ref_count(&key("k")), Some(2));

    assert_eq!(cache.release(&key("k")), Some(1));
    assert_eq!(cache.release(&key("k")), Some(0));
    // Unreferenced but still cached
    assert!(cache.contains(&key("k")));
}

#[test]
fn test_pinned_records_survive_over_capacity() {
    let mut cache = TileCache::new(1);

    cache.install(key("wanted"), resource(1));
    cache.release(&key("wanted"));
    cache.set_pinned([key("wanted")]);

    cache.install(key("held"), resource(2));
    assert_eq!(cache.len(), 2);
    assert_eq!(
        cache.enforce_capacity(),
        CapacityStatus::CapacityPinned { excess: 1 }
    );
    assert!(cache.contains(&key("wanted")));

    // Once no longer wanted, the record is fair game
    cache.set_pinned(std::iter::empty());
    assert_eq!(cache.enforce_capacity(), CapacityStatus::Evicted(1));
    assert!(!cache.contains(&key("wanted")));
    assert!(cache.contains(&key("held")));
}

#[test]
fn test_oldest_touch_evicted_first() {
    let mut cache = TileCache::new(3);
    for (now, name) in [(16, "a"), (32, "b"), (48, "c")] {
        cache.advance_to(now);
        cache.install(key(name), resource(0));
        cache.release(&key(name));
    }

    // "a" becomes the most recently used
    cache.advance_to(64);
    assert!(cache.touch(&key("a")));
    cache.advance_to(80);
    cache.install(key("d"), resource(0));

    assert!(!cache.contains(&key("b")));
    for name in ["a", "c", "d"] {
        assert!(cache.contains(&key(name)), "{name} should be cached");
    }

    assert!(cache.last_touched(&key("d")) > cache.last_touched(&key("a")));
    assert!(cache.last_touched(&key("a")) > cache.last_touched(&key("c")));
}

#[test]
fn test_referenced_records_are_skipped() {
    let mut cache = TileCache::new(2);
    cache.install(key("held"), resource(0));
    cache.install(key("free"), resource(0));
    cache.release(&key("free"));

    // "held" is older but still referenced
    cache.install(key("new"), resource(0));
    assert!(cache.contains(&key("held")));
    assert!(!cache.contains(&key("free")));
}

#[test]
fn test_dispose_hook_sees_every_freed_resource() {
    let disposed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&disposed);
    let mut cache = TileCache::with_disposer(1, move |key: &CacheKey, _: &DecodedTile| {
        sink.lock().unwrap().push(key.to_string());
    });

    cache.install(key("a"), resource(0));
    cache.release(&key("a"));
    cache.install(key("b"), resource(0));
    assert_eq!(*disposed.lock().unwrap(), vec!["a"]);

    cache.release(&key("b"));
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(*disposed.lock().unwrap(), vec!["a", "b"]);
}
