//! Viewer integration tests.
//!
//! Tests verify:
//! - Visible tiles load once and are drawn
//! - Navigating back to a view reuses cached tiles
//! - Tiles that leave the view are cancelled
//! - Layers showing the same tiles share fetches and cache records
//! - Fade-in and cache capacity under a large wanted set

use std::sync::Arc;

use deepzoom::config::ViewerConfig;
use deepzoom::tile::{CacheKey, LayerPlacement, TileState};
use deepzoom::viewer::Viewer;
use deepzoom::viewport::Point;

use super::test_utils::{dzi_source, settle, CountingLoader, GatedLoader};

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_visible_tiles_load_once() {
    let loader = CountingLoader::new();
    let mut viewer = Viewer::new(
        ViewerConfig::default(),
        dzi_source("img", 1024, 1024, 256),
        Point::new(1024.0, 1024.0),
        Arc::new(loader.clone()),
    );

    let first = viewer.tick(0);
    assert_eq!(first.tile_count(), 0);
    assert_eq!(first.pending_count(), 16);
    assert!(first.needs_redraw);

    let (frame, _) = settle(&mut viewer, 0, 16).await;
    assert_eq!(frame.tile_count(), 16);
    assert_eq!(frame.pending_count(), 0);
    assert!(!frame.needs_redraw);
    assert!(frame.layers[0].tiles.iter().all(|t| t.coord.level == 10));

    assert_eq!(loader.total(), 16);
    assert_eq!(loader.max_per_address(), 1);
    assert_eq!(viewer.cache().len(), 16);
}

#[tokio::test]
async fn test_returning_home_reuses_cache() {
    let loader = CountingLoader::new();
    let mut viewer = Viewer::new(
        ViewerConfig::default(),
        dzi_source("big", 4096, 4096, 256),
        Point::new(512.0, 512.0),
        Arc::new(loader.clone()),
    );

    let (frame, now) = settle(&mut viewer, 0, 16).await;
    assert!(frame.layers[0].tiles.iter().all(|t| t.coord.level == 10));
    let home_fetches = loader.total();
    assert_eq!(home_fetches, 16);

    viewer.viewport_mut().zoom_to(4.0, None, true);
    let (frame, now) = settle(&mut viewer, now + 16, 16).await;
    assert!(frame.layers[0].tiles.iter().all(|t| t.coord.level == 12));
    assert!(loader.total() > home_fetches);

    // Level 10 tiles are no longer referenced but stay cached
    let level10 = CacheKey::from_address("big_files/10/0_0.jpg", None);
    assert_eq!(viewer.cache().ref_count(&level10), Some(0));

    let zoomed_fetches = loader.total();
    viewer.viewport_mut().go_home(true);
    let (frame, _) = settle(&mut viewer, now + 16, 16).await;

    assert_eq!(frame.tile_count(), 16);
    assert_eq!(loader.total(), zoomed_fetches);
    assert_eq!(loader.max_per_address(), 1);
    assert_eq!(viewer.cache().ref_count(&level10), Some(1));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_leaving_tiles_are_cancelled() {
    let loader = GatedLoader::new();
    let mut config = ViewerConfig::default();
    config.scheduler.concurrency_limit = 2;

    let mut viewer = Viewer::new(
        config,
        dzi_source("big", 4096, 4096, 256),
        Point::new(512.0, 512.0),
        Arc::new(loader.clone()),
    );

    viewer.tick(0);
    assert_eq!(viewer.scheduler().running(), 2);
    assert_eq!(viewer.scheduler().queued(), 14);

    // Jump deep into a corner: no level 10 tile is wanted any more
    viewer.viewport_mut().zoom_to(8.0, None, true);
    viewer.viewport_mut().pan_to(Point::new(0.1, 0.1), true);
    let frame = viewer.tick(16);

    let stats = viewer.stats();
    assert_eq!(stats.scheduler.cancelled, 16);
    assert_eq!(viewer.scheduler().running(), 2);
    assert!(frame.pending_count() > 0);
    assert!(viewer
        .layers()[0]
        .tiles()
        .all(|t| t.coord.level == 12 && t.state() != TileState::Ready));
}

// =============================================================================
// Multiple Layers
// =============================================================================

#[tokio::test]
async fn test_layers_share_fetches_and_records() {
    let loader = CountingLoader::new();
    let mut viewer = Viewer::new(
        ViewerConfig::default(),
        dzi_source("shared", 512, 512, 256),
        Point::new(1024.0, 512.0),
        Arc::new(loader.clone()),
    );
    viewer.add_layer(
        dzi_source("shared", 512, 512, 256),
        LayerPlacement::new(1.0, 0.0, 1.0),
    );
    viewer.viewport_mut().go_home(true);

    let (frame, _) = settle(&mut viewer, 0, 16).await;
    assert_eq!(frame.layers.len(), 2);
    assert_eq!(frame.layers[0].tiles.len(), 4);
    assert_eq!(frame.layers[1].tiles.len(), 4);

    // Second layer is drawn one unit to the right
    let right = &frame.layers[1].tiles[0];
    assert!(right.viewport_bounds.x >= 1.0);

    assert_eq!(loader.total(), 4);
    assert_eq!(viewer.cache().len(), 4);
    let key = CacheKey::from_address("shared_files/9/0_0.jpg", None);
    assert_eq!(viewer.cache().ref_count(&key), Some(2));
}

// =============================================================================
// Fade-in and Capacity
// =============================================================================

#[tokio::test]
async fn test_tiles_fade_in() {
    let loader = CountingLoader::new();
    let mut config = ViewerConfig::default();
    config.selector.blend_time_ms = 400;

    let mut viewer = Viewer::new(
        config,
        dzi_source("one", 200, 200, 256),
        Point::new(200.0, 200.0),
        Arc::new(loader.clone()),
    );

    viewer.tick(0);
    assert!(viewer.wait_for_activity().await);

    let frame = viewer.tick(100);
    assert_eq!(frame.tile_count(), 1);
    assert_eq!(frame.layers[0].tiles[0].opacity, 0.0);
    assert!(frame.needs_redraw);

    let frame = viewer.tick(300);
    assert!((frame.layers[0].tiles[0].opacity - 0.5).abs() < 1e-9);
    assert!(frame.needs_redraw);

    let frame = viewer.tick(500);
    assert_eq!(frame.layers[0].tiles[0].opacity, 1.0);
    assert!(!frame.needs_redraw);
}

#[tokio::test]
async fn test_wanted_tiles_exceed_capacity() {
    let loader = CountingLoader::new();
    let mut config = ViewerConfig::default();
    config.cache.max_entries = 4;

    let mut viewer = Viewer::new(
        config,
        dzi_source("img", 1024, 1024, 256),
        Point::new(1024.0, 1024.0),
        Arc::new(loader.clone()),
    );

    let (frame, now) = settle(&mut viewer, 0, 16).await;
    assert_eq!(frame.tile_count(), 16);
    assert_eq!(viewer.cache().len(), 16);
    assert_eq!(viewer.stats().cache.evictions, 0);

    // Zooming in releases most tiles, which makes them evictable
    viewer.viewport_mut().zoom_to(4.0, None, true);
    let (frame, _) = settle(&mut viewer, now + 16, 16).await;
    let wanted = frame.tile_count();
    assert!(wanted < 16);

    assert_eq!(viewer.cache().len(), wanted.max(4));
    assert_eq!(viewer.stats().cache.evictions as usize, 16 - wanted.max(4));
    assert_eq!(loader.max_per_address(), 1);
}
