//! Frame driver.
//!
//! A [`Viewer`] owns the single [`TileCache`], the [`JobScheduler`], the
//! [`Viewport`] and every [`TiledImage`] layer. The host calls
//! [`Viewer::tick`] once per frame with the current time:
//!
//! ```text
//! tick(now)
//!   1. viewport.update(now)          springs advance
//!      cache.advance_to(now)         stamp touches with frame time
//!   2. scheduler.poll(now)           completions, failures, timeouts
//!        └─► layer.handle_event      install into cache, mark ready
//!   3. layer.select + layer.update   wanted set per layer
//!   4. cache.set_pinned(wanted)      protect wanted records
//!      cache.enforce_capacity()
//!   5. scheduler.dispatch()          refill slots freed by cancellation
//!   6. layer.draw(now)               tiles + opacity for the renderer
//! ```
//!
//! All state is touched on the caller's thread; only fetch and decode run
//! on the tokio runtime.

use std::sync::Arc;

use glam::DVec2;
use tracing::{debug, info};

use crate::config::ViewerConfig;
use crate::io::TileLoader;
use crate::pyramid::{TilePyramidSelector, TileSource};
use crate::scheduler::{JobScheduler, SchedulerStats};
use crate::tile::{
    CacheStats, CapacityStatus, LayerDraw, LayerId, LayerPlacement, LayerStats, TileCache,
    TiledImage,
};
use crate::viewport::{Rect, Viewport};

/// Output of one [`Viewer::tick`].
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub now: u64,

    /// One entry per layer, in drawing order
    pub layers: Vec<LayerDraw>,

    /// Whether the viewport is still animating
    pub animating: bool,

    /// Whether another tick would change the picture
    pub needs_redraw: bool,
}

impl Frame {
    /// Total number of tiles to draw.
    pub fn tile_count(&self) -> usize {
        self.layers.iter().map(|l| l.tiles.len()).sum()
    }

    /// Total number of wanted tiles still missing.
    pub fn pending_count(&self) -> usize {
        self.layers.iter().map(|l| l.pending.len()).sum()
    }
}

/// Snapshot of viewer activity.
#[derive(Debug, Clone, Default)]
pub struct ViewerStats {
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
    pub layers: Vec<(LayerId, LayerStats)>,
}

/// Owns every component of a deep-zoom view.
pub struct Viewer {
    config: ViewerConfig,
    viewport: Viewport,
    cache: TileCache,
    scheduler: JobScheduler,
    selector: TilePyramidSelector,
    layers: Vec<TiledImage>,
    next_layer: u32,
}

impl Viewer {
    /// Create a viewer whose primary layer is `source`, one viewport unit wide.
    ///
    /// Must be called inside a tokio runtime; see [`JobScheduler::new`].
    pub fn new(
        config: ViewerConfig,
        source: Arc<dyn TileSource>,
        container_size: DVec2,
        loader: Arc<dyn TileLoader>,
    ) -> Self {
        let content_size = DVec2::new(source.width() as f64, source.height() as f64);
        let mut viewer = Self {
            config,
            viewport: Viewport::new(content_size, container_size, config.viewport),
            cache: TileCache::new(config.cache.max_entries),
            scheduler: JobScheduler::new(config.scheduler, loader),
            selector: TilePyramidSelector::new(config.selector, config.viewport.min_zoom_image_ratio),
            layers: Vec::new(),
            next_layer: 0,
        };
        viewer.add_layer(source, LayerPlacement::default());
        viewer
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Mutable access for navigation (zoom, pan, resize).
    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn layers(&self) -> &[TiledImage] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&TiledImage> {
        self.layers.iter().find(|l| l.id() == id)
    }

    // =========================================================================
    // Layers
    // =========================================================================

    /// Add a layer drawn above the existing ones.
    ///
    /// The home area grows to include it.
    pub fn add_layer(&mut self, source: Arc<dyn TileSource>, placement: LayerPlacement) -> LayerId {
        let id = LayerId(self.next_layer);
        self.next_layer += 1;

        let layer = TiledImage::new(id, source, placement, self.config.selector.blend_time_ms);
        info!(
            layer = %id,
            width = layer.source().width(),
            height = layer.source().height(),
            levels = layer.source().max_level() + 1,
            "layer added"
        );
        self.layers.push(layer);
        self.update_home_bounds();
        id
    }

    /// Remove a layer, releasing its cache references and cancelling its jobs.
    pub fn remove_layer(&mut self, id: LayerId) -> bool {
        let Some(index) = self.layers.iter().position(|l| l.id() == id) else {
            return false;
        };
        let mut layer = self.layers.remove(index);
        layer.reset(&mut self.cache, &mut self.scheduler);
        self.update_home_bounds();
        info!(layer = %id, "layer removed");
        true
    }

    /// Union of every layer's bounds in viewport coordinates.
    pub fn world_bounds(&self) -> Option<Rect> {
        self.layers
            .iter()
            .map(TiledImage::bounds)
            .reduce(|a, b| a.union(&b))
    }

    fn update_home_bounds(&mut self) {
        if let Some(bounds) = self.world_bounds() {
            self.viewport.set_home_bounds(bounds);
        }
    }

    /// Retry failed tiles of every layer on the next tick.
    pub fn invalidate_failed(&mut self) -> usize {
        self.layers.iter_mut().map(TiledImage::invalidate_failed).sum()
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Advance everything to `now` and return what to draw.
    pub fn tick(&mut self, now: u64) -> Frame {
        let animating = self.viewport.update(now);
        self.cache.advance_to(now);

        for event in self.scheduler.poll(now) {
            for layer in &mut self.layers {
                layer.handle_event(&event, now, &mut self.cache);
            }
        }

        for layer in &mut self.layers {
            let selection = layer.select(&self.selector, &self.viewport);
            layer.update(&selection, now, &mut self.cache, &mut self.scheduler);
        }

        self.cache
            .set_pinned(self.layers.iter().flat_map(|l| l.wanted_keys().cloned()));
        match self.cache.enforce_capacity() {
            CapacityStatus::CapacityPinned { excess } => {
                debug!(excess, entries = self.cache.len(), "cache over capacity, all excess pinned");
            }
            CapacityStatus::Evicted(_) | CapacityStatus::WithinCapacity => {}
        }

        self.scheduler.dispatch();

        let layers: Vec<LayerDraw> = self.layers.iter().map(|l| l.draw(now)).collect();
        let needs_redraw = animating || self.layers.iter().any(|l| l.needs_redraw(now));

        Frame {
            now,
            layers,
            animating,
            needs_redraw,
        }
    }

    /// Wait until a running job reports back.
    ///
    /// Returns `false` at once when nothing is in flight.
    pub async fn wait_for_activity(&mut self) -> bool {
        self.scheduler.wait_for_completion().await
    }

    /// Drop all tile state: cancel every job, clear every layer and empty
    /// the cache.
    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.reset(&mut self.cache, &mut self.scheduler);
        }
        self.scheduler.cancel_all();
        self.cache.clear();
        info!("viewer reset");
    }

    pub fn stats(&self) -> ViewerStats {
        ViewerStats {
            scheduler: self.scheduler.stats(),
            cache: self.cache.stats(),
            layers: self.layers.iter().map(|l| (l.id(), l.stats())).collect(),
        }
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("viewport", &self.viewport)
            .field("cache", &self.cache.stats())
            .field("scheduler", &self.scheduler)
            .field("layers", &self.layers)
            .finish()
    }
}
