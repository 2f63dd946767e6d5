//! One image layer and its tile state machine.
//!
//! Each tick the layer receives a fresh [`Selection`] and reconciles its
//! tracked tiles against it:
//!
//! - tiles no longer wanted give back their cache reference, or their
//!   scheduler ownership if still in flight (the job is cancelled once no
//!   owner is left)
//! - wanted tiles found in the cache become ready at once
//! - the rest are submitted to the scheduler, or re-prioritized if they are
//!   already queued
//! - fallback tiles from other levels are kept only while the target level
//!   is not fully drawn, and only if they are already decoded
//!
//! Failed tiles are not retried while they stay wanted. They retry when
//! they leave the wanted set and come back, or after
//! [`TiledImage::invalidate_failed`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use super::cache::{resident_cutoff, CacheTier};
use super::{CacheKey, LayerId, Tile, TileCache, TileCoord, TileResource, TileState};
use crate::pyramid::{LayerView, Selection, TilePyramidSelector, TileSource, WantedTile};
use crate::scheduler::{JobEvent, JobOwner, JobRequest, JobScheduler, JobState};
use crate::viewport::{Point, Rect, Viewport};

/// Where a layer sits in viewport coordinates.
///
/// The height follows from the image aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
}

impl LayerPlacement {
    pub fn new(x: f64, y: f64, width: f64) -> Self {
        Self { x, y, width }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl Default for LayerPlacement {
    fn default() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }
}

/// A ready tile handed to the renderer.
#[derive(Debug, Clone)]
pub struct DrawTile {
    pub coord: TileCoord,

    /// Bounds in full-resolution image pixels
    pub bounds: Rect,

    /// Bounds in viewport coordinates
    pub viewport_bounds: Rect,

    pub resource: TileResource,

    /// Fade-in progress, 0 to 1
    pub opacity: f64,
}

/// Everything a layer wants drawn this frame.
#[derive(Debug, Clone, Default)]
pub struct LayerDraw {
    pub layer: Option<LayerId>,

    /// Ready tiles, coarse levels first, then by priority
    pub tiles: Vec<DrawTile>,

    /// Target-level tiles still loading (or failed)
    pub pending: Vec<TileCoord>,
}

/// Tile counts of one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub target_level: u32,
    pub tracked: usize,
    pub queued: usize,
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
}

/// One image layer.
///
/// Owns its [`Tile`] entries but never the decoded resources: those live in
/// the shared [`TileCache`], which is borrowed for every call that touches it.
pub struct TiledImage {
    id: LayerId,
    source: Arc<dyn TileSource>,
    placement: LayerPlacement,
    blend_time_ms: u64,

    /// Levels at or below this stay cached for good
    resident_cutoff: u32,

    tiles: HashMap<TileCoord, Tile>,
    target_level: u32,
    targets: Vec<TileCoord>,
    retry_failed: bool,
}

impl TiledImage {
    pub fn new(
        id: LayerId,
        source: Arc<dyn TileSource>,
        placement: LayerPlacement,
        blend_time_ms: u64,
    ) -> Self {
        let cutoff = resident_cutoff(source.tile_size(source.max_level()).width);
        Self {
            id,
            source,
            placement,
            blend_time_ms,
            resident_cutoff: cutoff,
            tiles: HashMap::new(),
            target_level: 0,
            targets: Vec::new(),
            retry_failed: false,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn placement(&self) -> LayerPlacement {
        self.placement
    }

    pub fn set_placement(&mut self, placement: LayerPlacement) {
        self.placement = placement;
    }

    /// Layer bounds in viewport coordinates.
    pub fn bounds(&self) -> Rect {
        let aspect = self.source.height() as f64 / self.source.width() as f64;
        Rect::new(
            self.placement.x,
            self.placement.y,
            self.placement.width,
            self.placement.width * aspect,
        )
    }

    /// Viewport units per full-resolution image pixel.
    fn scale(&self) -> f64 {
        self.placement.width / self.source.width() as f64
    }

    pub fn tile(&self, coord: &TileCoord) -> Option<&Tile> {
        self.tiles.get(coord)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    /// Cache keys of every tracked tile. These are pinned in the cache.
    pub fn wanted_keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.tiles.values().map(|t| &t.key)
    }

    // =========================================================================
    // Selection
    // =========================================================================

    /// What this layer sees of the current viewport.
    pub fn view(&self, viewport: &Viewport) -> LayerView {
        let scale = self.scale();
        let bounds = viewport.get_bounds(true);
        LayerView {
            visible: bounds.translate(-self.placement.origin()).scale(1.0 / scale),
            pixel_ratio: viewport.delta_pixels_from_points(Point::splat(scale), true).x,
        }
    }

    pub fn select(&self, selector: &TilePyramidSelector, viewport: &Viewport) -> Selection {
        selector.select(self.source.as_ref(), &self.view(viewport))
    }

    /// Reconcile tracked tiles with `selection`.
    pub fn update(
        &mut self,
        selection: &Selection,
        now: u64,
        cache: &mut TileCache,
        scheduler: &mut JobScheduler,
    ) {
        let covered = self.is_covered(selection, now);

        let mut keep: HashSet<TileCoord> = selection.targets().map(|t| t.coord).collect();
        let fallbacks: Vec<&WantedTile> = if covered {
            Vec::new()
        } else {
            selection
                .fallbacks()
                .filter(|t| self.is_available(t.coord, cache))
                .collect()
        };
        keep.extend(fallbacks.iter().map(|t| t.coord));

        let stale: Vec<TileCoord> = self
            .tiles
            .keys()
            .filter(|coord| !keep.contains(coord))
            .copied()
            .collect();
        for coord in stale {
            self.drop_tile(coord, cache, scheduler);
        }

        for wanted in selection.targets() {
            self.update_target(wanted, now, cache, scheduler);
        }
        for wanted in fallbacks {
            self.update_fallback(wanted, now, cache);
        }

        self.retry_failed = false;
        self.target_level = selection.target_level;
        self.targets = selection.targets().map(|t| t.coord).collect();
    }

    /// Whether every target tile is ready and fully faded in.
    fn is_covered(&self, selection: &Selection, now: u64) -> bool {
        selection.targets().all(|t| {
            self.tiles.get(&t.coord).is_some_and(|tile| {
                tile.state() == TileState::Ready
                    && tile.opacity(now, self.blend_time_ms) >= 1.0
            })
        })
    }

    /// Whether a fallback tile can be shown without fetching it.
    fn is_available(&self, coord: TileCoord, cache: &TileCache) -> bool {
        match self.tiles.get(&coord) {
            Some(tile) => tile.state() == TileState::Ready,
            None => cache.contains(&self.key_for(coord)),
        }
    }

    fn key_for(&self, coord: TileCoord) -> CacheKey {
        let address = self.source.tile_url(coord.level, coord.x, coord.y);
        let post_data = self.source.tile_post_data(coord.level, coord.x, coord.y);
        CacheKey::from_address(&address, post_data.as_deref())
    }

    fn new_tile(&self, wanted: &WantedTile) -> Tile {
        let coord = wanted.coord;
        let address = self.source.tile_url(coord.level, coord.x, coord.y);
        let post_data = self.source.tile_post_data(coord.level, coord.x, coord.y);
        let key = CacheKey::from_address(&address, post_data.as_deref());
        Tile::new(coord, key, address, wanted.bounds, self.id)
    }

    fn update_target(
        &mut self,
        wanted: &WantedTile,
        now: u64,
        cache: &mut TileCache,
        scheduler: &mut JobScheduler,
    ) {
        if !self.tiles.contains_key(&wanted.coord) {
            let tile = self.new_tile(wanted);
            self.tiles.insert(wanted.coord, tile);
        }
        let retry_failed = self.retry_failed;
        let id = self.id;
        let source = Arc::clone(&self.source);
        let Some(tile) = self.tiles.get_mut(&wanted.coord) else {
            return;
        };
        tile.priority = wanted.priority;
        tile.last_touched = now;

        match tile.state() {
            TileState::Unrequested => {
                if let Some(resource) = cache.acquire(&tile.key) {
                    trace!(layer = %id, tile = %tile.coord, "cache hit");
                    tile.mark_ready(resource, now);
                } else {
                    submit(tile, source.as_ref(), scheduler);
                }
            }
            TileState::Failed if retry_failed => {
                debug!(layer = %id, tile = %tile.coord, "retrying failed tile");
                submit(tile, source.as_ref(), scheduler);
            }
            TileState::Queued => {
                if let Some(job) = tile.job() {
                    scheduler.reprioritize(job, wanted.priority);
                }
            }
            TileState::Ready => {
                cache.touch(&tile.key);
            }
            TileState::Loading | TileState::Failed => {}
        }
    }

    fn update_fallback(&mut self, wanted: &WantedTile, now: u64, cache: &mut TileCache) {
        if let Some(tile) = self.tiles.get_mut(&wanted.coord) {
            tile.priority = wanted.priority;
            tile.last_touched = now;
            cache.touch(&tile.key);
            return;
        }

        let mut tile = self.new_tile(wanted);
        if let Some(resource) = cache.acquire(&tile.key) {
            tile.priority = wanted.priority;
            tile.last_touched = now;
            tile.mark_ready(resource, now);
            self.tiles.insert(wanted.coord, tile);
        }
    }

    /// Stop tracking a tile, giving back whatever it holds.
    fn drop_tile(&mut self, coord: TileCoord, cache: &mut TileCache, scheduler: &mut JobScheduler) {
        let Some(tile) = self.tiles.remove(&coord) else {
            return;
        };
        match tile.state() {
            TileState::Ready => {
                cache.release(&tile.key);
            }
            TileState::Queued | TileState::Loading => {
                if let Some(job) = tile.job() {
                    scheduler.release_owner(job, JobOwner::new(self.id, coord));
                }
            }
            TileState::Unrequested | TileState::Failed => {}
        }
        trace!(layer = %self.id, tile = %coord, state = ?tile.state(), "tile released");
    }

    // =========================================================================
    // Job events
    // =========================================================================

    /// Apply a scheduler event to the tiles this layer owns in it.
    pub fn handle_event(&mut self, event: &JobEvent, now: u64, cache: &mut TileCache) {
        let handle = event.handle();
        for owner in event.owners().iter().filter(|o| o.layer == self.id) {
            let Some(tile) = self.tiles.get_mut(&owner.coord) else {
                continue;
            };
            if tile.job() != Some(handle) {
                continue;
            }

            match event {
                JobEvent::Started { .. } => {
                    if tile.state() == TileState::Queued {
                        tile.mark_loading();
                    }
                }
                JobEvent::Completed { key, resource, .. } => {
                    let tier = CacheTier::new(owner.coord.level, self.resident_cutoff);
                    let resource = cache.install_with_tier(key.clone(), Arc::clone(resource), tier);
                    tile.mark_ready(resource, now);
                }
                JobEvent::Failed { error, .. } => {
                    tile.mark_failed(error.clone());
                }
            }
        }
    }

    /// Retry every failed tile on the next update. Returns how many failed.
    pub fn invalidate_failed(&mut self) -> usize {
        self.retry_failed = true;
        self.tiles
            .values()
            .filter(|t| t.state() == TileState::Failed)
            .count()
    }

    /// Drop every tile, releasing cache references and job ownerships.
    pub fn reset(&mut self, cache: &mut TileCache, scheduler: &mut JobScheduler) {
        let coords: Vec<TileCoord> = self.tiles.keys().copied().collect();
        for coord in coords {
            self.drop_tile(coord, cache, scheduler);
        }
        self.targets.clear();
        self.retry_failed = false;
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Ready tiles to draw at `now`, plus the target tiles still missing.
    pub fn draw(&self, now: u64) -> LayerDraw {
        let scale = self.scale();
        let origin = self.placement.origin();

        let mut ready: Vec<&Tile> = self
            .tiles
            .values()
            .filter(|t| t.state() == TileState::Ready)
            .collect();
        ready.sort_by(|a, b| {
            a.coord
                .level
                .cmp(&b.coord.level)
                .then(a.priority.cmp(&b.priority))
                .then(a.coord.cmp(&b.coord))
        });

        let tiles = ready
            .into_iter()
            .filter_map(|tile| {
                let resource = tile.resource()?.clone();
                Some(DrawTile {
                    coord: tile.coord,
                    bounds: tile.bounds,
                    viewport_bounds: tile.bounds.scale(scale).translate(origin),
                    resource,
                    opacity: tile.opacity(now, self.blend_time_ms),
                })
            })
            .collect();

        let pending = self
            .targets
            .iter()
            .filter(|coord| {
                self.tiles
                    .get(coord)
                    .map_or(true, |t| t.state() != TileState::Ready)
            })
            .copied()
            .collect();

        LayerDraw {
            layer: Some(self.id),
            tiles,
            pending,
        }
    }

    /// Whether another frame would look different: tiles are still loading
    /// or fading in.
    pub fn needs_redraw(&self, now: u64) -> bool {
        self.targets.iter().any(|coord| match self.tiles.get(coord) {
            Some(tile) => match tile.state() {
                TileState::Ready => tile.opacity(now, self.blend_time_ms) < 1.0,
                TileState::Failed => false,
                _ => true,
            },
            None => true,
        })
    }

    pub fn stats(&self) -> LayerStats {
        let mut stats = LayerStats {
            target_level: self.target_level,
            tracked: self.tiles.len(),
            ..LayerStats::default()
        };
        for tile in self.tiles.values() {
            match tile.state() {
                TileState::Queued => stats.queued += 1,
                TileState::Loading => stats.loading += 1,
                TileState::Ready => stats.ready += 1,
                TileState::Failed => stats.failed += 1,
                TileState::Unrequested => {}
            }
        }
        stats
    }
}

impl std::fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImage")
            .field("id", &self.id)
            .field("placement", &self.placement)
            .field("tiles", &self.tiles.len())
            .field("target_level", &self.target_level)
            .finish()
    }
}

/// Submit a job for `tile` and move it to Queued (or Loading if it started).
fn submit(tile: &mut Tile, source: &dyn TileSource, scheduler: &mut JobScheduler) {
    let coord = tile.coord;
    let handle = scheduler.submit(JobRequest {
        key: tile.key.clone(),
        address: tile.address.clone(),
        post_data: source.tile_post_data(coord.level, coord.x, coord.y),
        priority: tile.priority,
        owner: JobOwner::new(tile.owner, coord),
    });
    tile.mark_queued(handle);
    if scheduler.job_state(handle) == Some(JobState::Running) {
        tile.mark_loading();
    }
}
