//! Wanted-tile selection.
//!
//! For a given view, the selector picks the most detailed level whose
//! pixels still appear at least `min_pixel_ratio` element pixels wide, and
//! lists the tiles of that level that cover the visible area. Coarser (and
//! one finer) levels are listed as fallbacks: the layer shows them while
//! the target level loads, but never fetches them.
//!
//! Priorities are lower-is-sooner: the integer part is the distance in
//! levels from the target level, the fractional part grows with distance
//! from the view center.

use crate::config::SelectorConfig;
use crate::queue::Priority;
use crate::tile::TileCoord;
use crate::viewport::{Point, Rect};

use super::TileSource;

/// What one layer sees: the visible area and its on-screen scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerView {
    /// Visible area in the layer's full-resolution image pixels
    pub visible: Rect,

    /// Element pixels per full-resolution image pixel
    pub pixel_ratio: f64,
}

/// One tile the current view needs (or could use as a placeholder).
#[derive(Debug, Clone, PartialEq)]
pub struct WantedTile {
    pub coord: TileCoord,

    /// Bounds in full-resolution image pixels
    pub bounds: Rect,

    pub priority: Priority,

    /// Placeholder from another level; drawn if already available, never fetched
    pub fallback: bool,
}

/// Result of one selection pass, sorted by priority.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    pub target_level: u32,
    pub tiles: Vec<WantedTile>,
}

impl Selection {
    /// Tiles at the target level.
    pub fn targets(&self) -> impl Iterator<Item = &WantedTile> {
        self.tiles.iter().filter(|t| !t.fallback)
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = &WantedTile> {
        self.tiles.iter().filter(|t| t.fallback)
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Computes the wanted tile set for a view of a tile source.
#[derive(Debug, Clone)]
pub struct TilePyramidSelector {
    config: SelectorConfig,
    min_zoom_image_ratio: f64,
}

impl TilePyramidSelector {
    pub fn new(config: SelectorConfig, min_zoom_image_ratio: f64) -> Self {
        Self {
            config,
            min_zoom_image_ratio,
        }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Levels worth drawing at `pixel_ratio`, as `(lowest, target)`.
    pub fn level_range(&self, source: &dyn TileSource, pixel_ratio: f64) -> (u32, u32) {
        let min = source.min_level();
        let max = source.max_level();

        let target = if pixel_ratio > 0.0 && pixel_ratio.is_finite() {
            // Element pixels per level-0 pixel
            let zero_ratio = pixel_ratio / source.level_scale(0);
            let level = (zero_ratio / self.config.min_pixel_ratio).log2().floor();
            level.clamp(min as f64, max as f64) as u32
        } else {
            min
        };

        let lowest = self
            .min_zoom_image_ratio
            .log2()
            .floor()
            .clamp(min as f64, max as f64) as u32;

        (lowest.min(target), target)
    }

    /// Most detailed level that is worth drawing at `pixel_ratio`.
    pub fn target_level(&self, source: &dyn TileSource, pixel_ratio: f64) -> u32 {
        self.level_range(source, pixel_ratio).1
    }

    /// Select the tiles needed to draw `view`.
    ///
    /// Returns an empty selection when the view does not overlap the image.
    pub fn select(&self, source: &dyn TileSource, view: &LayerView) -> Selection {
        let (lowest, target) = self.level_range(source, view.pixel_ratio);
        let mut selection = Selection {
            target_level: target,
            tiles: Vec::new(),
        };

        let image = Rect::new(0.0, 0.0, source.width() as f64, source.height() as f64);
        let Some(visible) = view.visible.intersection(&image) else {
            return selection;
        };

        let center = view.visible.center();
        let extent = view.visible.width.max(view.visible.height).max(f64::EPSILON);

        self.enumerate(source, target, 0, &visible, center, extent, &mut selection.tiles);

        let coarsest = target
            .saturating_sub(self.config.fallback_levels)
            .max(lowest);
        for level in (coarsest..target).rev() {
            self.enumerate(
                source,
                level,
                target - level,
                &visible,
                center,
                extent,
                &mut selection.tiles,
            );
        }
        if self.config.fallback_levels > 0 && target < source.max_level() {
            self.enumerate(source, target + 1, 1, &visible, center, extent, &mut selection.tiles);
        }

        selection
            .tiles
            .sort_by(|a, b| a.priority.cmp(&b.priority).then(a.coord.cmp(&b.coord)));
        selection
    }

    /// Add the tiles of `level` that cover `visible`.
    #[allow(clippy::too_many_arguments)]
    fn enumerate(
        &self,
        source: &dyn TileSource,
        level: u32,
        level_diff: u32,
        visible: &Rect,
        center: Point,
        extent: f64,
        out: &mut Vec<WantedTile>,
    ) {
        let size = source.tile_size(level);
        let margin = size.overlap as f64 / source.level_scale(level);
        let area = visible.expand(margin);

        let (cols, rows) = source.num_tiles(level);
        let clamp = |v: i64, n: u32| v.clamp(0, n as i64 - 1) as u32;

        let (x0, y0) = source.tile_at_point(level, area.top_left());
        let (x1, y1) = source.tile_at_point(level, area.bottom_right());

        for y in clamp(y0, rows)..=clamp(y1, rows) {
            for x in clamp(x0, cols)..=clamp(x1, cols) {
                if !source.tile_exists(level, x, y) {
                    continue;
                }
                let bounds = source.tile_bounds(level, x, y);
                let d = (bounds.center() - center).length() / extent;
                out.push(WantedTile {
                    coord: TileCoord::new(level, x, y),
                    bounds,
                    priority: Priority::new(level_diff as f64 + d / (1.0 + d)),
                    fallback: level_diff > 0,
                });
            }
        }
    }
}
