//! Tile pyramids: addressing and selection.
//!
//! A [`TileSource`] describes one image pyramid: its full-resolution size,
//! its level range, and how to address and place each tile. Levels follow
//! the Deep Zoom convention, where higher levels carry more detail and the
//! top level is full resolution:
//!
//! ```text
//! level max     ██████████████████   full resolution (scale 1)
//! level max-1   █████████            scale 1/2
//! level max-2   ████▌                scale 1/4
//!   ...
//! level 0       ▏                    1x1 pixel
//! ```
//!
//! [`TilePyramidSelector`] turns a view of the image into the prioritized
//! set of tiles needed to draw it.

mod dzi;
mod selector;

use std::fmt;

use crate::viewport::{Point, Rect};

pub use dzi::{tiles_url_for, DisplayRect, DziDescriptor, DziTileSource};
pub use selector::{LayerView, Selection, TilePyramidSelector, WantedTile};

/// Tile geometry at one level, in level pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSize {
    pub width: u32,
    pub height: u32,

    /// Pixels each tile shares with its neighbours on every inner edge
    pub overlap: u32,
}

/// Addressing contract of a tiled image.
///
/// Every method is a pure function of its inputs.
pub trait TileSource: Send + Sync + fmt::Debug {
    /// Full-resolution width in pixels.
    fn width(&self) -> u32;

    /// Full-resolution height in pixels.
    fn height(&self) -> u32;

    fn min_level(&self) -> u32;

    fn max_level(&self) -> u32;

    fn tile_size(&self, level: u32) -> TileSize;

    /// Address of a tile, passed to the loader.
    fn tile_url(&self, level: u32, x: u32, y: u32) -> String;

    /// Body for sources that fetch tiles by POST.
    fn tile_post_data(&self, _level: u32, _x: u32, _y: u32) -> Option<String> {
        None
    }

    /// Size of one level pixel relative to a full-resolution pixel.
    fn level_scale(&self, level: u32) -> f64 {
        2f64.powi(level as i32 - self.max_level() as i32)
    }

    /// Image size at `level`, in (fractional) level pixels.
    fn level_dimensions(&self, level: u32) -> Point {
        let scale = self.level_scale(level);
        Point::new(self.width() as f64 * scale, self.height() as f64 * scale)
    }

    /// Number of tile columns and rows at `level`.
    fn num_tiles(&self, level: u32) -> (u32, u32) {
        let dims = self.level_dimensions(level);
        let size = self.tile_size(level);
        (
            (dims.x / size.width as f64).ceil().max(1.0) as u32,
            (dims.y / size.height as f64).ceil().max(1.0) as u32,
        )
    }

    /// Column and row of the tile covering an image-pixel point.
    ///
    /// Not clamped: points outside the image give out-of-range indices.
    fn tile_at_point(&self, level: u32, point: Point) -> (i64, i64) {
        let scale = self.level_scale(level);
        let size = self.tile_size(level);
        (
            (point.x * scale / size.width as f64).floor() as i64,
            (point.y * scale / size.height as f64).floor() as i64,
        )
    }

    /// Area covered by a tile in full-resolution image pixels.
    ///
    /// Includes the overlap strip: one on the leading edge unless the tile
    /// is in the first column (row), one on the trailing edge, clipped to
    /// the image.
    fn tile_bounds(&self, level: u32, x: u32, y: u32) -> Rect {
        let dims = self.level_dimensions(level);
        let size = self.tile_size(level);
        let overlap = size.overlap as f64;

        let px = if x == 0 {
            0.0
        } else {
            size.width as f64 * x as f64 - overlap
        };
        let py = if y == 0 {
            0.0
        } else {
            size.height as f64 * y as f64 - overlap
        };
        let edges = |i: u32| if i == 0 { 1.0 } else { 2.0 };
        let sx = (size.width as f64 + edges(x) * overlap).min(dims.x - px);
        let sy = (size.height as f64 + edges(y) * overlap).min(dims.y - py);

        Rect::new(px, py, sx, sy).scale(1.0 / self.level_scale(level))
    }

    /// Whether a tile exists at all.
    fn tile_exists(&self, level: u32, x: u32, y: u32) -> bool {
        let (cols, rows) = self.num_tiles(level);
        level >= self.min_level() && level <= self.max_level() && x < cols && y < rows
    }
}

/// Highest level for an image of the given size: `ceil(log2(max(w, h)))`.
pub fn max_level_for(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height) as f64;
    if max_dim <= 1.0 {
        return 0;
    }
    max_dim.log2().ceil() as u32
}
