//! Points and rectangles shared by the viewport and pyramid code.

use glam::DVec2;

/// A point or vector. Units depend on the coordinate space it lives in.
pub type Point = DVec2;

/// Axis-aligned rectangle, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanning two corners.
    pub fn from_corners(top_left: Point, bottom_right: Point) -> Self {
        Self::new(
            top_left.x,
            top_left.y,
            bottom_right.x - top_left.x,
            bottom_right.y - top_left.y,
        )
    }

    pub fn top_left(&self) -> Point {
        DVec2::new(self.x, self.y)
    }

    pub fn bottom_right(&self) -> Point {
        DVec2::new(self.x + self.width, self.y + self.height)
    }

    pub fn center(&self) -> Point {
        DVec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn size(&self) -> Point {
        DVec2::new(self.width, self.height)
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    /// Whether the rectangles overlap with non-zero area.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// Overlapping part of two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let tl = self.top_left().max(other.top_left());
        let br = self.bottom_right().min(other.bottom_right());
        if br.x > tl.x && br.y > tl.y {
            Some(Rect::from_corners(tl, br))
        } else {
            None
        }
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.top_left().min(other.top_left()),
            self.bottom_right().max(other.bottom_right()),
        )
    }

    /// Grow by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Scale every component (origin and size) by `factor`.
    pub fn scale(&self, factor: f64) -> Rect {
        Rect::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    pub fn translate(&self, delta: Point) -> Rect {
        Rect::new(self.x + delta.x, self.y + delta.y, self.width, self.height)
    }
}
