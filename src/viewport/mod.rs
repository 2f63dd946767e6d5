//! Viewport state and coordinate transforms.
//!
//! The viewport tracks where the user is looking: a zoom level and a center
//! point, each animated by a [`Spring`]. Nothing moves on its own; the
//! driver calls [`Viewport::update`] once per frame with a monotonically
//! increasing timestamp.
//!
//! # Coordinate spaces
//!
//! ```text
//!  image px ──(÷ image width)──► viewport ──(center, zoom, container)──► element px ──(+ offset)──► window px
//! ```
//!
//! - **image**: full-resolution pixels of the primary image
//! - **viewport**: normalized space where the primary image is 1 unit wide
//!   and `height / width` units tall
//! - **element**: device pixels inside the drawing element
//! - **window**: element pixels shifted by the element's page offset
//!
//! A zoom of 1 shows exactly one viewport unit across the element width.
//! Every conversion is an affine map, see [`ViewTransform`].

mod geometry;
mod spring;

pub use geometry::{Point, Rect};
pub use spring::{Spring, DEFAULT_ANIMATION_DURATION_MS, DEFAULT_SPRING_STIFFNESS};

use glam::{DAffine2, DVec2};
use tracing::debug;

use crate::config::ViewportConfig;

// =============================================================================
// Transform snapshot
// =============================================================================

/// Affine maps between the four coordinate spaces for one viewport state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    pub image_to_viewport: DAffine2,
    pub viewport_to_element: DAffine2,
    pub element_to_window: DAffine2,
}

impl ViewTransform {
    pub fn image_to_element(&self) -> DAffine2 {
        self.viewport_to_element * self.image_to_viewport
    }

    pub fn image_to_window(&self) -> DAffine2 {
        self.element_to_window * self.image_to_element()
    }

    pub fn element_to_image(&self) -> DAffine2 {
        self.image_to_element().inverse()
    }

    /// Map an image-space rectangle into element pixels.
    pub fn image_rect_to_element(&self, rect: &Rect) -> Rect {
        let m = self.image_to_element();
        Rect::from_corners(
            m.transform_point2(rect.top_left()),
            m.transform_point2(rect.bottom_right()),
        )
    }
}

// =============================================================================
// Viewport
// =============================================================================

/// Spring-driven zoom and center over a fixed-size drawing element.
#[derive(Debug, Clone)]
pub struct Viewport {
    config: ViewportConfig,

    /// Primary image size in pixels
    content_size: DVec2,

    /// Drawing element size in device pixels
    container_size: DVec2,

    /// Element origin in window coordinates (page offset minus scroll)
    element_offset: DVec2,

    /// Area that "home" shows, in viewport coordinates
    home_bounds: Rect,

    center_x: Spring,
    center_y: Spring,
    zoom: Spring,

    /// Point held at a fixed element pixel while zoom animates
    zoom_point: Option<Point>,
}

impl Viewport {
    /// Create a viewport showing the whole image.
    ///
    /// Sizes smaller than one pixel are clamped to one.
    pub fn new(content_size: DVec2, container_size: DVec2, config: ViewportConfig) -> Self {
        let content_size = content_size.max(DVec2::ONE);
        let container_size = container_size.max(DVec2::ONE);
        let home_bounds = Rect::new(0.0, 0.0, 1.0, content_size.y / content_size.x);

        let (stiffness, duration) = (config.spring_stiffness, config.animation_duration_ms);
        let spring = |value: f64| Spring::new(value, stiffness, duration);

        let mut viewport = Self {
            config,
            content_size,
            container_size,
            element_offset: DVec2::ZERO,
            home_bounds,
            center_x: spring(0.0),
            center_y: spring(0.0),
            zoom: spring(1.0),
            zoom_point: None,
        };
        viewport.go_home(true);
        viewport
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    pub fn content_size(&self) -> DVec2 {
        self.content_size
    }

    pub fn container_size(&self) -> DVec2 {
        self.container_size
    }

    pub fn home_bounds(&self) -> Rect {
        self.home_bounds
    }

    /// Replace the home area, e.g. with the union of all layer placements.
    pub fn set_home_bounds(&mut self, bounds: Rect) {
        self.home_bounds = bounds;
    }

    /// Set the element's position in window coordinates.
    pub fn set_element_offset(&mut self, offset: DVec2) {
        self.element_offset = offset;
    }

    /// Element width over height.
    pub fn aspect_ratio(&self) -> f64 {
        self.container_size.x / self.container_size.y
    }

    // -------------------------------------------------------------------------
    // Zoom limits
    // -------------------------------------------------------------------------

    /// Zoom at which the home area fits the element.
    pub fn home_zoom(&self) -> f64 {
        let aspect_factor = self.home_bounds.aspect_ratio() / self.aspect_ratio();
        let zoom = if aspect_factor >= 1.0 { 1.0 } else { aspect_factor };
        zoom / self.home_bounds.width
    }

    pub fn min_zoom(&self) -> f64 {
        let home = self.home_zoom();
        (self.config.min_zoom_image_ratio * home).min(home)
    }

    pub fn max_zoom(&self) -> f64 {
        let zoom =
            self.content_size.x * self.config.max_zoom_pixel_ratio / self.container_size.x;
        zoom.max(self.home_zoom())
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Zoom, either the animated current value or the target.
    pub fn zoom(&self, current: bool) -> f64 {
        if current {
            self.zoom.current()
        } else {
            self.zoom.target()
        }
    }

    pub fn center(&self, current: bool) -> Point {
        if current {
            DVec2::new(self.center_x.current(), self.center_y.current())
        } else {
            DVec2::new(self.center_x.target(), self.center_y.target())
        }
    }

    /// Visible area in viewport coordinates.
    pub fn get_bounds(&self, current: bool) -> Rect {
        let center = self.center(current);
        let width = 1.0 / self.zoom(current);
        let height = width / self.aspect_ratio();
        Rect::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            width,
            height,
        )
    }

    /// Whether any spring is still moving toward its target.
    pub fn is_animating(&self) -> bool {
        !(self.zoom.is_at_target() && self.center_x.is_at_target() && self.center_y.is_at_target())
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    /// Multiply the target zoom by `factor`, keeping `anchor` fixed on screen.
    pub fn zoom_by(&mut self, factor: f64, anchor: Option<Point>) {
        self.zoom_to(self.zoom.target() * factor, anchor, false);
    }

    /// Animate (or jump) to `zoom`.
    ///
    /// With an anchor, the anchor point stays on the same element pixel for
    /// the whole animation.
    pub fn zoom_to(&mut self, zoom: f64, anchor: Option<Point>, immediately: bool) {
        if immediately {
            if let Some(anchor) = anchor {
                let old = self.zoom.current();
                let center = anchor - (anchor - self.center(true)) * (old / zoom);
                self.center_x.reset_to(center.x);
                self.center_y.reset_to(center.y);
            }
            self.zoom_point = None;
            self.zoom.reset_to(zoom);
        } else {
            self.zoom_point = anchor;
            self.zoom.spring_to(zoom);
        }
        debug!(zoom, immediately, "zoom_to");
    }

    /// Move the target center by `delta` viewport units.
    pub fn pan_by(&mut self, delta: Point, immediately: bool) {
        self.pan_to(self.center(false) + delta, immediately);
    }

    /// Animate (or jump) the center to `center`.
    pub fn pan_to(&mut self, center: Point, immediately: bool) {
        if immediately {
            self.center_x.reset_to(center.x);
            self.center_y.reset_to(center.y);
        } else {
            self.center_x.spring_to(center.x);
            self.center_y.spring_to(center.y);
        }
    }

    /// Show `bounds` (viewport coordinates), widened to the element's aspect.
    pub fn fit_bounds(&mut self, bounds: Rect, immediately: bool) {
        let aspect = self.aspect_ratio();
        let center = bounds.center();

        let mut fitted = bounds;
        if fitted.aspect_ratio() >= aspect {
            fitted.height = fitted.width / aspect;
        } else {
            fitted.width = fitted.height * aspect;
        }

        self.pan_to(center, immediately);
        self.zoom_to(1.0 / fitted.width, None, immediately);
    }

    pub fn go_home(&mut self, immediately: bool) {
        self.fit_bounds(self.home_bounds, immediately);
    }

    /// Pull the target state back inside the zoom limits and visibility rule.
    ///
    /// At least `visibility_ratio` of the visible width (and height) must
    /// overlap the home area.
    pub fn apply_constraints(&mut self, immediately: bool) {
        let zoom = self.zoom.target();
        let constrained = zoom.clamp(self.min_zoom(), self.max_zoom());
        if constrained != zoom {
            self.zoom_to(constrained, self.zoom_point, immediately);
        }

        let bounds = self.get_bounds(false);
        let home = self.home_bounds;
        let dx = visibility_shift(
            bounds.x + bounds.width - home.x,
            home.x + home.width - bounds.x,
            self.config.visibility_ratio * bounds.width,
        );
        let dy = visibility_shift(
            bounds.y + bounds.height - home.y,
            home.y + home.height - bounds.y,
            self.config.visibility_ratio * bounds.height,
        );

        if dx != 0.0 || dy != 0.0 {
            self.pan_by(DVec2::new(dx, dy), immediately);
        }
    }

    /// Change the element size.
    ///
    /// With `maintain`, the image keeps its on-screen scale and more or less
    /// of it becomes visible; otherwise the same area is refit.
    pub fn resize(&mut self, container_size: DVec2, maintain: bool) {
        let container_size = container_size.max(DVec2::ONE);
        let mut bounds = self.get_bounds(false);
        let width_factor = container_size.x / self.container_size.x;

        self.container_size = container_size;
        if maintain {
            bounds.width *= width_factor;
            bounds.height = bounds.width / self.aspect_ratio();
        }
        self.fit_bounds(bounds, true);
    }

    /// Advance all springs to `now_ms`. Returns `true` while animating.
    pub fn update(&mut self, now_ms: u64) -> bool {
        let anchor_before = self.zoom_point.map(|p| self.pixel_from_point(p, true));
        let zoom_moving = self.zoom.update(now_ms);

        if let (Some(point), Some(before)) = (self.zoom_point, anchor_before) {
            let after = self.pixel_from_point(point, true);
            let shift = self.delta_points_from_pixels(after - before, true);
            self.center_x.shift_by(shift.x);
            self.center_y.shift_by(shift.y);
        }
        if !zoom_moving {
            self.zoom_point = None;
        }

        let x_moving = self.center_x.update(now_ms);
        let y_moving = self.center_y.update(now_ms);
        zoom_moving || x_moving || y_moving
    }

    // -------------------------------------------------------------------------
    // Conversions
    // -------------------------------------------------------------------------

    /// Transforms for the current (or target) state.
    pub fn transform(&self, current: bool) -> ViewTransform {
        let bounds = self.get_bounds(current);
        let scale = self.container_size.x / bounds.width;

        ViewTransform {
            image_to_viewport: DAffine2::from_scale(DVec2::splat(1.0 / self.content_size.x)),
            viewport_to_element: DAffine2::from_scale(DVec2::splat(scale))
                * DAffine2::from_translation(-bounds.top_left()),
            element_to_window: DAffine2::from_translation(self.element_offset),
        }
    }

    pub fn get_current_transform(&self) -> ViewTransform {
        self.transform(true)
    }

    /// Viewport point to element pixel.
    pub fn pixel_from_point(&self, point: Point, current: bool) -> Point {
        self.transform(current)
            .viewport_to_element
            .transform_point2(point)
    }

    /// Element pixel to viewport point.
    pub fn point_from_pixel(&self, pixel: Point, current: bool) -> Point {
        self.transform(current)
            .viewport_to_element
            .inverse()
            .transform_point2(pixel)
    }

    pub fn delta_pixels_from_points(&self, delta: Point, current: bool) -> Point {
        delta * (self.container_size.x * self.zoom(current))
    }

    pub fn delta_points_from_pixels(&self, delta: Point, current: bool) -> Point {
        delta / (self.container_size.x * self.zoom(current))
    }

    pub fn image_to_viewport(&self, point: Point) -> Point {
        point / self.content_size.x
    }

    pub fn viewport_to_image(&self, point: Point) -> Point {
        point * self.content_size.x
    }

    pub fn viewport_to_element(&self, point: Point) -> Point {
        self.pixel_from_point(point, true)
    }

    pub fn element_to_viewport(&self, pixel: Point) -> Point {
        self.point_from_pixel(pixel, true)
    }

    pub fn element_to_window(&self, pixel: Point) -> Point {
        pixel + self.element_offset
    }

    pub fn window_to_element(&self, pixel: Point) -> Point {
        pixel - self.element_offset
    }

    pub fn image_to_element(&self, point: Point) -> Point {
        self.get_current_transform()
            .image_to_element()
            .transform_point2(point)
    }

    pub fn element_to_image(&self, pixel: Point) -> Point {
        self.get_current_transform()
            .element_to_image()
            .transform_point2(pixel)
    }
}

/// Shift needed on one axis so that at least `threshold` of the view overlaps
/// the content. `leading` and `trailing` are the overlap measured from each
/// side.
fn visibility_shift(leading: f64, trailing: f64, threshold: f64) -> f64 {
    let mut shift = 0.0;
    if leading < threshold {
        shift = threshold - leading;
    }
    if trailing < threshold {
        shift = if shift != 0.0 {
            (shift + trailing - threshold) / 2.0
        } else {
            trailing - threshold
        };
    }
    shift
}
