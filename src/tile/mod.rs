//! Tile layer.
//!
//! This module holds the tile data model, the shared decoded-tile cache, and
//! the per-image layer state machine that turns a wanted tile set into cache
//! lookups and scheduler jobs.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        TiledImage (one per layer)       │
//! │  Unrequested → Queued → Loading → Ready │
//! │                             └──→ Failed │
//! └──────────┬───────────────────┬──────────┘
//!            │ acquire/release   │ submit/cancel
//!            ▼                   ▼
//! ┌────────────────────┐ ┌────────────────────┐
//! │     TileCache      │ │    JobScheduler    │
//! │ (shared, refcount, │ │ (bounded, priority │
//! │  pinned eviction)  │ │  dispatch)         │
//! └────────────────────┘ └────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Tile`]: one pyramid cell tracked by a layer
//! - [`TileCache`]: capacity-bounded store of decoded tiles shared by all layers
//! - [`TiledImage`]: one image layer; owns its tiles, never the resources
//! - [`TileDecoder`]: turns fetched bytes into RGBA pixels

mod cache;
mod decoder;
mod layer;

use std::fmt;
use std::sync::Arc;

use crate::error::TileError;
use crate::queue::Priority;
use crate::scheduler::JobHandle;
use crate::viewport::Rect;

pub use cache::{
    resident_cutoff, CacheStats, CacheTier, CapacityStatus, NoopDisposer, ResourceDisposer,
    TileCache, DEFAULT_MAX_CACHE_ENTRIES,
};
pub use decoder::{DecodedTile, TileDecoder, TileResource};
pub use layer::{DrawTile, LayerDraw, LayerPlacement, LayerStats, TiledImage};

// =============================================================================
// Identifiers
// =============================================================================

/// Position of a tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Pyramid level (higher = more detail)
    pub level: u32,

    /// Column index at this level
    pub x: u32,

    /// Row index at this level
    pub y: u32,
}

impl TileCoord {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.level, self.x, self.y)
    }
}

/// Identity of a decoded resource in the [`TileCache`].
///
/// Derived from the tile address plus any POST body, so two layers that
/// address the same bytes share one cache record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Build a key from a tile address and optional request body.
    pub fn from_address(address: &str, post_data: Option<&str>) -> Self {
        match post_data {
            Some(body) => Self(format!("{address}+{body}").into()),
            None => Self(address.into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an image layer within a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u32);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

// =============================================================================
// Tile
// =============================================================================

/// Lifecycle of a tile.
///
/// Transitions only move forward, except `Failed → Queued` on explicit
/// invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    Unrequested,
    Queued,
    Loading,
    Ready,
    Failed,
}

/// One pyramid cell tracked by a layer.
///
/// A tile holds at most a reference into the [`TileCache`]; the resource
/// itself is owned by the cache record.
#[derive(Debug, Clone)]
pub struct Tile {
    pub coord: TileCoord,

    /// Cache identity
    pub key: CacheKey,

    /// Address passed to the loader
    pub address: String,

    /// Bounds in full-resolution image pixels
    pub bounds: Rect,

    /// Layer that requested the tile
    pub owner: LayerId,

    /// Current priority (lower = more urgent)
    pub priority: Priority,

    /// Last tick at which the tile was part of the wanted set
    pub last_touched: u64,

    state: TileState,
    job: Option<JobHandle>,
    resource: Option<TileResource>,
    ready_at: Option<u64>,
    error: Option<TileError>,
}

impl Tile {
    pub fn new(
        coord: TileCoord,
        key: CacheKey,
        address: String,
        bounds: Rect,
        owner: LayerId,
    ) -> Self {
        Self {
            coord,
            key,
            address,
            bounds,
            owner,
            priority: Priority::default(),
            last_touched: 0,
            state: TileState::Unrequested,
            job: None,
            resource: None,
            ready_at: None,
            error: None,
        }
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Handle of the job fetching this tile, while queued or loading.
    pub fn job(&self) -> Option<JobHandle> {
        self.job
    }

    /// The decoded resource, once ready.
    pub fn resource(&self) -> Option<&TileResource> {
        self.resource.as_ref()
    }

    /// Tick at which the tile became ready (start of its fade-in).
    pub fn ready_at(&self) -> Option<u64> {
        self.ready_at
    }

    /// Error of the last failed attempt.
    pub fn error(&self) -> Option<&TileError> {
        self.error.as_ref()
    }

    pub(crate) fn mark_queued(&mut self, job: JobHandle) {
        debug_assert!(
            matches!(self.state, TileState::Unrequested | TileState::Failed),
            "tile {} cannot be queued from {:?}",
            self.coord,
            self.state
        );
        self.state = TileState::Queued;
        self.job = Some(job);
        self.error = None;
    }

    pub(crate) fn mark_loading(&mut self) {
        debug_assert_eq!(self.state, TileState::Queued);
        self.state = TileState::Loading;
    }

    pub(crate) fn mark_ready(&mut self, resource: TileResource, now: u64) {
        debug_assert!(
            self.state != TileState::Ready && self.state != TileState::Failed,
            "tile {} cannot become ready from {:?}",
            self.coord,
            self.state
        );
        self.state = TileState::Ready;
        self.job = None;
        self.resource = Some(resource);
        self.ready_at = Some(now);
    }

    pub(crate) fn mark_failed(&mut self, error: TileError) {
        self.state = TileState::Failed;
        self.job = None;
        self.error = Some(error);
    }

    /// Opacity of a ready tile at `now`, fading in over `blend_time_ms`.
    pub fn opacity(&self, now: u64, blend_time_ms: u64) -> f64 {
        match self.ready_at {
            None => 0.0,
            Some(_) if blend_time_ms == 0 => 1.0,
            Some(start) => {
                let elapsed = now.saturating_sub(start) as f64;
                (elapsed / blend_time_ms as f64).min(1.0)
            }
        }
    }
}
