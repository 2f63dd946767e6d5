//! Configuration management for the deep-zoom core.
//!
//! Every component takes an immutable config value at construction:
//!
//! - [`SchedulerConfig`] for the [`JobScheduler`](crate::scheduler::JobScheduler)
//! - [`CacheConfig`] for the [`TileCache`](crate::tile::TileCache)
//! - [`ViewportConfig`] for the [`Viewport`](crate::viewport::Viewport)
//! - [`SelectorConfig`] for the [`TilePyramidSelector`](crate::pyramid::TilePyramidSelector)
//!
//! [`ViewerConfig`] bundles them for a [`Viewer`](crate::viewer::Viewer).
//!
//! The `deepzoom` binary builds a `ViewerConfig` from command-line arguments
//! and environment variables via clap.
//!
//! # Environment Variables
//!
//! - `DEEPZOOM_CONCURRENCY` - Max simultaneous tile jobs (default: 4)
//! - `DEEPZOOM_TIMEOUT_MS` - Per-job deadline (default: 30000)
//! - `DEEPZOOM_CACHE_ENTRIES` - Soft cache capacity (default: 200)
//! - `DEEPZOOM_SPRING_STIFFNESS` - Animation curve stiffness (default: 6.5)
//! - `DEEPZOOM_ANIMATION_MS` - Animation duration (default: 1200)
//! - `DEEPZOOM_MIN_ZOOM_IMAGE_RATIO` - Smallest on-screen image fraction (default: 0.9)
//! - `DEEPZOOM_MAX_ZOOM_PIXEL_RATIO` - Largest element pixels per image pixel (default: 1.1)
//! - `DEEPZOOM_MIN_PIXEL_RATIO` - Level selection threshold (default: 0.5)
//! - `DEEPZOOM_BLEND_MS` - Tile fade-in duration (default: 0)
//! - `DEEPZOOM_FALLBACK_LEVELS` - Coarser levels shown while loading (default: 1)
//! - `DEEPZOOM_S3_ENDPOINT` / `DEEPZOOM_S3_REGION` - S3 access for `s3://` descriptors
//! - `DEEPZOOM_S3_TIMEOUT_MS` - Bound on one S3 request
//! - `DEEPZOOM_LOG` - Log filter directives, overriding `--verbose`

use clap::{Args, Parser, Subcommand};

use crate::io::S3Settings;
use crate::tile::DEFAULT_MAX_CACHE_ENTRIES;
use crate::viewport::{DEFAULT_ANIMATION_DURATION_MS, DEFAULT_SPRING_STIFFNESS};

// =============================================================================
// Default Values
// =============================================================================

/// Default number of simultaneous tile jobs.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Default per-job deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default smallest fraction of the container the image may shrink to.
pub const DEFAULT_MIN_ZOOM_IMAGE_RATIO: f64 = 0.9;

/// Default largest number of element pixels per image pixel.
pub const DEFAULT_MAX_ZOOM_PIXEL_RATIO: f64 = 1.1;

/// Default fraction of the content kept on screen by constraints.
pub const DEFAULT_VISIBILITY_RATIO: f64 = 0.5;

/// Default level-selection threshold.
pub const DEFAULT_MIN_PIXEL_RATIO: f64 = 0.5;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

// =============================================================================
// Component Configuration
// =============================================================================

/// Job scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Maximum number of jobs in flight
    pub concurrency_limit: usize,

    /// Deadline after which a running job fails with a timeout
    pub timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency_limit == 0 {
            return Err("concurrency_limit must be greater than 0".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Tile cache settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheConfig {
    /// Soft capacity; pinned entries may push the cache above it
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Viewport animation and constraint settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportConfig {
    pub spring_stiffness: f64,
    pub animation_duration_ms: u64,
    pub min_zoom_image_ratio: f64,
    pub max_zoom_pixel_ratio: f64,
    pub visibility_ratio: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            spring_stiffness: DEFAULT_SPRING_STIFFNESS,
            animation_duration_ms: DEFAULT_ANIMATION_DURATION_MS,
            min_zoom_image_ratio: DEFAULT_MIN_ZOOM_IMAGE_RATIO,
            max_zoom_pixel_ratio: DEFAULT_MAX_ZOOM_PIXEL_RATIO,
            visibility_ratio: DEFAULT_VISIBILITY_RATIO,
        }
    }
}

impl ViewportConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.spring_stiffness.is_finite() || self.spring_stiffness < 0.0 {
            return Err("spring_stiffness must be a non-negative number".to_string());
        }
        if !(self.min_zoom_image_ratio > 0.0) {
            return Err("min_zoom_image_ratio must be greater than 0".to_string());
        }
        if !(self.max_zoom_pixel_ratio > 0.0) {
            return Err("max_zoom_pixel_ratio must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.visibility_ratio) {
            return Err("visibility_ratio must be between 0 and 1".to_string());
        }
        Ok(())
    }
}

/// Tile selection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorConfig {
    /// Element pixels a level pixel must cover for the level to be chosen
    pub min_pixel_ratio: f64,

    /// Fade-in duration of newly ready tiles; 0 shows them at once
    pub blend_time_ms: u64,

    /// Coarser levels offered as placeholders while the target level loads
    pub fallback_levels: u32,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_pixel_ratio: DEFAULT_MIN_PIXEL_RATIO,
            blend_time_ms: 0,
            fallback_levels: 1,
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_pixel_ratio > 0.0) || !self.min_pixel_ratio.is_finite() {
            return Err("min_pixel_ratio must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Everything a [`Viewer`](crate::viewer::Viewer) needs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewerConfig {
    pub scheduler: SchedulerConfig,
    pub cache: CacheConfig,
    pub viewport: ViewportConfig,
    pub selector: SelectorConfig,
}

impl ViewerConfig {
    /// Validate every section and return the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler.validate()?;
        self.cache.validate()?;
        self.viewport.validate()?;
        self.selector.validate()
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// deepzoom - Tile scheduling and caching for deep-zoom images.
///
/// Inspects DZI pyramids and simulates viewer sessions against local
/// directories, HTTP servers or S3 buckets.
#[derive(Parser, Debug, Clone)]
#[command(name = "deepzoom")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level) unless `DEEPZOOM_LOG` is set.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the level table of a DZI descriptor.
    Inspect(InspectArgs),

    /// Drive a scripted pan and zoom and report scheduler and cache activity.
    Simulate(SimulateArgs),
}

/// Where to read a descriptor from.
///
/// Local paths, `http(s)://` URLs and `s3://bucket/key` URLs are accepted.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Path or URL of the `.dzi` (XML or JSON) descriptor.
    pub descriptor: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "DEEPZOOM_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "DEEPZOOM_S3_REGION")]
    pub s3_region: String,

    /// Bound on a single S3 request in milliseconds (0 uses the SDK default).
    #[arg(long, env = "DEEPZOOM_S3_TIMEOUT_MS")]
    pub s3_timeout_ms: Option<u64>,
}

impl SourceArgs {
    pub fn s3_settings(&self) -> S3Settings {
        S3Settings::new(self.s3_endpoint.as_deref(), self.s3_region.as_str())
            .with_operation_timeout(self.s3_timeout_ms)
    }
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Number of frames to run.
    #[arg(long, default_value_t = 240, env = "DEEPZOOM_FRAMES")]
    pub frames: u32,

    /// Simulated time between frames.
    #[arg(long, default_value_t = 16, env = "DEEPZOOM_FRAME_MS")]
    pub frame_ms: u64,

    /// Container width in pixels.
    #[arg(long, default_value_t = 1280.0)]
    pub width: f64,

    /// Container height in pixels.
    #[arg(long, default_value_t = 800.0)]
    pub height: f64,

    /// Zoom factor applied at each step of the script.
    #[arg(long, default_value_t = 2.0)]
    pub zoom_step: f64,

    /// Log statistics every N frames.
    #[arg(long, default_value_t = 30)]
    pub report_every: u32,

    #[command(flatten)]
    pub viewer: ViewerArgs,
}

/// Flags mapping onto [`ViewerConfig`].
#[derive(Args, Debug, Clone)]
pub struct ViewerArgs {
    /// Maximum number of simultaneous tile jobs.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY_LIMIT, env = "DEEPZOOM_CONCURRENCY")]
    pub concurrency: usize,

    /// Per-job deadline in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, env = "DEEPZOOM_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Soft capacity of the decoded tile cache.
    #[arg(long, default_value_t = DEFAULT_MAX_CACHE_ENTRIES, env = "DEEPZOOM_CACHE_ENTRIES")]
    pub cache_entries: usize,

    /// Stiffness of the animation curve (0 = linear).
    #[arg(long, default_value_t = DEFAULT_SPRING_STIFFNESS, env = "DEEPZOOM_SPRING_STIFFNESS")]
    pub spring_stiffness: f64,

    /// Duration of pan and zoom animations in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ANIMATION_DURATION_MS, env = "DEEPZOOM_ANIMATION_MS")]
    pub animation_ms: u64,

    /// Smallest fraction of the container the image may shrink to.
    #[arg(long, default_value_t = DEFAULT_MIN_ZOOM_IMAGE_RATIO, env = "DEEPZOOM_MIN_ZOOM_IMAGE_RATIO")]
    pub min_zoom_image_ratio: f64,

    /// Largest number of element pixels per image pixel.
    #[arg(long, default_value_t = DEFAULT_MAX_ZOOM_PIXEL_RATIO, env = "DEEPZOOM_MAX_ZOOM_PIXEL_RATIO")]
    pub max_zoom_pixel_ratio: f64,

    /// Fraction of the image kept on screen while panning.
    #[arg(long, default_value_t = DEFAULT_VISIBILITY_RATIO, env = "DEEPZOOM_VISIBILITY_RATIO")]
    pub visibility_ratio: f64,

    /// Element pixels a level pixel must cover for the level to be chosen.
    #[arg(long, default_value_t = DEFAULT_MIN_PIXEL_RATIO, env = "DEEPZOOM_MIN_PIXEL_RATIO")]
    pub min_pixel_ratio: f64,

    /// Fade-in duration of newly loaded tiles in milliseconds.
    #[arg(long, default_value_t = 0, env = "DEEPZOOM_BLEND_MS")]
    pub blend_ms: u64,

    /// Coarser levels shown while the target level loads.
    #[arg(long, default_value_t = 1, env = "DEEPZOOM_FALLBACK_LEVELS")]
    pub fallback_levels: u32,
}

impl ViewerArgs {
    pub fn to_config(&self) -> ViewerConfig {
        ViewerConfig {
            scheduler: SchedulerConfig {
                concurrency_limit: self.concurrency,
                timeout_ms: self.timeout_ms,
            },
            cache: CacheConfig {
                max_entries: self.cache_entries,
            },
            viewport: ViewportConfig {
                spring_stiffness: self.spring_stiffness,
                animation_duration_ms: self.animation_ms,
                min_zoom_image_ratio: self.min_zoom_image_ratio,
                max_zoom_pixel_ratio: self.max_zoom_pixel_ratio,
                visibility_ratio: self.visibility_ratio,
            },
            selector: SelectorConfig {
                min_pixel_ratio: self.min_pixel_ratio,
                blend_time_ms: self.blend_ms,
                fallback_levels: self.fallback_levels,
            },
        }
    }
}

impl SimulateArgs {
    /// Validate the simulation settings and the viewer configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.frames == 0 {
            return Err("frames must be greater than 0".to_string());
        }
        if self.frame_ms == 0 {
            return Err("frame_ms must be greater than 0".to_string());
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err("container width and height must be positive".to_string());
        }
        if !(self.zoom_step > 0.0) {
            return Err("zoom_step must be greater than 0".to_string());
        }
        self.viewer.to_config().validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
