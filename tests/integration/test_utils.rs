//! Test utilities for integration tests.
//!
//! This module provides mock tile loaders and helpers for generating
//! synthetic tiles and on-disk DZI pyramids.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use deepzoom::error::TileError;
use deepzoom::io::TileLoader;
use deepzoom::pyramid::{DziDescriptor, DziTileSource, TileSource};
use deepzoom::viewer::{Frame, Viewer};

// =============================================================================
// Synthetic Tiles
// =============================================================================

/// Encode a solid-colour JPEG.
pub fn jpeg_tile(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 90);
    encoder.encode_image(&img).unwrap();
    buf
}

/// Check if data is a valid JPEG (starts with SOI, ends with EOI).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
}

/// DZI descriptor for a square-tiled image without overlap.
pub fn descriptor(width: u32, height: u32, tile_size: u32) -> DziDescriptor {
    DziDescriptor {
        width,
        height,
        tile_size,
        overlap: 0,
        format: "jpg".to_string(),
        url: None,
        display_rects: Vec::new(),
    }
}

/// In-memory tile source whose tiles live under `{name}_files/`.
pub fn dzi_source(name: &str, width: u32, height: u32, tile_size: u32) -> Arc<dyn TileSource> {
    Arc::new(DziTileSource::new(
        descriptor(width, height, tile_size),
        format!("{name}_files/"),
    ))
}

/// Write a complete pyramid (descriptor plus every tile) under `dir`.
///
/// Returns the descriptor file name.
pub fn write_pyramid(dir: &Path, name: &str, desc: &DziDescriptor) -> String {
    let file_name = format!("{name}.dzi");
    std::fs::write(dir.join(&file_name), desc.to_xml()).unwrap();

    let source = DziTileSource::new(desc.clone(), format!("{name}_files/"));
    for level in source.min_level()..=source.max_level() {
        let (cols, rows) = source.num_tiles(level);
        let level_dir = dir.join(format!("{name}_files/{level}"));
        std::fs::create_dir_all(&level_dir).unwrap();
        for y in 0..rows {
            for x in 0..cols {
                let bounds = source.tile_bounds(level, x, y);
                let scale = source.level_scale(level);
                let w = (bounds.width * scale).ceil().max(1.0) as u32;
                let h = (bounds.height * scale).ceil().max(1.0) as u32;
                let shade = (level * 20 % 256) as u8;
                std::fs::write(
                    level_dir.join(format!("{x}_{y}.{}", desc.format)),
                    jpeg_tile(w, h, [shade, 128, 255 - shade]),
                )
                .unwrap();
            }
        }
    }
    file_name
}

// =============================================================================
// Mock Loaders
// =============================================================================

/// Serves a small JPEG for every address and counts requests per address.
///
/// Addresses containing `fail` are rejected.
#[derive(Clone, Default)]
pub struct CountingLoader {
    requests: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn count(&self, address: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of requests any single address received.
    pub fn max_per_address(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl TileLoader for CountingLoader {
    async fn load(&self, address: &str, _post_data: Option<&str>) -> Result<Bytes, TileError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .requests
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_insert(0) += 1;

        if address.contains("fail") {
            return Err(TileError::NetworkFailure {
                address: address.to_string(),
                message: "rejected".to_string(),
            });
        }
        Ok(Bytes::from(jpeg_tile(8, 8, [200, 100, 50])))
    }

    fn identifier(&self) -> &str {
        "counting"
    }
}

/// Loader whose requests block until the test releases permits.
///
/// Tracks how many requests are inside `load` at once.
#[derive(Clone)]
pub struct GatedLoader {
    gate: Arc<Semaphore>,
    started: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl GatedLoader {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let `n` blocked requests finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Most requests ever inside `load` at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count even when the request is aborted.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TileLoader for GatedLoader {
    async fn load(&self, address: &str, _post_data: Option<&str>) -> Result<Bytes, TileError> {
        self.started.lock().unwrap().push(address.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(Bytes::from(jpeg_tile(8, 8, [10, 20, 30])))
    }

    fn identifier(&self) -> &str {
        "gated"
    }
}

// =============================================================================
// Driving a Viewer
// =============================================================================

/// Tick every `step` ms until nothing is in flight and the view settled.
///
/// Returns the last frame and the time it was produced at.
pub async fn settle(viewer: &mut Viewer, mut now: u64, step: u64) -> (Frame, u64) {
    loop {
        let frame = viewer.tick(now);
        if viewer.scheduler().is_idle() && !frame.animating {
            return (frame, now);
        }
        viewer.wait_for_activity().await;
        now += step;
    }
}
