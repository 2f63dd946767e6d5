//! Tile decoder.
//!
//! Fetched tile payloads (JPEG or PNG) are decoded into RGBA8 pixel buffers
//! before they enter the cache. The cache only ever stores decoded tiles.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::ImageReader;

use crate::error::TileError;

/// Shared handle to a decoded tile, as stored in the cache.
pub type TileResource = Arc<DecodedTile>;

/// A decoded tile: RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl DecodedTile {
    /// Build a tile filled with one colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels: Vec<u8> = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels: Bytes::from(pixels),
        }
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Decodes fetched tile payloads.
///
/// The format is guessed from the payload's magic bytes, so a DZI source
/// declaring `Format="jpg"` may still serve PNG tiles at some levels.
#[derive(Debug, Clone, Default)]
pub struct TileDecoder {}

impl TileDecoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Decode a payload fetched from `address`.
    ///
    /// # Errors
    ///
    /// Returns [`TileError::DecodeFailure`] if the format cannot be detected
    /// or the image data is corrupt.
    pub fn decode(&self, address: &str, payload: &[u8]) -> Result<DecodedTile, TileError> {
        let decode_failure = |message: String| TileError::DecodeFailure {
            address: address.to_string(),
            message,
        };

        let reader = ImageReader::new(Cursor::new(payload))
            .with_guessed_format()
            .map_err(|e| decode_failure(e.to_string()))?;

        if reader.format().is_none() {
            return Err(decode_failure("unrecognized image format".to_string()));
        }

        let img = reader.decode().map_err(|e| decode_failure(e.to_string()))?;
        let rgba = img.to_rgba8();

        Ok(DecodedTile {
            width: rgba.width(),
            height: rgba.height(),
            pixels: Bytes::from(rgba.into_raw()),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
