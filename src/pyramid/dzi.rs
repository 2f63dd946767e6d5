//! Deep Zoom Image (DZI) tile source.
//!
//! A DZI pyramid is a descriptor (`image.dzi` XML, or its JSON equivalent)
//! next to an `image_files/` directory holding one subdirectory per level:
//!
//! ```text
//! image.dzi
//! image_files/
//!   0/0_0.jpg
//!   ...
//!   13/0_0.jpg  13/1_0.jpg  ...
//! ```
//!
//! # Descriptor
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
//!        TileSize="254"
//!        Overlap="1"
//!        Format="jpg">
//!   <Size Width="46920" Height="33600" />
//! </Image>
//! ```
//!
//! Sparse images list the regions that actually have tiles in an optional
//! `<DisplayRects>` element; tiles outside every rect are treated as absent.

use std::collections::HashMap;

use serde::Deserialize;

use super::{max_level_for, TileSize, TileSource};
use crate::error::SourceError;

/// Image formats the tile decoder understands.
const SUPPORTED_FORMATS: &[&str] = &["jpg", "jpeg", "png"];

/// Region of a sparse image that has tiles, over a range of levels.
///
/// Coordinates are full-resolution image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_level: u32,
    pub max_level: u32,
}

impl DisplayRect {
    /// Exclusive right edge. Computed in `u64`, so it cannot overflow.
    pub fn right(&self) -> u64 {
        u64::from(self.x) + u64::from(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        u64::from(self.y) + u64::from(self.height)
    }

    fn validate(&self) -> Result<(), SourceError> {
        if self.min_level > self.max_level {
            return Err(SourceError::InvalidDescriptor(format!(
                "DisplayRect MinLevel {} is above MaxLevel {}",
                self.min_level, self.max_level
            )));
        }
        if self.right() > u64::from(u32::MAX) || self.bottom() > u64::from(u32::MAX) {
            return Err(SourceError::InvalidDescriptor(format!(
                "DisplayRect at ({}, {}) sized {}x{} is out of range",
                self.x, self.y, self.width, self.height
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Descriptor
// =============================================================================

/// Parsed DZI descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub overlap: u32,
    pub format: String,

    /// Tiles base URL given by JSON descriptors (`Url`), if any
    pub url: Option<String>,

    pub display_rects: Vec<DisplayRect>,
}

impl DziDescriptor {
    /// Parse an XML or JSON descriptor, chosen by the first character.
    pub fn parse(text: &str) -> Result<Self, SourceError> {
        if text.trim_start().starts_with('{') {
            Self::parse_json(text)
        } else {
            Self::parse_xml(text)
        }
    }

    pub fn parse_xml(text: &str) -> Result<Self, SourceError> {
        let doc = roxmltree::Document::parse(text)
            .map_err(|e| SourceError::InvalidDescriptor(e.to_string()))?;
        let image = doc.root_element();
        if image.tag_name().name() != "Image" {
            return Err(SourceError::UnsupportedFormat {
                reason: format!("root element is <{}>, not <Image>", image.tag_name().name()),
            });
        }

        let size = image
            .children()
            .find(|n| n.tag_name().name() == "Size")
            .ok_or(SourceError::MissingAttribute("Size"))?;

        let mut display_rects = Vec::new();
        for node in image.descendants().filter(|n| n.tag_name().name() == "DisplayRect") {
            let rect = node
                .children()
                .find(|n| n.tag_name().name() == "Rect")
                .ok_or(SourceError::MissingAttribute("Rect"))?;
            display_rects.push(DisplayRect {
                x: xml_number(&rect, "X")?,
                y: xml_number(&rect, "Y")?,
                width: xml_number(&rect, "Width")?,
                height: xml_number(&rect, "Height")?,
                min_level: xml_number(&node, "MinLevel")?,
                max_level: xml_number(&node, "MaxLevel")?,
            });
        }

        let descriptor = Self {
            width: xml_number(&size, "Width")?,
            height: xml_number(&size, "Height")?,
            tile_size: xml_number(&image, "TileSize")?,
            overlap: xml_number(&image, "Overlap")?,
            format: image
                .attribute("Format")
                .ok_or(SourceError::MissingAttribute("Format"))?
                .to_string(),
            url: image.attribute("Url").map(str::to_string),
            display_rects,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn parse_json(text: &str) -> Result<Self, SourceError> {
        let root: JsonRoot = serde_json::from_str(text)
            .map_err(|e| SourceError::InvalidDescriptor(e.to_string()))?;
        let image = root.image;

        let descriptor = Self {
            width: image.size.width.to_u32("Width")?,
            height: image.size.height.to_u32("Height")?,
            tile_size: image.tile_size.to_u32("TileSize")?,
            overlap: image.overlap.to_u32("Overlap")?,
            format: image.format,
            url: image.url,
            display_rects: Vec::new(),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), SourceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SourceError::InvalidDescriptor(format!(
                "image size {}x{} is empty",
                self.width, self.height
            )));
        }
        if self.tile_size == 0 {
            return Err(SourceError::InvalidDescriptor(
                "TileSize must be greater than 0".to_string(),
            ));
        }
        if !SUPPORTED_FORMATS.contains(&self.format.to_ascii_lowercase().as_str()) {
            return Err(SourceError::UnsupportedFormat {
                reason: format!("tile format '{}'", self.format),
            });
        }
        for rect in &self.display_rects {
            rect.validate()?;
        }
        Ok(())
    }

    /// Render back to DZI XML.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{}"
       Overlap="{}"
       Format="{}">
  <Size Width="{}" Height="{}" />
</Image>"#,
            self.tile_size, self.overlap, self.format, self.width, self.height
        )
    }
}

fn xml_number(node: &roxmltree::Node<'_, '_>, name: &'static str) -> Result<u32, SourceError> {
    node.attribute(name)
        .and_then(|v| v.trim().parse().ok())
        .ok_or(SourceError::MissingAttribute(name))
}

#[derive(Deserialize)]
struct JsonRoot {
    #[serde(rename = "Image")]
    image: JsonImage,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonImage {
    #[serde(default)]
    url: Option<String>,
    format: String,
    overlap: JsonNumber,
    tile_size: JsonNumber,
    size: JsonSize,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JsonSize {
    width: JsonNumber,
    height: JsonNumber,
}

/// DZI JSON writes numbers either as numbers or as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonNumber {
    Number(u64),
    Text(String),
}

impl JsonNumber {
    fn to_u32(&self, name: &'static str) -> Result<u32, SourceError> {
        let value = match self {
            JsonNumber::Number(n) => u32::try_from(*n).ok(),
            JsonNumber::Text(s) => s.trim().parse().ok(),
        };
        value.ok_or(SourceError::MissingAttribute(name))
    }
}

// =============================================================================
// Tile source
// =============================================================================

/// [`TileSource`] over a DZI pyramid.
#[derive(Debug, Clone)]
pub struct DziTileSource {
    descriptor: DziDescriptor,
    tiles_url: String,
    max_level: u32,
    level_rects: HashMap<u32, Vec<DisplayRect>>,
}

impl DziTileSource {
    /// Build a source whose tiles live under `tiles_url` (ending in `/`).
    pub fn new(descriptor: DziDescriptor, tiles_url: impl Into<String>) -> Self {
        let max_level = max_level_for(descriptor.width, descriptor.height);

        let mut level_rects: HashMap<u32, Vec<DisplayRect>> = HashMap::new();
        // Levels past the top of the pyramid have no tiles to restrict
        for rect in &descriptor.display_rects {
            for level in rect.min_level..=rect.max_level.min(max_level) {
                level_rects.entry(level).or_default().push(*rect);
            }
        }

        Self {
            descriptor,
            tiles_url: tiles_url.into(),
            max_level,
            level_rects,
        }
    }

    /// Parse the descriptor fetched from `descriptor_url` and derive the
    /// tiles location from it (`dir/image.dzi` → `dir/image_files/`).
    pub fn from_descriptor(descriptor_url: &str, text: &str) -> Result<Self, SourceError> {
        let descriptor = DziDescriptor::parse(text)?;
        let tiles_url = match &descriptor.url {
            Some(url) => url.clone(),
            None => tiles_url_for(descriptor_url),
        };
        Ok(Self::new(descriptor, tiles_url))
    }

    pub fn descriptor(&self) -> &DziDescriptor {
        &self.descriptor
    }

    pub fn tiles_url(&self) -> &str {
        &self.tiles_url
    }
}

/// Tiles directory for a descriptor path: extension stripped, `_files/` added.
pub fn tiles_url_for(descriptor_url: &str) -> String {
    let (dir, file) = match descriptor_url.rfind('/') {
        Some(i) => descriptor_url.split_at(i + 1),
        None => ("", descriptor_url),
    };
    let stem = match file.rfind('.') {
        Some(i) => &file[..i],
        None => file,
    };
    format!("{dir}{stem}_files/")
}

impl TileSource for DziTileSource {
    fn width(&self) -> u32 {
        self.descriptor.width
    }

    fn height(&self) -> u32 {
        self.descriptor.height
    }

    fn min_level(&self) -> u32 {
        0
    }

    fn max_level(&self) -> u32 {
        self.max_level
    }

    fn tile_size(&self, _level: u32) -> TileSize {
        TileSize {
            width: self.descriptor.tile_size,
            height: self.descriptor.tile_size,
            overlap: self.descriptor.overlap,
        }
    }

    fn tile_url(&self, level: u32, x: u32, y: u32) -> String {
        format!(
            "{}{}/{}_{}.{}",
            self.tiles_url, level, x, y, self.descriptor.format
        )
    }

    fn tile_exists(&self, level: u32, x: u32, y: u32) -> bool {
        let (cols, rows) = self.num_tiles(level);
        if level > self.max_level || x >= cols || y >= rows {
            return false;
        }

        let Some(rects) = self.level_rects.get(&level) else {
            return true;
        };

        let scale = self.level_scale(level);
        let tile = self.descriptor.tile_size as f64;
        rects.iter().any(|rect| {
            let x_min = (rect.x as f64 * scale / tile).floor();
            let y_min = (rect.y as f64 * scale / tile).floor();
            let x_max = (rect.right() as f64 * scale / tile).ceil();
            let y_max = (rect.bottom() as f64 * scale / tile).ceil();

            let (x, y) = (x as f64, y as f64);
            x_min <= x && x < x_max && y_min <= y && y < y_max
        })
    }
}
