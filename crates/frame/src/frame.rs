//! Immutable frame buffers.

use std::fmt;
use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use vizcast_common::error::{VizcastError, VizcastResult};

/// Pixel layout of a [`Frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Packed 8-bit RGBA, 4 bytes per pixel.
    Rgba8,
    /// Planar YUV 4:2:0: full-size Y, then quarter-size U and V.
    I420,
}

impl PixelFormat {
    /// Bytes needed for a `width` x `height` image in this format.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgba8 => pixels * 4,
            PixelFormat::I420 => pixels + 2 * (pixels / 4),
        }
    }
}

/// An immutable 2D pixel buffer.
///
/// Cloning a frame shares the pixel data; nothing can mutate it after
/// construction, so frames can be handed to several sinks at once.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Arc<[u8]>,
}

impl Frame {
    /// Wrap `data` as a frame, checking its length against the format.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: impl Into<Arc<[u8]>>,
    ) -> VizcastResult<Self> {
        if width == 0 || height == 0 {
            return Err(VizcastError::frame(format!(
                "Invalid frame size {width}x{height}"
            )));
        }
        let data = data.into();
        let expected = format.buffer_len(width, height);
        if data.len() != expected {
            return Err(VizcastError::frame(format!(
                "{format:?} frame {width}x{height} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Packed RGBA frame.
    pub fn from_rgba(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> VizcastResult<Self> {
        Self::new(width, height, PixelFormat::Rgba8, data)
    }

    /// RGBA frame with every pixel set to `rgba`.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> VizcastResult<Self> {
        let pixels = width as usize * height as usize;
        let data: Vec<u8> = rgba.iter().copied().cycle().take(pixels * 4).collect();
        Self::from_rgba(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGBA value at `(x, y)`, or `None` out of bounds or for non-RGBA frames.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format != PixelFormat::Rgba8 || x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ])
    }

    /// Copy into an `image` buffer for processing.
    pub fn to_rgba_image(&self) -> VizcastResult<RgbaImage> {
        self.require_rgba("to_rgba_image")?;
        RgbaImage::from_raw(self.width, self.height, self.data.to_vec())
            .ok_or_else(|| VizcastError::frame("RGBA buffer does not match frame size"))
    }

    /// Take ownership of an `image` buffer.
    pub fn from_rgba_image(image: RgbaImage) -> VizcastResult<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgba(width, height, image.into_raw())
    }

    /// Bilinear resize. Returns a cheap clone when the size already matches.
    pub fn resized(&self, width: u32, height: u32) -> VizcastResult<Self> {
        self.require_rgba("resized")?;
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(VizcastError::frame(format!(
                "Cannot resize to {width}x{height}"
            )));
        }
        let image = self.to_rgba_image()?;
        let scaled = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Self::from_rgba_image(scaled)
    }

    fn require_rgba(&self, op: &str) -> VizcastResult<()> {
        if self.format != PixelFormat::Rgba8 {
            return Err(VizcastError::frame(format!(
                "{op} requires an RGBA frame, got {:?}",
                self.format
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}
