use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use image::ImageReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable identity of an image in the library.
///
/// Ids are assigned by the owning application together with the file path or
/// URL they stand for; this crate only ever references images by id and never
/// mints or mutates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no image registered for id {0}")]
    UnknownImage(ImageId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    Malformed { expected: usize, actual: usize },

    #[error("pixel source error: {0}")]
    Source(String),
}

/// A decoded raster: width, height and tightly packed 8-bit RGBA samples.
///
/// Decoders that only produce RGB get an opaque alpha filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap an interleaved RGBA buffer, 4 bytes per pixel.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, DecodeError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(DecodeError::Malformed {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Wrap an interleaved RGB buffer, expanding every pixel to opaque RGBA.
    pub fn from_rgb(width: u32, height: u32, data: &[u8]) -> Result<Self, DecodeError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(DecodeError::Malformed {
                expected,
                actual: data.len(),
            });
        }
        let mut rgba = Vec::with_capacity(expected / 3 * 4);
        for px in data.chunks_exact(3) {
            rgba.extend_from_slice(px);
            rgba.push(u8::MAX);
        }
        Ok(Self {
            width,
            height,
            data: rgba,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Iterate pixels as `[r, g, b, a]` samples in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = [u8; 4]> + '_ {
        self.data
            .chunks_exact(4)
            .map(|px| [px[0], px[1], px[2], px[3]])
    }
}

impl From<&image::DynamicImage> for PixelBuffer {
    fn from(img: &image::DynamicImage) -> Self {
        let rgba = img.to_rgba8();
        Self {
            width: rgba.width(),
            height: rgba.height(),
            data: rgba.into_raw(),
        }
    }
}

/// Supplier of decoded pixel data, keyed by image id.
///
/// Implementations are expected to be shared across worker threads; a scan
/// may fetch several images concurrently.
pub trait PixelSource: Send + Sync {
    fn read(&self, id: ImageId) -> Result<PixelBuffer, DecodeError>;
}

/// Pixel source over buffers registered up front.
///
/// Suits callers that decode elsewhere, and deterministic tests.
#[derive(Debug, Default)]
pub struct MemoryPixelSource {
    images: HashMap<ImageId, PixelBuffer>,
}

impl MemoryPixelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ImageId, pixels: PixelBuffer) {
        self.images.insert(id, pixels);
    }
}

impl PixelSource for MemoryPixelSource {
    fn read(&self, id: ImageId) -> Result<PixelBuffer, DecodeError> {
        self.images
            .get(&id)
            .cloned()
            .ok_or(DecodeError::UnknownImage(id))
    }
}

/// Pixel source that decodes registered files on demand.
#[derive(Debug, Default)]
pub struct FilePixelSource {
    paths: HashMap<ImageId, PathBuf>,
}

impl FilePixelSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ImageId, path: impl Into<PathBuf>) {
        self.paths.insert(id, path.into());
    }
}

impl PixelSource for FilePixelSource {
    fn read(&self, id: ImageId) -> Result<PixelBuffer, DecodeError> {
        let path = self.paths.get(&id).ok_or(DecodeError::UnknownImage(id))?;
        let img = ImageReader::open(path)?.decode()?;
        Ok((&img).into())
    }
}
