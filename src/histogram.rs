use thiserror::Error;

use crate::pixels::{DecodeError, PixelBuffer};

/// Bins per channel, one for every 8-bit sample value.
pub const BINS: usize = 256;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("image has no pixels")]
    EmptyImage,

    #[error("no pixel source for image: {0}")]
    NoPixelSource(#[from] DecodeError),
}

/// Color channels of a fingerprint, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Alpha = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Alpha, Channel::Red, Channel::Green, Channel::Blue];
}

/// Per-channel frequency distribution of a decoded image.
///
/// Counters are raw counts: every channel's 256 bins sum to the pixel count
/// of the source image. Scoring strategies that need probabilities divide by
/// [`Histogram::pixel_count`] at comparison time. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: [[u64; BINS]; 4],
    pixel_count: u64,
}

impl Histogram {
    /// Fingerprint a decoded image in one pass over its pixels.
    pub fn build(pixels: &PixelBuffer) -> Result<Self, FingerprintError> {
        if pixels.pixel_count() == 0 {
            return Err(FingerprintError::EmptyImage);
        }

        let mut counts = [[0u64; BINS]; 4];
        for [r, g, b, a] in pixels.pixels() {
            counts[Channel::Alpha as usize][a as usize] += 1;
            counts[Channel::Red as usize][r as usize] += 1;
            counts[Channel::Green as usize][g as usize] += 1;
            counts[Channel::Blue as usize][b as usize] += 1;
        }

        Ok(Self {
            counts,
            pixel_count: pixels.pixel_count(),
        })
    }

    pub fn pixel_count(&self) -> u64 {
        self.pixel_count
    }

    pub fn channel(&self, channel: Channel) -> &[u64; BINS] {
        &self.counts[channel as usize]
    }
}
