//! Perceptual near-duplicate detection core for personal media libraries.
//!
//! Images are fingerprinted as per-channel color histograms, fingerprint
//! pairs are scored under a selectable [`SimilarityStrategy`], and the
//! resulting candidate pairs are walked through a [`ResolutionSession`] where
//! a human decides which copy to keep. Pixel data comes from a caller-supplied
//! [`PixelSource`]; decoded buffers and fingerprints live in a reclaimable
//! [`FingerprintCache`] that rebuilds transparently after eviction.

pub mod cache;
pub mod duplicate;
pub mod histogram;
pub mod pixels;
pub mod session;
pub mod similarity;

pub use cache::FingerprintCache;
pub use duplicate::{CandidatePair, DuplicateDetector, DuplicateScan, ScanFailure};
pub use histogram::{Channel, FingerprintError, Histogram};
pub use pixels::{
    DecodeError, FilePixelSource, ImageId, MemoryPixelSource, PixelBuffer, PixelSource,
};
pub use session::ResolutionSession;
pub use similarity::SimilarityStrategy;
