use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::histogram::{FingerprintError, Histogram};
use crate::pixels::{DecodeError, ImageId, PixelBuffer, PixelSource};

/// Reclaimable cache of image fingerprints and the decoded pixel buffers
/// beneath them.
///
/// Entries appear on first access and survive until [`invalidate`] removes
/// them for good; [`evict_all`] models memory pressure by dropping the cached
/// values while keeping the entries, so the next access rebuilds
/// transparently from a fresh pixel fetch.
///
/// Lock order is always the entry map first, briefly, then the per-image
/// slot. A build holds only its own slot lock, so two images fingerprint in
/// parallel while concurrent callers for the same image share one build.
///
/// [`invalidate`]: FingerprintCache::invalidate
/// [`evict_all`]: FingerprintCache::evict_all
pub struct FingerprintCache<S> {
    source: S,
    slots: Mutex<HashMap<ImageId, Arc<Slot>>>,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    histogram: Option<Arc<Histogram>>,
    pixels: Option<Arc<PixelBuffer>>,
}

impl<S: PixelSource> FingerprintCache<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached fingerprint for `id`, building it first if needed.
    ///
    /// A rebuild after eviction reuses the cached decode when one survived,
    /// and otherwise fetches pixels from the source again; either way the
    /// caller sees the same histogram a cold cache would produce.
    pub fn get_or_build(&self, id: ImageId) -> Result<Arc<Histogram>, FingerprintError> {
        let slot = self.slot(id);
        let mut state = lock(&slot.state);

        if let Some(histogram) = &state.histogram {
            log::debug!("fingerprint cache hit for image {id}");
            return Ok(histogram.clone());
        }

        let pixels = match &state.pixels {
            Some(pixels) => pixels.clone(),
            None => {
                let fetched = Arc::new(self.source.read(id)?);
                state.pixels = Some(fetched.clone());
                fetched
            }
        };

        let histogram = Arc::new(Histogram::build(&pixels)?);
        state.histogram = Some(histogram.clone());
        log::debug!(
            "built fingerprint for image {id} ({} pixels)",
            pixels.pixel_count()
        );
        Ok(histogram)
    }

    /// Return the decoded pixels for `id`, fetching them if needed.
    ///
    /// The lower cache level, exposed so a review UI can display both images
    /// of a pair without decoding twice.
    pub fn pixels(&self, id: ImageId) -> Result<Arc<PixelBuffer>, DecodeError> {
        let slot = self.slot(id);
        let mut state = lock(&slot.state);

        if let Some(pixels) = &state.pixels {
            return Ok(pixels.clone());
        }
        let fetched = Arc::new(self.source.read(id)?);
        state.pixels = Some(fetched.clone());
        Ok(fetched)
    }

    /// Permanently drop everything cached for `id`.
    ///
    /// The deletion workflow calls this whenever the underlying image is
    /// removed or modified, together with
    /// [`ResolutionSession::remove_image`](crate::session::ResolutionSession::remove_image).
    /// A stale fingerprint compared against a changed file is a caller bug.
    pub fn invalidate(&self, id: ImageId) {
        if lock(&self.slots).remove(&id).is_some() {
            log::debug!("invalidated cache entry for image {id}");
        }
    }

    /// Drop every cached histogram and pixel buffer, keeping the entries.
    ///
    /// Models memory pressure deterministically; subsequent accesses rebuild
    /// and are indistinguishable from a cold cache except for latency.
    pub fn evict_all(&self) {
        let slots = lock(&self.slots);
        for slot in slots.values() {
            let mut state = lock(&slot.state);
            state.histogram = None;
            state.pixels = None;
        }
        log::debug!("evicted {} cache entries", slots.len());
    }

    /// Number of entries ever touched and not yet invalidated.
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }

    fn slot(&self, id: ImageId) -> Arc<Slot> {
        lock(&self.slots).entry(id).or_default().clone()
    }
}

/// Locks never guard partially written values here, so a poisoned lock can
/// hand back its state unharmed.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::MemoryPixelSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    /// Wraps a source and counts how often pixels are actually fetched.
    struct CountingSource {
        inner: MemoryPixelSource,
        reads: AtomicUsize,
    }

    impl CountingSource {
        fn new(inner: MemoryPixelSource) -> Self {
            Self {
                inner,
                reads: AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl PixelSource for &CountingSource {
        fn read(&self, id: ImageId) -> Result<PixelBuffer, DecodeError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(id)
        }
    }

    fn source_with(images: &[(u64, [u8; 3])]) -> CountingSource {
        let mut inner = MemoryPixelSource::new();
        for &(id, rgb) in images {
            let data: Vec<u8> = (0..4).flat_map(|_| rgb).collect();
            inner.insert(ImageId(id), PixelBuffer::from_rgb(2, 2, &data).unwrap());
        }
        CountingSource::new(inner)
    }

    #[test]
    fn test_second_access_hits_the_cache() {
        let source = source_with(&[(1, [255, 0, 0])]);
        let cache = FingerprintCache::new(&source);

        let first = cache.get_or_build(ImageId(1)).unwrap();
        let second = cache.get_or_build(ImageId(1)).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.reads(), 1);
    }

    #[test]
    fn test_eviction_is_transparent() {
        let source = source_with(&[(1, [12, 34, 56])]);
        let cache = FingerprintCache::new(&source);

        let before = cache.get_or_build(ImageId(1)).unwrap();
        cache.evict_all();
        let after = cache.get_or_build(ImageId(1)).unwrap();

        assert_eq!(before, after);
        // Eviction dropped the decode as well, so the rebuild re-fetched.
        assert_eq!(source.reads(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_drops_the_entry() {
        let source = source_with(&[(1, [1, 2, 3])]);
        let cache = FingerprintCache::new(&source);

        cache.get_or_build(ImageId(1)).unwrap();
        cache.invalidate(ImageId(1));

        assert!(cache.is_empty());
        cache.get_or_build(ImageId(1)).unwrap();
        assert_eq!(source.reads(), 2);
    }

    #[test]
    fn test_fingerprint_reuses_cached_pixels() {
        let source = source_with(&[(1, [9, 9, 9])]);
        let cache = FingerprintCache::new(&source);

        cache.pixels(ImageId(1)).unwrap();
        cache.get_or_build(ImageId(1)).unwrap();

        assert_eq!(source.reads(), 1);
    }

    #[test]
    fn test_missing_image_reports_no_pixel_source() {
        let source = source_with(&[]);
        let cache = FingerprintCache::new(&source);

        let err = cache.get_or_build(ImageId(42)).unwrap_err();
        assert!(matches!(
            err,
            FingerprintError::NoPixelSource(DecodeError::UnknownImage(ImageId(42)))
        ));

        // The failed entry holds nothing; a later attempt fetches again.
        let _ = cache.get_or_build(ImageId(42));
        assert_eq!(source.reads(), 2);
    }

    #[test]
    fn test_concurrent_same_id_builds_once() {
        let source = source_with(&[(1, [200, 100, 50])]);
        let cache = Arc::new(FingerprintCache::new(&source));
        let barrier = Arc::new(Barrier::new(8));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                let barrier = barrier.clone();
                scope.spawn(move || {
                    barrier.wait();
                    cache.get_or_build(ImageId(1)).unwrap();
                });
            }
        });

        assert_eq!(source.reads(), 1);
    }

    #[test]
    fn test_distinct_ids_cache_independently() {
        let source = source_with(&[(1, [255, 0, 0]), (2, [0, 0, 255])]);
        let cache = FingerprintCache::new(&source);

        let a = cache.get_or_build(ImageId(1)).unwrap();
        let b = cache.get_or_build(ImageId(2)).unwrap();

        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
        assert_eq!(source.reads(), 2);
    }
}
