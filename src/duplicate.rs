use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::FingerprintCache;
use crate::histogram::{FingerprintError, Histogram};
use crate::pixels::{ImageId, PixelSource};
use crate::similarity::SimilarityStrategy;

/// An unordered pair of distinct images judged similar enough for human
/// review.
///
/// Orientation is normalized to the smaller id first, so `(a, b)` and
/// `(b, a)` compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    first: ImageId,
    second: ImageId,
    score: f64,
}

impl CandidatePair {
    pub fn new(a: ImageId, b: ImageId, score: f64) -> Self {
        assert_ne!(a, b, "a candidate pair needs two distinct images");
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first,
            second,
            score,
        }
    }

    pub fn first(&self) -> ImageId {
        self.first
    }

    pub fn second(&self) -> ImageId {
        self.second
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.first == id || self.second == id
    }

    /// The member of the pair that is not `id`, when `id` is a member.
    pub fn other(&self, id: ImageId) -> Option<ImageId> {
        if self.first == id {
            Some(self.second)
        } else if self.second == id {
            Some(self.first)
        } else {
            None
        }
    }
}

/// An image that could not be fingerprinted during a scan.
#[derive(Debug)]
pub struct ScanFailure {
    pub id: ImageId,
    pub error: FingerprintError,
}

/// Outcome of scanning a working set: candidate pairs in generation order,
/// plus the images whose fingerprints failed. A failure skips that image's
/// pairs but never the scan.
#[derive(Debug, Default)]
pub struct DuplicateScan {
    pub pairs: Vec<CandidatePair>,
    pub failures: Vec<ScanFailure>,
}

/// Pairwise near-duplicate scanner over a bounded working set, typically the
/// user's current selection rather than the whole library.
pub struct DuplicateDetector {
    strategy: SimilarityStrategy,
    threshold: f64,
}

impl DuplicateDetector {
    pub fn new(strategy: SimilarityStrategy, threshold: f64) -> Self {
        Self {
            strategy,
            threshold,
        }
    }

    /// Score every unordered pair of the given ids and collect the matches.
    ///
    /// Ids where `exclude` holds are dropped before anything is fetched;
    /// every pair touching one would be skipped anyway. Emission order is
    /// fixed by the input order (first member ascending, then second), so
    /// repeated scans over the same working set produce the same list.
    pub fn scan<S, F>(
        &self,
        cache: &FingerprintCache<S>,
        ids: &[ImageId],
        exclude: F,
    ) -> DuplicateScan
    where
        S: PixelSource,
        F: Fn(ImageId) -> bool,
    {
        let working: Vec<ImageId> = ids.iter().copied().filter(|&id| !exclude(id)).collect();

        // Fingerprint phase: distinct ids build in parallel through the
        // cache. The indexed collect keeps results in input order.
        let resolved: Vec<(ImageId, Result<Arc<Histogram>, FingerprintError>)> = working
            .par_iter()
            .map(|&id| (id, cache.get_or_build(id)))
            .collect();

        let mut fingerprints: Vec<(ImageId, Arc<Histogram>)> = Vec::with_capacity(resolved.len());
        let mut failures = Vec::new();
        for (id, result) in resolved {
            match result {
                Ok(histogram) => fingerprints.push((id, histogram)),
                Err(error) => {
                    log::warn!("skipping image {id} in duplicate scan: {error}");
                    failures.push(ScanFailure { id, error });
                }
            }
        }

        // Pairwise phase over the survivors, i < j by position. O(n^2) is
        // accepted for a bounded selection.
        let n = fingerprints.len();
        let fingerprints = &fingerprints;
        let pairs: Vec<CandidatePair> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                (i + 1..n).filter_map(move |j| {
                    let (id_a, histogram_a) = &fingerprints[i];
                    let (id_b, histogram_b) = &fingerprints[j];
                    let score = self.strategy.score(histogram_a, histogram_b);
                    if self.strategy.is_match(score, self.threshold) {
                        Some(CandidatePair::new(*id_a, *id_b, score))
                    } else {
                        None
                    }
                })
            })
            .collect();

        if !pairs.is_empty() {
            log::debug!(
                "duplicate scan over {} images found {} candidate pair(s)",
                working.len(),
                pairs.len()
            );
        }

        DuplicateScan { pairs, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::{MemoryPixelSource, PixelBuffer};

    fn solid(rgb: [u8; 3]) -> PixelBuffer {
        let data: Vec<u8> = (0..16).flat_map(|_| rgb).collect();
        PixelBuffer::from_rgb(4, 4, &data).unwrap()
    }

    /// Images 1 and 2 are identical red; 3 is blue.
    fn red_red_blue() -> FingerprintCache<MemoryPixelSource> {
        let mut source = MemoryPixelSource::new();
        source.insert(ImageId(1), solid([255, 0, 0]));
        source.insert(ImageId(2), solid([255, 0, 0]));
        source.insert(ImageId(3), solid([0, 0, 255]));
        FingerprintCache::new(source)
    }

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(SimilarityStrategy::L1, 0.9)
    }

    #[test]
    fn test_finds_the_similar_pair() {
        let cache = red_red_blue();
        let ids = [ImageId(1), ImageId(2), ImageId(3)];

        let scan = detector().scan(&cache, &ids, |_| false);

        assert_eq!(scan.pairs.len(), 1);
        assert_eq!(scan.pairs[0].first(), ImageId(1));
        assert_eq!(scan.pairs[0].second(), ImageId(2));
        assert_eq!(scan.pairs[0].score(), 1.0);
        assert!(scan.failures.is_empty());
    }

    #[test]
    fn test_no_self_pairs_and_no_repeated_orientations() {
        let cache = red_red_blue();
        let ids = [ImageId(1), ImageId(2), ImageId(3)];

        // A threshold of zero accepts every pair under L1.
        let scan = DuplicateDetector::new(SimilarityStrategy::L1, 0.0).scan(&cache, &ids, |_| false);

        let expected = [(1, 2), (1, 3), (2, 3)];
        assert_eq!(scan.pairs.len(), expected.len());
        for (pair, (a, b)) in scan.pairs.iter().zip(expected) {
            assert_eq!((pair.first(), pair.second()), (ImageId(a), ImageId(b)));
            assert!(pair.first() != pair.second());
        }
    }

    #[test]
    fn test_emission_order_follows_input_order() {
        let cache = red_red_blue();
        // Working sets are scanned in the order given, not by id.
        let ids = [ImageId(3), ImageId(1), ImageId(2)];

        let scan = DuplicateDetector::new(SimilarityStrategy::L1, 0.0).scan(&cache, &ids, |_| false);

        let emitted: Vec<(ImageId, ImageId)> = scan
            .pairs
            .iter()
            .map(|p| (p.first(), p.second()))
            .collect();
        assert_eq!(
            emitted,
            vec![
                (ImageId(1), ImageId(3)),
                (ImageId(2), ImageId(3)),
                (ImageId(1), ImageId(2)),
            ]
        );
    }

    #[test]
    fn test_excluded_ids_produce_no_pairs() {
        let cache = red_red_blue();
        let ids = [ImageId(1), ImageId(2)];

        // Both flagged (say, animated formats): nothing to scan, however
        // similar the images are.
        let scan = detector().scan(&cache, &ids, |_| true);

        assert!(scan.pairs.is_empty());
        assert!(scan.failures.is_empty());
        // Excluded ids are never fetched.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failures_do_not_abort_the_scan() {
        let cache = red_red_blue();
        // Image 9 is not registered with the source.
        let ids = [ImageId(1), ImageId(9), ImageId(2)];

        let scan = detector().scan(&cache, &ids, |_| false);

        assert_eq!(scan.pairs.len(), 1);
        assert_eq!(scan.pairs[0].first(), ImageId(1));
        assert_eq!(scan.pairs[0].second(), ImageId(2));
        assert_eq!(scan.failures.len(), 1);
        assert_eq!(scan.failures[0].id, ImageId(9));
        assert!(matches!(
            scan.failures[0].error,
            FingerprintError::NoPixelSource(_)
        ));
    }

    #[test]
    fn test_pair_orientation_is_normalized() {
        let pair = CandidatePair::new(ImageId(5), ImageId(2), 0.7);
        assert_eq!(pair.first(), ImageId(2));
        assert_eq!(pair.second(), ImageId(5));
        assert_eq!(pair, CandidatePair::new(ImageId(2), ImageId(5), 0.7));
        assert_eq!(pair.other(ImageId(2)), Some(ImageId(5)));
        assert_eq!(pair.other(ImageId(9)), None);
    }

    #[test]
    fn test_pair_serializes_for_the_review_ui() {
        let pair = CandidatePair::new(ImageId(1), ImageId(2), 0.5);
        let json = serde_json::to_string(&pair).unwrap();
        assert_eq!(json, r#"{"first":1,"second":2,"score":0.5}"#);
        let back: CandidatePair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pair);
    }
}
