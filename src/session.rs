use crate::duplicate::CandidatePair;
use crate::pixels::ImageId;

/// Stateful cursor over a list of candidate pairs under human review.
///
/// The session only tracks position and pruning; deciding which copy to keep
/// and deleting files belongs to the caller, which must pair every removal
/// with [`FingerprintCache::invalidate`](crate::cache::FingerprintCache::invalidate).
#[derive(Debug, Default)]
pub struct ResolutionSession {
    pairs: Vec<CandidatePair>,
    cursor: Option<usize>,
}

impl ResolutionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pair list and reset the cursor to the first pair.
    pub fn load(&mut self, pairs: Vec<CandidatePair>) {
        self.cursor = if pairs.is_empty() { None } else { Some(0) };
        self.pairs = pairs;
    }

    /// The pair at the cursor, or `None` while the session is empty.
    pub fn current(&self) -> Option<&CandidatePair> {
        self.cursor.map(|index| &self.pairs[index])
    }

    pub fn position(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Advance to the following pair; a no-op on the last one.
    pub fn next(&mut self) -> Option<&CandidatePair> {
        if let Some(index) = self.cursor {
            if index + 1 < self.pairs.len() {
                self.cursor = Some(index + 1);
            }
        }
        self.current()
    }

    /// Step back to the preceding pair; a no-op on the first one.
    pub fn previous(&mut self) -> Option<&CandidatePair> {
        if let Some(index) = self.cursor {
            self.cursor = Some(index.saturating_sub(1));
        }
        self.current()
    }

    /// Drop every pair referencing `id`, keeping the cursor sensible.
    ///
    /// When the current pair survives, the cursor follows it. When it was
    /// removed, the cursor stays at the same numeric index, now the next
    /// remaining pair, clamped to the end of the shortened list. An emptied
    /// list empties the session.
    pub fn remove_image(&mut self, id: ImageId) {
        let Some(index) = self.cursor else {
            return;
        };

        let removed_before = self.pairs[..index]
            .iter()
            .filter(|pair| pair.contains(id))
            .count();
        let current_removed = self.pairs[index].contains(id);

        self.pairs.retain(|pair| !pair.contains(id));

        self.cursor = if self.pairs.is_empty() {
            None
        } else if current_removed {
            Some((index - removed_before).min(self.pairs.len() - 1))
        } else {
            Some(index - removed_before)
        };
    }
}
