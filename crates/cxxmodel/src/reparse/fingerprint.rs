//
// reparse/fingerprint.rs
//
// Conditional-compilation fingerprints: the byte ranges a parse excluded
//

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::FingerprintError;

/// Half-open byte range `[start, end)` skipped by a false conditional branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExcludedInterval {
    pub start: u64,
    pub end: u64,
}

impl ExcludedInterval {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if `offset` lies inside the interval or on one of its boundaries
    pub fn touches(&self, offset: u64) -> bool {
        self.start <= offset && offset <= self.end
    }
}

/// Which byte ranges of a file were excluded by `#if`/`#ifdef` during one
/// concrete parse.
///
/// Intervals are strictly increasing, disjoint and never adjacent, so two
/// fingerprints are equal exactly when the same bytes were excluded. The value
/// is immutable and cheap to clone; it keys the inclusion cache directly.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConditionalFingerprint {
    intervals: Arc<[ExcludedInterval]>,
}

/// Outcome of comparing a new fingerprint with the ones already kept for a
/// header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonResult {
    /// The new fingerprint compiles at least everything each kept one did
    ReplaceOthers,
    /// Not comparable with at least one kept fingerprint
    KeepWithOthers,
    /// A kept fingerprint already compiles everything the new one would
    Discard,
}

impl ConditionalFingerprint {
    /// Fingerprint of a parse that excluded nothing
    pub fn empty() -> Self {
        Self {
            intervals: Arc::from(Vec::new()),
        }
    }

    /// Build from a flat, sorted array of alternating start/end offsets.
    ///
    /// Empty pairs are dropped and touching intervals are merged, so the result
    /// always satisfies the non-adjacency invariant.
    pub fn build(path: &Path, flat_boundaries: &[u64]) -> Result<Self, FingerprintError> {
        if flat_boundaries.len() % 2 != 0 {
            return Err(FingerprintError::OddBoundaryCount {
                path: path.to_path_buf(),
                count: flat_boundaries.len(),
            });
        }
        if let Some(index) = flat_boundaries.windows(2).position(|w| w[1] < w[0]) {
            return Err(FingerprintError::Unsorted {
                path: path.to_path_buf(),
                index: index + 1,
                offset: flat_boundaries[index + 1],
            });
        }

        let mut intervals: Vec<ExcludedInterval> = Vec::with_capacity(flat_boundaries.len() / 2);
        for pair in flat_boundaries.chunks_exact(2) {
            let interval = ExcludedInterval {
                start: pair[0],
                end: pair[1],
            };
            if interval.is_empty() {
                continue;
            }
            match intervals.last_mut() {
                Some(last) if last.end == interval.start => last.end = interval.end,
                _ => intervals.push(interval),
            }
        }

        log::trace!(
            "Built conditional fingerprint for {} with {} excluded intervals",
            path.display(),
            intervals.len()
        );

        Ok(Self {
            intervals: Arc::from(intervals),
        })
    }

    /// Build from `(start, end)` pairs in ascending order
    pub fn from_intervals(pairs: &[(u64, u64)]) -> Result<Self, FingerprintError> {
        let flat: Vec<u64> = pairs.iter().flat_map(|&(s, e)| [s, e]).collect();
        Self::build(Path::new("<memory>"), &flat)
    }

    pub fn intervals(&self) -> &[ExcludedInterval] {
        &self.intervals
    }

    /// True if the parse excluded nothing
    pub fn is_all_included(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Total number of excluded bytes
    pub fn excluded_len(&self) -> u64 {
        self.intervals.iter().map(ExcludedInterval::len).sum()
    }

    /// True if `offset` lies inside an excluded interval
    pub fn is_excluded(&self, offset: u64) -> bool {
        let idx = self.intervals.partition_point(|iv| iv.end <= offset);
        self.intervals
            .get(idx)
            .is_some_and(|iv| iv.start <= offset)
    }

    /// Index of the first interval that ends at or after `offset`
    pub(crate) fn first_ending_at_or_after(&self, offset: u64) -> usize {
        self.intervals.partition_point(|iv| iv.end < offset)
    }

    /// True if every byte excluded here is also excluded in `other`, i.e. this
    /// parse compiled at least everything `other` compiled.
    pub fn is_better_or_equal(&self, other: &ConditionalFingerprint) -> bool {
        let theirs = other.intervals();
        let mut j = 0;
        for mine in self.intervals.iter() {
            while j < theirs.len() && theirs[j].end <= mine.start {
                j += 1;
            }
            match theirs.get(j) {
                Some(t) if t.start <= mine.start && mine.end <= t.end => {}
                _ => return false,
            }
        }
        true
    }

    /// Compare against the fingerprints already kept for a header.
    pub fn compare_with<'a>(
        &self,
        kept: impl IntoIterator<Item = &'a ConditionalFingerprint>,
    ) -> ComparisonResult {
        let mut superset = true;
        for old in kept {
            if old.is_better_or_equal(self) {
                return ComparisonResult::Discard;
            } else if !self.is_better_or_equal(old) {
                superset = false;
            }
        }
        if superset {
            ComparisonResult::ReplaceOthers
        } else {
            ComparisonResult::KeepWithOthers
        }
    }
}

impl Default for ConditionalFingerprint {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ConditionalFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConditionalFingerprint({})", self)
    }
}

impl fmt::Display for ConditionalFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.intervals.is_empty() {
            return f.write_str("<all included>");
        }
        for (i, iv) in self.intervals.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "[{},{})", iv.start, iv.end)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(pairs: &[(u64, u64)]) -> ConditionalFingerprint {
        ConditionalFingerprint::from_intervals(pairs).unwrap()
    }

    #[test]
    fn test_build_from_flat_boundaries() {
        let built = ConditionalFingerprint::build(Path::new("/a.h"), &[10, 20, 35, 40]).unwrap();
        assert_eq!(
            built.intervals(),
            &[
                ExcludedInterval { start: 10, end: 20 },
                ExcludedInterval { start: 35, end: 40 }
            ]
        );
        assert_eq!(built.excluded_len(), 15);
    }

    #[test]
    fn test_build_merges_adjacent_and_drops_empty() {
        let built = ConditionalFingerprint::build(Path::new("/a.h"), &[5, 5, 10, 20, 20, 30]).unwrap();
        assert_eq!(built.intervals(), &[ExcludedInterval { start: 10, end: 30 }]);
    }

    #[test]
    fn test_build_rejects_odd_and_unsorted_input() {
        assert!(matches!(
            ConditionalFingerprint::build(Path::new("/a.h"), &[1, 2, 3]),
            Err(FingerprintError::OddBoundaryCount { count: 3, .. })
        ));
        assert!(matches!(
            ConditionalFingerprint::build(Path::new("/a.h"), &[10, 20, 15, 30]),
            Err(FingerprintError::Unsorted { index: 2, offset: 15, .. })
        ));
    }

    #[test]
    fn test_structural_equality() {
        let a = ConditionalFingerprint::build(Path::new("/a.h"), &[1, 4]).unwrap();
        let b = ConditionalFingerprint::build(Path::new("/b.h"), &[1, 2, 2, 4]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, ConditionalFingerprint::empty());
    }

    #[test]
    fn test_is_excluded() {
        let f = fp(&[(10, 20)]);
        assert!(!f.is_excluded(9));
        assert!(f.is_excluded(10));
        assert!(f.is_excluded(19));
        assert!(!f.is_excluded(20));
    }

    #[test]
    fn test_is_better_or_equal() {
        let all = ConditionalFingerprint::empty();
        let narrow = fp(&[(10, 20)]);
        let wide = fp(&[(5, 25), (40, 50)]);

        assert!(all.is_all_included());
        assert!(all.is_better_or_equal(&narrow));
        assert!(narrow.is_better_or_equal(&wide));
        assert!(!wide.is_better_or_equal(&narrow));
        assert!(narrow.is_better_or_equal(&narrow));
        assert!(!narrow.is_better_or_equal(&all));
    }

    #[test]
    fn test_compare_with_kept_fingerprints() {
        let narrow = fp(&[(10, 20)]);
        let wide = fp(&[(5, 25)]);
        let other = fp(&[(100, 120)]);

        assert_eq!(narrow.compare_with([&wide]), ComparisonResult::ReplaceOthers);
        assert_eq!(wide.compare_with([&narrow]), ComparisonResult::Discard);
        assert_eq!(narrow.compare_with([&other]), ComparisonResult::KeepWithOthers);
        assert_eq!(narrow.compare_with(std::iter::empty()), ComparisonResult::ReplaceOthers);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConditionalFingerprint::empty().to_string(), "<all included>");
        assert_eq!(fp(&[(1, 2), (5, 9)]).to_string(), "[1,2) [5,9)");
    }

    #[test]
    fn test_serde_roundtrip_preserves_equality() {
        let f = fp(&[(10, 20), (35, 40)]);
        let json = serde_json::to_string(&f).unwrap();
        let back: ConditionalFingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(f, back);
    }
}
