//
// reparse/coverage.rs
//
// How many live bytes a range of a file spans, given its conditional fingerprint
//

use super::fingerprint::ConditionalFingerprint;

/// Raw sentinel returned by [`coverage`] when the answer is not well defined
pub const INDETERMINATE_COVERAGE: i64 = -1;

/// Typed form of a coverage answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coverage {
    /// Number of live (not excluded) bytes in the range
    Live(u64),
    /// The range is reversed or one of its endpoints lies inside or on the
    /// boundary of an excluded interval
    Indeterminate,
}

impl Coverage {
    pub fn as_raw(self) -> i64 {
        match self {
            Coverage::Live(n) => n as i64,
            Coverage::Indeterminate => INDETERMINATE_COVERAGE,
        }
    }

    pub fn is_indeterminate(self) -> bool {
        matches!(self, Coverage::Indeterminate)
    }
}

/// What an edit of `[from, to)` does to the conditional structure of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditImpact {
    /// Only live code changed; a partial reparse is enough
    LiveOnly,
    /// The edit overlaps or touches an excluded interval
    TouchesExcluded,
    /// The range is reversed
    Indeterminate,
}

/// Live bytes between `from` and `to`, or [`INDETERMINATE_COVERAGE`].
pub fn coverage(fingerprint: &ConditionalFingerprint, from: u64, to: u64) -> i64 {
    measure(fingerprint, from, to).as_raw()
}

/// Typed variant of [`coverage`].
///
/// A query starting at offset 0 and reaching at least the end of the last
/// excluded interval is treated as a whole-file query and answers the full
/// span without subtracting anything.
pub fn measure(fingerprint: &ConditionalFingerprint, from: u64, to: u64) -> Coverage {
    if from > to || touches_excluded(fingerprint, from) || touches_excluded(fingerprint, to) {
        return Coverage::Indeterminate;
    }

    let intervals = fingerprint.intervals();
    let last_end = intervals.last().map_or(0, |iv| iv.end);
    if from == 0 && to >= last_end {
        return Coverage::Live(to - from);
    }

    let excluded: u64 = intervals
        .iter()
        .skip_while(|iv| iv.start <= from)
        .take_while(|iv| iv.end < to)
        .map(|iv| iv.len())
        .sum();
    Coverage::Live(to - from - excluded)
}

/// Classify an edit of the byte range `[from, to)` against the fingerprint of
/// the file's latest parse.
pub fn classify_edit(fingerprint: &ConditionalFingerprint, from: u64, to: u64) -> EditImpact {
    if from > to {
        return EditImpact::Indeterminate;
    }
    let idx = fingerprint.first_ending_at_or_after(from);
    match fingerprint.intervals().get(idx) {
        Some(iv) if iv.start <= to => EditImpact::TouchesExcluded,
        _ => EditImpact::LiveOnly,
    }
}

fn touches_excluded(fingerprint: &ConditionalFingerprint, offset: u64) -> bool {
    let idx = fingerprint.first_ending_at_or_after(offset);
    fingerprint
        .intervals()
        .get(idx)
        .is_some_and(|iv| iv.touches(offset))
}
