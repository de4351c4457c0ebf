//! Half-open byte-range algebra for chunked file transfers.
//!
//! A transfer tracks the bytes it has not yet received as an ascending,
//! disjoint list of half-open ranges. This crate provides the operations
//! that list needs: merging adjacent ranges, splitting a range at a point,
//! excluding a received chunk, and intersecting a candidate fetch window
//! with the outstanding ranges.
//!
//! All functions take and return ranges in ascending order. `exclude` and
//! `split` additionally require their input to be disjoint, and preserve
//! that discipline in their output.
//!
//! # Example
//!
//! ```
//! use wheelhouse_ranges::{exclude, intersect};
//!
//! // A fresh 10-byte transfer is missing everything.
//! let missing = vec![0..10];
//!
//! // Receiving bytes 2..4 leaves two holes either side.
//! let missing = exclude(&missing, &(2..4));
//! assert_eq!(missing, vec![0..2, 4..10]);
//!
//! // The next fetch window is clipped to the first hole.
//! assert_eq!(intersect(&(0..8), &missing[0]), Some(0..2));
//! ```

use std::ops::Range;

/// Merge overlapping or adjacent ranges in an ascending list.
///
/// ```
/// use wheelhouse_ranges::consolidate;
///
/// assert_eq!(consolidate(&[0..5, 4..10]), vec![0..10]);
/// assert_eq!(consolidate(&[0..5, 5..10]), vec![0..10]);
/// assert_eq!(consolidate(&[0..5, 6..10]), vec![0..5, 6..10]);
/// ```
pub fn consolidate(ranges: &[Range<u64>]) -> Vec<Range<u64>> {
    let mut result = Vec::with_capacity(ranges.len());
    let mut current: Option<Range<u64>> = None;
    for r in ranges {
        match current {
            None => current = Some(r.clone()),
            Some(ref mut c) => {
                if r.start > c.end {
                    result.push(c.clone());
                    current = Some(r.clone());
                } else {
                    c.end = r.end;
                }
            }
        }
    }
    if let Some(c) = current {
        result.push(c);
    }
    result
}

/// Split the range containing `at` into two ranges meeting at `at`.
///
/// If `at` falls on a boundary or outside every range, the list is
/// returned unchanged.
///
/// ```
/// use wheelhouse_ranges::split;
///
/// assert_eq!(split(&[0..10], 5), vec![0..5, 5..10]);
/// assert_eq!(split(&[0..10], 0), vec![0..10]);
/// assert_eq!(split(&[0..10], 20), vec![0..10]);
/// ```
pub fn split(ranges: &[Range<u64>], at: u64) -> Vec<Range<u64>> {
    let mut result = Vec::with_capacity(ranges.len() + 1);
    for r in ranges {
        if r.start < at && at < r.end {
            result.push(r.start..at);
            result.push(at..r.end);
        } else {
            result.push(r.clone());
        }
    }
    result
}

/// Remove every byte covered by `ex` from an ascending, disjoint list.
///
/// ```
/// use wheelhouse_ranges::exclude;
///
/// assert_eq!(exclude(&[0..10], &(0..2)), vec![2..10]);
/// assert_eq!(exclude(&[0..10], &(2..4)), vec![0..2, 4..10]);
/// ```
pub fn exclude(ranges: &[Range<u64>], ex: &Range<u64>) -> Vec<Range<u64>> {
    split(&split(ranges, ex.start), ex.end)
        .into_iter()
        .filter(|r| r.end <= ex.start || r.start >= ex.end)
        .collect()
}

/// Intersection of two ranges, or `None` when they do not overlap.
///
/// ```
/// use wheelhouse_ranges::intersect;
///
/// assert_eq!(intersect(&(0..10), &(0..5)), Some(0..5));
/// assert_eq!(intersect(&(0..10), &(2..5)), Some(2..5));
/// assert_eq!(intersect(&(0..5), &(5..10)), None);
/// ```
pub fn intersect(a: &Range<u64>, b: &Range<u64>) -> Option<Range<u64>> {
    let start = a.start.max(b.start);
    let end = a.end.min(b.end);
    if start < end { Some(start..end) } else { None }
}

/// Total number of bytes covered by a list of disjoint ranges.
pub fn covered(ranges: &[Range<u64>]) -> u64 {
    ranges.iter().map(|r| r.end - r.start).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolidate_merges_overlapping() {
        assert_eq!(consolidate(&[0..5, 4..10]), vec![0..10]);
    }

    #[test]
    fn consolidate_merges_adjacent() {
        assert_eq!(consolidate(&[0..5, 5..10]), vec![0..10]);
    }

    #[test]
    fn consolidate_keeps_gaps() {
        assert_eq!(consolidate(&[0..5, 6..10]), vec![0..5, 6..10]);
    }

    #[test]
    fn consolidate_empty_is_empty() {
        assert_eq!(consolidate(&[]), Vec::<std::ops::Range<u64>>::new());
    }

    #[test]
    fn split_interior_point() {
        assert_eq!(split(&[0..10], 5), vec![0..5, 5..10]);
    }

    #[test]
    fn split_at_boundary_is_noop() {
        assert_eq!(split(&[0..10], 0), vec![0..10]);
        assert_eq!(split(&[0..10], 10), vec![0..10]);
    }

    #[test]
    fn split_outside_is_noop() {
        assert_eq!(split(&[0..10], 20), vec![0..10]);
    }

    #[test]
    fn exclude_prefix() {
        assert_eq!(exclude(&[0..10], &(0..2)), vec![2..10]);
    }

    #[test]
    fn exclude_interior() {
        assert_eq!(exclude(&[0..10], &(2..4)), vec![0..2, 4..10]);
    }

    #[test]
    fn exclude_suffix() {
        assert_eq!(exclude(&[0..10], &(8..10)), vec![0..8]);
    }

    #[test]
    fn exclude_everything() {
        assert_eq!(exclude(&[0..10], &(0..10)), vec![]);
    }

    #[test]
    fn exclude_disjoint_is_noop() {
        assert_eq!(exclude(&[0..10], &(10..20)), vec![0..10]);
    }

    #[test]
    fn exclude_spanning_multiple_ranges() {
        assert_eq!(exclude(&[0..4, 6..10], &(2..8)), vec![0..2, 8..10]);
    }

    #[test]
    fn intersect_overlap() {
        assert_eq!(intersect(&(0..10), &(2..5)), Some(2..5));
        assert_eq!(intersect(&(2..5), &(0..10)), Some(2..5));
    }

    #[test]
    fn intersect_touching_is_none() {
        assert_eq!(intersect(&(0..5), &(5..10)), None);
    }

    #[test]
    fn covered_sums_lengths() {
        assert_eq!(covered(&[0..2, 4..10]), 8);
    }
}
