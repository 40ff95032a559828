//! Revision records and the revision-id comparator used for conflict
//! resolution.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A read-only record of one document revision, as surfaced by the document
/// store. Ordered by the store's monotonic `sequence`; the JSON body is
/// loaded separately.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// The user-visible document id.
    pub doc_id: String,
    /// The store's numeric id for the document.
    pub doc_numeric_id: i64,
    /// The sequence the store assigned when this revision was written.
    pub sequence: i64,
    /// The revision id, a `generation-digest` string.
    pub rev_id: String,
    /// The sequence of the revision this one replaced, or 0 for a root.
    pub parent: i64,
    /// Whether this revision is a leaf of its branch.
    pub current: bool,
    /// Whether this revision is a deletion tombstone.
    pub deleted: bool,
    /// Whether the revision body carries no attachment metadata.
    pub no_attachments: bool,
}

/// Compares two revision ids.
///
/// The numeric generation prefix compares numerically; ties break on a
/// lexicographic comparison of the remaining suffix. A malformed id
/// (no numeric prefix) compares with generation 0.
#[must_use]
pub fn compare_rev_ids(a: &str, b: &str) -> Ordering {
    let (a_generation, a_suffix) = split_rev_id(a);
    let (b_generation, b_suffix) = split_rev_id(b);
    a_generation
        .cmp(&b_generation)
        .then_with(|| a_suffix.cmp(b_suffix))
}

/// The numeric generation of a revision id, or 0 if it has none.
#[must_use]
pub fn generation(rev_id: &str) -> i64 {
    split_rev_id(rev_id).0
}

fn split_rev_id(rev_id: &str) -> (i64, &str) {
    let digits = rev_id.len() - rev_id.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let generation = rev_id[..digits].parse::<i64>().unwrap_or(0);
    let suffix = rev_id[digits..].strip_prefix('-').unwrap_or(&rev_id[digits..]);
    (generation, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_compare_numerically() {
        assert_eq!(compare_rev_ids("10-aaaa", "2-zzzz"), Ordering::Greater);
        assert_eq!(compare_rev_ids("2-zzzz", "10-aaaa"), Ordering::Less);
    }

    #[test]
    fn ties_break_on_suffix() {
        assert_eq!(compare_rev_ids("2-aaaa", "2-bbbb"), Ordering::Less);
        assert_eq!(compare_rev_ids("2-bbbb", "2-bbbb"), Ordering::Equal);
    }

    #[test]
    fn malformed_ids_compare_as_generation_zero() {
        assert_eq!(compare_rev_ids("bogus", "1-a"), Ordering::Less);
        assert_eq!(generation("bogus"), 0);
        assert_eq!(generation("3-abc"), 3);
    }
}
