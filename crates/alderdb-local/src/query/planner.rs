//! Translates [`QueryOptions`] into a [`ScanPlan`] the store can execute.

use alderdb_core::collation::{key_for_prefix_match, Collation};
use alderdb_core::query::QueryOptions;

use crate::store::{ScanBound, ScanPlan, ScanRange};

/// Builds the scan plan for one query.
///
/// Ascending scans bound `key >= start` (tie-broken by `doc_id` when keys
/// are equal) through `key <= end` or `key < end` per `inclusive_end`.
/// Descending scans swap the bounds: the post-swap lower bound inherits the
/// pre-swap upper's inclusivity and the post-swap upper is inclusive. An
/// explicit key set disables range bounds entirely.
pub(crate) fn plan(view_id: i64, collation: Collation, options: &QueryOptions) -> ScanPlan {
    let range = if let Some(keys) = &options.keys {
        ScanRange::Keys(keys.clone())
    } else {
        let mut min_key = options.start_key.clone();
        let mut max_key = options.end_key.clone();
        let mut min_doc_id = options.start_key_doc_id.clone();
        let mut max_doc_id = options.end_key_doc_id.clone();
        let mut inclusive_min = true;
        let mut inclusive_max = options.inclusive_end;
        if options.descending {
            std::mem::swap(&mut min_key, &mut max_key);
            inclusive_min = inclusive_max;
            inclusive_max = true;
            min_doc_id = options.end_key_doc_id.clone();
            max_doc_id = options.start_key_doc_id.clone();
        }
        let max_key =
            max_key.map(|key| key_for_prefix_match(key, options.prefix_match_level));

        ScanRange::Range {
            lower: min_key.map(|key| ScanBound {
                key,
                inclusive: inclusive_min,
                // The tie-breaker only has meaning when bound-matching rows
                // are inside the range.
                doc_id: if inclusive_min { min_doc_id } else { None },
            }),
            upper: max_key.map(|key| ScanBound {
                key,
                inclusive: inclusive_max,
                doc_id: if inclusive_max { max_doc_id } else { None },
            }),
        }
    };

    ScanPlan {
        view_id,
        collation,
        range,
        descending: options.descending,
        skip: options.skip,
        limit: options.limit,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn range(plan: &ScanPlan) -> (&Option<ScanBound>, &Option<ScanBound>) {
        match &plan.range {
            ScanRange::Range { lower, upper } => (lower, upper),
            ScanRange::Keys(_) => panic!("expected a range plan"),
        }
    }

    #[test]
    fn ascending_bounds() {
        let options = QueryOptions::default()
            .with_start_key(json!("a"))
            .with_end_key(json!("z"))
            .with_inclusive_end(false);
        let plan = plan(1, Collation::Unicode, &options);
        let (lower, upper) = range(&plan);
        let lower = lower.as_ref().expect("missing lower bound");
        let upper = upper.as_ref().expect("missing upper bound");
        assert_eq!(lower.key, json!("a"));
        assert!(lower.inclusive);
        assert_eq!(upper.key, json!("z"));
        assert!(!upper.inclusive);
    }

    #[test]
    fn descending_swaps_bounds_and_inclusivity() {
        let options = QueryOptions::default()
            .with_start_key(json!("z"))
            .with_end_key(json!("a"))
            .with_inclusive_end(false)
            .descending();
        let plan = plan(1, Collation::Unicode, &options);
        let (lower, upper) = range(&plan);
        let lower = lower.as_ref().expect("missing lower bound");
        let upper = upper.as_ref().expect("missing upper bound");
        // The pre-swap end key becomes the exclusive lower bound.
        assert_eq!(lower.key, json!("a"));
        assert!(!lower.inclusive);
        assert_eq!(upper.key, json!("z"));
        assert!(upper.inclusive);
    }

    #[test]
    fn prefix_match_widens_the_upper_bound() {
        let options = QueryOptions::default()
            .with_start_key(json!(["US"]))
            .with_end_key(json!(["US"]))
            .with_prefix_match_level(1);
        let plan = plan(1, Collation::Unicode, &options);
        let (_, upper) = range(&plan);
        assert_eq!(
            upper.as_ref().expect("missing upper bound").key,
            json!(["US", {}])
        );
    }

    #[test]
    fn key_sets_disable_bounds() {
        let options = QueryOptions::default()
            .with_keys(vec![json!("b"), json!("a")])
            .with_start_key(json!("ignored"));
        let plan = plan(1, Collation::Unicode, &options);
        match plan.range {
            ScanRange::Keys(keys) => assert_eq!(keys, vec![json!("b"), json!("a")]),
            ScanRange::Range { .. } => panic!("expected a key-set plan"),
        }
    }
}
