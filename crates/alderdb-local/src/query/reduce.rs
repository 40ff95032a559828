//! Grouped and reduced query results over a sorted key stream.

use alderdb_core::query::QueryRow;
use alderdb_core::view::ReduceFunction;
use alderdb_core::{Error, JsonValue};

use crate::store::IndexEntry;

/// The number of pairs a reduce batch buffer is sized for.
pub(crate) const REDUCE_BATCH_SIZE: usize = 100;

type PostFilter<'a> = &'a (dyn Fn(&QueryRow) -> bool + Send + Sync);

/// Collapses scanned entries into reduced (and optionally grouped) rows.
///
/// Without grouping, every pair reduces into a single row with a null key.
/// With grouping, a reduction is emitted each time the group key changes;
/// the stream arrives in collation order, so each group is contiguous.
pub(crate) fn reduced_rows(
    reduce: Option<&dyn ReduceFunction>,
    entries: &[IndexEntry],
    group: bool,
    group_level: usize,
    post_filter: Option<PostFilter<'_>>,
) -> Result<Vec<QueryRow>, Error> {
    let mut keys_to_reduce = Vec::with_capacity(REDUCE_BATCH_SIZE);
    let mut values_to_reduce = Vec::with_capacity(REDUCE_BATCH_SIZE);
    let mut last_key: Option<JsonValue> = None;
    let mut rows = Vec::new();

    for entry in entries {
        let value = entry
            .value
            .as_deref()
            .map(serde_json::from_slice::<JsonValue>)
            .transpose()?
            .unwrap_or(JsonValue::Null);

        let same_group = last_key
            .as_ref()
            .is_some_and(|last| group_together(&entry.key, last, group_level));
        if group && !same_group {
            if let Some(last) = last_key.take() {
                // This pair starts a new group; reduce and record the
                // previous one.
                let row = reduced_row(
                    reduce,
                    group_key(last, group_level),
                    &keys_to_reduce,
                    &values_to_reduce,
                )?;
                push_row(&mut rows, row, post_filter);
                keys_to_reduce.clear();
                values_to_reduce.clear();
            }
            last_key = Some(entry.key.clone());
        }
        keys_to_reduce.push(entry.key.clone());
        values_to_reduce.push(value);
    }

    if !keys_to_reduce.is_empty() {
        // Finish the last group, or the entire stream if ungrouped.
        let key = if group {
            last_key.map_or(JsonValue::Null, |last| group_key(last, group_level))
        } else {
            JsonValue::Null
        };
        let row = reduced_row(reduce, key, &keys_to_reduce, &values_to_reduce)?;
        push_row(&mut rows, row, post_filter);
    }

    Ok(rows)
}

fn reduced_row(
    reduce: Option<&dyn ReduceFunction>,
    key: JsonValue,
    keys: &[JsonValue],
    values: &[JsonValue],
) -> Result<QueryRow, Error> {
    let value = reduce
        .map(|function| {
            function
                .reduce(keys, values, false)
                .map_err(|error| Error::ViewFunction(error.to_string()))
        })
        .transpose()?;
    Ok(QueryRow {
        doc_id: None,
        sequence: 0,
        key,
        value,
        doc_contents: None,
    })
}

fn push_row(rows: &mut Vec<QueryRow>, row: QueryRow, post_filter: Option<PostFilter<'_>>) {
    if post_filter.map_or(true, |filter| filter(&row)) {
        rows.push(row);
    } else {
        tracing::trace!(key = %row.key, "post filter dropped reduced row");
    }
}

/// Whether two keys land in the same group at `group_level`.
///
/// With a level of 0, or when either key is not an array, grouping is full
/// value equality. Otherwise the first `group_level` elements must pairwise
/// match; arrays shorter than the level only group with arrays of the same
/// length.
pub(crate) fn group_together(a: &JsonValue, b: &JsonValue, group_level: usize) -> bool {
    let (JsonValue::Array(a), JsonValue::Array(b)) = (a, b) else {
        return group_level == 0 || a == b;
    };
    if group_level == 0 {
        return a == b;
    }
    if (a.len() < group_level || b.len() < group_level) && a.len() != b.len() {
        return false;
    }
    let end = group_level.min(a.len()).min(b.len());
    a[..end] == b[..end]
}

/// The key a grouped row reports: the `group_level` prefix of an array key
/// that is longer than the level, otherwise the key itself.
pub(crate) fn group_key(key: JsonValue, group_level: usize) -> JsonValue {
    match key {
        JsonValue::Array(elements) if group_level > 0 && elements.len() > group_level => {
            JsonValue::Array(elements.into_iter().take(group_level).collect())
        }
        other => other,
    }
}
