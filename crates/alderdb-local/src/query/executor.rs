//! Executes planned scans and constructs query rows.

use alderdb_core::query::{QueryOptions, QueryRow};
use alderdb_core::{Error, JsonValue};

use crate::database::{document_properties, Database};
use crate::query::{planner, reduce};
use crate::store::IndexEntry;
use crate::views::View;

/// Runs `options` against `view`'s persisted index.
pub(crate) fn query(
    database: &Database,
    view: &View,
    options: &QueryOptions,
) -> Result<Vec<QueryRow>, Error> {
    database.ensure_open()?;
    let view_id = view.view_id()?;
    if view_id <= 0 {
        return Err(Error::NotFound(format!(
            "view '{}' is not registered",
            view.name()
        )));
    }

    let group = options.group || options.group_level > 0;
    let should_reduce = options.reduce || group;
    let reduce_fn = view.reduce_function();
    if should_reduce && reduce_fn.is_none() && !group {
        return Err(Error::BadRequest(format!(
            "cannot reduce view '{}' without a reduce function",
            view.name()
        )));
    }

    let plan = planner::plan(view_id, view.collation(), options);
    tracing::trace!(view = view.name(), ?plan, "executing view query");
    let entries = database.store().scan_index(&plan)?;

    if should_reduce {
        return reduce::reduced_rows(
            reduce_fn.as_deref(),
            &entries,
            group,
            options.group_level,
            options.post_filter.as_deref(),
        );
    }

    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        // A close mid-query surfaces as a cancellation with no side effects.
        database.ensure_open().map_err(|_| Error::Cancelled)?;

        let value = entry
            .value
            .as_deref()
            .map(serde_json::from_slice::<JsonValue>)
            .transpose()?;
        let doc_contents = if options.include_docs {
            include_doc(database, &entry, value.as_ref())?
        } else {
            None
        };
        let row = QueryRow {
            doc_id: Some(entry.doc_id),
            sequence: entry.sequence,
            key: entry.key,
            value,
            doc_contents,
        };
        if let Some(filter) = options.post_filter.as_deref() {
            if !filter(&row) {
                tracing::trace!(key = %row.key, "post filter dropped row");
                continue;
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Loads the document contents for one row: the linked document when the
/// emitted value names one, otherwise the emitting revision's own body.
fn include_doc(
    database: &Database,
    entry: &IndexEntry,
    value: Option<&JsonValue>,
) -> Result<Option<JsonValue>, Error> {
    let linked_doc_id = value
        .and_then(JsonValue::as_object)
        .and_then(|object| object.get("_id"))
        .and_then(JsonValue::as_str);
    if let Some(linked_doc_id) = linked_doc_id {
        let Some(linked) = database.store().winning_revision(linked_doc_id)? else {
            return Ok(None);
        };
        let Some(body) = database.store().revision_body(linked.sequence)? else {
            return Ok(None);
        };
        return Ok(document_properties(
            &body,
            &linked.doc_id,
            &linked.rev_id,
            linked.no_attachments,
        )
        .map(JsonValue::Object));
    }

    let Some(body) = database.store().revision_body(entry.sequence)? else {
        return Ok(None);
    };
    Ok(
        document_properties(&body, &entry.doc_id, &entry.rev_id, false)
            .map(JsonValue::Object),
    )
}
