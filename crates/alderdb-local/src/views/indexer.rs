//! The incremental indexer: replays revisions the index has not seen,
//! resolves conflicts against prior index state, and persists the map
//! function's emissions.

use std::cmp::Ordering;

use alderdb_core::revision::compare_rev_ids;
use alderdb_core::view::{Emitter, IndexUpdate};
use alderdb_core::Error;

use crate::database::{document_properties, Database};
use crate::views::View;

/// Brings `view`'s index up to date within one store transaction.
///
/// On success the index reflects every revision with a sequence at or below
/// the store's max sequence as of the transaction start. On error the
/// transaction is rolled back and the indexed sequence is unchanged.
pub(crate) fn update_index(database: &Database, view: &View) -> Result<IndexUpdate, Error> {
    database.ensure_open()?;
    let functions = view.functions().ok_or_else(|| {
        Error::NotFound(format!(
            "view '{}' has no map function registered",
            view.name()
        ))
    })?;
    let view_id = view.view_id()?;
    if view_id <= 0 {
        return Err(Error::NotFound(format!(
            "view '{}' is not registered",
            view.name()
        )));
    }

    tracing::debug!(view = view.name(), "updating view index");
    let mut outcome = IndexUpdate::NotModified;
    database.store().update(&mut |txn| {
        let record = txn.view_by_id(view_id)?.ok_or_else(|| {
            Error::NotFound(format!("view '{}' is not registered", view.name()))
        })?;
        let last = record.last_sequence;
        if last < 0 {
            return Err(Error::Internal(format!(
                "view '{}' has indexed sequence {last}",
                view.name()
            )));
        }
        let db_max = txn.max_sequence()?;
        let mut min_last = db_max;

        // First remove obsolete emissions from the index.
        if last < db_max {
            min_last = min_last.min(last);
            if last == 0 {
                // The indexed sequence was reset (version change or first
                // build); clear any leftover rows.
                txn.delete_maps_for_view(view_id)?;
            } else {
                txn.delete_maps_for_replaced_revs(view_id, last)?;
            }
        }

        if min_last == db_max {
            tracing::trace!(view = view.name(), sequence = db_max, "index already current");
            outcome = IndexUpdate::NotModified;
            return Ok(());
        }

        // Scan every revision added since the index was last brought up to
        // date. On a full rebuild deleted revisions are excluded up front;
        // they have no prior emissions to clean up.
        let revisions = txn.scan_revisions_since(min_last, min_last == 0)?;
        let mut index = 0;
        while index < revisions.len() {
            // Cancellation is observed between documents; the transaction
            // rolls back without advancing the indexed sequence.
            database.ensure_open().map_err(|_| Error::Cancelled)?;

            let winner = &revisions[index];
            let doc_numeric_id = winner.doc_numeric_id;
            // Later rows for the same document are losing conflicts; the
            // scan order puts the winning revision first.
            while index < revisions.len() && revisions[index].doc_numeric_id == doc_numeric_id {
                index += 1;
            }

            if winner.doc_id.starts_with("_design/") {
                continue;
            }

            let mut sequence = winner.sequence;
            let mut rev_id = winner.rev_id.clone();
            let mut deleted = winner.deleted;

            if min_last > 0 {
                // The document may have been indexed before under an older
                // winning revision. Drop that revision's emissions, and if
                // it still wins the conflict (or the new revision is a
                // tombstone), it is the one to map again.
                if let Some(old) =
                    txn.find_winning_revision_at_or_before(doc_numeric_id, min_last)?
                {
                    txn.delete_maps_by_sequence(view_id, old.sequence)?;
                    if deleted || compare_rev_ids(&old.rev_id, &rev_id) == Ordering::Greater {
                        rev_id = old.rev_id;
                        sequence = old.sequence;
                        deleted = false;
                    }
                }
            }

            if deleted {
                continue;
            }

            let Some(body) = txn.revision_body(sequence)? else {
                tracing::warn!(
                    doc_id = %winner.doc_id,
                    sequence,
                    "revision body missing, skipping document"
                );
                continue;
            };
            let Some(properties) =
                document_properties(&body, &winner.doc_id, &rev_id, winner.no_attachments)
            else {
                continue;
            };

            // Call the user-defined map function to emit new key/value
            // pairs for this revision. A failure is logged and the
            // document's remaining emissions are skipped; one poison
            // document must not block the index.
            let mut emitter = Emitter::new();
            if let Err(error) = functions.map.map(&properties, &mut emitter) {
                tracing::warn!(
                    view = view.name(),
                    doc_id = %winner.doc_id,
                    %error,
                    "map function failed"
                );
            }
            for emitted in emitter.into_rows() {
                txn.insert_map(view_id, sequence, emitted.key, emitted.value)?;
            }
        }

        // Record the sequence the index now reflects and the row count.
        let total_docs = txn.count_maps(view_id)?;
        txn.set_view_state(view_id, db_max, total_docs)?;
        outcome = IndexUpdate::Updated;
        tracing::debug!(
            view = view.name(),
            sequence = db_max,
            rows = total_docs,
            "finished updating view index"
        );
        Ok(())
    })?;

    Ok(outcome)
}
