//! The built-in [`IndexStore`]: an in-process store with an optional durable
//! snapshot file.
//!
//! State lives behind a single `RwLock`, giving the single-writer,
//! multi-reader surface the engine requires. Write transactions stage their
//! mutations against the live tables and restore a snapshot of the
//! index-owned tables if the transaction closure fails, so readers never
//! observe a partially applied update. When opened with a path, every
//! committed write is serialized with `bincode` and swapped into place with
//! a write-then-rename.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use alderdb_core::revision::{compare_rev_ids, generation, Revision};
use alderdb_core::{Error, JsonValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    IndexEntry, IndexReader, IndexStore, IndexWriter, ScanPlan, ScanRange, ViewRecord, ViewUpsert,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevisionRow {
    meta: Revision,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MapRow {
    view_id: i64,
    sequence: i64,
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inner {
    last_sequence: i64,
    last_view_id: i64,
    last_doc_numeric_id: i64,
    docs: HashMap<String, i64>,
    revisions: BTreeMap<i64, RevisionRow>,
    views: HashMap<String, ViewRecord>,
    maps: Vec<MapRow>,
}

/// The built-in local [`IndexStore`], with a writable document side so the
/// engine can be driven end to end.
#[derive(Debug)]
pub struct LocalStore {
    inner: RwLock<Inner>,
    path: Option<PathBuf>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalStore {
    /// Creates a store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            path: None,
        }
    }

    /// Opens a store persisted at `path`, loading the existing snapshot if
    /// one is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            let bytes = fs::read(&path).map_err(Error::database)?;
            bincode::deserialize(&bytes).map_err(Error::database)?
        } else {
            Inner::default()
        };
        Ok(Self {
            inner: RwLock::new(inner),
            path: Some(path),
        })
    }

    /// Writes a new winning revision of `doc_id`.
    ///
    /// `expected_rev` must name the current winning revision when the
    /// document already exists; a mismatch (or an omitted revision for an
    /// existing document) fails with [`Error::Conflict`].
    pub fn put_document(
        &self,
        doc_id: &str,
        body: &JsonValue,
        expected_rev: Option<&str>,
    ) -> Result<Revision, Error> {
        let properties = body
            .as_object()
            .ok_or_else(|| Error::BadRequest(String::from("document body must be an object")))?;

        let mut inner = self.inner.write();
        let doc_numeric_id = assign_doc_numeric_id(&mut inner, doc_id);
        let winner = winning_of(&inner, doc_numeric_id).cloned();

        match (&winner, expected_rev) {
            (Some(winner), Some(expected)) if winner.meta.rev_id != expected => {
                return Err(Error::Conflict(format!(
                    "expected revision {expected}, but {} is current",
                    winner.meta.rev_id
                )));
            }
            (Some(winner), None) => {
                return Err(Error::Conflict(format!(
                    "document '{doc_id}' exists as revision {}",
                    winner.meta.rev_id
                )));
            }
            (None, Some(expected)) => {
                return Err(Error::Conflict(format!(
                    "expected revision {expected} of a missing document"
                )));
            }
            _ => {}
        }

        let stored = stored_body(properties)?;
        let generation = winner
            .as_ref()
            .map_or(1, |winner| generation(&winner.meta.rev_id) + 1);
        let rev_id = format!("{generation}-{:016x}", digest(doc_id, &stored, generation));
        let parent = winner.as_ref().map_or(0, |winner| winner.meta.sequence);
        if let Some(winner) = winner {
            unseat(&mut inner, winner.meta.sequence);
        }

        let revision = insert_revision(
            &mut inner,
            Revision {
                doc_id: doc_id.to_string(),
                doc_numeric_id,
                sequence: 0,
                rev_id,
                parent,
                current: true,
                deleted: false,
                no_attachments: !properties.contains_key("_attachments"),
            },
            stored,
        );
        self.commit(&mut inner)?;
        Ok(revision)
    }

    /// Tombstones the winning revision of `doc_id`. With `expected_rev`, the
    /// deletion only applies to that revision.
    pub fn delete_document(
        &self,
        doc_id: &str,
        expected_rev: Option<&str>,
    ) -> Result<Revision, Error> {
        let mut inner = self.inner.write();
        let doc_numeric_id = *inner
            .docs
            .get(doc_id)
            .ok_or_else(|| Error::NotFound(format!("document '{doc_id}'")))?;
        let winner = winning_of(&inner, doc_numeric_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document '{doc_id}'")))?;
        if let Some(expected) = expected_rev {
            if winner.meta.rev_id != expected {
                return Err(Error::Conflict(format!(
                    "expected revision {expected}, but {} is current",
                    winner.meta.rev_id
                )));
            }
        }

        let generation = generation(&winner.meta.rev_id) + 1;
        let body = b"{}".to_vec();
        let rev_id = format!("{generation}-{:016x}", digest(doc_id, &body, generation));
        unseat(&mut inner, winner.meta.sequence);
        let revision = insert_revision(
            &mut inner,
            Revision {
                doc_id: doc_id.to_string(),
                doc_numeric_id,
                sequence: 0,
                rev_id,
                parent: winner.meta.sequence,
                current: true,
                deleted: true,
                no_attachments: true,
            },
            body,
        );
        self.commit(&mut inner)?;
        Ok(revision)
    }

    /// Inserts a revision with an externally assigned id, as replication
    /// does. The revision becomes current without unseating any existing
    /// branch, so it may introduce a conflict.
    pub fn force_insert(
        &self,
        doc_id: &str,
        rev_id: &str,
        body: &JsonValue,
    ) -> Result<Revision, Error> {
        let properties = body
            .as_object()
            .ok_or_else(|| Error::BadRequest(String::from("document body must be an object")))?;
        let mut inner = self.inner.write();
        let doc_numeric_id = assign_doc_numeric_id(&mut inner, doc_id);
        let stored = stored_body(properties)?;
        let revision = insert_revision(
            &mut inner,
            Revision {
                doc_id: doc_id.to_string(),
                doc_numeric_id,
                sequence: 0,
                rev_id: rev_id.to_string(),
                parent: 0,
                current: true,
                deleted: false,
                no_attachments: !properties.contains_key("_attachments"),
            },
            stored,
        );
        self.commit(&mut inner)?;
        Ok(revision)
    }

    fn commit(&self, inner: &mut Inner) -> Result<(), Error> {
        if let Some(path) = &self.path {
            let bytes = bincode::serialize(&*inner).map_err(Error::database)?;
            let staging = path.with_extension("tmp");
            fs::write(&staging, bytes).map_err(Error::database)?;
            fs::rename(&staging, path).map_err(Error::database)?;
        }
        Ok(())
    }
}

fn assign_doc_numeric_id(inner: &mut Inner, doc_id: &str) -> i64 {
    if let Some(id) = inner.docs.get(doc_id) {
        *id
    } else {
        inner.last_doc_numeric_id += 1;
        let id = inner.last_doc_numeric_id;
        inner.docs.insert(doc_id.to_string(), id);
        id
    }
}

fn stored_body(properties: &serde_json::Map<String, JsonValue>) -> Result<Vec<u8>, Error> {
    // _id and _rev are reattached from revision metadata when the document
    // is materialized; storing them would let them go stale.
    let stripped: serde_json::Map<String, JsonValue> = properties
        .iter()
        .filter(|(key, _)| *key != "_id" && *key != "_rev")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::to_vec(&JsonValue::Object(stripped)).map_err(Error::from)
}

fn digest(doc_id: &str, body: &[u8], generation: i64) -> u64 {
    // FNV-1a over the revision's identity; stable across runs.
    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    for byte in doc_id
        .as_bytes()
        .iter()
        .chain(body)
        .chain(generation.to_be_bytes().iter())
    {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn unseat(inner: &mut Inner, sequence: i64) {
    if let Some(row) = inner.revisions.get_mut(&sequence) {
        row.meta.current = false;
    }
}

fn insert_revision(inner: &mut Inner, mut meta: Revision, body: Vec<u8>) -> Revision {
    inner.last_sequence += 1;
    meta.sequence = inner.last_sequence;
    inner
        .revisions
        .insert(meta.sequence, RevisionRow {
            meta: meta.clone(),
            body,
        });
    meta
}

fn winning_of(inner: &Inner, doc_numeric_id: i64) -> Option<&RevisionRow> {
    inner
        .revisions
        .values()
        .filter(|row| {
            row.meta.doc_numeric_id == doc_numeric_id && row.meta.current && !row.meta.deleted
        })
        .max_by(|a, b| compare_rev_ids(&a.meta.rev_id, &b.meta.rev_id))
}

fn get_view(inner: &Inner, name: &str) -> Option<ViewRecord> {
    inner.views.get(name).cloned()
}

fn view_by_id(inner: &Inner, view_id: i64) -> Option<ViewRecord> {
    inner
        .views
        .values()
        .find(|record| record.view_id == view_id)
        .cloned()
}

fn count_maps(inner: &Inner, view_id: i64) -> i64 {
    inner.maps.iter().filter(|row| row.view_id == view_id).count() as i64
}

fn scan_revisions_since(inner: &Inner, since: i64, exclude_deleted: bool) -> Vec<Revision> {
    let mut revisions: Vec<Revision> = inner
        .revisions
        .values()
        .filter(|row| {
            row.meta.sequence > since
                && row.meta.current
                && !(exclude_deleted && row.meta.deleted)
        })
        .map(|row| row.meta.clone())
        .collect();
    revisions.sort_by(|a, b| {
        a.doc_numeric_id
            .cmp(&b.doc_numeric_id)
            .then_with(|| b.rev_id.cmp(&a.rev_id))
    });
    revisions
}

fn find_winning_revision_at_or_before(
    inner: &Inner,
    doc_numeric_id: i64,
    sequence: i64,
) -> Option<Revision> {
    inner
        .revisions
        .values()
        .filter(|row| {
            row.meta.doc_numeric_id == doc_numeric_id
                && row.meta.sequence <= sequence
                && row.meta.current
                && !row.meta.deleted
        })
        .max_by(|a, b| a.meta.rev_id.cmp(&b.meta.rev_id))
        .map(|row| row.meta.clone())
}

fn scan_index(inner: &Inner, plan: &ScanPlan) -> Result<Vec<IndexEntry>, Error> {
    let mut rows = Vec::new();
    for map in inner.maps.iter().filter(|row| row.view_id == plan.view_id) {
        let revision = inner.revisions.get(&map.sequence).ok_or_else(|| {
            Error::Internal(format!(
                "map row references missing revision {}",
                map.sequence
            ))
        })?;
        rows.push(IndexEntry {
            key: serde_json::from_slice(&map.key)?,
            value: map.value.clone(),
            doc_id: revision.meta.doc_id.clone(),
            sequence: map.sequence,
            rev_id: revision.meta.rev_id.clone(),
        });
    }
    rows.sort_by(|a, b| {
        plan.collation
            .compare(&a.key, &b.key)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });

    let mut rows = match &plan.range {
        ScanRange::Keys(keys) => {
            // Key-set scans return rows in the caller's iteration order.
            let mut selected = Vec::new();
            for key in keys {
                selected.extend(
                    rows.iter()
                        .filter(|row| {
                            plan.collation.compare(&row.key, key) == std::cmp::Ordering::Equal
                        })
                        .cloned(),
                );
            }
            selected
        }
        ScanRange::Range { lower, upper } => {
            if let Some(lower) = lower {
                rows.retain(|row| match plan.collation.compare(&row.key, &lower.key) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Equal => {
                        lower.inclusive
                            && lower
                                .doc_id
                                .as_ref()
                                .map_or(true, |doc_id| row.doc_id >= *doc_id)
                    }
                    std::cmp::Ordering::Less => false,
                });
            }
            if let Some(upper) = upper {
                rows.retain(|row| match plan.collation.compare(&row.key, &upper.key) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Equal => {
                        upper.inclusive
                            && upper
                                .doc_id
                                .as_ref()
                                .map_or(true, |doc_id| row.doc_id <= *doc_id)
                    }
                    std::cmp::Ordering::Greater => false,
                });
            }
            if plan.descending {
                rows.reverse();
            }
            rows
        }
    };

    if plan.skip > 0 {
        rows.drain(..plan.skip.min(rows.len()));
    }
    if let Some(limit) = plan.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

struct Writer<'a> {
    inner: &'a mut Inner,
}

impl IndexReader for Writer<'_> {
    fn max_sequence(&self) -> Result<i64, Error> {
        Ok(self.inner.last_sequence)
    }

    fn get_view(&self, name: &str) -> Result<Option<ViewRecord>, Error> {
        Ok(get_view(self.inner, name))
    }

    fn view_by_id(&self, view_id: i64) -> Result<Option<ViewRecord>, Error> {
        Ok(view_by_id(self.inner, view_id))
    }

    fn count_maps(&self, view_id: i64) -> Result<i64, Error> {
        Ok(count_maps(self.inner, view_id))
    }

    fn scan_revisions_since(
        &self,
        since: i64,
        exclude_deleted: bool,
    ) -> Result<Vec<Revision>, Error> {
        Ok(scan_revisions_since(self.inner, since, exclude_deleted))
    }

    fn find_winning_revision_at_or_before(
        &self,
        doc_numeric_id: i64,
        sequence: i64,
    ) -> Result<Option<Revision>, Error> {
        Ok(find_winning_revision_at_or_before(
            self.inner,
            doc_numeric_id,
            sequence,
        ))
    }

    fn winning_revision(&self, doc_id: &str) -> Result<Option<Revision>, Error> {
        let Some(doc_numeric_id) = self.inner.docs.get(doc_id) else {
            return Ok(None);
        };
        Ok(winning_of(self.inner, *doc_numeric_id).map(|row| row.meta.clone()))
    }

    fn revision_body(&self, sequence: i64) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.inner.revisions.get(&sequence).map(|row| row.body.clone()))
    }

    fn scan_index(&self, plan: &ScanPlan) -> Result<Vec<IndexEntry>, Error> {
        scan_index(self.inner, plan)
    }
}

impl IndexWriter for Writer<'_> {
    fn delete_maps_for_view(&mut self, view_id: i64) -> Result<(), Error> {
        self.inner.maps.retain(|row| row.view_id != view_id);
        Ok(())
    }

    fn delete_maps_by_sequence(&mut self, view_id: i64, sequence: i64) -> Result<(), Error> {
        self.inner
            .maps
            .retain(|row| row.view_id != view_id || row.sequence != sequence);
        Ok(())
    }

    fn delete_maps_for_replaced_revs(&mut self, view_id: i64, since: i64) -> Result<(), Error> {
        let replaced: HashSet<i64> = self
            .inner
            .revisions
            .values()
            .filter(|row| {
                row.meta.sequence > since && row.meta.parent > 0 && row.meta.parent <= since
            })
            .map(|row| row.meta.parent)
            .collect();
        self.inner
            .maps
            .retain(|row| row.view_id != view_id || !replaced.contains(&row.sequence));
        Ok(())
    }

    fn insert_map(
        &mut self,
        view_id: i64,
        sequence: i64,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        self.inner.maps.push(MapRow {
            view_id,
            sequence,
            key,
            value,
        });
        Ok(())
    }

    fn set_view_state(
        &mut self,
        view_id: i64,
        last_sequence: i64,
        total_docs: i64,
    ) -> Result<(), Error> {
        let record = self
            .inner
            .views
            .values_mut()
            .find(|record| record.view_id == view_id)
            .ok_or_else(|| Error::Internal(format!("unknown view id {view_id}")))?;
        record.last_sequence = last_sequence;
        record.total_docs = total_docs;
        Ok(())
    }
}

impl IndexReader for LocalStore {
    fn max_sequence(&self) -> Result<i64, Error> {
        Ok(self.inner.read().last_sequence)
    }

    fn get_view(&self, name: &str) -> Result<Option<ViewRecord>, Error> {
        Ok(get_view(&self.inner.read(), name))
    }

    fn view_by_id(&self, view_id: i64) -> Result<Option<ViewRecord>, Error> {
        Ok(view_by_id(&self.inner.read(), view_id))
    }

    fn count_maps(&self, view_id: i64) -> Result<i64, Error> {
        Ok(count_maps(&self.inner.read(), view_id))
    }

    fn scan_revisions_since(
        &self,
        since: i64,
        exclude_deleted: bool,
    ) -> Result<Vec<Revision>, Error> {
        Ok(scan_revisions_since(&self.inner.read(), since, exclude_deleted))
    }

    fn find_winning_revision_at_or_before(
        &self,
        doc_numeric_id: i64,
        sequence: i64,
    ) -> Result<Option<Revision>, Error> {
        Ok(find_winning_revision_at_or_before(
            &self.inner.read(),
            doc_numeric_id,
            sequence,
        ))
    }

    fn winning_revision(&self, doc_id: &str) -> Result<Option<Revision>, Error> {
        let inner = self.inner.read();
        let Some(doc_numeric_id) = inner.docs.get(doc_id) else {
            return Ok(None);
        };
        Ok(winning_of(&inner, *doc_numeric_id).map(|row| row.meta.clone()))
    }

    fn revision_body(&self, sequence: i64) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .inner
            .read()
            .revisions
            .get(&sequence)
            .map(|row| row.body.clone()))
    }

    fn scan_index(&self, plan: &ScanPlan) -> Result<Vec<IndexEntry>, Error> {
        scan_index(&self.inner.read(), plan)
    }
}

impl IndexStore for LocalStore {
    fn upsert_view(&self, name: &str, version: &str) -> Result<ViewUpsert, Error> {
        let mut inner = self.inner.write();
        let upsert = if let Some(record) = inner.views.get_mut(name) {
            if record.version == version {
                ViewUpsert {
                    view_id: record.view_id,
                    version_changed: false,
                }
            } else {
                record.version = version.to_string();
                record.last_sequence = 0;
                ViewUpsert {
                    view_id: record.view_id,
                    version_changed: true,
                }
            }
        } else {
            inner.last_view_id += 1;
            let view_id = inner.last_view_id;
            inner.views.insert(
                name.to_string(),
                ViewRecord {
                    view_id,
                    name: name.to_string(),
                    version: version.to_string(),
                    last_sequence: 0,
                    total_docs: 0,
                },
            );
            // A first registration counts as a version change: the index
            // must build from sequence 0.
            ViewUpsert {
                view_id,
                version_changed: true,
            }
        };
        self.commit(&mut inner)?;
        Ok(upsert)
    }

    fn delete_view(&self, name: &str) -> Result<(), Error> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.views.remove(name) {
            let view_id = record.view_id;
            inner.maps.retain(|row| row.view_id != view_id);
            self.commit(&mut inner)?;
        }
        Ok(())
    }

    fn update(
        &self,
        work: &mut dyn FnMut(&mut dyn IndexWriter) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut inner = self.inner.write();
        let staged_views = inner.views.clone();
        let staged_maps = inner.maps.clone();
        let result = {
            let mut writer = Writer { inner: &mut inner };
            work(&mut writer)
        };
        let result = result.and_then(|()| self.commit(&mut inner));
        if result.is_err() {
            inner.views = staged_views;
            inner.maps = staged_maps;
        }
        result
    }
}
