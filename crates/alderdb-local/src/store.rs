//! The persistence abstraction the view engine runs against.
//!
//! An [`IndexStore`] owns two writable tables — the `views` registry and the
//! `maps` emission rows — and exposes read-only access to the document
//! store's revision history. Every indexing mutation happens inside a single
//! transaction opened with [`IndexStore::update`]; if the transaction
//! closure fails, nothing is applied.

use std::fmt::Debug;

use alderdb_core::collation::Collation;
use alderdb_core::revision::Revision;
use alderdb_core::{Error, JsonValue};
use serde::{Deserialize, Serialize};

mod local;

pub use local::LocalStore;

/// The persisted registry row for one view.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    /// The store-assigned id, > 0 once persisted.
    pub view_id: i64,
    /// The unique view name.
    pub name: String,
    /// The version string of the registered map function.
    pub version: String,
    /// The highest revision sequence the index reflects.
    pub last_sequence: i64,
    /// The number of `maps` rows for this view as of the last index update.
    pub total_docs: i64,
}

/// The result of registering a view name/version pair.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ViewUpsert {
    /// The view's id.
    pub view_id: i64,
    /// True when an existing row's version changed, resetting the index.
    pub version_changed: bool,
}

/// One scanned index row, joined to the revision that emitted it.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// The emitted key, decoded.
    pub key: JsonValue,
    /// The emitted value's JSON bytes, if a value was emitted.
    pub value: Option<Vec<u8>>,
    /// The id of the emitting document.
    pub doc_id: String,
    /// The sequence of the emitting revision.
    pub sequence: i64,
    /// The revision id of the emitting revision.
    pub rev_id: String,
}

/// One end of a key range, with an optional document-id tie-breaker for rows
/// whose key equals the bound.
#[derive(Debug, Clone)]
pub struct ScanBound {
    /// The bounding key.
    pub key: JsonValue,
    /// Whether rows matching the key are inside the range.
    pub inclusive: bool,
    /// Tie-breaker applied to rows whose key equals the bound.
    pub doc_id: Option<String>,
}

/// The rows a scan should visit.
#[derive(Debug, Clone)]
pub enum ScanRange {
    /// A contiguous key range in collation order.
    Range {
        /// The lower bound, or `None` for an open start.
        lower: Option<ScanBound>,
        /// The upper bound, or `None` for an open end.
        upper: Option<ScanBound>,
    },
    /// An explicit key set, returned in the caller's iteration order.
    Keys(Vec<JsonValue>),
}

/// A fully planned index scan, as produced by the query planner.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    /// The view whose rows to scan.
    pub view_id: i64,
    /// The collation ordering the scan.
    pub collation: Collation,
    /// The rows to visit.
    pub range: ScanRange,
    /// Whether to emit rows in reverse collation order.
    pub descending: bool,
    /// Rows to drop from the front of the output.
    pub skip: usize,
    /// Maximum rows to return, applied after `skip`.
    pub limit: Option<usize>,
}

/// Read access shared by the store handle and in-flight transactions.
pub trait IndexReader {
    /// The highest sequence the document store has assigned.
    fn max_sequence(&self) -> Result<i64, Error>;

    /// Looks up a registry row by name.
    fn get_view(&self, name: &str) -> Result<Option<ViewRecord>, Error>;

    /// Looks up a registry row by id.
    fn view_by_id(&self, view_id: i64) -> Result<Option<ViewRecord>, Error>;

    /// Counts the `maps` rows for a view.
    fn count_maps(&self, view_id: i64) -> Result<i64, Error>;

    /// Returns the current revisions with `sequence > since`, ordered by
    /// `(doc_numeric_id ASC, rev_id DESC)`. When `exclude_deleted` is set,
    /// tombstones are omitted (used for full rebuilds, where deletions have
    /// no prior emissions to clean up).
    fn scan_revisions_since(
        &self,
        since: i64,
        exclude_deleted: bool,
    ) -> Result<Vec<Revision>, Error>;

    /// The current, non-deleted revision of a document with the highest
    /// revision id among those with `sequence <= sequence`.
    fn find_winning_revision_at_or_before(
        &self,
        doc_numeric_id: i64,
        sequence: i64,
    ) -> Result<Option<Revision>, Error>;

    /// The current winning non-deleted revision of `doc_id`.
    fn winning_revision(&self, doc_id: &str) -> Result<Option<Revision>, Error>;

    /// The stored JSON body of the revision at `sequence`.
    fn revision_body(&self, sequence: i64) -> Result<Option<Vec<u8>>, Error>;

    /// Executes a planned scan, returning rows in plan order.
    fn scan_index(&self, plan: &ScanPlan) -> Result<Vec<IndexEntry>, Error>;
}

/// The mutations available inside an [`IndexStore::update`] transaction.
pub trait IndexWriter: IndexReader {
    /// Removes every `maps` row for a view.
    fn delete_maps_for_view(&mut self, view_id: i64) -> Result<(), Error>;

    /// Removes the `maps` rows emitted by the revision at `sequence`.
    fn delete_maps_by_sequence(&mut self, view_id: i64, sequence: i64) -> Result<(), Error>;

    /// Removes emissions whose source revision has been replaced by a newer
    /// revision written after `since`: rows whose sequence is the parent of
    /// a post-`since` revision and is itself at or before `since`.
    fn delete_maps_for_replaced_revs(&mut self, view_id: i64, since: i64) -> Result<(), Error>;

    /// Inserts one emission row.
    fn insert_map(
        &mut self,
        view_id: i64,
        sequence: i64,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
    ) -> Result<(), Error>;

    /// Records the sequence the index now reflects and the row count.
    fn set_view_state(
        &mut self,
        view_id: i64,
        last_sequence: i64,
        total_docs: i64,
    ) -> Result<(), Error>;
}

/// A transactional store for view registry rows and map emissions, plus
/// read-only access to the revision history that feeds them.
///
/// The store is single-writer: [`IndexStore::update`] serializes writers,
/// and readers never observe a partially applied transaction.
pub trait IndexStore: IndexReader + Send + Sync + Debug {
    /// Registers `name`, inserting a fresh row if absent. If the row exists
    /// with a different version, the version is updated and `last_sequence`
    /// resets to 0 in the same write, invalidating the index.
    fn upsert_view(&self, name: &str, version: &str) -> Result<ViewUpsert, Error>;

    /// Removes the registry row and every `maps` row for `name`. Removing a
    /// name that was never registered is a no-op.
    fn delete_view(&self, name: &str) -> Result<(), Error>;

    /// Runs `work` inside a write transaction. If it returns an error, every
    /// mutation it performed is rolled back and the error is returned.
    fn update(
        &self,
        work: &mut dyn FnMut(&mut dyn IndexWriter) -> Result<(), Error>,
    ) -> Result<(), Error>;
}
