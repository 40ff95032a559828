//! Options for customizing a view query and the rows it produces.

use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::JsonValue;

/// A predicate applied to each row after it is constructed.
pub type RowFilter = Arc<dyn Fn(&QueryRow) -> bool + Send + Sync>;

/// The knobs a view query accepts. Construct with [`QueryOptions::default`]
/// and chain the builder methods.
#[derive(Clone)]
pub struct QueryOptions {
    /// Restrict the query to rows whose keys are in this set. When present,
    /// the range bounds are ignored and rows come back in the iteration
    /// order of the set.
    pub keys: Option<Vec<JsonValue>>,
    /// The inclusive lower key bound (upper when descending).
    pub start_key: Option<JsonValue>,
    /// The upper key bound (lower when descending); see `inclusive_end`.
    pub end_key: Option<JsonValue>,
    /// Tie-breaks rows whose key equals `start_key`.
    pub start_key_doc_id: Option<String>,
    /// Tie-breaks rows whose key equals `end_key`.
    pub end_key_doc_id: Option<String>,
    /// Whether a row whose key equals `end_key` is included. Defaults to
    /// true.
    pub inclusive_end: bool,
    /// Reverses the scan and swaps the start/end bound semantics.
    pub descending: bool,
    /// Rows to drop from the front of the scan output.
    pub skip: usize,
    /// Maximum rows to scan, applied after `skip`.
    pub limit: Option<usize>,
    /// When ≥ 1, widens `end_key` to every key sharing its prefix to this
    /// depth.
    pub prefix_match_level: u32,
    /// Group rows by key before reducing.
    pub group: bool,
    /// The number of leading array elements that define a group. A nonzero
    /// level implies `group`.
    pub group_level: usize,
    /// Reduce even without grouping. Requires the view to have a reduce
    /// function.
    pub reduce: bool,
    /// Join each row to its document's properties.
    pub include_docs: bool,
    /// Drops rows the predicate rejects, after construction.
    pub post_filter: Option<RowFilter>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            keys: None,
            start_key: None,
            end_key: None,
            start_key_doc_id: None,
            end_key_doc_id: None,
            inclusive_end: true,
            descending: false,
            skip: 0,
            limit: None,
            prefix_match_level: 0,
            group: false,
            group_level: 0,
            reduce: false,
            include_docs: false,
            post_filter: None,
        }
    }
}

impl QueryOptions {
    /// Restricts the query to the given key set.
    #[must_use]
    pub fn with_keys(mut self, keys: Vec<JsonValue>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Sets the start key bound.
    #[must_use]
    pub fn with_start_key(mut self, key: impl Into<JsonValue>) -> Self {
        self.start_key = Some(key.into());
        self
    }

    /// Sets the end key bound.
    #[must_use]
    pub fn with_end_key(mut self, key: impl Into<JsonValue>) -> Self {
        self.end_key = Some(key.into());
        self
    }

    /// Sets the document-id tie-breaker for rows matching the start key.
    #[must_use]
    pub fn with_start_key_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.start_key_doc_id = Some(doc_id.into());
        self
    }

    /// Sets the document-id tie-breaker for rows matching the end key.
    #[must_use]
    pub fn with_end_key_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.end_key_doc_id = Some(doc_id.into());
        self
    }

    /// Controls whether rows matching the end key are included.
    #[must_use]
    pub const fn with_inclusive_end(mut self, inclusive: bool) -> Self {
        self.inclusive_end = inclusive;
        self
    }

    /// Reverses the scan.
    #[must_use]
    pub const fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Drops `skip` rows from the front of the scan.
    #[must_use]
    pub const fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Caps the number of scanned rows.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Widens the end key to every key sharing its prefix to `level`.
    #[must_use]
    pub const fn with_prefix_match_level(mut self, level: u32) -> Self {
        self.prefix_match_level = level;
        self
    }

    /// Groups rows by their full key.
    #[must_use]
    pub const fn grouped(mut self) -> Self {
        self.group = true;
        self
    }

    /// Groups rows by the first `level` elements of their array keys.
    #[must_use]
    pub const fn with_group_level(mut self, level: usize) -> Self {
        self.group = true;
        self.group_level = level;
        self
    }

    /// Reduces the result even without grouping.
    #[must_use]
    pub const fn reduced(mut self) -> Self {
        self.reduce = true;
        self
    }

    /// Joins each row to its document's properties.
    #[must_use]
    pub const fn including_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    /// Applies `filter` to each constructed row, dropping rejected rows.
    #[must_use]
    pub fn with_post_filter(
        mut self,
        filter: impl Fn(&QueryRow) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.post_filter = Some(Arc::new(filter));
        self
    }
}

impl Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("keys", &self.keys)
            .field("start_key", &self.start_key)
            .field("end_key", &self.end_key)
            .field("start_key_doc_id", &self.start_key_doc_id)
            .field("end_key_doc_id", &self.end_key_doc_id)
            .field("inclusive_end", &self.inclusive_end)
            .field("descending", &self.descending)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("prefix_match_level", &self.prefix_match_level)
            .field("group", &self.group)
            .field("group_level", &self.group_level)
            .field("reduce", &self.reduce)
            .field("include_docs", &self.include_docs)
            .field("post_filter", &self.post_filter.as_ref().map(|_| ".."))
            .finish()
    }
}

/// One row of a query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    /// The id of the document that emitted the row. `None` for reduced
    /// rows, which aggregate many documents.
    pub doc_id: Option<String>,
    /// The sequence of the revision that emitted the row; 0 for reduced
    /// rows.
    pub sequence: i64,
    /// The emitted key, or the group key for grouped rows.
    pub key: JsonValue,
    /// The emitted (or reduced) value.
    pub value: Option<JsonValue>,
    /// The document's properties, present when `include_docs` was requested.
    pub doc_contents: Option<JsonValue>,
}
