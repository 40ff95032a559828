//! View handles and the registry that resolves names to shared view state.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use alderdb_core::collation::Collation;
use alderdb_core::query::{QueryOptions, QueryRow};
use alderdb_core::view::{IndexUpdate, MapFunction, ReduceFunction};
use alderdb_core::Error;
use parking_lot::RwLock;

use crate::database::Database;
use crate::query::executor;
use crate::store::{ScanPlan, ScanRange};

pub(crate) mod indexer;

/// The cached view id before the registry row has been resolved.
const UNKNOWN_VIEW_ID: i64 = -1;

/// The map/reduce function pair registered for a view. Replaced atomically
/// by [`View::set_map_reduce`].
#[derive(Clone)]
pub(crate) struct ViewFunctions {
    pub map: Arc<dyn MapFunction>,
    pub reduce: Option<Arc<dyn ReduceFunction>>,
}

pub(crate) struct ViewData {
    name: String,
    view_id: AtomicI64,
    collation: RwLock<Collation>,
    functions: RwLock<Option<ViewFunctions>>,
}

impl Debug for ViewData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewData")
            .field("name", &self.name)
            .field("view_id", &self.view_id)
            .field("collation", &*self.collation.read())
            .finish_non_exhaustive()
    }
}

/// Resolves view names to the state shared by every handle with that name.
#[derive(Default, Debug)]
pub(crate) struct ViewRegistry {
    views: RwLock<HashMap<String, Arc<ViewData>>>,
}

impl ViewRegistry {
    pub fn resolve(&self, name: &str) -> Arc<ViewData> {
        let mut views = self.views.write();
        views
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(ViewData {
                    name: name.to_string(),
                    view_id: AtomicI64::new(UNKNOWN_VIEW_ID),
                    collation: RwLock::new(Collation::default()),
                    functions: RwLock::new(None),
                })
            })
            .clone()
    }

    pub fn forget(&self, name: &str) {
        self.views.write().remove(name);
    }
}

/// One diagnostic row from [`View::dump`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DumpRow {
    /// The sequence of the emitting revision.
    pub sequence: i64,
    /// The emitted key as JSON text.
    pub key: String,
    /// The emitted value as JSON text, if one was emitted.
    pub value: Option<String>,
}

/// A named, versioned secondary index defined by a map function (and an
/// optional reduce function) over the document store.
///
/// Handles are cheap clones; every handle for the same name shares one
/// underlying state, including the registered functions and collation.
#[derive(Clone)]
pub struct View {
    database: Database,
    data: Arc<ViewData>,
}

impl Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View").field("data", &self.data).finish()
    }
}

impl View {
    pub(crate) fn new(database: Database, data: Arc<ViewData>) -> Self {
        Self { database, data }
    }

    /// The view's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The database that owns this view.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The collation this view's index is ordered under.
    #[must_use]
    pub fn collation(&self) -> Collation {
        *self.data.collation.read()
    }

    /// Sets the collation used for every scan and grouping of this view.
    pub fn set_collation(&self, collation: Collation) {
        *self.data.collation.write() = collation;
    }

    /// The registered map function, if any.
    #[must_use]
    pub fn map_function(&self) -> Option<Arc<dyn MapFunction>> {
        self.data.functions.read().as_ref().map(|f| f.map.clone())
    }

    /// The registered reduce function, if any.
    #[must_use]
    pub fn reduce_function(&self) -> Option<Arc<dyn ReduceFunction>> {
        self.data
            .functions
            .read()
            .as_ref()
            .and_then(|f| f.reduce.clone())
    }

    pub(crate) fn functions(&self) -> Option<ViewFunctions> {
        self.data.functions.read().clone()
    }

    /// Registers this view's map function under `version`.
    ///
    /// Returns true when the registry row changed: the view is new, or the
    /// version differs from the stored one, which resets the index so the
    /// next update rebuilds it.
    pub fn set_map(&self, map: Arc<dyn MapFunction>, version: &str) -> Result<bool, Error> {
        self.set_map_reduce(map, None, version)
    }

    /// Registers this view's map and reduce functions under `version`.
    ///
    /// The functions live only in memory and must be re-registered on every
    /// process start. They must be pure; the engine replays and reorders
    /// them freely.
    pub fn set_map_reduce(
        &self,
        map: Arc<dyn MapFunction>,
        reduce: Option<Arc<dyn ReduceFunction>>,
        version: &str,
    ) -> Result<bool, Error> {
        self.database.ensure_open()?;
        *self.data.functions.write() = Some(ViewFunctions { map, reduce });
        let upsert = self.database.store().upsert_view(self.name(), version)?;
        self.data.view_id.store(upsert.view_id, Ordering::SeqCst);
        if upsert.version_changed {
            tracing::debug!(view = self.name(), version, "view version changed, index reset");
        }
        Ok(upsert.version_changed)
    }

    /// The view's registry id, resolving and caching it on first use.
    /// Returns a non-positive id when the view is not registered.
    pub fn view_id(&self) -> Result<i64, Error> {
        self.database.ensure_open()?;
        let cached = self.data.view_id.load(Ordering::SeqCst);
        if cached >= 0 {
            return Ok(cached);
        }
        let resolved = self
            .database
            .store()
            .get_view(self.name())?
            .map_or(UNKNOWN_VIEW_ID, |record| record.view_id);
        if resolved > 0 {
            self.data.view_id.store(resolved, Ordering::SeqCst);
        }
        Ok(resolved)
    }

    /// The last revision sequence the index reflects, or -1 when the view
    /// has never been registered.
    pub fn last_sequence_indexed(&self) -> Result<i64, Error> {
        self.database.ensure_open()?;
        Ok(self
            .database
            .store()
            .get_view(self.name())?
            .map_or(-1, |record| record.last_sequence))
    }

    /// The number of rows in the index as of its last update.
    pub fn total_rows(&self) -> Result<i64, Error> {
        self.database.ensure_open()?;
        Ok(self
            .database
            .store()
            .get_view(self.name())?
            .map_or(0, |record| record.total_docs))
    }

    /// Whether the document store has revisions the index does not reflect.
    pub fn is_stale(&self) -> Result<bool, Error> {
        Ok(self.last_sequence_indexed()? < self.database.max_sequence()?)
    }

    /// Brings the index up to date with the document store.
    ///
    /// On return the index reflects every revision at or below the store's
    /// max sequence as of the start of the transaction, or the operation
    /// failed atomically and nothing changed.
    pub fn update_index(&self) -> Result<IndexUpdate, Error> {
        indexer::update_index(&self.database, self)
    }

    /// Deletes the persisted index rows, leaving the registration in place.
    /// The index is rebuilt from scratch on the next update.
    pub fn delete_index(&self) -> Result<(), Error> {
        self.database.ensure_open()?;
        let view_id = self.view_id()?;
        if view_id <= 0 {
            return Ok(());
        }
        self.database.store().update(&mut |txn| {
            txn.delete_maps_for_view(view_id)?;
            txn.set_view_state(view_id, 0, 0)
        })
    }

    /// Deletes the view persistently: the registry row and every index row.
    pub fn delete(&self) -> Result<(), Error> {
        self.database.ensure_open()?;
        self.database.store().delete_view(self.name())?;
        self.database.registry().forget(self.name());
        self.data.view_id.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Queries the persisted index. Does not update it first; see
    /// [`Database::query_view`] for the convenience that does.
    pub fn query(&self, options: &QueryOptions) -> Result<Vec<QueryRow>, Error> {
        executor::query(&self.database, self, options)
    }

    /// Lists every index row in key order; a diagnostic aid.
    pub fn dump(&self) -> Result<Vec<DumpRow>, Error> {
        self.database.ensure_open()?;
        let view_id = self.view_id()?;
        if view_id <= 0 {
            return Ok(Vec::new());
        }
        let plan = ScanPlan {
            view_id,
            collation: self.collation(),
            range: ScanRange::Range {
                lower: None,
                upper: None,
            },
            descending: false,
            skip: 0,
            limit: None,
        };
        let entries = self.database.store().scan_index(&plan)?;
        entries
            .into_iter()
            .map(|entry| {
                Ok(DumpRow {
                    sequence: entry.sequence,
                    key: serde_json::to_string(&entry.key)?,
                    value: entry
                        .value
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
                })
            })
            .collect()
    }
}
