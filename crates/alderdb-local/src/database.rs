//! The database handle that owns the index store and the view registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alderdb_core::query::{QueryOptions, QueryRow};
use alderdb_core::view::{MapFunction, ReduceFunction};
use alderdb_core::{Error, JsonObject, JsonValue};

use crate::config::Configuration;
use crate::store::IndexStore;
use crate::views::{View, ViewRegistry};

/// A database: an [`IndexStore`] plus the views registered against it.
///
/// Handles are cheap clones sharing one state. Closing the database flips a
/// shared flag; every view handle checks it and fails subsequent operations
/// with [`Error::NotOpen`].
#[derive(Clone, Debug)]
pub struct Database {
    data: Arc<Data>,
}

#[derive(Debug)]
struct Data {
    store: Arc<dyn IndexStore>,
    registry: ViewRegistry,
    config: Configuration,
    open: AtomicBool,
}

impl Database {
    /// Creates a database over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn IndexStore>, config: Configuration) -> Self {
        Self {
            data: Arc::new(Data {
                store,
                registry: ViewRegistry::default(),
                config,
                open: AtomicBool::new(true),
            }),
        }
    }

    /// The store this database runs against.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.data.store
    }

    pub(crate) fn registry(&self) -> &ViewRegistry {
        &self.data.registry
    }

    /// Whether the database is still open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.data.open.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    /// Closes the database. In-flight operations observe the flag at their
    /// next document or row boundary and abort; everything afterwards fails
    /// with [`Error::NotOpen`].
    pub fn close(&self) {
        self.data.open.store(false, Ordering::Release);
        tracing::debug!("database closed");
    }

    /// The highest sequence the document store has assigned.
    pub fn max_sequence(&self) -> Result<i64, Error> {
        self.ensure_open()?;
        self.data.store.max_sequence()
    }

    /// Returns a handle to the view named `name`, creating the in-memory
    /// handle if this is the first reference. The view has no map function
    /// until one is registered.
    #[must_use]
    pub fn view(&self, name: &str) -> View {
        View::new(self.clone(), self.data.registry.resolve(name))
    }

    /// Registers (or re-registers) the view named `name`.
    ///
    /// A version change resets the view's indexed sequence; the next index
    /// update rebuilds from scratch.
    pub fn register_view(
        &self,
        name: &str,
        version: &str,
        map: Arc<dyn MapFunction>,
        reduce: Option<Arc<dyn ReduceFunction>>,
    ) -> Result<View, Error> {
        let view = self.view(name);
        view.set_map_reduce(map, reduce, version)?;
        Ok(view)
    }

    /// Registers a view by compiling `map_source` (and optionally
    /// `reduce_source`) with the configured view compiler.
    pub fn register_view_from_source(
        &self,
        name: &str,
        version: &str,
        map_source: &str,
        reduce_source: Option<&str>,
        language: &str,
    ) -> Result<View, Error> {
        let compiler = self
            .data
            .config
            .view_compiler
            .as_ref()
            .ok_or_else(|| Error::BadRequest(String::from("no view compiler registered")))?;
        let map = compiler.compile_map(map_source, language).ok_or_else(|| {
            Error::BadRequest(format!("could not compile map function in {language}"))
        })?;
        let reduce = reduce_source
            .map(|source| {
                compiler.compile_reduce(source, language).ok_or_else(|| {
                    Error::BadRequest(format!("could not compile reduce function in {language}"))
                })
            })
            .transpose()?;
        self.register_view(name, version, map, reduce)
    }

    /// Brings the named view's index up to date, then queries it.
    pub fn query_view(
        &self,
        name: &str,
        options: &QueryOptions,
    ) -> Result<Vec<QueryRow>, Error> {
        let view = self.view(name);
        view.update_index()?;
        view.query(options)
    }
}

/// Materializes a revision body into the properties map handed to map
/// functions and `include_docs` callers. Returns `None` (after logging) when
/// the body is not a JSON object.
pub(crate) fn document_properties(
    body: &[u8],
    doc_id: &str,
    rev_id: &str,
    no_attachments: bool,
) -> Option<JsonObject> {
    let mut properties = match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(map)) => map,
        Ok(_) => {
            tracing::warn!(doc_id, "revision body is not a JSON object");
            return None;
        }
        Err(error) => {
            tracing::warn!(doc_id, %error, "could not parse revision body");
            return None;
        }
    };
    properties.insert(String::from("_id"), JsonValue::String(doc_id.to_string()));
    properties.insert(String::from("_rev"), JsonValue::String(rev_id.to_string()));
    if no_attachments {
        properties.remove("_attachments");
    }
    Some(properties)
}
