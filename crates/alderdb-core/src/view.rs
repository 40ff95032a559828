//! The map/reduce function traits, the emitter handed to map functions, and
//! the pluggable view compiler.

use std::fmt::Debug;
use std::sync::Arc;

use crate::collation::encode_key;
use crate::{AnyError, JsonObject, JsonValue};

/// The outcome of bringing a view's index up to date.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IndexUpdate {
    /// New revisions were indexed.
    Updated,
    /// The index already covered every revision; nothing was written.
    NotModified,
}

/// A user-supplied map function.
///
/// Map functions must be pure: deterministic, side-effect free, and emitting
/// the same pairs for the same document every time. The engine relies on
/// that to cache and replay them. A map function lives only in memory and
/// must be re-registered on every process start.
///
/// Any `Fn(&JsonObject, &mut Emitter) + Send + Sync` closure is a map
/// function; implement the trait directly when the function can fail.
pub trait MapFunction: Send + Sync {
    /// Examines `document` and emits zero or more key/value pairs for it.
    ///
    /// An error is logged by the indexer and the rest of the document's
    /// emissions are skipped; it never aborts the index build.
    fn map(&self, document: &JsonObject, emitter: &mut Emitter) -> Result<(), Box<dyn AnyError>>;
}

impl<F> MapFunction for F
where
    F: Fn(&JsonObject, &mut Emitter) + Send + Sync,
{
    fn map(&self, document: &JsonObject, emitter: &mut Emitter) -> Result<(), Box<dyn AnyError>> {
        self(document, emitter);
        Ok(())
    }
}

/// A user-supplied reduce function, aggregating one batch of mapped pairs.
///
/// When `rereduce` is true, `values` holds previously reduced outputs rather
/// than raw mapped values. The engine reduces each group in a single shot,
/// but implementations must still honor the flag so they stay usable when a
/// caller chains reductions itself.
pub trait ReduceFunction: Send + Sync {
    /// Reduces `values` (paired with `keys` unless rereducing) to one value.
    fn reduce(
        &self,
        keys: &[JsonValue],
        values: &[JsonValue],
        rereduce: bool,
    ) -> Result<JsonValue, Box<dyn AnyError>>;
}

impl<F> ReduceFunction for F
where
    F: Fn(&[JsonValue], &[JsonValue], bool) -> JsonValue + Send + Sync,
{
    fn reduce(
        &self,
        keys: &[JsonValue],
        values: &[JsonValue],
        rereduce: bool,
    ) -> Result<JsonValue, Box<dyn AnyError>> {
        Ok(self(keys, values, rereduce))
    }
}

/// One key/value pair produced by a map function, serialized and ready to
/// store.
#[derive(Debug, Clone)]
pub struct Emitted {
    /// The canonical JSON bytes of the emitted key.
    pub key: Vec<u8>,
    /// The JSON bytes of the emitted value, if one was emitted.
    pub value: Option<Vec<u8>>,
}

/// Collects the pairs a map function emits for a single document revision.
///
/// Emissions are buffered in memory; the indexer persists them after the map
/// function returns so that a misbehaving function cannot leave the store
/// half-written.
#[derive(Debug, Default)]
pub struct Emitter {
    rows: Vec<Emitted>,
}

impl Emitter {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits one key/value pair. Safe to call any number of times per
    /// document. A key that cannot be serialized is logged and dropped.
    pub fn emit(&mut self, key: JsonValue, value: Option<JsonValue>) {
        let key = match encode_key(&key) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, "could not serialize emitted key");
                return;
            }
        };
        let value = match value.as_ref().map(encode_key).transpose() {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(%error, "could not serialize emitted value");
                return;
            }
        };
        self.rows.push(Emitted { key, value });
    }

    /// The number of pairs emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consumes the emitter, returning the collected pairs.
    #[must_use]
    pub fn into_rows(self) -> Vec<Emitted> {
        self.rows
    }
}

/// Compiles map/reduce functions from design-document source code.
///
/// The engine holds no global compiler; one is injected through the
/// database's configuration.
pub trait ViewCompiler: Send + Sync + Debug {
    /// Compiles `source` in `language` into a map function, or `None` if the
    /// language or source is unsupported.
    fn compile_map(&self, source: &str, language: &str) -> Option<Arc<dyn MapFunction>>;

    /// Compiles `source` in `language` into a reduce function, or `None` if
    /// the language or source is unsupported.
    fn compile_reduce(&self, source: &str, language: &str) -> Option<Arc<dyn ReduceFunction>>;
}

/// Totals an array of numbers; a convenience for reduce functions.
/// Non-numeric values are logged and skipped.
#[must_use]
pub fn total_values(values: &[JsonValue]) -> f64 {
    let mut total = 0.0;
    for value in values {
        if let Some(number) = value.as_f64() {
            total += number;
        } else {
            tracing::warn!(%value, "non-numeric value in total_values");
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn emitter_collects_serialized_pairs() {
        let mut emitter = Emitter::new();
        emitter.emit(json!(["a", 1]), Some(json!({"n": 2})));
        emitter.emit(json!(null), None);
        let rows = emitter.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, br#"["a",1]"#.to_vec());
        assert_eq!(rows[0].value.as_deref(), Some(br#"{"n":2}"#.as_slice()));
        assert_eq!(rows[1].key, b"null".to_vec());
        assert_eq!(rows[1].value, None);
    }

    #[test]
    fn closures_are_map_functions() {
        let map: &dyn MapFunction = &|document: &JsonObject, emitter: &mut Emitter| {
            emitter.emit(document["_id"].clone(), None);
        };
        let mut emitter = Emitter::new();
        let document = json!({"_id": "doc-1"});
        map.map(document.as_object().unwrap(), &mut emitter).unwrap();
        assert_eq!(emitter.len(), 1);
    }

    #[test]
    fn total_values_skips_non_numbers() {
        let values = [json!(1), json!(2.5), json!("three")];
        let total = total_values(&values);
        assert!((total - 3.5).abs() < f64::EPSILON);
    }
}
