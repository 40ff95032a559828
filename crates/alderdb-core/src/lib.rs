//! Core functionality and types for AlderDb.
//!
//! This crate defines the vocabulary shared by every AlderDb component: the
//! JSON key [`collation`] codec, the [`revision`] id comparator, the
//! map/reduce function traits in [`view`], and the [`query`] option and row
//! types. The index engine itself lives in `alderdb-local`.

#![forbid(unsafe_code)]
#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms,
)]
#![allow(
    clippy::missing_errors_doc, // TODO clippy::missing_errors_doc
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
)]

/// JSON key serialization and the three view collations.
pub mod collation;
/// Types for customizing view queries and interpreting their results.
pub mod query;
/// Revision identifiers and the read-only revision record.
pub mod revision;
/// Map/reduce function traits, the emitter, and the view compiler.
pub mod view;

mod error;

pub use error::{Error, Status};

/// A type that implements [`Error`](std::error::Error) and is threadsafe.
pub trait AnyError: std::error::Error + Send + Sync + 'static {}

impl<T> AnyError for T where T: std::error::Error + Send + Sync + 'static {}

/// A JSON value emitted as a view key or value.
pub use serde_json::Value as JsonValue;

/// The properties of a document, as handed to a map function.
pub type JsonObject = serde_json::Map<String, JsonValue>;
