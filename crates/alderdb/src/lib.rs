//! AlderDb: an incremental, persistent map/reduce view engine for document
//! databases.
//!
//! This omnibus crate re-exports the two crates that make up AlderDb:
//!
//! - [`core`]: shared types — the JSON key collation codec, map/reduce
//!   function traits, query options, and the error model.
//! - [`local`]: the engine — the index store, the database and view
//!   registry, the incremental indexer, and query execution.

#![forbid(unsafe_code)]
#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms,
)]
#![allow(clippy::option_if_let_else, clippy::module_name_repetitions)]

pub use alderdb_core as core;
pub use alderdb_local as local;

pub use alderdb_local::{Configuration, Database, LocalStore, View};
