//! Incremental, persistent map/reduce view indexing for AlderDb.
//!
//! A [`Database`] owns an [`store::IndexStore`] and the [`View`]s registered
//! against it. Each view is defined by a user-supplied map function
//! (optionally with a reduce function) keyed by a version string. The
//! indexer replays document revisions incrementally, resolves conflicts
//! deterministically, and queries serve range, group, and reduce reads with
//! JSON-order collation from the persisted index alone.

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

/// Configuration options.
pub mod config;
mod database;
mod query;
/// The persistence abstraction and the built-in local store.
pub mod store;
mod views;

pub use alderdb_core as core;

pub use self::config::Configuration;
pub use self::database::Database;
pub use self::store::LocalStore;
pub use self::views::{DumpRow, View};

#[cfg(test)]
mod tests;
