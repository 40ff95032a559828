//! Query execution over the persisted index: planning, scanning, and
//! grouped reduction. Queries never invoke map functions; they read only
//! what the indexer has persisted.

pub(crate) mod executor;
pub(crate) mod planner;
pub(crate) mod reduce;
