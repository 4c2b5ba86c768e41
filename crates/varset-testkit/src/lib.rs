//! Test fixtures for the varset engine.
//!
//! [`ManualProvider`] lets tests step the scheduler deterministically by
//! completing fetches on command; [`metric_tree`] fabricates option lists
//! from a synthetic metric hierarchy.

pub mod manual;
pub mod metric_tree;

pub use manual::ManualProvider;
pub use metric_tree::{metric_options, query_metric_tree};
