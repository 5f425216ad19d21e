//! Artifex Graph
//!
//! This crate is the graph store of the artifex engine: an indexed, immutable
//! snapshot of the node and edge collections the editor last published.
//!
//! Building a [`Graph`] never fails. Structural checks are opt-in:
//! - [`Graph::validate`] rejects duplicate ids, dangling edges and cycles
//! - [`Graph::upstream_order`] checks only what one target depends on
//! - [`Graph::dirty_nodes`] compares two snapshots for scoped cache invalidation

mod error;
mod graph;

pub use error::GraphError;
pub use graph::Graph;
