//! Graph stores and the capability traits that separate reading from mutating.
//!
//! Both stores keep a fixed number of edges per vertex in sorted adjacency
//! arrays. A missing edge is a self-loop placeholder: the vertex's own index
//! with weight zero. `has_edge(v, v)` therefore answers "is v missing an
//! edge", which the builder and repair logic lean on.

mod io;
mod readonly;
mod sizebounded;

pub use readonly::ReadOnlyGraph;
pub use sizebounded::SizeBoundedGraph;

use crate::error::{DegError, Result};
use crate::filter::Filter;
use crate::search::{self, ObjectDistance, ResultSet};
use crate::space::FloatSpace;

/// Read-side capabilities every graph store offers.
///
/// Internal indices are dense for [`ReadOnlyGraph`] and may contain free-list
/// holes for [`SizeBoundedGraph`]; `slot_bound` is the exclusive upper bound
/// of any index that may appear in adjacency arrays.
pub trait SearchGraph {
    fn size(&self) -> u32;
    fn edges_per_vertex(&self) -> usize;
    fn feature_space(&self) -> &FloatSpace;

    /// Exclusive upper bound on internal indices.
    fn slot_bound(&self) -> u32;

    /// Whether this internal index currently holds a vertex.
    fn is_live(&self, index: u32) -> bool;

    /// Byte image of the vertex's feature vector. Panics on a dead index.
    fn feature(&self, index: u32) -> &[u8];

    fn external_label(&self, index: u32) -> u32;
    fn internal_index(&self, label: u32) -> Option<u32>;

    /// Sorted adjacency array, always `edges_per_vertex` entries.
    fn neighbor_indices(&self, index: u32) -> &[u32];

    /// Edge weights parallel to `neighbor_indices`.
    fn neighbor_weights(&self, index: u32) -> &[f32];

    /// Indices to start a search from when the caller has no better guess.
    fn entry_indices(&self) -> Vec<u32>;

    fn has_vertex(&self, label: u32) -> bool {
        self.internal_index(label).is_some()
    }

    fn has_edge(&self, index: u32, neighbor: u32) -> bool {
        self.neighbor_indices(index).binary_search(&neighbor).is_ok()
    }

    /// Weight of the edge to `neighbor`, if present.
    fn edge_weight(&self, index: u32, neighbor: u32) -> Option<f32> {
        self.neighbor_indices(index)
            .binary_search(&neighbor)
            .ok()
            .map(|pos| self.neighbor_weights(index)[pos])
    }

    /// Feature access with an index check, for callers holding untrusted
    /// indices.
    fn try_feature(&self, index: u32) -> Result<&[u8]> {
        if self.is_live(index) {
            Ok(self.feature(index))
        } else {
            Err(DegError::IndexOutOfRange {
                index,
                bound: self.slot_bound(),
            })
        }
    }

    /// Label lookup that reports unknown labels as errors.
    fn try_internal_index(&self, label: u32) -> Result<u32> {
        self.internal_index(label)
            .ok_or(DegError::UnknownLabel(label))
    }

    /// Epsilon-greedy approximate nearest neighbor search.
    ///
    /// `query` is the byte image of a vector in this graph's space. With a
    /// `filter`, only admitted labels enter the result set while traversal
    /// still crosses filtered vertices. A `max_distance_computations` of zero
    /// means unbounded.
    fn search(
        &self,
        entry_indices: &[u32],
        query: &[u8],
        eps: f32,
        k: u32,
        filter: Option<&Filter>,
        max_distance_computations: u32,
    ) -> ResultSet
    where
        Self: Sized,
    {
        search::search(self, entry_indices, query, eps, k, filter, max_distance_computations)
    }

    /// Sample the neighborhood of a stored vertex under a fixed budget of
    /// distance computations. The entry vertex itself is never returned.
    fn explore(&self, entry_index: u32, k: u32, max_distance_computations: u32) -> ResultSet
    where
        Self: Sized,
    {
        search::explore(self, entry_index, k, max_distance_computations)
    }

    /// Greedy walk towards `to_vertex`. Returns the chain of hops from the
    /// target back to the entry vertex, or an empty vector if the walk gave
    /// up before finding it.
    fn has_path(
        &self,
        entry_indices: &[u32],
        to_vertex: u32,
        eps: f32,
        k: u32,
    ) -> Vec<ObjectDistance>
    where
        Self: Sized,
    {
        search::has_path(self, entry_indices, to_vertex, eps, k)
    }
}

/// Mutation capabilities of a growable graph.
pub trait MutableGraph: SearchGraph {
    /// Add a vertex with all edges as self-loop placeholders. Returns the
    /// internal index of the new vertex.
    fn add_vertex(&mut self, label: u32, feature: &[u8]) -> Result<u32>;

    /// Remove a vertex by label. Former neighbors are left with self-loop
    /// placeholders where their edge to the removed vertex was; the returned
    /// list names them so the caller can repair the graph.
    fn remove_vertex(&mut self, label: u32) -> Result<Vec<u32>>;

    /// Replace the edge `index -> from_neighbor` with `index -> to_neighbor`.
    /// Returns false (and leaves the graph untouched) when the edge to
    /// `from_neighbor` does not exist.
    fn change_edge(&mut self, index: u32, from_neighbor: u32, to_neighbor: u32, weight: f32)
        -> bool;

    /// Replace the entire adjacency array of a vertex. The indices must be
    /// sorted ascending and exactly `edges_per_vertex` long.
    fn change_edges(&mut self, index: u32, indices: &[u32], weights: &[f32]) -> Result<()>;
}
