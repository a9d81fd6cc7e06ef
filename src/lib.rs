//! deg: a Dynamic Exploration Graph index for approximate nearest
//! neighbor search.
//!
//! The index is an even-regular proximity graph over fixed-length feature
//! vectors. Every vertex keeps exactly K sorted neighbor slots; slots not
//! yet filled hold a self-loop placeholder with weight zero. The graph
//! supports online insertion and removal while a randomized edge-swap pass
//! keeps the edge set close to a relative neighborhood graph.
//!
//! Module map:
//!
//! - `space`: distance metrics and feature encoding (f32 and u8 vectors)
//! - `graph`: the mutable [`SizeBoundedGraph`] arena and the compacted
//!   immutable [`ReadOnlyGraph`], both behind the [`SearchGraph`] trait
//! - `search`: epsilon-greedy beam search, bounded exploration, path checks
//! - `builder`: queued insert/remove processing and edge improvement
//! - `analysis`: diagnostics over a finished graph
//!
//! # Example
//!
//! ```no_run
//! use deg::{FeatureView, FloatSpace, GraphBuilder, Metric, SearchGraph, SizeBoundedGraph};
//!
//! # fn main() -> deg::Result<()> {
//! let space = FloatSpace::new(128, Metric::L2);
//! let graph = SizeBoundedGraph::new(10_000, 16, space)?;
//! let mut builder = GraphBuilder::with_seed(graph, 7);
//!
//! let vector = vec![0.0f32; 128];
//! builder.add_entry(0, FeatureView::F32(&vector))?;
//! let graph = builder.build(false, |_| deg::BuildControl::Continue)?;
//!
//! let query = graph.feature_space().encode(FeatureView::F32(&vector))?;
//! let results = graph.search(&graph.entry_indices(), &query, 0.1, 10, None, 0);
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod builder;
pub mod error;
pub mod filter;
pub mod graph;
pub mod search;
pub mod space;

pub use builder::{
    optimize_edges, BuildControl, BuilderConfig, BuilderHandle, BuilderStatus, GraphBuilder,
    OptimizationTarget,
};
pub use error::{DegError, Result};
pub use filter::Filter;
pub use graph::{MutableGraph, ReadOnlyGraph, SearchGraph, SizeBoundedGraph};
pub use search::{explore, has_path, search, search_batch, ObjectDistance, ResultSet};
pub use space::{bytes_to_f32, f32_to_bytes, FeatureView, FloatSpace, Metric};
