//! Error types for graph construction, search, and persistence.

use thiserror::Error;

use crate::space::Metric;

/// Errors reported by graph stores, the builder, and persistence.
#[derive(Debug, Error)]
pub enum DegError {
    /// A vertex with this external label is already present.
    #[error("a vertex with label {0} already exists")]
    DuplicateLabel(u32),

    /// No vertex with this external label exists.
    #[error("no vertex with label {0}")]
    UnknownLabel(u32),

    /// An internal index referred to a slot outside the live range.
    #[error("internal index {index} out of range (bound {bound})")]
    IndexOutOfRange { index: u32, bound: u32 },

    /// The graph was created with a fixed capacity and it is full.
    #[error("graph capacity of {0} vertices exhausted")]
    CapacityExhausted(u32),

    /// A feature vector had the wrong number of elements.
    #[error("feature has {got} elements, space requires {expected}")]
    ShapeError { expected: usize, got: usize },

    /// A feature vector's element type does not match the metric.
    #[error("feature element type does not match the {0:?} metric")]
    DtypeError(Metric),

    /// The graph file does not exist.
    #[error("graph file not found: {0}")]
    FileNotFound(String),

    /// The graph file exists but its contents are not a valid graph.
    #[error("invalid graph file: {0}")]
    InvalidFormat(String),

    /// The file header named a metric this build does not know.
    #[error("unknown metric id {0}")]
    UnknownMetric(u8),

    /// A configuration value was outside its allowed range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Underlying I/O failure while reading or writing a graph file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DegError>;
