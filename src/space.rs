//! Feature space: metric, dimension, and the byte layout of stored vectors.
//!
//! Vectors are stored as little-endian byte slices so that `f32` and `u8`
//! element types share one storage and search path. [`FloatSpace`] knows the
//! element type of its metric and decodes on the fly inside the distance
//! kernels; callers hand in typed data through [`FeatureView`] and get the
//! shape/dtype checks of the error taxonomy.

use crate::error::{DegError, Result};

/// Distance metric over stored feature vectors.
///
/// The discriminant doubles as the metric id in graph files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Metric {
    /// Squared Euclidean distance over `f32` elements.
    L2 = 0,
    /// `1 - dot(a, b)` over `f32` elements. Negative for well-correlated
    /// vectors, which flips the exploration-radius scaling during search.
    InnerProduct = 1,
    /// Squared Euclidean distance over `u8` elements.
    L2Uint8 = 2,
}

impl Metric {
    /// Stable id used in the persistence header.
    #[inline]
    #[must_use]
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Metric::L2),
            1 => Ok(Metric::InnerProduct),
            2 => Ok(Metric::L2Uint8),
            other => Err(DegError::UnknownMetric(other)),
        }
    }

    /// Size in bytes of one vector element under this metric.
    #[inline]
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Metric::L2 | Metric::InnerProduct => std::mem::size_of::<f32>(),
            Metric::L2Uint8 => std::mem::size_of::<u8>(),
        }
    }
}

/// A borrowed, typed feature vector handed in by the caller.
#[derive(Debug, Clone, Copy)]
pub enum FeatureView<'a> {
    F32(&'a [f32]),
    U8(&'a [u8]),
}

impl FeatureView<'_> {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            FeatureView::F32(v) => v.len(),
            FeatureView::U8(v) => v.len(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dimension and metric of the vectors a graph stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatSpace {
    metric: Metric,
    dim: usize,
}

impl FloatSpace {
    #[must_use]
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self { metric, dim }
    }

    #[inline]
    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[inline]
    #[must_use]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Size in bytes of one stored vector.
    #[inline]
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.dim * self.metric.element_size()
    }

    /// Validate a typed vector against this space and return its byte image.
    ///
    /// Fails with [`DegError::ShapeError`] on a dimension mismatch and
    /// [`DegError::DtypeError`] when the element type does not match the
    /// metric.
    pub fn encode(&self, feature: FeatureView<'_>) -> Result<Vec<u8>> {
        if feature.len() != self.dim {
            return Err(DegError::ShapeError {
                expected: self.dim,
                got: feature.len(),
            });
        }
        match (self.metric, feature) {
            (Metric::L2 | Metric::InnerProduct, FeatureView::F32(values)) => {
                Ok(f32_to_bytes(values))
            }
            (Metric::L2Uint8, FeatureView::U8(values)) => Ok(values.to_vec()),
            _ => Err(DegError::DtypeError(self.metric)),
        }
    }

    /// Distance between two stored byte images.
    ///
    /// Both slices must have `data_size()` bytes; stored vectors always do.
    #[inline]
    #[must_use]
    pub fn distance(&self, a: &[u8], b: &[u8]) -> f32 {
        debug_assert_eq!(a.len(), self.data_size());
        debug_assert_eq!(b.len(), self.data_size());
        match self.metric {
            Metric::L2 => l2_squared_f32(a, b),
            Metric::InnerProduct => inner_product_f32(a, b),
            Metric::L2Uint8 => l2_squared_u8(a, b),
        }
    }
}

#[inline]
fn read_f32(bytes: &[u8]) -> f32 {
    // Caller guarantees a 4-byte chunk.
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Squared L2 distance over little-endian `f32` bytes.
#[inline]
#[must_use]
pub fn l2_squared_f32(a: &[u8], b: &[u8]) -> f32 {
    let mut sum = 0.0f32;
    for (x, y) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        let d = read_f32(x) - read_f32(y);
        sum += d * d;
    }
    sum
}

/// `1 - dot(a, b)` over little-endian `f32` bytes.
#[inline]
#[must_use]
pub fn inner_product_f32(a: &[u8], b: &[u8]) -> f32 {
    let mut dot = 0.0f32;
    for (x, y) in a.chunks_exact(4).zip(b.chunks_exact(4)) {
        dot += read_f32(x) * read_f32(y);
    }
    1.0 - dot
}

/// Squared L2 distance over `u8` bytes, accumulated in `i32`.
#[inline]
#[must_use]
pub fn l2_squared_u8(a: &[u8], b: &[u8]) -> f32 {
    let mut sum = 0i32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let d = i32::from(x) - i32::from(y);
        sum += d * d;
    }
    sum as f32
}

/// Little-endian byte image of an `f32` slice.
#[must_use]
pub fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian byte image back into `f32` values.
#[must_use]
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(read_f32).collect()
}
