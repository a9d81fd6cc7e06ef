//! Dense, immutable graph store for serving.
//!
//! Produced by freezing a [`SizeBoundedGraph`](crate::SizeBoundedGraph) or
//! by loading a graph file. Internal indices are contiguous, which makes the
//! visited arrays of the search engine as small as they can get.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{DegError, Result};
use crate::graph::io::{self, Header};
use crate::graph::SearchGraph;
use crate::space::{FloatSpace, Metric};

pub struct ReadOnlyGraph {
    space: FloatSpace,
    edges_per_vertex: usize,
    size: u32,
    features: Vec<u8>,
    neighbor_indices: Vec<u32>,
    neighbor_weights: Vec<f32>,
    labels: Vec<u32>,
    label_to_index: HashMap<u32, u32>,
}

impl ReadOnlyGraph {
    pub(crate) fn from_parts(
        space: FloatSpace,
        edges_per_vertex: usize,
        features: Vec<u8>,
        neighbor_indices: Vec<u32>,
        neighbor_weights: Vec<f32>,
        labels: Vec<u32>,
    ) -> Self {
        let label_to_index = labels
            .iter()
            .enumerate()
            .map(|(index, &label)| (label, index as u32))
            .collect();
        Self {
            size: labels.len() as u32,
            space,
            edges_per_vertex,
            features,
            neighbor_indices,
            neighbor_weights,
            labels,
            label_to_index,
        }
    }

    #[inline]
    fn adjacency_range(&self, index: u32) -> std::ops::Range<usize> {
        let start = index as usize * self.edges_per_vertex;
        start..start + self.edges_per_vertex
    }

    /// Load a graph file into a dense store, ignoring its capacity field.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = io::open_reader(path)?;
        let header = io::read_header(&mut reader)?;
        let metric = Metric::from_id(header.metric_id)?;
        let space = FloatSpace::new(header.dim as usize, metric);

        let size = header.size as usize;
        let k = header.edges_per_vertex as usize;
        let data_size = space.data_size();

        let mut features = vec![0u8; size * data_size];
        let mut neighbor_indices = vec![0u32; size * k];
        let mut neighbor_weights = vec![0f32; size * k];
        let mut labels = vec![0u32; size];
        let mut label_to_index = HashMap::with_capacity(size);

        for vertex in 0..size {
            let label = io::read_u32(&mut reader)?;
            if label_to_index.insert(label, vertex as u32).is_some() {
                return Err(DegError::InvalidFormat(format!("duplicate label {label}")));
            }
            labels[vertex] = label;
            reader.read_exact(&mut features[vertex * data_size..(vertex + 1) * data_size])?;
            let mut previous = 0u32;
            for offset in 0..k {
                let neighbor = io::read_u32(&mut reader)?;
                if neighbor >= header.size {
                    return Err(DegError::InvalidFormat(format!(
                        "neighbor {neighbor} out of range for vertex {vertex}"
                    )));
                }
                if offset > 0 && neighbor < previous {
                    return Err(DegError::InvalidFormat(format!(
                        "unsorted adjacency array for vertex {vertex}"
                    )));
                }
                previous = neighbor;
                neighbor_indices[vertex * k + offset] = neighbor;
            }
            for offset in 0..k {
                neighbor_weights[vertex * k + offset] = io::read_f32(&mut reader)?;
            }
        }

        Ok(Self {
            size: header.size,
            space,
            edges_per_vertex: k,
            features,
            neighbor_indices,
            neighbor_weights,
            labels,
            label_to_index,
        })
    }

    /// Write the graph in the same format [`load`](Self::load) reads.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = io::create_writer(path)?;
        io::write_header(
            &mut writer,
            &Header {
                capacity: self.size,
                size: self.size,
                edges_per_vertex: self.edges_per_vertex as u32,
                dim: self.space.dim() as u32,
                metric_id: self.space.metric().id(),
            },
        )?;
        let data_size = self.space.data_size();
        for vertex in 0..self.size as usize {
            writer.write_all(&self.labels[vertex].to_le_bytes())?;
            writer.write_all(&self.features[vertex * data_size..(vertex + 1) * data_size])?;
            let range = vertex * self.edges_per_vertex..(vertex + 1) * self.edges_per_vertex;
            io::write_u32_slice(&mut writer, &self.neighbor_indices[range.clone()])?;
            io::write_f32_slice(&mut writer, &self.neighbor_weights[range])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SearchGraph for ReadOnlyGraph {
    #[inline]
    fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    fn edges_per_vertex(&self) -> usize {
        self.edges_per_vertex
    }

    #[inline]
    fn feature_space(&self) -> &FloatSpace {
        &self.space
    }

    #[inline]
    fn slot_bound(&self) -> u32 {
        self.size
    }

    #[inline]
    fn is_live(&self, index: u32) -> bool {
        index < self.size
    }

    #[inline]
    fn feature(&self, index: u32) -> &[u8] {
        let start = index as usize * self.space.data_size();
        &self.features[start..start + self.space.data_size()]
    }

    #[inline]
    fn external_label(&self, index: u32) -> u32 {
        self.labels[index as usize]
    }

    #[inline]
    fn internal_index(&self, label: u32) -> Option<u32> {
        self.label_to_index.get(&label).copied()
    }

    #[inline]
    fn neighbor_indices(&self, index: u32) -> &[u32] {
        &self.neighbor_indices[self.adjacency_range(index)]
    }

    #[inline]
    fn neighbor_weights(&self, index: u32) -> &[f32] {
        &self.neighbor_weights[self.adjacency_range(index)]
    }

    fn entry_indices(&self) -> Vec<u32> {
        if self.size == 0 {
            Vec::new()
        } else {
            vec![0]
        }
    }
}
