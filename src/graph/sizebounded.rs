//! Mutable, capacity-bounded graph store.
//!
//! Slots freed by removals go onto a free-list and are reused by the next
//! insert, so internal indices stay stable for the lifetime of a vertex.
//! `save` compacts the free-list holes away with an order-preserving index
//! remap, which keeps adjacency arrays sorted in the written file.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use tracing::warn;

use crate::error::{DegError, Result};
use crate::graph::io::{self, Header};
use crate::graph::{MutableGraph, ReadOnlyGraph, SearchGraph};
use crate::space::{FloatSpace, Metric};

#[derive(Debug)]
pub struct SizeBoundedGraph {
    space: FloatSpace,
    capacity: u32,
    edges_per_vertex: usize,
    features: Vec<u8>,
    neighbor_indices: Vec<u32>,
    neighbor_weights: Vec<f32>,
    labels: Vec<u32>,
    occupied: Vec<bool>,
    label_to_index: HashMap<u32, u32>,
    free_slots: Vec<u32>,
    slot_bound: u32,
}

impl SizeBoundedGraph {
    /// Create an empty graph with room for `capacity` vertices of
    /// `edges_per_vertex` neighbors each.
    pub fn new(capacity: u32, edges_per_vertex: usize, space: FloatSpace) -> Result<Self> {
        if edges_per_vertex == 0 || edges_per_vertex > 255 {
            return Err(DegError::InvalidParameter(format!(
                "edges_per_vertex must be in 1..=255, got {edges_per_vertex}"
            )));
        }
        if capacity == 0 {
            return Err(DegError::InvalidParameter("capacity must be positive".into()));
        }
        let cap = capacity as usize;
        Ok(Self {
            features: vec![0u8; cap * space.data_size()],
            neighbor_indices: vec![0u32; cap * edges_per_vertex],
            neighbor_weights: vec![0f32; cap * edges_per_vertex],
            labels: vec![0u32; cap],
            occupied: vec![false; cap],
            label_to_index: HashMap::with_capacity(cap),
            free_slots: Vec::new(),
            slot_bound: 0,
            space,
            capacity,
            edges_per_vertex,
        })
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Live internal indices in ascending order.
    pub fn live_indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.slot_bound).filter(|&i| self.occupied[i as usize])
    }

    #[inline]
    fn adjacency_range(&self, index: u32) -> std::ops::Range<usize> {
        let start = index as usize * self.edges_per_vertex;
        start..start + self.edges_per_vertex
    }

    #[inline]
    fn feature_range(&self, index: u32) -> std::ops::Range<usize> {
        let start = index as usize * self.space.data_size();
        start..start + self.space.data_size()
    }

    /// Snapshot into a dense read-only graph. Free-list holes are compacted
    /// away, so the result's internal indices may differ from this graph's.
    #[must_use]
    pub fn to_read_only(&self) -> ReadOnlyGraph {
        let (remap, live) = self.compaction_remap();
        let k = self.edges_per_vertex;
        let data_size = self.space.data_size();

        let mut features = Vec::with_capacity(live.len() * data_size);
        let mut indices = Vec::with_capacity(live.len() * k);
        let mut weights = Vec::with_capacity(live.len() * k);
        let mut labels = Vec::with_capacity(live.len());
        for &slot in &live {
            features.extend_from_slice(&self.features[self.feature_range(slot)]);
            for &n in &self.neighbor_indices[self.adjacency_range(slot)] {
                indices.push(remap[n as usize]);
            }
            weights.extend_from_slice(&self.neighbor_weights[self.adjacency_range(slot)]);
            labels.push(self.labels[slot as usize]);
        }
        ReadOnlyGraph::from_parts(self.space.clone(), k, features, indices, weights, labels)
    }

    /// Order-preserving map from live slots to dense indices.
    fn compaction_remap(&self) -> (Vec<u32>, Vec<u32>) {
        let mut remap = vec![u32::MAX; self.slot_bound as usize];
        let live: Vec<u32> = self.live_indices().collect();
        for (dense, &slot) in live.iter().enumerate() {
            remap[slot as usize] = dense as u32;
        }
        (remap, live)
    }

    /// Write the graph to `path`, compacting removed slots.
    pub fn save(&self, path: &Path) -> Result<()> {
        let (remap, live) = self.compaction_remap();
        let mut writer = io::create_writer(path)?;
        io::write_header(
            &mut writer,
            &Header {
                capacity: self.capacity,
                size: live.len() as u32,
                edges_per_vertex: self.edges_per_vertex as u32,
                dim: self.space.dim() as u32,
                metric_id: self.space.metric().id(),
            },
        )?;
        for &slot in &live {
            writer.write_all(&self.labels[slot as usize].to_le_bytes())?;
            writer.write_all(&self.features[self.feature_range(slot)])?;
            let remapped: Vec<u32> = self.neighbor_indices[self.adjacency_range(slot)]
                .iter()
                .map(|&n| remap[n as usize])
                .collect();
            io::write_u32_slice(&mut writer, &remapped)?;
            io::write_f32_slice(&mut writer, &self.neighbor_weights[self.adjacency_range(slot)])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a graph written by [`save`](Self::save).
    ///
    /// `new_capacity` of `None` keeps the capacity recorded in the file;
    /// either way the capacity is at least the stored vertex count.
    pub fn load(path: &Path, new_capacity: Option<u32>) -> Result<Self> {
        let mut reader = io::open_reader(path)?;
        let header = io::read_header(&mut reader)?;
        let metric = Metric::from_id(header.metric_id)?;
        let space = FloatSpace::new(header.dim as usize, metric);
        let capacity = new_capacity
            .unwrap_or(header.capacity)
            .max(header.size)
            .max(1);
        let mut graph = Self::new(capacity, header.edges_per_vertex as usize, space)?;

        let data_size = graph.space.data_size();
        let k = graph.edges_per_vertex;
        for slot in 0..header.size {
            let label = io::read_u32(&mut reader)?;
            if graph.label_to_index.insert(label, slot).is_some() {
                return Err(DegError::InvalidFormat(format!("duplicate label {label}")));
            }
            graph.labels[slot as usize] = label;
            graph.occupied[slot as usize] = true;

            let range = slot as usize * data_size..(slot as usize + 1) * data_size;
            reader.read_exact(&mut graph.features[range])?;

            let adj = slot as usize * k..(slot as usize + 1) * k;
            let mut previous = 0u32;
            for (offset, cell) in graph.neighbor_indices[adj.clone()].iter_mut().enumerate() {
                let neighbor = io::read_u32(&mut reader)?;
                if neighbor >= header.size {
                    return Err(DegError::InvalidFormat(format!(
                        "neighbor {neighbor} out of range for vertex {slot}"
                    )));
                }
                if offset > 0 && neighbor < previous {
                    return Err(DegError::InvalidFormat(format!(
                        "unsorted adjacency array for vertex {slot}"
                    )));
                }
                previous = neighbor;
                *cell = neighbor;
            }
            for cell in graph.neighbor_weights[adj].iter_mut() {
                *cell = io::read_f32(&mut reader)?;
            }
        }
        graph.slot_bound = header.size;
        Ok(graph)
    }
}

impl SearchGraph for SizeBoundedGraph {
    #[inline]
    fn size(&self) -> u32 {
        self.label_to_index.len() as u32
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
        self.slot_bound
    }

    #[inline]
    fn is_live(&self, index: u32) -> bool {
        index < self.slot_bound && self.occupied[index as usize]
    }

    #[inline]
    fn feature(&self, index: u32) -> &[u8] {
        &self.features[self.feature_range(index)]
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
        self.live_indices().take(1).collect()
    }
}

impl MutableGraph for SizeBoundedGraph {
    fn add_vertex(&mut self, label: u32, feature: &[u8]) -> Result<u32> {
        if self.label_to_index.contains_key(&label) {
            return Err(DegError::DuplicateLabel(label));
        }
        if self.size() == self.capacity {
            return Err(DegError::CapacityExhausted(self.capacity));
        }
        if feature.len() != self.space.data_size() {
            return Err(DegError::ShapeError {
                expected: self.space.data_size(),
                got: feature.len(),
            });
        }

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                let slot = self.slot_bound;
                self.slot_bound += 1;
                slot
            }
        };

        let feature_range = self.feature_range(slot);
        self.features[feature_range].copy_from_slice(feature);
        let adjacency = self.adjacency_range(slot);
        self.neighbor_indices[adjacency.clone()].fill(slot);
        self.neighbor_weights[adjacency].fill(0.0);
        self.labels[slot as usize] = label;
        self.occupied[slot as usize] = true;
        self.label_to_index.insert(label, slot);
        Ok(slot)
    }

    fn remove_vertex(&mut self, label: u32) -> Result<Vec<u32>> {
        let index = self.try_internal_index(label)?;

        let involved: Vec<u32> = self
            .neighbor_indices(index)
            .iter()
            .copied()
            .filter(|&n| n != index)
            .collect();

        // former neighbors keep a self-loop hole where the edge was
        for &neighbor in &involved {
            self.change_edge(neighbor, index, neighbor, 0.0);
        }

        let adjacency = self.adjacency_range(index);
        self.neighbor_indices[adjacency.clone()].fill(index);
        self.neighbor_weights[adjacency].fill(0.0);
        self.occupied[index as usize] = false;
        self.label_to_index.remove(&label);
        self.free_slots.push(index);
        Ok(involved)
    }

    fn change_edge(&mut self, index: u32, from_neighbor: u32, to_neighbor: u32, weight: f32) -> bool {
        let range = self.adjacency_range(index);
        let indices = &mut self.neighbor_indices[range.clone()];
        let weights = &mut self.neighbor_weights[range];

        let Ok(mut pos) = indices.binary_search(&from_neighbor) else {
            warn!(index, from_neighbor, "cannot change a missing edge");
            return false;
        };

        // shift towards the insertion point to keep the array sorted
        if to_neighbor > from_neighbor {
            while pos + 1 < indices.len() && indices[pos + 1] < to_neighbor {
                indices[pos] = indices[pos + 1];
                weights[pos] = weights[pos + 1];
                pos += 1;
            }
        } else {
            while pos > 0 && indices[pos - 1] > to_neighbor {
                indices[pos] = indices[pos - 1];
                weights[pos] = weights[pos - 1];
                pos -= 1;
            }
        }
        indices[pos] = to_neighbor;
        weights[pos] = weight;
        true
    }

    fn change_edges(&mut self, index: u32, indices: &[u32], weights: &[f32]) -> Result<()> {
        if indices.len() != self.edges_per_vertex || weights.len() != self.edges_per_vertex {
            return Err(DegError::ShapeError {
                expected: self.edges_per_vertex,
                got: indices.len().min(weights.len()),
            });
        }
        if indices.windows(2).any(|w| w[0] > w[1]) {
            return Err(DegError::InvalidParameter(
                "adjacency arrays must be sorted ascending".into(),
            ));
        }
        let range = self.adjacency_range(index);
        self.neighbor_indices[range.clone()].copy_from_slice(indices);
        self.neighbor_weights[range].copy_from_slice(weights);
        Ok(())
    }
}
