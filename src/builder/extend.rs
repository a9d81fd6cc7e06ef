//! Vertex insertion: cold start, streaming scheme, and the LID-aware schemes.

use rand::Rng;
use smallvec::SmallVec;
use tracing::warn;

use crate::analysis::check_rng;
use crate::builder::{AddTask, GraphBuilder, OptimizationTarget, RemoveTask};
use crate::error::Result;
use crate::graph::{MutableGraph, SearchGraph};
use crate::search::ObjectDistance;

impl GraphBuilder {
    pub(super) fn extend(&mut self, batch: Vec<AddTask>) -> Result<()> {
        let k = self.graph.edges_per_vertex();

        let mut remaining = Vec::with_capacity(batch.len());
        for task in batch {
            if (self.graph.size() as usize) < k + 1 {
                self.insert_fully_connected(task)?;
            } else {
                remaining.push(task);
            }
        }
        if remaining.is_empty() {
            return Ok(());
        }

        if self.optimization_target == OptimizationTarget::StreamingData {
            for task in remaining {
                self.insert_streaming(task)?;
            }
            return Ok(());
        }

        self.ensure_pool();
        if self.pool.is_some() && remaining.len() > 1 {
            // candidate searches run against the pre-batch graph in
            // parallel, commits stay strictly serial
            let searched: Vec<(AddTask, Vec<ObjectDistance>)> = {
                use rayon::prelude::*;
                let graph = &self.graph;
                let entries = graph.entry_indices();
                let eps = self.extend_eps;
                let candidate_k = self.extend_k.max(k) as u32;
                let run = |task: AddTask| {
                    let candidates = crate::search::search(
                        graph,
                        &entries,
                        &task.feature,
                        eps,
                        candidate_k,
                        None,
                        0,
                    )
                    .into_sorted_vec();
                    (task, candidates)
                };
                match &self.pool {
                    Some(pool) => pool.install(|| remaining.into_par_iter().map(run).collect()),
                    None => remaining.into_iter().map(run).collect(),
                }
            };
            for (task, candidates) in searched {
                self.insert_lid_aware(task, Some(candidates))?;
            }
        } else {
            for task in remaining {
                self.insert_lid_aware(task, None)?;
            }
        }
        Ok(())
    }

    fn ensure_pool(&mut self) {
        if self.thread_count > 1 && self.pool.is_none() {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.thread_count)
                .build()
            {
                Ok(pool) => self.pool = Some(pool),
                Err(err) => {
                    warn!(%err, "could not start worker threads, building single-threaded");
                    self.thread_count = 1;
                }
            }
        }
    }

    /// While the graph holds at most `edges_per_vertex + 1` vertices, every
    /// vertex connects to every other one.
    fn insert_fully_connected(&mut self, task: AddTask) -> Result<()> {
        if self.graph.has_vertex(task.label) {
            warn!(label = task.label, "skipping duplicate queued label");
            return Ok(());
        }
        let internal = self.graph.add_vertex(task.label, &task.feature)?;
        let others: Vec<u32> = self.graph.live_indices().filter(|&i| i != internal).collect();
        for other in others {
            let distance = self
                .graph
                .feature_space()
                .distance(&task.feature, self.graph.feature(other));
            self.graph.change_edge(other, other, internal, distance);
            self.graph.change_edge(internal, internal, other, distance);
        }
        Ok(())
    }

    /// Streaming insertion: steal the worst edge of each chosen candidate,
    /// leave the displaced vertices with self-loop holes and repair them at
    /// the end. Works without knowing the dataset's intrinsic dimensionality.
    fn insert_streaming(&mut self, task: AddTask) -> Result<()> {
        if self.graph.has_vertex(task.label) {
            warn!(label = task.label, "skipping duplicate queued label");
            return Ok(());
        }
        let k = self.graph.edges_per_vertex();

        // twice the usual candidate count, neighbor selection gets picky
        let entry = match self.random_live_index() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        let candidates = self
            .graph
            .search(
                &[entry],
                &task.feature,
                self.extend_eps,
                self.extend_k.max(k * 2) as u32,
                None,
                0,
            )
            .into_sorted_vec();
        if candidates.len() < k {
            warn!(
                label = task.label,
                found = candidates.len(),
                "not enough insertion candidates, graph may be degraded"
            );
        }

        let internal = self.graph.add_vertex(task.label, &task.feature)?;

        // two passes over the candidates: first only RNG-conformant edges,
        // then whatever still fits
        let mut check_rng_phase = true;
        let mut involved: Vec<u32> = vec![internal];
        let mut slots = k - 1; // one edge is left for the repair phase
        loop {
            let mut progress = false;
            for candidate in &candidates {
                if slots == 0 {
                    break;
                }
                let candidate_index = candidate.index;
                let candidate_weight = candidate.distance;

                // undirected edges, and the new vertex still has self-loops,
                // so probe from the candidate side
                if self.graph.has_edge(candidate_index, internal) {
                    continue;
                }
                if check_rng_phase
                    && !check_rng(&self.graph, candidate_index, internal, candidate_weight)
                {
                    continue;
                }

                // candidate already missing an edge: connect directly
                if self.graph.has_edge(candidate_index, candidate_index) {
                    self.graph
                        .change_edge(candidate_index, candidate_index, internal, candidate_weight);
                    self.graph
                        .change_edge(internal, internal, candidate_index, candidate_weight);
                    slots -= 1;
                    progress = true;
                    continue;
                }

                // otherwise steal the candidate's worst usable edge
                let displaced = {
                    let mut worst: Option<(u32, f32)> = None;
                    let indices = self.graph.neighbor_indices(candidate_index);
                    let weights = self.graph.neighbor_weights(candidate_index);
                    for (&neighbor, &weight) in indices.iter().zip(weights) {
                        if self.graph.has_edge(neighbor, internal)
                            || self.graph.has_edge(neighbor, neighbor)
                        {
                            continue;
                        }
                        if worst.is_none_or(|(_, w)| weight > w) {
                            worst = Some((neighbor, weight));
                        }
                    }
                    worst
                };
                let Some((displaced_index, _)) = displaced else {
                    continue;
                };

                self.graph
                    .change_edge(candidate_index, displaced_index, internal, candidate_weight);
                self.graph
                    .change_edge(internal, internal, candidate_index, candidate_weight);
                slots -= 1;

                // the displaced vertex keeps a self-loop hole for the repair
                self.graph
                    .change_edge(displaced_index, candidate_index, displaced_index, 0.0);
                involved.push(displaced_index);
                progress = true;
            }

            if slots == 0 {
                break;
            }
            if !check_rng_phase && !progress {
                warn!(label = task.label, "could not fill all edges of the new vertex");
                break;
            }
            check_rng_phase = false;
        }

        involved.retain(|&v| self.graph.has_edge(v, v));
        self.restore(involved, false);
        Ok(())
    }

    /// LID-aware insertion: each accepted candidate contributes two edges,
    /// one to itself and one to a displaced neighbor, so every vertex keeps
    /// its full degree without a repair phase.
    fn insert_lid_aware(
        &mut self,
        task: AddTask,
        candidates: Option<Vec<ObjectDistance>>,
    ) -> Result<()> {
        if self.graph.has_vertex(task.label) {
            warn!(label = task.label, "skipping duplicate queued label");
            return Ok(());
        }
        let k = self.graph.edges_per_vertex();
        let mut can_refresh = candidates.is_some();
        let mut candidates = match candidates {
            Some(candidates) => candidates,
            None => self.fresh_candidates(&task.feature, k),
        };

        let internal = self.graph.add_vertex(task.label, &task.feature)?;

        let mut new_neighbors: Vec<(u32, f32)> = Vec::with_capacity(k);
        let mut check_rng_phase = true;
        loop {
            let mut progress = false;
            for candidate in &candidates {
                if new_neighbors.len() >= k {
                    break;
                }
                let candidate_index = candidate.index;
                let candidate_weight = candidate.distance;

                if candidate_index == internal || self.graph.has_edge(candidate_index, internal) {
                    continue;
                }
                if check_rng_phase
                    && !check_rng(&self.graph, candidate_index, internal, candidate_weight)
                {
                    continue;
                }

                let Some((displaced_index, displaced_distance)) =
                    self.pick_displaced_edge(internal, candidate_index, candidate_weight, &task.feature)
                else {
                    continue;
                };

                // stale candidate lists from the batch search: verify the
                // chosen edge still exists before rewiring
                if !self.graph.has_edge(candidate_index, displaced_index)
                    || self.graph.has_edge(internal, candidate_index)
                    || self.graph.has_edge(internal, displaced_index)
                {
                    continue;
                }

                self.graph
                    .change_edge(internal, internal, candidate_index, candidate_weight);
                self.graph
                    .change_edge(internal, internal, displaced_index, displaced_distance);
                new_neighbors.push((candidate_index, candidate_weight));
                new_neighbors.push((displaced_index, displaced_distance));

                self.graph
                    .change_edge(candidate_index, displaced_index, internal, candidate_weight);
                self.graph
                    .change_edge(displaced_index, candidate_index, internal, displaced_distance);
                progress = true;
            }

            if new_neighbors.len() >= k {
                break;
            }
            if !check_rng_phase && !progress {
                if can_refresh {
                    can_refresh = false;
                    candidates = self.fresh_candidates(&task.feature, k);
                    continue;
                }
                warn!(
                    label = task.label,
                    connected = new_neighbors.len(),
                    "could not fill all edges of the new vertex"
                );
                break;
            }
            check_rng_phase = false;
        }
        Ok(())
    }

    fn fresh_candidates(&self, feature: &[u8], k: usize) -> Vec<ObjectDistance> {
        let entries = self.graph.entry_indices();
        self.graph
            .search(
                &entries,
                feature,
                self.extend_eps,
                self.extend_k.max(k) as u32,
                None,
                0,
            )
            .into_sorted_vec()
    }

    /// Choose which edge of the candidate to replace with a pair of edges
    /// through the new vertex.
    fn pick_displaced_edge(
        &self,
        internal: u32,
        candidate_index: u32,
        candidate_weight: f32,
        new_feature: &[u8],
    ) -> Option<(u32, f32)> {
        let space = self.graph.feature_space();
        let neighbors: SmallVec<[(u32, f32); 64]> = self
            .graph
            .neighbor_indices(candidate_index)
            .iter()
            .copied()
            .zip(self.graph.neighbor_weights(candidate_index).iter().copied())
            .collect();

        match self.optimization_target {
            OptimizationTarget::HighLid => {
                // displace the candidate's worst edge
                let mut best: Option<(u32, f32)> = None;
                for &(neighbor, weight) in &neighbors {
                    if neighbor == candidate_index || self.graph.has_edge(neighbor, internal) {
                        continue;
                    }
                    if best.is_none_or(|(_, w)| weight > w) {
                        best = Some((neighbor, weight));
                    }
                }
                let (neighbor, _) = best?;
                let distance = space.distance(new_feature, self.graph.feature(neighbor));
                Some((neighbor, distance))
            }
            _ => {
                // displace the edge whose replacement distorts the graph least:
                // (new_edge_1 + new_edge_2) - removed_edge
                let mut best: Option<(u32, f32, f32)> = None;
                for &(neighbor, weight) in &neighbors {
                    if neighbor == candidate_index || self.graph.has_edge(neighbor, internal) {
                        continue;
                    }
                    let distance = space.distance(new_feature, self.graph.feature(neighbor));
                    let distortion = (candidate_weight + distance) - weight;
                    if best.is_none_or(|(_, _, d)| distortion < d) {
                        best = Some((neighbor, distance, distortion));
                    }
                }
                best.map(|(neighbor, distance, _)| (neighbor, distance))
            }
        }
    }

    pub(super) fn reduce(&mut self, task: RemoveTask) {
        let k = self.graph.edges_per_vertex();
        let involved = match self.graph.remove_vertex(task.label) {
            Ok(involved) => involved,
            Err(err) => {
                warn!(label = task.label, %err, "skipping queued removal");
                return;
            }
        };

        // below the full-connect threshold everything is still mutually
        // connected, nothing to repair
        if self.graph.size() as usize <= k {
            return;
        }
        self.restore(involved, true);
    }

    pub(super) fn random_live_index(&mut self) -> Option<u32> {
        let bound = self.graph.slot_bound();
        if self.graph.size() == 0 {
            return None;
        }
        for _ in 0..16 {
            let candidate = self.rng.random_range(0..bound);
            if self.graph.is_live(candidate) {
                return Some(candidate);
            }
        }
        // free-list heavy graph, fall back to a scan
        let skip = self.rng.random_range(0..self.graph.size()) as usize;
        self.graph.live_indices().nth(skip)
    }
}
