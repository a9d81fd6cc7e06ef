//! Randomized local edge swaps that lower the total edge weight.
//!
//! One attempt removes a suspect edge (vertex1, vertex2), leaving temporary
//! self-loops, and then walks the graph swapping edges to re-fill both ends.
//! Every mutation lands on a change list; when the walk exceeds its path
//! budget or stops paying off, the list is replayed backwards and the graph
//! is exactly as before.

use smallvec::SmallVec;

use crate::analysis::check_rng;
use crate::builder::GraphBuilder;
use crate::graph::{MutableGraph, SearchGraph};

/// One recorded `change_edge` call, enough to undo it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeChange {
    pub index: u32,
    pub from_neighbor: u32,
    pub from_weight: f32,
    pub to_neighbor: u32,
    pub to_weight: f32,
}

impl GraphBuilder {
    /// One improvement attempt: take the next vertex in round-robin order
    /// and try to replace each of its RNG-violating edges.
    pub(super) fn improve_step(&mut self) -> bool {
        let Some(vertex1) = self.next_improve_vertex() else {
            return false;
        };

        let edges: SmallVec<[(u32, f32); 64]> = self
            .graph
            .neighbor_indices(vertex1)
            .iter()
            .copied()
            .zip(self.graph.neighbor_weights(vertex1).iter().copied())
            .collect();

        let mut success = false;
        for (vertex2, weight) in edges {
            if vertex2 == vertex1 || !self.graph.has_edge(vertex1, vertex2) {
                continue;
            }
            if !check_rng(&self.graph, vertex2, vertex1, weight) {
                success |= self.improve_edge(vertex1, vertex2, weight);
            }
        }
        success
    }

    fn next_improve_vertex(&mut self) -> Option<u32> {
        let bound = self.graph.slot_bound();
        if bound == 0 {
            return None;
        }
        for _ in 0..bound {
            let vertex = self.improve_cursor % bound;
            self.improve_cursor = self.improve_cursor.wrapping_add(1);
            if self.graph.is_live(vertex) {
                return Some(vertex);
            }
        }
        None
    }

    /// Remove the edge between the two vertices and try to re-wire both ends
    /// at a net gain. Rolls everything back when the walk fails.
    pub(crate) fn improve_edge(&mut self, vertex1: u32, vertex2: u32, dist12: f32) -> bool {
        if self.improve_k == 0 {
            return false;
        }

        let mut changes: Vec<EdgeChange> = Vec::new();
        self.graph.change_edge(vertex1, vertex2, vertex1, 0.0);
        changes.push(EdgeChange {
            index: vertex1,
            from_neighbor: vertex2,
            from_weight: dist12,
            to_neighbor: vertex1,
            to_weight: 0.0,
        });
        self.graph.change_edge(vertex2, vertex1, vertex2, 0.0);
        changes.push(EdgeChange {
            index: vertex2,
            from_neighbor: vertex1,
            from_weight: dist12,
            to_neighbor: vertex2,
            to_weight: 0.0,
        });

        if !self.improve_walk(&mut changes, vertex1, vertex2, vertex1, vertex1, dist12, 0) {
            for change in changes.iter().rev() {
                self.graph.change_edge(
                    change.index,
                    change.to_neighbor,
                    change.from_neighbor,
                    change.from_weight,
                );
            }
            return false;
        }
        true
    }

    /// The recursive part of an improvement attempt.
    ///
    /// `vertex2` and `vertex4` are missing an edge. The walk connects
    /// vertex2 into the subgraph of vertex3/vertex4 by stealing an edge
    /// there, then tries to close the remaining hole by joining vertex1 and
    /// vertex4, recursing with swapped roles while the accumulated gain
    /// stays positive.
    #[allow(clippy::too_many_arguments)]
    fn improve_walk(
        &mut self,
        changes: &mut Vec<EdgeChange>,
        vertex1: u32,
        vertex2: u32,
        vertex3: u32,
        vertex4: u32,
        total_gain: f32,
        steps: u8,
    ) -> bool {
        let mut vertex3 = vertex3;
        let mut vertex4 = vertex4;
        let mut total_gain = total_gain;

        // 1. find a new neighbor for vertex2 inside the subgraph reachable
        // from vertex3/vertex4, and pick which of its edges to remove; taking
        // the worst combination with the best gain leaves easier material
        // for later attempts
        {
            let results = crate::search::search(
                &self.graph,
                &[vertex3, vertex4],
                self.graph.feature(vertex2),
                self.improve_eps,
                self.improve_k as u32,
                None,
                0,
            )
            .into_sorted_vec();

            let mut best_gain = total_gain;
            let mut dist23 = f32::MIN;
            let mut dist34 = f32::MIN;
            for result in results.iter().rev() {
                let new_vertex3 = result.index;
                if new_vertex3 == vertex1
                    || new_vertex3 == vertex2
                    || self.graph.has_edge(vertex2, new_vertex3)
                {
                    continue;
                }

                let neighbors: SmallVec<[(u32, f32); 64]> = self
                    .graph
                    .neighbor_indices(new_vertex3)
                    .iter()
                    .copied()
                    .zip(self.graph.neighbor_weights(new_vertex3).iter().copied())
                    .collect();
                for (new_vertex4, weight34) in neighbors {
                    let gain = total_gain - result.distance + weight34;
                    // never remove the edge that was just created
                    if new_vertex4 != vertex2 && best_gain < gain {
                        best_gain = gain;
                        vertex3 = new_vertex3;
                        vertex4 = new_vertex4;
                        dist23 = result.distance;
                        dist34 = weight34;
                    }
                }
            }

            if dist23 == f32::MIN {
                return false;
            }

            total_gain = (total_gain - dist23) + dist34;
            self.graph.change_edge(vertex2, vertex2, vertex3, dist23);
            changes.push(EdgeChange {
                index: vertex2,
                from_neighbor: vertex2,
                from_weight: 0.0,
                to_neighbor: vertex3,
                to_weight: dist23,
            });
            self.graph.change_edge(vertex3, vertex4, vertex2, dist23);
            changes.push(EdgeChange {
                index: vertex3,
                from_neighbor: vertex4,
                from_weight: dist34,
                to_neighbor: vertex2,
                to_weight: dist23,
            });
            self.graph.change_edge(vertex4, vertex3, vertex4, 0.0);
            changes.push(EdgeChange {
                index: vertex4,
                from_neighbor: vertex3,
                from_weight: dist34,
                to_neighbor: vertex4,
                to_weight: 0.0,
            });
        }

        // 2. close the remaining hole
        if vertex1 == vertex4 {
            // 2.1a both missing edges sit on the same vertex; like insertion,
            // find a good vertex, split one of its edges and take both ends
            if self.improve_same_vertex(changes, vertex4, vertex2, vertex3, total_gain) {
                return true;
            }
        } else if !self.graph.has_edge(vertex1, vertex4) {
            // 2.1b connect vertex1 and vertex4 directly when the sum of all
            // swaps still pays for the new edge
            let dist14 = self.graph.feature_space().distance(
                self.graph.feature(vertex1),
                self.graph.feature(vertex4),
            );
            if total_gain - dist14 > 0.0 {
                let connected = !crate::search::has_path(
                    &self.graph,
                    &[vertex2, vertex3],
                    vertex1,
                    self.improve_eps,
                    self.improve_k as u32,
                )
                .is_empty()
                    || !crate::search::has_path(
                        &self.graph,
                        &[vertex2, vertex3],
                        vertex4,
                        self.improve_eps,
                        self.improve_k as u32,
                    )
                    .is_empty();
                if connected {
                    self.graph.change_edge(vertex1, vertex1, vertex4, dist14);
                    changes.push(EdgeChange {
                        index: vertex1,
                        from_neighbor: vertex1,
                        from_weight: 0.0,
                        to_neighbor: vertex4,
                        to_weight: dist14,
                    });
                    self.graph.change_edge(vertex4, vertex4, vertex1, dist14);
                    changes.push(EdgeChange {
                        index: vertex4,
                        from_neighbor: vertex4,
                        from_weight: 0.0,
                        to_neighbor: vertex1,
                        to_weight: dist14,
                    });
                    return true;
                }
            }
        }

        // 3. path budget exhausted
        if steps >= self.max_path_length {
            return false;
        }

        // 4. alternate which end the next step works on
        let (vertex1, vertex4) = if steps % 2 == 1 {
            (vertex4, vertex1)
        } else {
            (vertex1, vertex4)
        };

        // 5. cut the walk once the swaps stop paying off
        if total_gain < 0.0 {
            return false;
        }

        self.improve_walk(changes, vertex1, vertex4, vertex2, vertex3, total_gain, steps + 1)
    }

    /// Both missing edges belong to `vertex4`. Search for a good vertex,
    /// split one of its edges and connect both of its endpoints to vertex4.
    fn improve_same_vertex(
        &mut self,
        changes: &mut Vec<EdgeChange>,
        vertex4: u32,
        vertex2: u32,
        vertex3: u32,
        total_gain: f32,
    ) -> bool {
        let results = crate::search::search(
            &self.graph,
            &[vertex2, vertex3],
            self.graph.feature(vertex4),
            self.improve_eps,
            self.improve_k as u32,
            None,
            0,
        )
        .into_sorted_vec();

        let mut best_gain = 0.0f32;
        let mut best: Option<(u32, f32, u32, f32, f32)> = None;
        for result in &results {
            let good_vertex = result.index;
            if good_vertex == vertex4 || self.graph.has_edge(vertex4, good_vertex) {
                continue;
            }
            let good_vertex_dist = result.distance;

            let neighbors: SmallVec<[(u32, f32); 64]> = self
                .graph
                .neighbor_indices(good_vertex)
                .iter()
                .copied()
                .zip(self.graph.neighbor_weights(good_vertex).iter().copied())
                .collect();
            for (selected_neighbor, old_weight) in neighbors {
                if selected_neighbor == vertex4 || self.graph.has_edge(vertex4, selected_neighbor)
                {
                    continue;
                }
                let new_weight = self.graph.feature_space().distance(
                    self.graph.feature(vertex4),
                    self.graph.feature(selected_neighbor),
                );
                let gain = (total_gain + old_weight) - (good_vertex_dist + new_weight);
                if best_gain < gain {
                    best_gain = gain;
                    best = Some((
                        good_vertex,
                        good_vertex_dist,
                        selected_neighbor,
                        old_weight,
                        new_weight,
                    ));
                }
            }
        }

        let Some((good_vertex, good_vertex_dist, selected_neighbor, old_weight, new_weight)) = best
        else {
            return false;
        };

        // both self-loops of vertex4 become edges to the split pair
        self.graph
            .change_edge(vertex4, vertex4, good_vertex, good_vertex_dist);
        changes.push(EdgeChange {
            index: vertex4,
            from_neighbor: vertex4,
            from_weight: 0.0,
            to_neighbor: good_vertex,
            to_weight: good_vertex_dist,
        });
        self.graph
            .change_edge(vertex4, vertex4, selected_neighbor, new_weight);
        changes.push(EdgeChange {
            index: vertex4,
            from_neighbor: vertex4,
            from_weight: 0.0,
            to_neighbor: selected_neighbor,
            to_weight: new_weight,
        });

        self.graph
            .change_edge(good_vertex, selected_neighbor, vertex4, good_vertex_dist);
        changes.push(EdgeChange {
            index: good_vertex,
            from_neighbor: selected_neighbor,
            from_weight: old_weight,
            to_neighbor: vertex4,
            to_weight: good_vertex_dist,
        });
        self.graph
            .change_edge(selected_neighbor, good_vertex, vertex4, new_weight);
        changes.push(EdgeChange {
            index: selected_neighbor,
            from_neighbor: good_vertex,
            from_weight: old_weight,
            to_neighbor: vertex4,
            to_weight: new_weight,
        });
        true
    }
}
