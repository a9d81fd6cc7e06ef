//! Reconnecting vertices left with self-loop holes after a removal or a
//! streaming insertion.

use tracing::{debug, warn};

use crate::builder::GraphBuilder;
use crate::graph::{MutableGraph, SearchGraph};

impl GraphBuilder {
    /// Repair every vertex in `involved` that is missing an edge.
    ///
    /// Greedy nearest pairing first: connect the closest pair of deficient
    /// vertices that do not share an edge yet, repeat until no such pair is
    /// left. Vertices that stay deficient are already adjacent to every
    /// other deficient vertex; those get spliced into an existing edge of a
    /// nearby vertex. With `improve` set, the worst of the new edges go
    /// through the improvement walk afterwards.
    pub(super) fn restore(&mut self, involved: Vec<u32>, improve: bool) {
        let mut missing: Vec<u32> = {
            let mut list: Vec<u32> = involved
                .into_iter()
                .filter(|&v| self.graph.is_live(v))
                .collect();
            list.sort_unstable();
            list.dedup();
            list
        };
        let mut new_edges: Vec<(u32, u32, f32)> = Vec::new();

        // 1. greedy nearest pairing
        loop {
            missing.retain(|&v| self.graph.has_edge(v, v));
            if missing.len() < 2 {
                break;
            }

            let mut best: Option<(u32, u32, f32)> = None;
            for (i, &a) in missing.iter().enumerate() {
                for &b in &missing[i + 1..] {
                    if self.graph.has_edge(a, b) {
                        continue;
                    }
                    let distance = self
                        .graph
                        .feature_space()
                        .distance(self.graph.feature(a), self.graph.feature(b));
                    if best.is_none_or(|(_, _, d)| distance < d) {
                        best = Some((a, b, distance));
                    }
                }
            }
            let Some((a, b, distance)) = best else {
                break;
            };
            self.graph.change_edge(a, a, b, distance);
            self.graph.change_edge(b, b, a, distance);
            new_edges.push((a, b, distance));
        }

        // 2. leftovers are pairwise adjacent already: splice each pair into
        // an existing edge (b, d) of the neighborhood, replacing it with
        // (a, b) and (c, d)
        for i in 0..missing.len() {
            let a = missing[i];
            if !self.graph.has_edge(a, a) {
                continue;
            }
            let Some((b, distance_ab)) = self.closest_non_neighbor(a) else {
                continue;
            };

            let mut spliced = false;
            for &c in &missing[i + 1..] {
                if !self.graph.has_edge(c, c) {
                    continue;
                }
                let Some((d, distance_cd)) = self.splice_partner(a, b, c) else {
                    continue;
                };

                self.graph.change_edge(b, d, a, distance_ab);
                self.graph.change_edge(a, a, b, distance_ab);
                self.graph.change_edge(d, b, c, distance_cd);
                self.graph.change_edge(c, c, d, distance_cd);
                new_edges.push((a, b, distance_ab));
                new_edges.push((c, d, distance_cd));
                spliced = true;
                break;
            }

            // lone deficient vertex, only possible with an odd degree: take
            // one edge slot from the closest vertex and leave the displaced
            // neighbor for later improvement rounds
            if !spliced && self.graph.has_edge(a, a) {
                let still_missing = missing[i + 1..]
                    .iter()
                    .any(|&c| self.graph.has_edge(c, c));
                if !still_missing {
                    let Some((b, distance_ab)) = self.closest_non_neighbor(a) else {
                        continue;
                    };
                    let displaced = {
                        let indices = self.graph.neighbor_indices(b);
                        let weights = self.graph.neighbor_weights(b);
                        let mut worst: Option<(u32, f32)> = None;
                        for (&n, &w) in indices.iter().zip(weights) {
                            if n == b || n == a || self.graph.has_edge(n, a) {
                                continue;
                            }
                            if worst.is_none_or(|(_, ww)| w > ww) {
                                worst = Some((n, w));
                            }
                        }
                        worst
                    };
                    let Some((displaced_index, _)) = displaced else {
                        warn!(vertex = a, "could not repair vertex, leaving it under-connected");
                        continue;
                    };
                    self.graph.change_edge(b, displaced_index, a, distance_ab);
                    self.graph.change_edge(a, a, b, distance_ab);
                    self.graph
                        .change_edge(displaced_index, b, displaced_index, 0.0);
                    new_edges.push((a, b, distance_ab));
                    debug!(vertex = displaced_index, "repair displaced one edge");
                }
            }
        }

        // 3. smooth out the worst of the stitched edges
        if improve && self.improve_k > 0 {
            new_edges.sort_by(|x, y| y.2.total_cmp(&x.2));
            for (from, to, weight) in new_edges {
                if self.graph.has_edge(from, to) {
                    self.improve_edge(from, to, weight);
                }
            }
        }
    }

    /// Closest vertex to `a` in its two-hop neighborhood that is not yet a
    /// neighbor of `a`.
    fn closest_non_neighbor(&self, a: u32) -> Option<(u32, f32)> {
        let space = self.graph.feature_space();
        let feature_a = self.graph.feature(a);
        let mut best: Option<(u32, f32)> = None;
        for &hop in self.graph.neighbor_indices(a) {
            for &candidate in self.graph.neighbor_indices(hop) {
                if candidate == a || self.graph.has_edge(a, candidate) {
                    continue;
                }
                let distance = space.distance(feature_a, self.graph.feature(candidate));
                if best.is_none_or(|(_, d)| distance < d) {
                    best = Some((candidate, distance));
                }
            }
        }
        best
    }

    /// A neighbor `d` of `b` whose edge (b, d) can be split to also serve
    /// `c`: `d` must not be adjacent to `c` and distinct from `a` and `b`.
    fn splice_partner(&self, a: u32, b: u32, c: u32) -> Option<(u32, f32)> {
        let space = self.graph.feature_space();
        let feature_c = self.graph.feature(c);
        let mut best: Option<(u32, f32)> = None;
        for &d in self.graph.neighbor_indices(b) {
            if d == a || d == b || self.graph.has_edge(c, d) {
                continue;
            }
            let distance = space.distance(feature_c, self.graph.feature(d));
            if best.is_none_or(|(_, dist)| distance < dist) {
                best = Some((d, distance));
            }
        }
        best
    }
}
