//! Diagnostic functions over a finished graph.
//!
//! Everything in here is read-only except [`remove_non_mrng_edges`], which
//! prunes edges that violate the relative-neighborhood condition. The check
//! functions log on `tracing::error` before returning `false`, so a failing
//! assertion in a test still explains itself.

use tracing::{error, info};

use crate::graph::{MutableGraph, SearchGraph, SizeBoundedGraph};

/// Would `vertex` be an RNG-conform neighbor of `target`?
///
/// Conformance fails when some neighbor of `vertex` already has an edge to
/// `target` and both legs of that detour are shorter than the direct edge.
pub fn check_rng<G: SearchGraph>(
    graph: &G,
    vertex: u32,
    target: u32,
    vertex_target_weight: f32,
) -> bool {
    let indices = graph.neighbor_indices(vertex);
    let weights = graph.neighbor_weights(vertex);
    for (&neighbor, &neighbor_weight) in indices.iter().zip(weights) {
        if neighbor == vertex {
            continue;
        }
        if let Some(neighbor_target_weight) = graph.edge_weight(neighbor, target) {
            if vertex_target_weight > neighbor_weight.max(neighbor_target_weight) {
                return false;
            }
        }
    }
    true
}

/// Mean of all stored edge weights, multiplied by `scale`.
///
/// Self-loop placeholders contribute their zero weight, so a graph fresh out
/// of cold start reports a lower average than its true edge lengths.
pub fn calc_avg_edge_weight<G: SearchGraph>(graph: &G, scale: f32) -> f32 {
    let mut total = 0.0f64;
    let mut count = 0u64;
    for vertex in live_vertices(graph) {
        for &weight in graph.neighbor_weights(vertex) {
            total += f64::from(weight);
        }
        count += graph.edges_per_vertex() as u64;
    }
    if count == 0 {
        return 0.0;
    }
    (total * f64::from(scale) / count as f64) as f32
}

/// Average edge weight per decile of the weight distribution.
///
/// Zero weights (self-loop placeholders) are skipped. With `sorted` the
/// weights are ordered first, so the bins become percentile bands; without
/// it they follow storage order.
pub fn calc_edge_weight_histogram<G: SearchGraph>(
    graph: &G,
    sorted: bool,
    scale: f32,
    bins: usize,
) -> Vec<f32> {
    let mut weights: Vec<f32> = Vec::new();
    for vertex in live_vertices(graph) {
        weights.extend(
            graph
                .neighbor_weights(vertex)
                .iter()
                .copied()
                .filter(|&w| w != 0.0),
        );
    }

    if sorted {
        weights.sort_by(f32::total_cmp);
    }

    let bin_size = weights.len() / bins.max(1);
    if bin_size == 0 {
        return vec![0.0; bins];
    }
    (0..bins)
        .map(|bin| {
            let slice = &weights[bin * bin_size..(bin + 1) * bin_size];
            slice.iter().sum::<f32>() * scale / bin_size as f32
        })
        .collect()
}

/// Verify every stored edge weight equals the recomputed distance between
/// its endpoints.
pub fn check_graph_weights<G: SearchGraph>(graph: &G) -> bool {
    let space = graph.feature_space();
    for vertex in live_vertices(graph) {
        let feature = graph.feature(vertex);
        let indices = graph.neighbor_indices(vertex);
        let weights = graph.neighbor_weights(vertex);
        for (&neighbor, &weight) in indices.iter().zip(weights) {
            if neighbor == vertex {
                continue;
            }
            let dist = space.distance(feature, graph.feature(neighbor));
            if weight != dist {
                error!(
                    vertex,
                    neighbor, weight, dist, "stored edge weight does not match the distance"
                );
                return false;
            }
        }
    }
    true
}

/// Verify the vertex count and that every adjacency list holds exactly K
/// distinct neighbors in ascending order without self-loops.
///
/// A graph at or below `K + 1` vertices cannot be regular yet and passes the
/// edge checks trivially. `check_back_link` additionally demands a reverse
/// edge for every edge, which makes the check quadratic in K.
pub fn check_graph_regularity<G: SearchGraph>(
    graph: &G,
    expected_size: u32,
    check_back_link: bool,
) -> bool {
    let size = graph.size();
    if size != expected_size {
        error!(expected_size, size, "unexpected number of vertices");
        return false;
    }
    if size as usize <= graph.edges_per_vertex() {
        return true;
    }

    for vertex in live_vertices(graph) {
        let mut last: Option<u32> = None;
        for (position, &neighbor) in graph.neighbor_indices(vertex).iter().enumerate() {
            if neighbor == vertex {
                error!(vertex, position, "self-loop");
                return false;
            }
            if last == Some(neighbor) {
                error!(vertex, position, neighbor, "duplicate neighbor");
                return false;
            }
            if last.is_some_and(|l| l > neighbor) {
                error!(vertex, position, neighbor, "neighbors out of order");
                return false;
            }
            if check_back_link && !graph.has_edge(neighbor, vertex) {
                error!(vertex, neighbor, "missing back link");
                return false;
            }
            last = Some(neighbor);
        }
    }
    true
}

/// Verify the graph forms a single connected component.
///
/// Breadth-first traversal from the first live vertex; self-loop
/// placeholders are followed harmlessly since they revisit a marked vertex.
pub fn check_graph_connectivity<G: SearchGraph>(graph: &G) -> bool {
    let size = graph.size();
    if size <= 1 {
        return true;
    }

    let bound = graph.slot_bound() as usize;
    let mut seen = vec![false; bound];
    let Some(start) = live_vertices(graph).next() else {
        return true;
    };
    seen[start as usize] = true;

    let mut frontier = vec![start];
    let mut reached = 1u32;
    while let Some(vertex) = frontier.pop() {
        for &neighbor in graph.neighbor_indices(vertex) {
            if !seen[neighbor as usize] {
                seen[neighbor as usize] = true;
                reached += 1;
                frontier.push(neighbor);
            }
        }
    }
    reached == size
}

/// Count edges whose presence violates RNG conformance.
pub fn calc_non_rng_edges<G: SearchGraph>(graph: &G) -> u32 {
    let mut violations = 0;
    for vertex in live_vertices(graph) {
        let indices = graph.neighbor_indices(vertex);
        let weights = graph.neighbor_weights(vertex);
        for (&neighbor, &weight) in indices.iter().zip(weights) {
            if neighbor != vertex && !check_rng(graph, vertex, neighbor, weight) {
                violations += 1;
            }
        }
    }
    violations
}

/// Replace every RNG-violating edge with a self-loop and report how many
/// were cut. Leaves the graph under-regular; intended as a one-off pruning
/// pass after a build, not as maintenance.
pub fn remove_non_mrng_edges(graph: &mut SizeBoundedGraph) -> u32 {
    let live: Vec<u32> = live_vertices(graph).collect();
    let mut removed = 0;
    for vertex in live {
        let doomed: Vec<u32> = graph
            .neighbor_indices(vertex)
            .iter()
            .zip(graph.neighbor_weights(vertex))
            .filter(|&(&n, &w)| n != vertex && !check_rng(graph, vertex, n, w))
            .map(|(&n, _)| n)
            .collect();
        for neighbor in doomed {
            graph.change_edge(vertex, neighbor, vertex, 0.0);
            removed += 1;
        }
    }
    info!(removed, remaining = calc_non_rng_edges(graph), "pruned non-RNG edges");
    removed
}

fn live_vertices<G: SearchGraph>(graph: &G) -> impl Iterator<Item = u32> + '_ {
    (0..graph.slot_bound()).filter(move |&v| graph.is_live(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{f32_to_bytes, FloatSpace, Metric};

    fn tiny_graph() -> SizeBoundedGraph {
        // four vertices on a line, K = 2
        let mut graph = SizeBoundedGraph::new(8, 2, FloatSpace::new(1, Metric::L2)).unwrap();
        for (label, x) in [(0u32, 0.0f32), (1, 1.0), (2, 2.0), (3, 3.0)] {
            graph.add_vertex(label, &f32_to_bytes(&[x])).unwrap();
        }
        for (a, b) in [(0u32, 1u32), (1, 2), (2, 3), (3, 0)] {
            let w = crate::space::bytes_to_f32(graph.feature(a))[0]
                - crate::space::bytes_to_f32(graph.feature(b))[0];
            let w = w * w;
            graph.change_edge(a, a, b, w);
            graph.change_edge(b, b, a, w);
        }
        graph
    }

    #[test]
    fn regular_graph_passes_checks() {
        let graph = tiny_graph();
        assert!(check_graph_regularity(&graph, 4, true));
        assert!(check_graph_weights(&graph));
        assert!(check_graph_connectivity(&graph));
    }

    #[test]
    fn size_mismatch_fails_regularity() {
        let graph = tiny_graph();
        assert!(!check_graph_regularity(&graph, 5, false));
    }

    #[test]
    fn avg_edge_weight_of_unit_line() {
        let graph = tiny_graph();
        // edges 0-1, 1-2, 2-3 weigh 1.0 each, edge 3-0 weighs 9.0
        let avg = calc_avg_edge_weight(&graph, 1.0);
        let expected = (3.0 * 1.0 * 2.0 + 9.0 * 2.0) / 8.0;
        assert!((avg - expected).abs() < 1e-6);
    }

    fn triangle_graph() -> SizeBoundedGraph {
        // three collinear points, fully connected, K = 2
        let mut graph = SizeBoundedGraph::new(4, 2, FloatSpace::new(1, Metric::L2)).unwrap();
        for (label, x) in [(0u32, 0.0f32), (1, 1.0), (2, 2.0)] {
            graph.add_vertex(label, &f32_to_bytes(&[x])).unwrap();
        }
        for (a, b, w) in [(0u32, 1u32, 1.0f32), (1, 2, 1.0), (0, 2, 4.0)] {
            graph.change_edge(a, a, b, w);
            graph.change_edge(b, b, a, w);
        }
        graph
    }

    #[test]
    fn long_chord_violates_rng() {
        let graph = triangle_graph();
        // the edge 0-2 weighs 4 while the detour over vertex 1 costs 1 per leg
        assert!(!check_rng(&graph, 0, 2, 4.0));
        assert!(!check_rng(&graph, 2, 0, 4.0));
        assert!(check_rng(&graph, 0, 1, 1.0));
        assert_eq!(calc_non_rng_edges(&graph), 2);
    }

    #[test]
    fn pruning_cuts_the_chord() {
        let mut graph = triangle_graph();
        let removed = remove_non_mrng_edges(&mut graph);
        assert_eq!(removed, 2);
        assert!(!graph.has_edge(0, 2));
        assert!(!graph.has_edge(2, 0));
        assert!(graph.has_edge(0, 1));
        assert!(graph.has_edge(1, 2));
    }

    #[test]
    fn histogram_skips_placeholder_weights() {
        let mut graph = SizeBoundedGraph::new(4, 2, FloatSpace::new(1, Metric::L2)).unwrap();
        graph.add_vertex(0, &f32_to_bytes(&[0.0])).unwrap();
        graph.add_vertex(1, &f32_to_bytes(&[1.0])).unwrap();
        graph.change_edge(0, 0, 1, 1.0);
        graph.change_edge(1, 1, 0, 1.0);
        // one real edge per vertex, one self-loop each
        let bins = calc_edge_weight_histogram(&graph, true, 1.0, 2);
        assert_eq!(bins, vec![1.0, 1.0]);
    }
}
