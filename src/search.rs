//! Epsilon-greedy graph traversal: search, exploration, and path finding.
//!
//! All walks share the same shape: a min-heap frontier of vertices to expand,
//! a bounded max-heap of the best results, and a visited set. The worst kept
//! result defines the search radius; the frontier is pruned against
//! `radius * (1 + eps)`, flipped to `(1 - eps)` when the radius is negative
//! (inner-product distances go below zero).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use smallvec::SmallVec;
use tracing::warn;

use crate::filter::Filter;
use crate::graph::SearchGraph;

/// An internal index paired with its distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectDistance {
    pub index: u32,
    pub distance: f32,
}

impl ObjectDistance {
    #[inline]
    #[must_use]
    pub fn new(index: u32, distance: f32) -> Self {
        Self { index, distance }
    }
}

impl Eq for ObjectDistance {}

impl Ord for ObjectDistance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for ObjectDistance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap ordering wrapper for the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Reverse(ObjectDistance);

impl Ord for Reverse {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl PartialOrd for Reverse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Max-heap of search results; the worst element sits on top.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    heap: BinaryHeap<ObjectDistance>,
}

impl ResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, entry: ObjectDistance) {
        self.heap.push(entry);
    }

    /// Remove and return the worst kept result.
    #[inline]
    pub fn pop(&mut self) -> Option<ObjectDistance> {
        self.heap.pop()
    }

    /// The worst kept result.
    #[inline]
    #[must_use]
    pub fn peek(&self) -> Option<&ObjectDistance> {
        self.heap.peek()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Unordered view of the kept results.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectDistance> {
        self.heap.iter()
    }

    /// Results sorted by ascending distance.
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<ObjectDistance> {
        self.heap.into_sorted_vec()
    }
}

impl IntoIterator for ResultSet {
    type Item = ObjectDistance;
    type IntoIter = std::vec::IntoIter<ObjectDistance>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_sorted_vec().into_iter()
    }
}

#[inline]
fn exploration_radius(radius: f32, eps: f32) -> f32 {
    radius * if radius < 0.0 { 1.0 - eps } else { 1.0 + eps }
}

/// When a filter admits only a small candidate set, scanning it beats the
/// graph walk.
fn use_brute_force(size: u32, filter: &Filter) -> bool {
    let rate = filter.inclusion_rate();
    size < 1_000 || rate * (size as f32) < 10_000.0 || rate < 0.10
}

fn brute_force<G: SearchGraph>(graph: &G, query: &[u8], k: usize, filter: &Filter) -> ResultSet {
    let space = graph.feature_space();
    let mut results = ResultSet::with_capacity(k + 1);
    let mut radius = f32::MAX;
    filter.for_each_valid_label(|label| {
        let Some(index) = graph.internal_index(label) else {
            return;
        };
        let distance = space.distance(query, graph.feature(index));
        if distance < radius {
            results.push(ObjectDistance::new(index, distance));
            if results.len() > k {
                results.pop();
                radius = results.peek().map_or(f32::MAX, |worst| worst.distance);
            }
        }
    });
    results
}

/// Epsilon-greedy approximate nearest neighbor search.
///
/// Returns up to `k` internal indices with their distances to `query`. A
/// `max_distance_computations` of zero means no budget.
pub fn search<G: SearchGraph>(
    graph: &G,
    entry_indices: &[u32],
    query: &[u8],
    eps: f32,
    k: u32,
    filter: Option<&Filter>,
    max_distance_computations: u32,
) -> ResultSet {
    let requested_k = k as usize;
    let k = requested_k.min(graph.size() as usize);
    if k < requested_k {
        warn!(requested = requested_k, size = graph.size(), "k clamped to graph size");
    }
    if k == 0 {
        return ResultSet::new();
    }

    if let Some(filter) = filter {
        if use_brute_force(graph.size(), filter) {
            return brute_force(graph, query, k, filter);
        }
    }

    let space = graph.feature_space();
    let admits = |index: u32| match filter {
        Some(f) => f.is_valid(graph.external_label(index)),
        None => true,
    };

    let mut visited = vec![false; graph.slot_bound() as usize];
    let mut frontier = BinaryHeap::with_capacity(k * graph.edges_per_vertex());
    let mut results = ResultSet::with_capacity(k + 1);
    let mut computations = 0u32;

    for &index in entry_indices {
        if std::mem::replace(&mut visited[index as usize], true) {
            continue;
        }
        let distance = space.distance(query, graph.feature(index));
        computations += 1;
        frontier.push(Reverse(ObjectDistance::new(index, distance)));
        if admits(index) {
            results.push(ObjectDistance::new(index, distance));
        }
        if max_distance_computations != 0 && computations >= max_distance_computations {
            while results.len() > k {
                results.pop();
            }
            return results;
        }
    }
    while results.len() > k {
        results.pop();
    }

    let mut radius = f32::MAX;
    let mut prune_radius = f32::MAX;

    let mut fresh: SmallVec<[u32; 64]> = SmallVec::new();
    while let Some(Reverse(next)) = frontier.pop() {
        if next.distance > prune_radius {
            break;
        }

        fresh.clear();
        for &neighbor in graph.neighbor_indices(next.index) {
            if !std::mem::replace(&mut visited[neighbor as usize], true) {
                fresh.push(neighbor);
            }
        }

        for &neighbor in &fresh {
            let distance = space.distance(query, graph.feature(neighbor));
            computations += 1;

            if distance <= prune_radius {
                frontier.push(Reverse(ObjectDistance::new(neighbor, distance)));

                if distance < radius && admits(neighbor) {
                    results.push(ObjectDistance::new(neighbor, distance));
                    if results.len() > k {
                        results.pop();
                        radius = results.peek().map_or(f32::MAX, |worst| worst.distance);
                        prune_radius = exploration_radius(radius, eps);
                    }
                }
            }

            if max_distance_computations != 0 && computations >= max_distance_computations {
                return results;
            }
        }
    }

    if results.len() < k {
        warn!(found = results.len(), k, "fewer results than requested");
    }
    results
}

/// Sample the neighborhood of a stored vertex.
///
/// The query is the entry vertex's own feature vector and the walk stops
/// after `max_distance_computations` distance evaluations. The eps is derived
/// from the budget, `log10(budget / k)`, so a larger budget widens the walk.
/// Edge weights gate expansion: a neighbor is only evaluated when
/// `parent_distance + edge_weight` still beats the exploration radius. The
/// entry vertex never appears in the results.
pub fn explore<G: SearchGraph>(
    graph: &G,
    entry_index: u32,
    k: u32,
    max_distance_computations: u32,
) -> ResultSet {
    let k = k as usize;
    if k == 0 || max_distance_computations == 0 {
        return ResultSet::new();
    }

    let space = graph.feature_space();
    let query = graph.feature(entry_index);
    let eps = (max_distance_computations as f32 / k as f32).log10();

    let mut visited = vec![false; graph.slot_bound() as usize];
    visited[entry_index as usize] = true;

    let mut frontier = BinaryHeap::with_capacity(k * graph.edges_per_vertex());
    frontier.push(Reverse(ObjectDistance::new(entry_index, 0.0)));

    let mut results = ResultSet::with_capacity(k + 1);
    let mut radius = f32::MAX;
    let mut prune_radius = exploration_radius(radius, eps);
    let mut computations = 0u32;

    let mut fresh: SmallVec<[u32; 64]> = SmallVec::new();
    while let Some(Reverse(next)) = frontier.pop() {
        if next.distance > prune_radius {
            break;
        }

        fresh.clear();
        let indices = graph.neighbor_indices(next.index);
        let weights = graph.neighbor_weights(next.index);
        for (&neighbor, &weight) in indices.iter().zip(weights) {
            if !visited[neighbor as usize] {
                visited[neighbor as usize] = true;
                // worst-case distance estimate from the triangle inequality
                if next.distance + weight < prune_radius {
                    fresh.push(neighbor);
                }
            }
        }

        for &neighbor in &fresh {
            let distance = space.distance(query, graph.feature(neighbor));

            if distance < radius {
                frontier.push(Reverse(ObjectDistance::new(neighbor, distance)));
                results.push(ObjectDistance::new(neighbor, distance));
                if results.len() > k {
                    results.pop();
                    radius = results.peek().map_or(f32::MAX, |worst| worst.distance);
                    prune_radius = exploration_radius(radius, eps);
                }
            }

            computations += 1;
            if computations >= max_distance_computations {
                return results;
            }
        }
    }

    results
}

/// Greedy walk that stops as soon as `to_vertex` is reachable.
///
/// Returns the hop chain `[target, ..., entry]` with each hop's distance to
/// the target's feature vector, or an empty vector when the walk terminated
/// without touching the target.
pub fn has_path<G: SearchGraph>(
    graph: &G,
    entry_indices: &[u32],
    to_vertex: u32,
    eps: f32,
    k: u32,
) -> Vec<ObjectDistance> {
    let k = (k as usize).max(1);
    let space = graph.feature_space();
    let query = graph.feature(to_vertex);

    let mut visited = vec![false; graph.slot_bound() as usize];
    let mut frontier = BinaryHeap::new();
    let mut results = ResultSet::new();
    // maps a vertex to the hop it was discovered from; entries map to themselves
    let mut trackback: HashMap<u32, ObjectDistance> = HashMap::new();

    for &index in entry_indices {
        if std::mem::replace(&mut visited[index as usize], true) {
            continue;
        }
        let distance = space.distance(query, graph.feature(index));
        frontier.push(Reverse(ObjectDistance::new(index, distance)));
        results.push(ObjectDistance::new(index, distance));
        trackback.insert(index, ObjectDistance::new(index, distance));
    }

    let mut radius = f32::MAX;
    let mut prune_radius = f32::MAX;

    let mut fresh: SmallVec<[u32; 64]> = SmallVec::new();
    while let Some(Reverse(next)) = frontier.pop() {
        if next.distance > prune_radius {
            break;
        }

        fresh.clear();
        for &neighbor in graph.neighbor_indices(next.index) {
            if neighbor == to_vertex {
                let mut path = vec![
                    ObjectDistance::new(to_vertex, 0.0),
                    ObjectDistance::new(next.index, next.distance),
                ];
                let mut cursor = next.index;
                while let Some(&hop) = trackback.get(&cursor) {
                    if hop.index == cursor {
                        break;
                    }
                    path.push(hop);
                    cursor = hop.index;
                }
                return path;
            }
            if !std::mem::replace(&mut visited[neighbor as usize], true) {
                fresh.push(neighbor);
            }
        }

        for &neighbor in &fresh {
            let distance = space.distance(query, graph.feature(neighbor));

            if distance <= prune_radius {
                frontier.push(Reverse(ObjectDistance::new(neighbor, distance)));
                trackback.insert(neighbor, ObjectDistance::new(next.index, next.distance));

                if distance < radius {
                    results.push(ObjectDistance::new(neighbor, distance));
                    if results.len() > k {
                        results.pop();
                        radius = results.peek().map_or(f32::MAX, |worst| worst.distance);
                        prune_radius = exploration_radius(radius, eps);
                    }
                }
            }
        }
    }

    Vec::new()
}

/// Run many searches in parallel, preserving query order.
///
/// `threads` of zero uses rayon's default parallelism; `thread_batch_size`
/// of zero derives a batch size that gives every worker a few batches.
#[allow(clippy::too_many_arguments)]
pub fn search_batch<G, Q>(
    graph: &G,
    entry_indices: &[u32],
    queries: &[Q],
    eps: f32,
    k: u32,
    filter: Option<&Filter>,
    max_distance_computations: u32,
    threads: usize,
    thread_batch_size: usize,
) -> Vec<ResultSet>
where
    G: SearchGraph + Sync,
    Q: AsRef<[u8]> + Sync,
{
    use rayon::prelude::*;

    if queries.is_empty() {
        return Vec::new();
    }
    if threads == 1 {
        return queries
            .iter()
            .map(|q| search(graph, entry_indices, q.as_ref(), eps, k, filter, max_distance_computations))
            .collect();
    }

    let pool = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool,
        Err(err) => {
            warn!(%err, "falling back to sequential batch search");
            return queries
                .iter()
                .map(|q| search(graph, entry_indices, q.as_ref(), eps, k, filter, max_distance_computations))
                .collect();
        }
    };

    let workers = pool.current_num_threads().max(1);
    let batch = if thread_batch_size == 0 {
        (queries.len() / (workers * 4)).max(1)
    } else {
        thread_batch_size
    };

    pool.install(|| {
        queries
            .par_chunks(batch)
            .flat_map_iter(|chunk| {
                chunk.iter().map(|q| {
                    search(graph, entry_indices, q.as_ref(), eps, k, filter, max_distance_computations)
                })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_distance_orders_by_distance_then_index() {
        let a = ObjectDistance::new(5, 1.0);
        let b = ObjectDistance::new(3, 1.0);
        let c = ObjectDistance::new(0, 2.0);
        assert!(b < a);
        assert!(a < c);
    }

    #[test]
    fn result_set_pops_worst_first() {
        let mut results = ResultSet::new();
        results.push(ObjectDistance::new(0, 3.0));
        results.push(ObjectDistance::new(1, 1.0));
        results.push(ObjectDistance::new(2, 2.0));
        assert_eq!(results.pop().map(|o| o.index), Some(0));
        assert_eq!(results.peek().map(|o| o.index), Some(2));
    }

    #[test]
    fn sorted_vec_is_ascending() {
        let mut results = ResultSet::new();
        results.push(ObjectDistance::new(0, 3.0));
        results.push(ObjectDistance::new(1, 1.0));
        let sorted = results.into_sorted_vec();
        assert_eq!(sorted[0].index, 1);
        assert_eq!(sorted[1].index, 0);
    }

    #[test]
    fn brute_force_kicks_in_only_for_small_candidate_sets() {
        let half: Vec<u32> = (0..500).collect();
        let filter = Filter::new(&half, 1_000);
        // small graph
        assert!(use_brute_force(500, &filter));
        // few absolute candidates despite a healthy rate
        assert!(use_brute_force(2_000, &filter));
        // large graph, wide filter: walk it
        assert!(!use_brute_force(50_000, &filter));

        let sparse: Vec<u32> = (0..50).collect();
        let filter = Filter::new(&sparse, 1_000);
        assert!(use_brute_force(50_000, &filter));
    }

    #[test]
    fn negative_radius_shrinks_exploration() {
        assert!(exploration_radius(-2.0, 0.1) > -2.0 * 1.1);
        assert_eq!(exploration_radius(-2.0, 0.1), -2.0 * 0.9);
        assert_eq!(exploration_radius(2.0, 0.1), 2.0 * 1.1);
    }
}
