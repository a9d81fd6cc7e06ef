//! End-to-end tests for graph construction and search.
//!
//! These tests verify that a graph built through the public builder API
//! is regular, connected, and actually finds near neighbors, not just
//! that the code compiles.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use deg::analysis::{
    check_graph_connectivity, check_graph_regularity, check_graph_weights,
};
use deg::{
    BuildControl, BuilderConfig, FeatureView, Filter, FloatSpace, GraphBuilder, Metric,
    OptimizationTarget, SearchGraph, SizeBoundedGraph,
};

const DIM: usize = 128;
const K: usize = 10;

fn random_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.random::<f32>()).collect())
        .collect()
}

fn build_graph(data: &[Vec<f32>], capacity: u32, k: usize) -> SizeBoundedGraph {
    let space = FloatSpace::new(data[0].len(), Metric::L2);
    let graph = SizeBoundedGraph::new(capacity, k, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 42);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::F32(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    builder.into_graph()
}

fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn ground_truth(query: &[f32], data: &[Vec<f32>], k: usize) -> Vec<u32> {
    let mut distances: Vec<(u32, f32)> = data
        .iter()
        .enumerate()
        .map(|(label, v)| (label as u32, l2_squared(query, v)))
        .collect();
    distances.sort_by(|a, b| a.1.total_cmp(&b.1));
    distances.into_iter().take(k).map(|(label, _)| label).collect()
}

#[test]
fn built_graph_is_regular_and_connected() {
    let data = random_vectors(100, DIM, 1);
    let graph = build_graph(&data, 100, K);

    assert_eq!(graph.size(), 100);
    assert!(check_graph_regularity(&graph, 100, true));
    assert!(check_graph_connectivity(&graph));
    assert!(check_graph_weights(&graph));
}

#[test]
fn search_finds_the_indexed_vector_itself() {
    let data = random_vectors(100, DIM, 2);
    let graph = build_graph(&data, 100, K);

    let query = graph.feature_space().encode(FeatureView::F32(&data[5])).unwrap();
    let results = graph
        .search(&graph.entry_indices(), &query, 0.1, 10, None, 0)
        .into_sorted_vec();

    assert_eq!(results.len(), 10);
    assert_eq!(graph.external_label(results[0].index), 5);
    assert_eq!(results[0].distance, 0.0);
}

#[test]
fn search_recall_is_reasonable() {
    let data = random_vectors(200, DIM, 3);
    let graph = build_graph(&data, 200, K);

    let k = 10;
    let mut hits = 0usize;
    let mut total = 0usize;
    for query_label in [0usize, 17, 42, 99, 150] {
        let truth: HashSet<u32> = ground_truth(&data[query_label], &data, k)
            .into_iter()
            .collect();
        let query = graph
            .feature_space()
            .encode(FeatureView::F32(&data[query_label]))
            .unwrap();
        let results = graph.search(&graph.entry_indices(), &query, 0.2, k as u32, None, 0);
        for result in results.iter() {
            if truth.contains(&graph.external_label(result.index)) {
                hits += 1;
            }
        }
        total += k;
    }
    let recall = hits as f32 / total as f32;
    assert!(recall >= 0.5, "recall {recall} below 0.5");
}

#[test]
fn results_come_back_sorted_by_distance() {
    let data = random_vectors(100, DIM, 4);
    let graph = build_graph(&data, 100, K);

    let query = graph.feature_space().encode(FeatureView::F32(&data[0])).unwrap();
    let results = graph
        .search(&graph.entry_indices(), &query, 0.1, 10, None, 0)
        .into_sorted_vec();
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn removal_restores_regularity() {
    let data = random_vectors(100, DIM, 5);
    let space = FloatSpace::new(DIM, Metric::L2);
    let graph = SizeBoundedGraph::new(100, K, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 42);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::F32(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();

    for label in 40..60u32 {
        builder.remove_entry(label);
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    let graph = builder.into_graph();

    assert_eq!(graph.size(), 80);
    assert!(!graph.has_vertex(50));
    assert!(graph.internal_index(50).is_none());
    assert!(check_graph_regularity(&graph, 80, true));
    assert!(check_graph_connectivity(&graph));
}

#[test]
fn removed_slot_is_reused_by_the_next_insert() {
    let data = random_vectors(50, DIM, 6);
    let space = FloatSpace::new(DIM, Metric::L2);
    let graph = SizeBoundedGraph::new(50, 8, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 7);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::F32(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    let bound_before = builder.graph().slot_bound();

    builder.remove_entry(10);
    builder.build(false, |_| BuildControl::Continue).unwrap();
    let extra = vec![0.25f32; DIM];
    builder.add_entry(1000, FeatureView::F32(&extra)).unwrap();
    builder.build(false, |_| BuildControl::Continue).unwrap();

    let graph = builder.into_graph();
    assert_eq!(graph.size(), 50);
    assert_eq!(graph.slot_bound(), bound_before);
    assert!(graph.has_vertex(1000));
}

#[test]
fn filtered_search_respects_the_label_set() {
    let data = random_vectors(100, DIM, 8);
    let graph = build_graph(&data, 100, K);

    let valid: Vec<u32> = (0..10).collect();
    let filter = Filter::new(&valid, 100);
    let query = graph.feature_space().encode(FeatureView::F32(&data[50])).unwrap();
    let results = graph.search(&graph.entry_indices(), &query, 0.1, 20, Some(&filter), 0);

    assert_eq!(results.len(), 10);
    let allowed: HashSet<u32> = valid.into_iter().collect();
    for result in results.iter() {
        assert!(allowed.contains(&graph.external_label(result.index)));
    }
}

// A filter admitting most of a large graph defeats the brute-force
// shortcut, so results must come out of the graph walk itself.
#[test]
fn filtered_graph_walk_respects_a_large_label_set() {
    let mut rng = StdRng::seed_from_u64(16);
    let data: Vec<Vec<u8>> = (0..20_000)
        .map(|_| (0..2).map(|_| rng.random::<u8>()).collect())
        .collect();

    let space = FloatSpace::new(2, Metric::L2Uint8);
    let graph = SizeBoundedGraph::new(20_000, K, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 42);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::U8(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    let graph = builder.into_graph();

    let valid: Vec<u32> = (0..12_000).collect();
    let filter = Filter::new(&valid, 20_000);
    let query = graph.feature_space().encode(FeatureView::U8(&data[3])).unwrap();
    let results = graph.search(&graph.entry_indices(), &query, 0.01, 400, Some(&filter), 0);

    assert_eq!(results.len(), 400);
    for result in results.iter() {
        assert!(graph.external_label(result.index) < 12_000);
    }
}

#[test]
fn same_seed_builds_identical_graphs() {
    let data = random_vectors(300, 16, 21);
    let first = build_graph(&data, 300, K);
    let second = build_graph(&data, 300, K);

    assert_eq!(first.slot_bound(), second.slot_bound());
    for vertex in 0..first.slot_bound() {
        assert_eq!(first.is_live(vertex), second.is_live(vertex));
        if !first.is_live(vertex) {
            continue;
        }
        assert_eq!(first.external_label(vertex), second.external_label(vertex));
        assert_eq!(first.neighbor_indices(vertex), second.neighbor_indices(vertex));
        assert_eq!(first.neighbor_weights(vertex), second.neighbor_weights(vertex));
    }
}

#[test]
fn threaded_build_stays_regular() {
    let data = random_vectors(1_500, 32, 22);
    let space = FloatSpace::new(32, Metric::L2);
    let graph = SizeBoundedGraph::new(1_500, K, space).unwrap();
    let config = BuilderConfig {
        optimization_target: OptimizationTarget::HighLid,
        ..BuilderConfig::default()
    };
    let mut builder = GraphBuilder::new(graph, StdRng::seed_from_u64(42), config);
    builder.set_thread_count(4);
    builder.set_batch_size(4, 16);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::F32(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    let graph = builder.into_graph();

    assert_eq!(graph.size(), 1_500);
    assert!(check_graph_regularity(&graph, 1_500, true));
    assert!(check_graph_weights(&graph));
    assert!(check_graph_connectivity(&graph));
}

#[test]
fn explore_stays_near_the_entry() {
    let data = random_vectors(100, DIM, 9);
    let graph = build_graph(&data, 100, K);

    let entry = graph.internal_index(5).unwrap();
    let results = graph.explore(entry, 8, 10_000).into_sorted_vec();

    assert!(!results.is_empty());
    assert!(results.len() <= 8);
    for result in &results {
        assert_ne!(result.index, entry);
    }
    for pair in results.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
}

#[test]
fn explore_budget_bounds_the_result() {
    let data = random_vectors(100, DIM, 10);
    let graph = build_graph(&data, 100, K);

    let entry = graph.internal_index(0).unwrap();
    let tight = graph.explore(entry, 50, 5);
    assert!(tight.len() <= 5);
}

#[test]
fn has_path_reaches_any_vertex() {
    let data = random_vectors(100, DIM, 11);
    let graph = build_graph(&data, 100, K);

    let target = graph.internal_index(77).unwrap();
    let path = graph.has_path(&graph.entry_indices(), target, 0.2, 10);

    assert!(!path.is_empty());
    assert_eq!(path[0].index, target);
}

#[test]
fn batched_search_matches_sequential_search() {
    let data = random_vectors(150, DIM, 12);
    let graph = build_graph(&data, 150, K);

    let queries: Vec<Vec<u8>> = data[..16]
        .iter()
        .map(|v| graph.feature_space().encode(FeatureView::F32(v)).unwrap())
        .collect();
    let entries = graph.entry_indices();

    let sequential = deg::search_batch(&graph, &entries, &queries, 0.1, 5, None, 0, 1, 4);
    let parallel = deg::search_batch(&graph, &entries, &queries, 0.1, 5, None, 0, 2, 4);

    assert_eq!(sequential.len(), parallel.len());
    for (a, b) in sequential.into_iter().zip(parallel) {
        let a: Vec<u32> = a.into_sorted_vec().iter().map(|r| r.index).collect();
        let b: Vec<u32> = b.into_sorted_vec().iter().map(|r| r.index).collect();
        assert_eq!(a, b);
    }
}

#[test]
fn uint8_features_are_searchable() {
    let mut rng = StdRng::seed_from_u64(13);
    let data: Vec<Vec<u8>> = (0..30)
        .map(|_| (0..16).map(|_| rng.random::<u8>()).collect())
        .collect();

    let space = FloatSpace::new(16, Metric::L2Uint8);
    let graph = SizeBoundedGraph::new(30, 4, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 42);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::U8(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    let graph = builder.into_graph();

    assert_eq!(graph.size(), 30);
    let query = graph.feature_space().encode(FeatureView::U8(&data[7])).unwrap();
    let results = graph
        .search(&graph.entry_indices(), &query, 0.2, 3, None, 0)
        .into_sorted_vec();
    assert_eq!(graph.external_label(results[0].index), 7);
}

#[test]
fn duplicate_label_is_rejected_before_enqueue() {
    let data = random_vectors(30, DIM, 14);
    let graph = build_graph(&data, 40, 4);

    let mut builder = GraphBuilder::with_seed(graph, 1);
    let err = builder
        .add_entry(5, FeatureView::F32(&data[5]))
        .unwrap_err();
    assert!(matches!(err, deg::DegError::DuplicateLabel(5)));
}

#[test]
fn wrong_dimension_is_rejected_before_enqueue() {
    let space = FloatSpace::new(DIM, Metric::L2);
    let graph = SizeBoundedGraph::new(10, 4, space).unwrap();
    let builder = GraphBuilder::with_seed(graph, 1);

    let short = vec![0.0f32; DIM - 1];
    let err = builder.add_entry(0, FeatureView::F32(&short)).unwrap_err();
    assert!(matches!(
        err,
        deg::DegError::ShapeError { expected, got } if expected == DIM && got == DIM - 1
    ));
}

#[test]
fn callback_can_stop_a_build_early() {
    let data = random_vectors(100, DIM, 15);
    let space = FloatSpace::new(DIM, Metric::L2);
    let graph = SizeBoundedGraph::new(100, K, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 42);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::F32(vector))
            .unwrap();
    }

    let mut steps = 0u64;
    builder
        .build(false, |status| {
            steps = status.step;
            if status.step >= 10 {
                BuildControl::Stop
            } else {
                BuildControl::Continue
            }
        })
        .unwrap();

    assert_eq!(steps, 10);
    assert!(builder.graph().size() < 100);
    assert!(builder.num_new_entries() > 0);
}
