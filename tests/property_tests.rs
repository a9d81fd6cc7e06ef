//! Property-based tests for the graph store and search primitives.
//!
//! These verify invariants that should hold regardless of input:
//! - Adjacency arrays stay sorted through arbitrary edge changes
//! - The arena reuses freed slots instead of growing
//! - Filters behave like the label set they were built from
//! - Result sets come out ordered by distance

use proptest::prelude::*;

use deg::{
    f32_to_bytes, Filter, FloatSpace, Metric, MutableGraph, ObjectDistance, ResultSet,
    SearchGraph, SizeBoundedGraph,
};

fn graph_with_vertices(count: u32) -> SizeBoundedGraph {
    let space = FloatSpace::new(2, Metric::L2);
    let mut graph = SizeBoundedGraph::new(count.max(1), 4, space).unwrap();
    for label in 0..count {
        let feature = f32_to_bytes(&[label as f32, 0.0]);
        graph.add_vertex(label, &feature).unwrap();
    }
    graph
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn adjacency_stays_sorted_through_edge_changes(
        edges in prop::collection::vec((0u32..16, 0u32..16), 1..64),
    ) {
        let mut graph = graph_with_vertices(16);
        for (a, b) in edges {
            if a == b || graph.has_edge(a, b) {
                continue;
            }
            // replace whatever occupies the first slot, self-loop or edge
            let from = graph.neighbor_indices(a)[0];
            graph.change_edge(a, from, b, 1.0);
        }
        for v in 0..16u32 {
            let neighbors = graph.neighbor_indices(v);
            prop_assert_eq!(neighbors.len(), 4);
            for pair in neighbors.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }

    #[test]
    fn freed_slots_are_reused(removed in prop::collection::hash_set(0u32..32, 1..8)) {
        let mut graph = graph_with_vertices(32);
        let bound = graph.slot_bound();
        for &label in &removed {
            graph.remove_vertex(label).unwrap();
        }
        prop_assert_eq!(graph.size(), 32 - removed.len() as u32);

        for (offset, _) in removed.iter().enumerate() {
            let label = 100 + offset as u32;
            let feature = f32_to_bytes(&[label as f32, 1.0]);
            graph.add_vertex(label, &feature).unwrap();
        }
        prop_assert_eq!(graph.size(), 32);
        prop_assert_eq!(graph.slot_bound(), bound);
    }

    #[test]
    fn labels_survive_removal_of_others(victim in 0u32..20) {
        let mut graph = graph_with_vertices(20);
        graph.remove_vertex(victim).unwrap();
        for label in 0..20u32 {
            if label == victim {
                prop_assert!(!graph.has_vertex(label));
            } else {
                let index = graph.internal_index(label);
                prop_assert!(index.is_some());
                prop_assert_eq!(graph.external_label(index.unwrap()), label);
            }
        }
    }

    #[test]
    fn filter_matches_its_label_set(
        labels in prop::collection::hash_set(0u32..256, 0..64),
    ) {
        let set: Vec<u32> = labels.iter().copied().collect();
        let filter = Filter::new(&set, 256);
        prop_assert_eq!(filter.size(), labels.len());
        for label in 0..256u32 {
            prop_assert_eq!(filter.is_valid(label), labels.contains(&label));
        }
        let mut seen = Vec::new();
        filter.for_each_valid_label(|label| seen.push(label));
        seen.sort_unstable();
        let mut expected: Vec<u32> = labels.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(seen, expected);
    }

    #[test]
    fn result_set_orders_by_distance(
        distances in prop::collection::vec(0.0f32..1e6, 1..64),
    ) {
        let mut set = ResultSet::new();
        for (index, distance) in distances.iter().enumerate() {
            set.push(ObjectDistance::new(index as u32, *distance));
        }
        let sorted = set.into_sorted_vec();
        prop_assert_eq!(sorted.len(), distances.len());
        for pair in sorted.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn duplicate_filter_labels_collapse(label in 0u32..100, copies in 1usize..5) {
        let labels = vec![label; copies];
        let filter = Filter::new(&labels, 100);
        prop_assert_eq!(filter.size(), 1);
        prop_assert!(filter.is_valid(label));
    }
}
