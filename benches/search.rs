//! Benchmarks for graph construction and search.
//!
//! These measure the hot paths: the epsilon-greedy walk over a built
//! graph, the bounded exploration walk, and incremental insertion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use deg::{
    BuildControl, FeatureView, FloatSpace, GraphBuilder, Metric, SearchGraph, SizeBoundedGraph,
};

const DIM: usize = 128;
const K: usize = 16;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn build_graph(data: &[Vec<f32>]) -> SizeBoundedGraph {
    let space = FloatSpace::new(DIM, Metric::L2);
    let graph = SizeBoundedGraph::new(data.len() as u32, K, space).unwrap();
    let mut builder = GraphBuilder::with_seed(graph, 42);
    for (label, vector) in data.iter().enumerate() {
        builder
            .add_entry(label as u32, FeatureView::F32(vector))
            .unwrap();
    }
    builder.build(false, |_| BuildControl::Continue).unwrap();
    builder.into_graph()
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    let data = random_vectors(2_000, DIM, 1);
    let graph = build_graph(&data);
    let queries: Vec<Vec<u8>> = random_vectors(64, DIM, 2)
        .iter()
        .map(|v| graph.feature_space().encode(FeatureView::F32(v)).unwrap())
        .collect();
    let entries = graph.entry_indices();

    for eps in [0.01f32, 0.1, 0.2] {
        group.throughput(Throughput::Elements(queries.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(eps), &eps, |bench, &eps| {
            bench.iter(|| {
                for query in &queries {
                    black_box(graph.search(&entries, black_box(query), eps, 10, None, 0));
                }
            });
        });
    }

    group.finish();
}

fn bench_explore(c: &mut Criterion) {
    let data = random_vectors(2_000, DIM, 3);
    let graph = build_graph(&data);

    c.bench_function("explore", |bench| {
        let mut entry = 0u32;
        bench.iter(|| {
            entry = (entry + 1) % graph.size();
            black_box(graph.explore(black_box(entry), 32, 2_000));
        });
    });
}

fn bench_insertion(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(10);

    for n in [500usize, 1_000] {
        let data = random_vectors(n, DIM, 4);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |bench, data| {
            bench.iter(|| black_box(build_graph(data)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_search, bench_explore, bench_insertion);
criterion_main!(benches);
