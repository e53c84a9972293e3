//! Benchmarks for the reconstruction stages.
//!
//! Run with: cargo bench -p fuse-cut
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p fuse-cut -- --save-baseline main
//! 2. After changes: cargo bench -p fuse-cut -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use fuse_cut::maxflow::MaxFlow;
use fuse_cut::{
    Camera, DelaunayGraphCut, Hexahedron, Landmark, MultiViewParams, ReconstructionConfig, SfmData,
    Tetrahedralization, VotingParams,
};
use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

// =============================================================================
// Input Generation
// =============================================================================

fn random_points(count: usize, seed: u64) -> Vec<Point3<f64>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| Point3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect()
}

/// Six axis cameras around a noisy unit sphere; each point is seen by the
/// cameras on its side.
fn sphere_scene(count: usize) -> (MultiViewParams, SfmData) {
    let centers = [
        Point3::new(3.0, 0.0, 0.0),
        Point3::new(-3.0, 0.0, 0.0),
        Point3::new(0.0, 3.0, 0.0),
        Point3::new(0.0, -3.0, 0.0),
        Point3::new(0.0, 0.0, 3.0),
        Point3::new(0.0, 0.0, -3.0),
    ];
    let cameras = centers
        .iter()
        .map(|&c| {
            let up = if c.z == 0.0 { Vector3::z() } else { Vector3::y() };
            Camera::look_at(c, Point3::origin(), up, 500.0, 640, 480)
        })
        .collect();

    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let landmarks = (0..count)
        .map(|_| {
            let dir = Vector3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
                .normalize();
            let p = Point3::from(dir * rng.gen_range(0.98..1.02));
            let cams = centers
                .iter()
                .enumerate()
                .filter(|(_, c)| c.coords.normalize().dot(&dir) > 0.3)
                .map(|(i, _)| i as u32)
                .collect();
            Landmark::new(p, cams)
        })
        .collect();
    (MultiViewParams::new(cameras), SfmData::new(landmarks))
}

fn region() -> Hexahedron {
    Hexahedron::from_bounds(Point3::new(-2.0, -2.0, -2.0), Point3::new(2.0, 2.0, 2.0))
}

fn sphere_graph(count: usize) -> (DelaunayGraphCut, Vec<u32>) {
    let (mp, sfm) = sphere_scene(count);
    let cams: Vec<u32> = (0..mp.len() as u32).collect();
    let config = ReconstructionConfig::default();
    let mut gc = DelaunayGraphCut::new(mp);
    gc.create_dense_point_cloud(&region(), &cams, Some(&sfm), None, &config.fuse, &config.assembly)
        .unwrap();
    gc.compute_delaunay().unwrap();
    (gc, cams)
}

// =============================================================================
// Tetrahedralization Benchmarks
// =============================================================================

fn bench_tetrahedralization(c: &mut Criterion) {
    let mut group = c.benchmark_group("Tetrahedralization");

    for count in [1_000, 5_000, 20_000] {
        let points = random_points(count, 7);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("delaunay", count), &points, |b, points| {
            b.iter(|| Tetrahedralization::new(black_box(points.clone())).unwrap())
        });
    }

    group.finish();
}

// =============================================================================
// Voting Benchmarks
// =============================================================================

fn bench_voting(c: &mut Criterion) {
    let mut group = c.benchmark_group("Voting");
    group.sample_size(20);

    for count in [1_000, 5_000] {
        let (mut gc, cams) = sphere_graph(count);
        let params = VotingParams::default();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(BenchmarkId::new("vote_full_empty_score", count), |b| {
            b.iter(|| gc.vote_full_empty_score(black_box(&cams), &params))
        });
    }

    group.finish();
}

// =============================================================================
// Max-Flow Benchmarks
// =============================================================================

/// `n`³ grid with unit edges, sources on one face and sinks on the opposite one.
fn grid_graph(n: usize) -> MaxFlow {
    let idx = |i: usize, j: usize, k: usize| (i * n + j) * n + k;
    let mut graph = MaxFlow::with_capacity(n * n * n, 3 * n * n * n);
    for i in 0..n {
        for j in 0..n {
            for k in 0..n {
                let v = idx(i, j, k);
                if i + 1 < n {
                    graph.add_edge(v, idx(i + 1, j, k), 1.0, 1.0);
                }
                if j + 1 < n {
                    graph.add_edge(v, idx(i, j + 1, k), 1.0, 1.0);
                }
                if k + 1 < n {
                    graph.add_edge(v, idx(i, j, k + 1), 1.0, 1.0);
                }
                if i == 0 {
                    graph.add_tedge(v, 10.0, 0.0);
                }
                if i == n - 1 {
                    graph.add_tedge(v, 0.0, 10.0);
                }
            }
        }
    }
    graph
}

fn bench_max_flow(c: &mut Criterion) {
    let mut group = c.benchmark_group("MaxFlow");

    for n in [10, 20, 30] {
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_function(BenchmarkId::new("grid", n), |b| {
            b.iter_batched(|| grid_graph(n), |mut graph| graph.compute(), criterion::BatchSize::LargeInput)
        });
    }

    let (mut gc, cams) = sphere_graph(5_000);
    let params = VotingParams::default();
    gc.vote_full_empty_score(&cams, &params);
    group.bench_function("cell_graph_5000", |b| b.iter(|| gc.max_flow(black_box(&params))));

    group.finish();
}

criterion_group!(benches, bench_tetrahedralization, bench_voting, bench_max_flow);
criterion_main!(benches);
