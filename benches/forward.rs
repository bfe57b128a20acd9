use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use argweaver::arg::tree::LocalTree;
use argweaver::model::states::{LineageCounts, States};
use argweaver::model::trans::TransMatrix;
use argweaver::model::TimeGrid;
use argweaver::ArgModel;

/// A caterpillar tree over `n` leaves with one coalescence per interval
fn caterpillar(n: usize) -> LocalTree {
    let nnodes = 2 * n - 1;
    let mut parents = vec![None; nnodes];
    let mut ages = vec![0; nnodes];
    // leaves 0..n, internals n..2n-1 stacked upward
    parents[0] = Some(n);
    for (k, internal) in (n..nnodes).enumerate() {
        parents[k + 1] = Some(internal);
        if internal + 1 < nnodes {
            parents[internal] = Some(internal + 1);
        }
        ages[internal] = k + 1;
    }
    LocalTree::from_parents(&parents, &ages).unwrap()
}

/// Benchmark the fused forward-column update at different leaf counts
fn bench_fold_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold_forward");

    for n in [4usize, 8, 16, 32] {
        let ntimes = n + 4;
        let points: Vec<f64> = (0..ntimes).map(|i| (i * i * 50) as f64).collect();
        let grid = TimeGrid::from_points(&points).unwrap();
        let model = ArgModel::new(grid, 1e4, 1.5e-8, 2.5e-8).unwrap();
        let tree = caterpillar(n);
        let lineages = LineageCounts::count(&tree, ntimes);
        let states = States::enumerate(&tree, ntimes);
        let matrix = TransMatrix::calculate(&model, &tree, &lineages);
        let ages: Vec<usize> = (0..tree.nnodes()).map(|i| tree.node(i).age).collect();

        let mut rng = StdRng::seed_from_u64(1);
        let weights: Vec<f64> = (0..states.len()).map(|_| rng.gen::<f64>()).collect();
        let mut out = vec![0.0; states.len()];

        group.throughput(Throughput::Elements(states.len() as u64));
        group.bench_with_input(BenchmarkId::new("states", states.len()), &n, |b, _| {
            b.iter(|| {
                matrix.fold_forward(
                    black_box(&states),
                    black_box(&ages),
                    black_box(&weights),
                    &mut out,
                );
                black_box(out[0])
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fold_forward);
criterion_main!(benches);
