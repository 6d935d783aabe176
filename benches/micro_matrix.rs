#![forbid(unsafe_code)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use matrixgraph::matrix::{mxm, MatrixOptions, ScalarType, Semiring, TypedMatrix};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DIM: u64 = 16_384;

fn random_cells(count: usize, seed: u64) -> Vec<(u64, u64)> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (rng.gen_range(0..DIM), rng.gen_range(0..DIM)))
        .collect()
}

fn micro_set_element(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/matrix");
    group.sample_size(20);
    for count in [1_024usize, 16_384, 131_072] {
        let cells = random_cells(count, 7);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("set_then_wait", count), &cells, |b, cells| {
            b.iter(|| {
                let mut m = TypedMatrix::new(ScalarType::Bool, DIM, DIM).expect("matrix");
                for &(row, col) in cells {
                    m.set_element(true, row, col).expect("set");
                }
                m.wait().expect("wait");
                black_box(m.nvals().expect("nvals"))
            });
        });
        group.bench_with_input(BenchmarkId::new("set_non_iso", count), &cells, |b, cells| {
            b.iter(|| {
                let mut m = TypedMatrix::new(ScalarType::Int64, DIM, DIM).expect("matrix");
                for (k, &(row, col)) in cells.iter().enumerate() {
                    m.set_element(k as i64, row, col).expect("set");
                }
                m.wait().expect("wait");
                black_box(m.nvals().expect("nvals"))
            });
        });
    }
    group.finish();
}

fn micro_resurrect(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/matrix");
    let cells = random_cells(16_384, 11);
    let mut base = TypedMatrix::new(ScalarType::Int64, DIM, DIM).expect("matrix");
    for (k, &(row, col)) in cells.iter().enumerate() {
        base.set_element(k as i64, row, col).expect("set");
    }
    base.wait().expect("wait");
    group.throughput(Throughput::Elements(cells.len() as u64));
    group.bench_function("remove_then_set", |b| {
        b.iter(|| {
            let mut m = base.clone();
            for &(row, col) in &cells {
                m.remove_element(row, col).expect("remove");
                m.set_element(1i64, row, col).expect("set");
            }
            black_box(m.zombie_count())
        });
    });
    group.finish();
}

fn micro_mxm(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/mxm");
    group.sample_size(20);
    let mut adjacency = TypedMatrix::new(ScalarType::Bool, DIM, DIM).expect("matrix");
    for (row, col) in random_cells(131_072, 3) {
        adjacency.set_element(true, row, col).expect("set");
    }
    adjacency.wait().expect("wait");
    for rows in [16u64, 256, 8_192] {
        let mut filter =
            TypedMatrix::with_options(ScalarType::Bool, rows, DIM, MatrixOptions::sparse_only()).expect("filter");
        for row in 0..rows {
            filter.set_element(true, row, row * 2).expect("set");
        }
        filter.wait().expect("wait");
        group.bench_with_input(BenchmarkId::new("filter_times_adjacency", rows), &filter, |b, filter| {
            b.iter(|| black_box(mxm(filter, &adjacency, Semiring::AnyPair, &MatrixOptions::sparse_only()).expect("mxm")));
        });
    }
    group.finish();
}

criterion_group!(benches, micro_set_element, micro_resurrect, micro_mxm);
criterion_main!(benches);
