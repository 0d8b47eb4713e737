//! Benchmark of hierarchisation sweeps on regular grids
//!
//! Run with: cargo bench --bench hierarchisation

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use sgindex::algorithms::hierarchisation::{BasisType, HierarchisationOperation};
use sgindex::errors::SGError;
use sgindex::storage::GridStorage;

fn build_storage(dim: usize, level: usize, basis: BasisType) -> Result<GridStorage, SGError> {
    let mut storage = GridStorage::new(dim);
    if basis.has_boundary() {
        sgindex::generators::regular_with_boundaries(&mut storage, &vec![level; dim], None)?;
    } else {
        sgindex::generators::regular(&mut storage, &vec![level; dim], None)?;
    }
    Ok(storage)
}

fn nodal_values(storage: &GridStorage) -> Vec<f64> {
    storage.coordinates().map(|x| x.iter().map(|v| v * v).sum::<f64>()).collect()
}

fn bench_hierarchize(c: &mut Criterion) {
    let mut group = c.benchmark_group("Hierarchize");
    for (dim, level) in [(2, 8), (4, 6), (6, 4)] {
        for basis in [BasisType::Linear, BasisType::LinearBoundary, BasisType::ModLinear] {
            let storage = build_storage(dim, level, basis).unwrap();
            let values = nodal_values(&storage);
            let mut alpha = vec![0.0; values.len()];
            group.bench_with_input(BenchmarkId::new(format!("{:?}", basis), format!("{}D level {}", dim, level)), &storage, |b, storage| {
                b.iter(|| basis.hierarchize_into(storage, &values, &mut alpha).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let storage = build_storage(4, 6, BasisType::LinearBoundary).unwrap();
    let values = nodal_values(&storage);
    println!("4D boundary grid size: {}", storage.len());
    c.bench_function("4D boundary hierarchize + dehierarchize", |b| {
        b.iter(|| {
            let mut data = values.clone();
            BasisType::LinearBoundary.hierarchize(&storage, &mut data).unwrap();
            BasisType::LinearBoundary.dehierarchize(&storage, &mut data).unwrap();
            data
        })
    });
}

criterion_group!(benches, bench_hierarchize, bench_round_trip);
criterion_main!(benches);
