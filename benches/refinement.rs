//! Benchmark of surplus refinement and coarsening passes
//!
//! Run with: cargo bench --bench refinement

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use sgindex::algorithms::hierarchisation::BasisType;
use sgindex::algorithms::refinement::RefinementOptions;
use sgindex::errors::SGError;
use sgindex::grids::sparse_grid::SparseGrid;

fn build_grid(dim: usize, level: usize) -> Result<SparseGrid, SGError> {
    let mut grid = SparseGrid::new(dim, BasisType::Linear);
    grid.sparse_grid(&vec![level; dim])?;
    grid.update_values(&mut |x: &[f64]| (-x.iter().map(|v| (v - 0.3) * (v - 0.3)).sum::<f64>() * 20.0).exp())?;
    Ok(grid)
}

fn bench_refine(c: &mut Criterion) {
    let grid = build_grid(4, 5).unwrap();
    let options = RefinementOptions::default();
    println!("4D grid size: {}", grid.len());
    let mut group = c.benchmark_group("4D Surplus Refinement");
    for budget in [1, 10, 100] {
        group.bench_function(format!("{} points", budget), |b| {
            b.iter_batched(|| grid.clone(), |mut grid| {
                grid.refine_surplus(budget, 0.0, &options).unwrap();
                grid
            }, BatchSize::SmallInput)
        });
    }
    group.finish();
}

fn bench_coarsen(c: &mut Criterion) {
    let grid = build_grid(4, 5).unwrap();
    c.bench_function("4D Surplus Coarsening", |b| {
        b.iter_batched(|| grid.clone(), |mut grid| {
            grid.coarsen_surplus(100, 1e-3).unwrap();
            grid
        }, BatchSize::SmallInput)
    });
}

criterion_group!(benches, bench_refine, bench_coarsen);
criterion_main!(benches);
