use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;

use crate::{errors::SGError, iterators::line_iterator::{line_key, LineIterator}, storage::{GridPoint, GridStorage}};

pub trait SweepFunction
{
    ///
    /// Applies the one-dimensional transform to every point of `line`.
    ///
    fn execute_in_place(&mut self, values: &mut [f64], line: &mut LineIterator) -> Result<(), SGError>;
}

///
/// Distinct lines in direction `dim`, in order of the lowest sequence number
/// found on each line.
///
pub(crate) fn lines(storage: &GridStorage, dim: usize) -> IndexSet<GridPoint, FxBuildHasher>
{
    let mut lines = IndexSet::with_hasher(FxBuildHasher::default());
    for point in storage.iter()
    {
        lines.insert(line_key(point, dim));
    }
    lines
}

///
/// Runs `function` over every line of `storage` in direction `dim`. Each
/// line gets a fresh probe.
///
pub fn sweep_1d<F: SweepFunction>(function: &mut F, storage: &GridStorage, values: &mut [f64], dim: usize) -> Result<(), SGError>
{
    if values.len() != storage.len()
    {
        return Err(SGError::SizeMismatch { expected: storage.len(), actual: values.len() });
    }
    if dim >= storage.dim()
    {
        return Err(SGError::DimensionMismatch { expected: storage.dim(), actual: dim + 1 });
    }
    for line in lines(storage, dim).iter()
    {
        let mut iterator = LineIterator::new(storage, line, dim);
        function.execute_in_place(values, &mut iterator)?;
    }
    Ok(())
}

#[cfg(test)]
struct CountVisits(Vec<usize>);

#[cfg(test)]
impl SweepFunction for CountVisits
{
    fn execute_in_place(&mut self, _values: &mut [f64], line: &mut LineIterator) -> Result<(), SGError> {
        fn visit(counts: &mut [usize], line: &mut LineIterator, node: crate::storage::Node1D)
        {
            if let Some(seq) = line.seq(node)
            {
                counts[seq] += 1;
                for child in node.children()
                {
                    visit(counts, line, child);
                }
            }
        }
        for boundary in [line.left_boundary(), line.right_boundary()].into_iter().flatten()
        {
            self.0[boundary] += 1;
        }
        visit(&mut self.0, line, crate::storage::Node1D::ROOT);
        Ok(())
    }
}

#[test]
fn check_every_point_visited_once()
{
    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[3, 3], None).unwrap();
    let mut values = vec![0.0; storage.len()];
    for d in 0..2
    {
        let mut counter = CountVisits(vec![0; storage.len()]);
        sweep_1d(&mut counter, &storage, &mut values, d).unwrap();
        assert!(counter.0.iter().all(|&c| c == 1));
    }
    assert_eq!(lines(&storage, 0).len(), 7);

    let mut storage = GridStorage::new(2);
    crate::generators::regular_with_boundaries(&mut storage, &[2, 2], None).unwrap();
    let mut values = vec![0.0; storage.len()];
    for d in 0..2
    {
        let mut counter = CountVisits(vec![0; storage.len()]);
        sweep_1d(&mut counter, &storage, &mut values, d).unwrap();
        assert!(counter.0.iter().all(|&c| c == 1));
    }
}

#[test]
fn check_sweep_rejects_wrong_length()
{
    let mut storage = GridStorage::new(1);
    storage.insert(GridPoint::root(1)).unwrap();
    let mut values = vec![0.0; 2];
    let mut counter = CountVisits(vec![0; 1]);
    assert_eq!(sweep_1d(&mut counter, &storage, &mut values, 0), Err(SGError::SizeMismatch { expected: 1, actual: 2 }));
}
