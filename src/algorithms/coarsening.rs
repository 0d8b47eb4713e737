use crate::{algorithms::error_container::select_largest, errors::SGError, storage::{GridPoint, GridStorage, SequenceRemap}};

///
/// Scores grid points for removal. Points with the lowest values are removed first.
///
pub trait CoarseningFunctor : Send + Sync
{
    fn value(&self, storage: &GridStorage, seq: usize) -> f64;

    ///
    /// Upper bound a score has to stay below to be considered at all.
    ///
    fn start(&self) -> f64
    {
        f64::INFINITY
    }

    ///
    /// Maximum number of points removed in one pass.
    ///
    fn removements_num(&self) -> usize;

    fn threshold(&self) -> f64;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoarseningResult
{
    /// Old sequence numbers of the removed points, ascending.
    pub removed: Vec<usize>,
    pub remap: SequenceRemap,
}

///
/// Inner points other than the root may be removed once no child is stored in
/// any direction. The stored leaf flag is not trusted here.
///
#[inline]
pub fn is_removable(storage: &GridStorage, point: &GridPoint) -> bool
{
    point.is_inner_point() && point.level().iter().any(|&l| l != 1) && storage.is_structural_leaf(point)
}

pub fn num_removable_points(storage: &GridStorage) -> usize
{
    storage.iter().filter(|point| is_removable(storage, point)).count()
}

///
/// Removes up to `functor.removements_num()` removable points with the lowest
/// scores below `functor.threshold()`, and compacts `coefficients` so they stay
/// aligned with the storage.
///
pub fn coarsen<F: CoarseningFunctor + ?Sized>(storage: &mut GridStorage, functor: &F, coefficients: &mut Vec<f64>) -> Result<CoarseningResult, SGError>
{
    if coefficients.len() != storage.len()
    {
        return Err(SGError::SizeMismatch { expected: storage.len(), actual: coefficients.len() });
    }
    let candidates: Vec<(usize, f64)> = storage.iter().enumerate()
        .filter(|(_, point)| is_removable(storage, point))
        .map(|(seq, _)| (seq, -functor.value(storage, seq)))
        .collect();
    let num_candidates = candidates.len();
    let threshold = functor.threshold();
    let mut removed: Vec<usize> = select_largest(candidates, functor.removements_num(), -functor.start())
        .into_iter()
        .filter(|&(_, negated)| -negated < threshold)
        .map(|(seq, _)| seq)
        .collect();
    removed.sort_unstable();
    if removed.is_empty()
    {
        log::debug!("coarsening: none of {} candidates removed", num_candidates);
        return Ok(CoarseningResult { removed, remap: SequenceRemap::identity(storage.len()) });
    }
    let remap = storage.delete_points(&removed)?;
    remap.apply(coefficients)?;
    log::debug!("coarsening: {} candidates, {} points removed", num_candidates, removed.len());
    Ok(CoarseningResult { removed, remap })
}

#[cfg(test)]
struct ScoreTable(Vec<f64>, usize, f64);

#[cfg(test)]
impl CoarseningFunctor for ScoreTable
{
    fn value(&self, _storage: &GridStorage, seq: usize) -> f64 {
        self.0[seq]
    }
    fn removements_num(&self) -> usize {
        self.1
    }
    fn threshold(&self) -> f64 {
        self.2
    }
}

#[test]
fn check_coarsen_lowest_leaves()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[3], None).unwrap();
    // (1,1) (2,1) (2,3) (3,1) (3,3) (3,5) (3,7)
    assert_eq!(num_removable_points(&storage), 4);
    let mut alpha = vec![9.0, 8.0, 7.0, 0.4, 0.1, 0.3, 5.0];
    let functor = ScoreTable(alpha.clone(), 2, 1.0);
    let result = coarsen(&mut storage, &functor, &mut alpha).unwrap();
    assert_eq!(result.removed, vec![4, 5]);
    assert_eq!(storage.len(), 5);
    assert_eq!(alpha, vec![9.0, 8.0, 7.0, 0.4, 5.0]);
    assert_eq!(result.remap.new_sequence(6), Some(4));
    assert_eq!(result.remap.new_sequence(4), None);
    assert!(storage.check_hierarchical_consistency().is_ok());
    // (2,3) lost its left child only
    assert!(!storage[2].is_leaf());
}

#[test]
fn check_coarsen_threshold_and_parents()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let mut alpha = vec![0.0, 0.5, 3.0];
    let result = coarsen(&mut storage, &ScoreTable(alpha.clone(), 5, 1.0), &mut alpha).unwrap();
    // the root is never removed, (2,3) is above the threshold
    assert_eq!(result.removed, vec![1]);
    assert_eq!(alpha, vec![0.0, 3.0]);
    assert_eq!(storage[1], GridPoint::new(&[2], &[3], true));

    let result = coarsen(&mut storage, &ScoreTable(alpha.clone(), 5, 1.0), &mut alpha).unwrap();
    assert!(result.removed.is_empty());
    assert_eq!(result.remap.new_len(), 2);
}

#[test]
fn check_coarsen_keeps_boundaries()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular_with_boundaries(&mut storage, &[2], None).unwrap();
    let mut alpha = vec![0.0; storage.len()];
    let result = coarsen(&mut storage, &ScoreTable(alpha.clone(), 10, 1.0), &mut alpha).unwrap();
    assert_eq!(result.removed.len(), 2);
    assert_eq!(storage.len(), 3);
    assert!(storage.check_level_zero_consistency().is_ok());
    assert!(storage.iter().all(|p| !p.is_inner_point() || p.level() == [1]));
}

#[test]
fn check_coarsen_size_mismatch()
{
    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[2, 2], None).unwrap();
    let mut alpha = vec![0.0; 3];
    assert_eq!(coarsen(&mut storage, &ScoreTable(vec![], 1, 1.0), &mut alpha), Err(SGError::SizeMismatch { expected: 5, actual: 3 }));
}

#[test]
fn check_coarsen_ignores_stale_leaf_flags()
{
    let mut storage = GridStorage::new(1);
    storage.insert(GridPoint::new(&[1], &[1], false)).unwrap();
    // flagged as a leaf although (3,1) below it is stored
    storage.insert(GridPoint::new(&[2], &[1], true)).unwrap();
    storage.insert(GridPoint::new(&[3], &[1], true)).unwrap();
    assert_eq!(num_removable_points(&storage), 1);
    let mut alpha = vec![1.0, 0.0, 0.5];
    let result = coarsen(&mut storage, &ScoreTable(alpha.clone(), 5, 1.0), &mut alpha).unwrap();
    assert_eq!(result.removed, vec![2]);
    assert_eq!(storage.len(), 2);
    assert!(storage.check_hierarchical_consistency().is_ok());
    assert!(storage[1].is_leaf());
}

#[test]
fn check_coarsen_unbounded_budget()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[3], None).unwrap();
    let mut alpha = vec![9.0, 8.0, 7.0, 0.4, 0.1, 0.3, 5.0];
    let result = coarsen(&mut storage, &ScoreTable(alpha.clone(), usize::MAX, 1.0), &mut alpha).unwrap();
    assert_eq!(result.removed, vec![3, 4, 5]);
    assert_eq!(alpha, vec![9.0, 8.0, 7.0, 5.0]);
}
