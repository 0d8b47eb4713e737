use rayon::prelude::*;

use crate::{algorithms::error_container::{select_top_k, ErrorAccumulator, ErrorContainer, RankingPolicy}, errors::SGError, storage::{GridPoint, GridStorage, Node1D, MAX_LEVEL}};

#[derive(Default, Debug, Clone)]
pub struct RefinementOptions
{
    /// Deepest level each direction may be refined to. `None` means [`MAX_LEVEL`].
    pub level_limits: Option<Vec<u8>>,
    pub ranking: RankingPolicy,
}

impl RefinementOptions
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn with_level_limits(level_limits: Vec<u8>) -> Self
    {
        Self { level_limits: Some(level_limits), ..Default::default() }
    }

    /// Same level limit in every one of `dim` directions.
    pub fn with_max_level(dim: usize, max_level: u8) -> Self
    {
        Self::with_level_limits(vec![max_level; dim])
    }

    fn limits(&self, dim: usize) -> Result<Vec<u8>, SGError>
    {
        match self.level_limits.as_ref()
        {
            Some(limits) if limits.len() != dim => Err(SGError::DimensionMismatch { expected: dim, actual: limits.len() }),
            Some(limits) => Ok(limits.iter().map(|&l| l.min(MAX_LEVEL)).collect()),
            None => Ok(vec![MAX_LEVEL; dim]),
        }
    }
}

///
/// Scores grid points for refinement. Implementations usually borrow the
/// coefficient vector of the grid they score.
///
pub trait RefinementFunctor : Send + Sync
{
    ///
    /// Refinement indicator of the point with sequence number `seq`. Points are
    /// ranked by the magnitude of this value, so a negative indicator counts
    /// like its absolute value.
    ///
    fn value(&self, storage: &GridStorage, seq: usize) -> f64;

    ///
    /// Lower bound a score has to exceed to be considered at all.
    ///
    fn start(&self) -> f64
    {
        0.0
    }

    ///
    /// Maximum number of points (or subspaces) refined in one pass.
    ///
    fn refinements_num(&self) -> usize;

    fn threshold(&self) -> f64;

    ///
    /// Strategy-specific admissibility, checked before `value`. Level limits are
    /// handled by [`RefinementOptions`] and need not be repeated here.
    ///
    fn is_admissible(&self, _storage: &GridStorage, _seq: usize) -> bool
    {
        true
    }
}

///
/// Refinement on a hash storage. With `has_boundary` set, creating a point on level
/// one also creates its two level-zero ancestors, and level-zero points are
/// always created in pairs.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HashRefinement
{
    pub has_boundary: bool,
}

impl HashRefinement
{
    pub fn new(has_boundary: bool) -> Self
    {
        Self { has_boundary }
    }

    /// Boundary handling is enabled when the storage is flagged or holds a level-zero point.
    pub fn for_storage(storage: &GridStorage) -> Self
    {
        Self::new(storage.has_boundary() || storage.iter().any(|point| !point.is_inner_point()))
    }

    /// Whether `point` lacks a child in some direction that is still below its level limit.
    fn is_refinable(storage: &GridStorage, point: &GridPoint, limits: &[u8]) -> bool
    {
        (0..storage.dim()).any(|d| point.level[d] < limits[d] && !storage.has_child_pair(point, d))
    }

    /// Level vector of the first missing child of `point`, in the order refinement would create it.
    fn first_missing_subspace(storage: &GridStorage, point: &GridPoint, limits: &[u8]) -> Option<Vec<u8>>
    {
        for d in 0..storage.dim()
        {
            if point.level[d] >= limits[d]
            {
                continue;
            }
            for child in point.node(d).children()
            {
                let child = point.with_node(d, child);
                if !storage.has_key(&child)
                {
                    return Some(child.level);
                }
            }
        }
        None
    }

    fn check_preconditions(&self, storage: &GridStorage, options: &RefinementOptions) -> Result<Vec<u8>, SGError>
    {
        if storage.is_empty()
        {
            return Err(SGError::EmptyStorage);
        }
        let limits = options.limits(storage.dim())?;
        if self.has_boundary
        {
            storage.check_level_zero_consistency()?;
        }
        Ok(limits)
    }

    ///
    /// Scans all points by ascending sequence number and returns every point with a
    /// missing child. Inadmissible candidates are flagged and left unscored.
    ///
    fn candidates<F: RefinementFunctor + ?Sized>(storage: &GridStorage, functor: &F, limits: &[u8]) -> Vec<(usize, ErrorContainer)>
    {
        (0..storage.len()).into_par_iter().filter_map(|seq| {
            let point = &storage[seq];
            let refinable = (0..storage.dim()).any(|d| !storage.has_child_pair(point, d));
            if !refinable
            {
                return None;
            }
            if !Self::is_refinable(storage, point, limits) || !functor.is_admissible(storage, seq)
            {
                return Some((seq, ErrorContainer::empty().with_admissible(false)));
            }
            Some((seq, ErrorContainer::new(functor.value(storage, seq).abs())))
        }).collect()
    }

    ///
    /// Refines the `functor.refinements_num()` best admissible points whose score
    /// reaches `functor.threshold()`. New points are appended to the storage, so
    /// the returned count is also the length of the new tail.
    ///
    pub fn refine<F: RefinementFunctor + ?Sized>(&self, storage: &mut GridStorage, functor: &F, options: &RefinementOptions) -> Result<usize, SGError>
    {
        let limits = self.check_preconditions(storage, options)?;
        let original_len = storage.len();
        if functor.refinements_num() == 0
        {
            log::warn!("refinement requested with a budget of zero points");
            return Ok(0);
        }
        let candidates = Self::candidates(storage, functor, &limits);
        let num_candidates = candidates.len();
        let selected = select_top_k(candidates, functor.refinements_num(), functor.start(), options.ranking);
        let threshold = functor.threshold();
        let mut refined: Vec<usize> = selected.into_iter()
            .filter(|(_, container)| container.ranking_value(options.ranking) >= threshold)
            .map(|(seq, _)| seq)
            .collect();
        refined.sort_unstable();
        for &seq in &refined
        {
            self.refine_gridpoint(storage, seq, &limits)?;
        }
        let created = storage.len() - original_len;
        log::debug!("refinement: {} candidates, {} refined, {} points created", num_candidates, refined.len(), created);
        Ok(created)
    }

    ///
    /// Number of points that still have a missing child below the level limits.
    ///
    pub fn num_refinable_points(&self, storage: &GridStorage, options: &RefinementOptions) -> Result<usize, SGError>
    {
        let limits = options.limits(storage.dim())?;
        Ok(storage.iter().filter(|point| Self::is_refinable(storage, point, &limits)).count())
    }

    ///
    /// Refines the point `seq` in every direction below its level limit, creating
    /// the missing children left before right, direction by direction.
    ///
    pub fn refine_gridpoint(&self, storage: &mut GridStorage, seq: usize, limits: &[u8]) -> Result<(), SGError>
    {
        let point = storage.get(seq)?.clone();
        if limits.len() != storage.dim()
        {
            return Err(SGError::DimensionMismatch { expected: storage.dim(), actual: limits.len() });
        }
        storage.set_leaf(seq, false);
        for d in 0..storage.dim()
        {
            if point.level[d] >= limits[d]
            {
                continue;
            }
            self.refine_1d(storage, &point, d)?;
        }
        Ok(())
    }

    /// Creates the missing children of `point` in direction `dim`.
    pub fn refine_1d(&self, storage: &mut GridStorage, point: &GridPoint, dim: usize) -> Result<(), SGError>
    {
        for child in point.node(dim).children()
        {
            let mut child = point.with_node(dim, child);
            if !storage.has_key(&child)
            {
                child.set_is_leaf(true);
                self.create_point(storage, child)?;
            }
        }
        Ok(())
    }

    ///
    /// Inserts `point` after making sure all of its hierarchical ancestors exist,
    /// creating missing ones as non-leaf points.
    ///
    pub fn create_point(&self, storage: &mut GridStorage, point: GridPoint) -> Result<usize, SGError>
    {
        for d in 0..storage.dim()
        {
            if self.has_boundary
            {
                self.create_point_1d_with_boundary(storage, &point, d)?;
            }
            else
            {
                self.create_point_1d(storage, &point, d)?;
            }
        }
        let seq = match storage.insert(point.clone())
        {
            Ok(seq) => seq,
            Err(SGError::DuplicateKey { seq }) => return Ok(seq),
            Err(e) => return Err(e),
        };
        log::trace!("created grid point {:?}/{:?}", point.level, point.index);
        if self.has_boundary
        {
            self.create_gridpoint_level_zero_consistency(storage, &point)?;
        }
        Ok(seq)
    }

    /// Marks an existing ancestor as non-leaf or creates it.
    fn ensure_ancestor(&self, storage: &mut GridStorage, mut ancestor: GridPoint) -> Result<(), SGError>
    {
        match storage.find(&ancestor)
        {
            Some(seq) => storage.set_leaf(seq, false),
            None =>
            {
                ancestor.set_is_leaf(false);
                self.create_point(storage, ancestor)?;
            }
        }
        Ok(())
    }

    fn create_point_1d(&self, storage: &mut GridStorage, point: &GridPoint, dim: usize) -> Result<(), SGError>
    {
        if let Some(parent) = point.parent(dim)
        {
            self.ensure_ancestor(storage, parent)?;
        }
        Ok(())
    }

    fn create_point_1d_with_boundary(&self, storage: &mut GridStorage, point: &GridPoint, dim: usize) -> Result<(), SGError>
    {
        if point.level[dim] == 1
        {
            self.ensure_ancestor(storage, point.with_node(dim, Node1D::LEFT_BOUNDARY))?;
            self.ensure_ancestor(storage, point.with_node(dim, Node1D::RIGHT_BOUNDARY))?;
        }
        self.create_point_1d(storage, point, dim)
    }

    ///
    /// For every direction in which `point` sits on level zero, creates the
    /// missing sibling boundary point. The sibling takes the leaf flag of the
    /// boundary point that already exists.
    ///
    pub fn create_gridpoint_level_zero_consistency(&self, storage: &mut GridStorage, point: &GridPoint) -> Result<(), SGError>
    {
        for d in 0..storage.dim()
        {
            if point.level[d] != 0
            {
                continue;
            }
            let left = point.with_node(d, Node1D::LEFT_BOUNDARY);
            let right = point.with_node(d, Node1D::RIGHT_BOUNDARY);
            let (existing, mut missing) = match (storage.find(&left), storage.find(&right))
            {
                (Some(seq), None) => (seq, right),
                (None, Some(seq)) => (seq, left),
                _ => continue,
            };
            missing.set_is_leaf(storage[existing].is_leaf());
            self.create_point(storage, missing)?;
        }
        Ok(())
    }

    ///
    /// Subspace-wise refinement: every admissible candidate adds its score to the
    /// subspace (level vector) of its first missing child. The best
    /// `functor.refinements_num()` subspaces whose ranking value reaches the
    /// threshold are created completely.
    ///
    pub fn refine_subspaces<F: RefinementFunctor + ?Sized>(&self, storage: &mut GridStorage, functor: &F, options: &RefinementOptions) -> Result<usize, SGError>
    {
        let limits = self.check_preconditions(storage, options)?;
        let original_len = storage.len();
        let contributions: Vec<(Vec<u8>, ErrorContainer)> = (0..storage.len()).into_par_iter().filter_map(|seq| {
            let subspace = Self::first_missing_subspace(storage, &storage[seq], &limits)?;
            if functor.is_admissible(storage, seq)
            {
                Some((subspace, ErrorContainer::new(functor.value(storage, seq).abs())))
            }
            else
            {
                Some((subspace, ErrorContainer::empty().with_admissible(false)))
            }
        }).collect();
        let mut accumulator = ErrorAccumulator::new();
        for (subspace, container) in contributions
        {
            accumulator.merge(subspace, container);
        }
        let num_subspaces = accumulator.len();
        let threshold = functor.threshold();
        let selected: Vec<Vec<u8>> = select_top_k(accumulator.into_entries(), functor.refinements_num(), functor.start(), options.ranking)
            .into_iter()
            .filter(|(_, container)| container.ranking_value(options.ranking) >= threshold)
            .map(|(subspace, _)| subspace)
            .collect();
        for subspace in selected.iter()
        {
            self.create_subspace(storage, subspace)?;
        }
        let created = storage.len() - original_len;
        log::debug!("subspace refinement: {} subspaces, {} selected, {} points created", num_subspaces, selected.len(), created);
        Ok(created)
    }

    /// Creates every point of the subspace with level vector `levels`.
    pub fn create_subspace(&self, storage: &mut GridStorage, levels: &[u8]) -> Result<(), SGError>
    {
        if levels.len() != storage.dim()
        {
            return Err(SGError::DimensionMismatch { expected: storage.dim(), actual: levels.len() });
        }
        let nodes: Vec<Vec<Node1D>> = levels.iter().map(|&l| subspace_nodes(l)).collect();
        let mut counter = vec![0usize; levels.len()];
        let mut point = GridPoint::new(levels, &vec![1; levels.len()], true);
        'outer: loop
        {
            for (d, &c) in counter.iter().enumerate()
            {
                point.set_node(d, nodes[d][c]);
            }
            if !storage.has_key(&point)
            {
                point.set_is_leaf(true);
                self.create_point(storage, point.clone())?;
            }
            // odometer, last direction fastest
            for d in (0..counter.len()).rev()
            {
                counter[d] += 1;
                if counter[d] < nodes[d].len()
                {
                    continue 'outer;
                }
                counter[d] = 0;
            }
            break;
        }
        Ok(())
    }
}

fn subspace_nodes(level: u8) -> Vec<Node1D>
{
    if level == 0
    {
        vec![Node1D::LEFT_BOUNDARY, Node1D::RIGHT_BOUNDARY]
    }
    else
    {
        (1..(1u32 << level)).step_by(2).map(|i| Node1D::new(level, i)).collect()
    }
}

///
/// Refines `storage` with boundary handling detected from its contents.
///
pub fn refine<F: RefinementFunctor + ?Sized>(storage: &mut GridStorage, functor: &F, options: &RefinementOptions) -> Result<usize, SGError>
{
    HashRefinement::for_storage(storage).refine(storage, functor, options)
}

#[cfg(test)]
struct ScoreTable(Vec<f64>, usize, f64);

#[cfg(test)]
impl RefinementFunctor for ScoreTable
{
    fn value(&self, _storage: &GridStorage, seq: usize) -> f64 {
        self.0[seq]
    }
    fn refinements_num(&self) -> usize {
        self.1
    }
    fn threshold(&self) -> f64 {
        self.2
    }
}

#[cfg(test)]
fn boundary_line() -> GridStorage
{
    let mut storage = GridStorage::new(1);
    storage.insert(GridPoint::new(&[0], &[0], false)).unwrap();
    storage.insert(GridPoint::new(&[0], &[1], false)).unwrap();
    storage.insert(GridPoint::new(&[1], &[1], true)).unwrap();
    storage
}

#[test]
fn check_refine_single_point()
{
    let mut storage = boundary_line();
    let functor = ScoreTable(vec![0.0, 0.0, 1.0], 1, 0.0);
    let created = refine(&mut storage, &functor, &RefinementOptions::default()).unwrap();
    assert_eq!(created, 2);
    assert_eq!(storage.len(), 5);
    assert_eq!(storage[3], GridPoint::new(&[2], &[1], true));
    assert_eq!(storage[4], GridPoint::new(&[2], &[3], true));
    assert!(storage[3].is_leaf());
    assert!(storage[4].is_leaf());
    assert!(!storage[2].is_leaf());
}

#[test]
fn check_refine_empty_storage()
{
    let mut storage = GridStorage::new(2);
    let functor = ScoreTable(vec![], 1, 0.0);
    assert_eq!(refine(&mut storage, &functor, &RefinementOptions::default()), Err(SGError::EmptyStorage));
}

#[test]
fn check_append_order()
{
    let mut storage = GridStorage::new(2);
    storage.insert(GridPoint::root(2)).unwrap();
    let functor = ScoreTable(vec![1.0], 1, 0.0);
    refine(&mut storage, &functor, &RefinementOptions::default()).unwrap();
    let expected = [([1, 1], [1, 1]), ([2, 1], [1, 1]), ([2, 1], [3, 1]), ([1, 2], [1, 1]), ([1, 2], [1, 3])];
    assert_eq!(storage.len(), expected.len());
    for (seq, (level, index)) in expected.iter().enumerate()
    {
        assert_eq!(storage[seq], GridPoint::new(level, index, false));
    }
}

#[test]
fn check_level_limit_blocks_candidates()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let options = RefinementOptions::with_max_level(1, 2);
    let refinement = HashRefinement::for_storage(&storage);
    assert_eq!(refinement.num_refinable_points(&storage, &options).unwrap(), 0);
    assert_eq!(refinement.num_refinable_points(&storage, &RefinementOptions::default()).unwrap(), 2);
    let functor = ScoreTable(vec![5.0; 3], 3, 0.0);
    assert_eq!(refinement.refine(&mut storage, &functor, &options).unwrap(), 0);
    assert_eq!(storage.len(), 3);
    let bad = RefinementOptions::with_max_level(2, 2);
    assert!(matches!(refinement.refine(&mut storage, &functor, &bad), Err(SGError::DimensionMismatch { .. })));
}

#[test]
fn check_budget_and_threshold()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    // (1,1) is not a candidate, (2,1) scores below the threshold
    let functor = ScoreTable(vec![10.0, 0.5, 2.0], 5, 1.0);
    assert_eq!(refine(&mut storage, &functor, &RefinementOptions::default()).unwrap(), 2);
    assert_eq!(storage[3], GridPoint::new(&[3], &[5], true));
    assert_eq!(storage[4], GridPoint::new(&[3], &[7], true));
    let functor = ScoreTable(vec![0.0, 3.0, 2.0, 1.0, 1.0], 1, 0.0);
    assert_eq!(refine(&mut storage, &functor, &RefinementOptions::default()).unwrap(), 2);
    assert_eq!(storage[5], GridPoint::new(&[3], &[1], true));
    assert_eq!(storage[6], GridPoint::new(&[3], &[3], true));
}

#[test]
fn check_negative_scores_rank_by_magnitude()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let functor = ScoreTable(vec![0.0, -3.0, 1.0], 1, 2.0);
    assert_eq!(refine(&mut storage, &functor, &RefinementOptions::default()).unwrap(), 2);
    assert_eq!(storage[3], GridPoint::new(&[3], &[1], true));
    assert_eq!(storage[4], GridPoint::new(&[3], &[3], true));
}

#[test]
fn check_unbounded_budget()
{
    let mut storage = boundary_line();
    let alpha = [0.0, 0.0, 1.0];
    let functor = crate::refinement::surplus::SurplusRefinement::new(&alpha, usize::MAX, 0.0);
    assert_eq!(refine(&mut storage, &functor, &RefinementOptions::default()).unwrap(), 2);
    assert_eq!(storage.len(), 5);

    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[2, 2], None).unwrap();
    let functor = ScoreTable(vec![1.0; storage.len()], usize::MAX, 0.0);
    let refinement = HashRefinement::for_storage(&storage);
    assert!(refinement.refine_subspaces(&mut storage, &functor, &RefinementOptions::default()).unwrap() > 0);
    assert!(storage.check_hierarchical_consistency().is_ok());
}

#[test]
fn check_boundary_refinement_matches_regular_grid()
{
    let mut storage = GridStorage::new(2);
    crate::generators::regular_with_boundaries(&mut storage, &[1, 1], None).unwrap();
    assert_eq!(storage.len(), 9);
    let root = storage.find(&GridPoint::root(2)).unwrap();
    let mut scores = vec![0.0; storage.len()];
    scores[root] = 1.0;
    let created = refine(&mut storage, &ScoreTable(scores, 1, 0.0), &RefinementOptions::default()).unwrap();
    assert_eq!(created, 12);
    assert!(storage.check_level_zero_consistency().is_ok());
    assert!(storage.check_hierarchical_consistency().is_ok());
    for point in storage.iter()
    {
        assert_eq!(point.is_leaf(), storage.is_structural_leaf(point), "{:?}", point);
    }
    let mut regular = GridStorage::new(2);
    crate::generators::regular_with_boundaries(&mut regular, &[2, 2], None).unwrap();
    assert_eq!(regular.len(), storage.len());
    assert!(regular.iter().all(|p| storage.has_key(p)));
}

#[test]
fn check_level_zero_sibling_creation()
{
    let mut storage = GridStorage::new(2);
    storage.insert(GridPoint::new(&[0, 1], &[0, 1], true)).unwrap();
    let refinement = HashRefinement::new(true);
    refinement.create_point(&mut storage, GridPoint::new(&[0, 2], &[0, 3], true)).unwrap();
    let sibling = GridPoint::new(&[0, 2], &[1, 3], true);
    let seq = storage.find(&sibling).unwrap();
    assert!(storage[seq].is_leaf());
    assert!(storage.has_key(&GridPoint::new(&[0, 1], &[1, 1], false)));
    assert!(storage.check_level_zero_consistency().is_ok());
    assert!(!storage[0].is_leaf());
}

#[test]
fn check_subspace_refinement()
{
    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[2, 2], None).unwrap();
    // every point votes for its first missing subspace
    let functor = ScoreTable(vec![1.0; storage.len()], 1, 0.0);
    let refinement = HashRefinement::for_storage(&storage);
    let created = refinement.refine_subspaces(&mut storage, &functor, &RefinementOptions { ranking: RankingPolicy::TotalError, ..Default::default() }).unwrap();
    assert_eq!(created, 4);
    assert!(storage.has_key(&GridPoint::new(&[3, 1], &[1, 1], true)));
    assert!(storage.has_key(&GridPoint::new(&[3, 1], &[7, 1], true)));
    assert!(storage.check_hierarchical_consistency().is_ok());
}

#[test]
fn check_refinement_is_deterministic()
{
    let mut a = GridStorage::new(3);
    crate::generators::regular(&mut a, &[3, 3, 3], None).unwrap();
    let mut b = a.clone();
    let scores: Vec<f64> = (0..a.len()).map(|i| ((i * 7919) % 13) as f64).collect();
    let functor = ScoreTable(scores, 6, 0.0);
    refine(&mut a, &functor, &RefinementOptions::default()).unwrap();
    refine(&mut b, &functor, &RefinementOptions::default()).unwrap();
    assert_eq!(a.points(), b.points());
}

#[cfg(test)]
mod tests
{
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn refinement_is_monotone(scores in proptest::collection::vec(0.0f64..1.0, 17), budget in 1usize..8)
        {
            let mut storage = GridStorage::new(2);
            crate::generators::regular(&mut storage, &[3, 3], None).unwrap();
            let before = storage.clone();
            let functor = ScoreTable(scores, budget, 0.0);
            let created = refine(&mut storage, &functor, &RefinementOptions::default()).unwrap();
            prop_assert_eq!(storage.len(), before.len() + created);
            prop_assert_eq!(&storage.points()[..before.len()], before.points());
            for point in &storage.points()[before.len()..]
            {
                prop_assert!(!before.has_key(point));
                for d in 0..2
                {
                    if let Some(parent) = point.parent(d)
                    {
                        prop_assert!(storage.has_key(&parent));
                    }
                }
            }
            prop_assert!(storage.check_hierarchical_consistency().is_ok());
        }
    }
}
