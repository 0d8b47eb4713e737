use crate::{algorithms::{coarsening::CoarseningFunctor, error_container::{ErrorContainer, RankingPolicy}, refinement::RefinementFunctor}, storage::GridStorage};

///
/// Refines the points with the largest absolute hierarchical surplus.
/// `alpha` is aligned with the storage sequence numbers; points beyond its
/// end score zero.
///
#[derive(Clone, Copy, Debug)]
pub struct SurplusRefinement<'a>
{
    pub alpha: &'a [f64],
    pub refinements_num: usize,
    pub threshold: f64,
}

impl<'a> SurplusRefinement<'a>
{
    pub fn new(alpha: &'a [f64], refinements_num: usize, threshold: f64) -> Self
    {
        Self { alpha, refinements_num, threshold }
    }
}

impl RefinementFunctor for SurplusRefinement<'_>
{
    fn value(&self, _storage: &GridStorage, seq: usize) -> f64 {
        self.alpha.get(seq).map_or(0.0, |a| a.abs())
    }

    fn refinements_num(&self) -> usize {
        self.refinements_num
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

///
/// Surplus weighted with the support volume `2^-|l|_1` of the basis function.
///
#[derive(Clone, Copy, Debug)]
pub struct SurplusVolumeRefinement<'a>
{
    pub alpha: &'a [f64],
    pub refinements_num: usize,
    pub threshold: f64,
}

impl<'a> SurplusVolumeRefinement<'a>
{
    pub fn new(alpha: &'a [f64], refinements_num: usize, threshold: f64) -> Self
    {
        Self { alpha, refinements_num, threshold }
    }
}

impl RefinementFunctor for SurplusVolumeRefinement<'_>
{
    fn value(&self, storage: &GridStorage, seq: usize) -> f64 {
        let surplus = self.alpha.get(seq).map_or(0.0, |a| a.abs());
        surplus * (-(storage[seq].level_sum() as f64)).exp2()
    }

    fn refinements_num(&self) -> usize {
        self.refinements_num
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

///
/// Removes the leaves with the smallest absolute surplus.
///
#[derive(Clone, Copy, Debug)]
pub struct SurplusCoarsening<'a>
{
    pub alpha: &'a [f64],
    pub removements_num: usize,
    pub threshold: f64,
}

impl<'a> SurplusCoarsening<'a>
{
    pub fn new(alpha: &'a [f64], removements_num: usize, threshold: f64) -> Self
    {
        Self { alpha, removements_num, threshold }
    }
}

impl CoarseningFunctor for SurplusCoarsening<'_>
{
    fn value(&self, _storage: &GridStorage, seq: usize) -> f64 {
        self.alpha.get(seq).map_or(0.0, |a| a.abs())
    }

    fn removements_num(&self) -> usize {
        self.removements_num
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

///
/// Refinement driven by externally accumulated errors, e.g. residuals collected
/// per point while fitting data. A point without a container scores zero.
///
#[derive(Clone, Copy, Debug)]
pub struct ErrorRefinement<'a>
{
    pub errors: &'a [ErrorContainer],
    pub policy: RankingPolicy,
    pub refinements_num: usize,
    pub threshold: f64,
}

impl<'a> ErrorRefinement<'a>
{
    pub fn new(errors: &'a [ErrorContainer], refinements_num: usize, threshold: f64) -> Self
    {
        Self { errors, policy: RankingPolicy::default(), refinements_num, threshold }
    }

    pub fn with_policy(mut self, policy: RankingPolicy) -> Self
    {
        self.policy = policy;
        self
    }
}

impl RefinementFunctor for ErrorRefinement<'_>
{
    fn value(&self, _storage: &GridStorage, seq: usize) -> f64 {
        self.errors.get(seq).map_or(0.0, |e| e.ranking_value(self.policy))
    }

    fn refinements_num(&self) -> usize {
        self.refinements_num
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_admissible(&self, _storage: &GridStorage, seq: usize) -> bool {
        self.errors.get(seq).map_or(true, |e| e.is_admissible())
    }
}

#[test]
fn check_surplus_values()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let alpha = [1.0, -4.0];
    let functor = SurplusRefinement::new(&alpha, 1, 0.0);
    assert_eq!(functor.value(&storage, 1), 4.0);
    assert_eq!(functor.value(&storage, 2), 0.0);
    let functor = SurplusVolumeRefinement::new(&alpha, 1, 0.0);
    assert_eq!(functor.value(&storage, 0), 0.5);
    assert_eq!(functor.value(&storage, 1), 1.0);
    let functor = SurplusCoarsening::new(&alpha, 1, 0.0);
    assert_eq!(functor.value(&storage, 1), 4.0);
    assert_eq!(functor.start(), f64::INFINITY);
}

#[test]
fn check_error_refinement_respects_admissibility()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let errors = [ErrorContainer::new(1.0), ErrorContainer::new(5.0).with_admissible(false), ErrorContainer::new(2.0) + 4.0];
    let functor = ErrorRefinement::new(&errors, 1, 0.0);
    assert!(!functor.is_admissible(&storage, 1));
    assert_eq!(functor.value(&storage, 2), 3.0);
    assert_eq!(functor.with_policy(RankingPolicy::TotalError).value(&storage, 2), 6.0);
    let options = crate::algorithms::refinement::RefinementOptions::default();
    let created = crate::algorithms::refinement::refine(&mut storage, &functor, &options).unwrap();
    assert_eq!(created, 2);
    assert!(storage.has_key(&crate::storage::GridPoint::new(&[3], &[5], true)));
}
