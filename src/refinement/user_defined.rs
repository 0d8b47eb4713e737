use crate::{algorithms::{coarsening::CoarseningFunctor, refinement::RefinementFunctor}, storage::GridStorage};

///
/// Refinement with a user supplied indicator.
///
/// # Arguments
/// - `fun_eval`: Maps a storage and a sequence number to a score.
/// - `refinements_num`: Number of points refined per pass.
/// - `threshold`: Minimum score a refined point needs.
///
pub struct UserDefinedRefinement<F>
    where F: Fn(&GridStorage, usize) -> f64 + Send + Sync
{
    pub fun_eval: F,
    pub refinements_num: usize,
    pub threshold: f64,
}

impl<F> UserDefinedRefinement<F>
    where F: Fn(&GridStorage, usize) -> f64 + Send + Sync
{
    pub fn new(fun_eval: F, refinements_num: usize, threshold: f64) -> Self
    {
        Self { fun_eval, refinements_num, threshold }
    }
}

impl<F> RefinementFunctor for UserDefinedRefinement<F>
    where F: Fn(&GridStorage, usize) -> f64 + Send + Sync
{
    fn value(&self, storage: &GridStorage, seq: usize) -> f64 {
        (self.fun_eval)(storage, seq)
    }

    fn refinements_num(&self) -> usize {
        self.refinements_num
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

///
/// Coarsening with a user supplied indicator. Lower scores are removed first.
///
pub struct UserDefinedCoarsening<F>
    where F: Fn(&GridStorage, usize) -> f64 + Send + Sync
{
    pub fun_eval: F,
    pub removements_num: usize,
    pub threshold: f64,
}

impl<F> UserDefinedCoarsening<F>
    where F: Fn(&GridStorage, usize) -> f64 + Send + Sync
{
    pub fn new(fun_eval: F, removements_num: usize, threshold: f64) -> Self
    {
        Self { fun_eval, removements_num, threshold }
    }
}

impl<F> CoarseningFunctor for UserDefinedCoarsening<F>
    where F: Fn(&GridStorage, usize) -> f64 + Send + Sync
{
    fn value(&self, storage: &GridStorage, seq: usize) -> f64 {
        (self.fun_eval)(storage, seq)
    }

    fn removements_num(&self) -> usize {
        self.removements_num
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[test]
fn check_user_defined_refinement()
{
    use crate::algorithms::refinement::{refine, RefinementOptions};
    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[2, 2], None).unwrap();
    // prefer points far right in the first direction
    let functor = UserDefinedRefinement::new(|storage: &GridStorage, seq: usize| storage[seq].unit_coordinate()[0], 1, 0.0);
    let created = refine(&mut storage, &functor, &RefinementOptions::default()).unwrap();
    assert_eq!(created, 4);
    assert!(storage.has_key(&crate::storage::GridPoint::new(&[3, 1], &[7, 1], true)));
}

#[test]
fn check_user_defined_coarsening()
{
    use crate::algorithms::coarsening::coarsen;
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let mut alpha = vec![1.0, 2.0, 3.0];
    let functor = UserDefinedCoarsening::new(|storage: &GridStorage, seq: usize| storage[seq].unit_coordinate()[0], 1, 1.0);
    let result = coarsen(&mut storage, &functor, &mut alpha).unwrap();
    assert_eq!(result.removed, vec![1]);
    assert_eq!(alpha, vec![1.0, 3.0]);
}
