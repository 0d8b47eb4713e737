use serde::{Deserialize, Serialize};

use crate::{algorithms::sweep::{sweep_1d, SweepFunction}, errors::SGError, iterators::line_iterator::LineIterator, storage::{GridStorage, Node1D}};

/// Where a line takes its outermost boundary values from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundarySource
{
    /// The basis vanishes on the boundary.
    Zero,
    /// The nodal values of the stored level-zero points of the line.
    Stored,
}

///
/// Boundary values handed to the children of a point during a 1-D sweep.
/// Each basis family picks one entry of the table in [`BasisType::corrections`].
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundaryCorrection
{
    pub source: BoundarySource,
    /// The leftmost and rightmost points of a level extrapolate the missing
    /// boundary value linearly from their own value and their inner neighbour.
    pub extrapolate_edges: bool,
    /// Level one is a constant function, so both children inherit its value.
    pub constant_level_one: bool,
}

impl BoundaryCorrection
{
    ///
    /// Returns `(left, right)`: the left boundary for the left child and the right
    /// boundary for the right child of `node`. The inner boundary of either child
    /// is always `fm`.
    ///
    #[inline]
    pub fn child_boundaries(&self, node: Node1D, fl: f64, fm: f64, fr: f64) -> (f64, f64)
    {
        let mut left = fl;
        let mut right = fr;
        if self.extrapolate_edges
        {
            if node.is_leftmost()
            {
                left = 2.0 * fm - fr;
            }
            if node.is_rightmost()
            {
                right = 2.0 * fm - fl;
            }
        }
        if self.constant_level_one && node.level == 1
        {
            left = fm;
            right = fm;
        }
        (left, right)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisType
{
    /// Piecewise linear hats, zero on the boundary.
    #[default]
    Linear,
    /// Piecewise linear hats plus the two level-zero boundary functions.
    LinearBoundary,
    /// Linear hats whose outermost functions are extrapolated to the boundary.
    ModLinear,
}

impl BasisType
{
    pub const fn corrections(&self) -> BoundaryCorrection
    {
        match self
        {
            BasisType::Linear => BoundaryCorrection { source: BoundarySource::Zero, extrapolate_edges: false, constant_level_one: false },
            BasisType::LinearBoundary => BoundaryCorrection { source: BoundarySource::Stored, extrapolate_edges: false, constant_level_one: false },
            BasisType::ModLinear => BoundaryCorrection { source: BoundarySource::Zero, extrapolate_edges: true, constant_level_one: true },
        }
    }

    pub fn has_boundary(&self) -> bool
    {
        self.corrections().source == BoundarySource::Stored
    }

    /// Token used for the basis in the text format.
    pub const fn name(&self) -> &'static str
    {
        match self
        {
            BasisType::Linear => "linear",
            BasisType::LinearBoundary => "linearBoundary",
            BasisType::ModLinear => "modlinear",
        }
    }
}

impl std::str::FromStr for BasisType
{
    type Err = SGError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [BasisType::Linear, BasisType::LinearBoundary, BasisType::ModLinear]
            .into_iter()
            .find(|basis| basis.name() == s)
            .ok_or_else(|| SGError::ParseError(format!("unknown basis '{}'", s)))
    }
}

pub trait HierarchisationOperation
{
    /// Converts nodal values into hierarchical surpluses in place.
    fn hierarchize(&self, storage: &GridStorage, values: &mut [f64]) -> Result<(), SGError>;

    /// Converts hierarchical surpluses into nodal values in place.
    fn dehierarchize(&self, storage: &GridStorage, alpha: &mut [f64]) -> Result<(), SGError>;

    fn hierarchize_into(&self, storage: &GridStorage, source: &[f64], result: &mut [f64]) -> Result<(), SGError>
    {
        check_lengths(storage, source, result)?;
        result.copy_from_slice(source);
        self.hierarchize(storage, result)
    }

    fn dehierarchize_into(&self, storage: &GridStorage, source: &[f64], result: &mut [f64]) -> Result<(), SGError>
    {
        check_lengths(storage, source, result)?;
        result.copy_from_slice(source);
        self.dehierarchize(storage, result)
    }
}

fn check_lengths(storage: &GridStorage, source: &[f64], result: &[f64]) -> Result<(), SGError>
{
    for len in [source.len(), result.len()]
    {
        if len != storage.len()
        {
            return Err(SGError::SizeMismatch { expected: storage.len(), actual: len });
        }
    }
    Ok(())
}

impl HierarchisationOperation for BasisType
{
    fn hierarchize(&self, storage: &GridStorage, values: &mut [f64]) -> Result<(), SGError> {
        let mut func = Hierarchisation(self.corrections());
        for d in 0..storage.dim()
        {
            sweep_1d(&mut func, storage, values, d)?;
        }
        Ok(())
    }

    fn dehierarchize(&self, storage: &GridStorage, alpha: &mut [f64]) -> Result<(), SGError> {
        let mut func = Dehierarchisation(self.corrections());
        for d in 0..storage.dim()
        {
            sweep_1d(&mut func, storage, alpha, d)?;
        }
        Ok(())
    }
}

///
/// Boundary values a line starts from, or `None` if the line has nothing for
/// the recursion to visit.
///
fn line_boundaries(source: BoundarySource, values: &[f64], line: &mut LineIterator) -> Result<Option<(f64, f64)>, SGError>
{
    match source
    {
        BoundarySource::Zero => Ok(Some((0.0, 0.0))),
        BoundarySource::Stored => match (line.left_boundary(), line.right_boundary())
        {
            (Some(left), Some(right)) => Ok(Some((values[left], values[right]))),
            (None, None) if line.root().is_none() => Ok(None),
            (None, None) => Err(SGError::InconsistentStorage(format!("line in dimension {} has interior points but no boundary points", line.dim()))),
            _ => Err(SGError::InconsistentStorage(format!("line in dimension {} has only one boundary point", line.dim()))),
        },
    }
}

pub struct Hierarchisation(pub BoundaryCorrection);

impl Hierarchisation
{
    fn recurse(&self, values: &mut [f64], line: &mut LineIterator, node: Node1D, fl: f64, fr: f64)
    {
        if let Some(seq) = line.seq(node)
        {
            let fm = values[seq];
            let (left, right) = self.0.child_boundaries(node, fl, fm, fr);
            self.recurse(values, line, node.left_child(), left, fm);
            self.recurse(values, line, node.right_child(), fm, right);
            values[seq] = fm - 0.5 * (fl + fr);
        }
    }
}

impl SweepFunction for Hierarchisation
{
    #[inline]
    fn execute_in_place(&mut self, values: &mut [f64], line: &mut LineIterator) -> Result<(), SGError> {
        if let Some((fl, fr)) = line_boundaries(self.0.source, values, line)?
        {
            self.recurse(values, line, Node1D::ROOT, fl, fr);
        }
        Ok(())
    }
}

pub struct Dehierarchisation(pub BoundaryCorrection);

impl Dehierarchisation
{
    fn recurse(&self, values: &mut [f64], line: &mut LineIterator, node: Node1D, fl: f64, fr: f64)
    {
        if let Some(seq) = line.seq(node)
        {
            let fm = values[seq] + 0.5 * (fl + fr);
            values[seq] = fm;
            let (left, right) = self.0.child_boundaries(node, fl, fm, fr);
            self.recurse(values, line, node.left_child(), left, fm);
            self.recurse(values, line, node.right_child(), fm, right);
        }
    }
}

impl SweepFunction for Dehierarchisation
{
    #[inline]
    fn execute_in_place(&mut self, values: &mut [f64], line: &mut LineIterator) -> Result<(), SGError> {
        if let Some((fl, fr)) = line_boundaries(self.0.source, values, line)?
        {
            self.recurse(values, line, Node1D::ROOT, fl, fr);
        }
        Ok(())
    }
}

#[cfg(test)]
fn assert_close(a: &[f64], b: &[f64])
{
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b)
    {
        assert!((x - y).abs() < 1e-12, "{x} != {y}");
    }
}

#[test]
fn check_boundary_line_scenario()
{
    use crate::storage::GridPoint;
    let mut storage = GridStorage::new(1);
    storage.insert(GridPoint::new(&[0], &[0], false)).unwrap();
    storage.insert(GridPoint::new(&[0], &[1], false)).unwrap();
    storage.insert(GridPoint::new(&[1], &[1], true)).unwrap();
    let mut values = vec![0.0, 0.0, 1.0];
    BasisType::LinearBoundary.hierarchize(&storage, &mut values).unwrap();
    assert_close(&values, &[0.0, 0.0, 1.0]);
    BasisType::LinearBoundary.dehierarchize(&storage, &mut values).unwrap();
    assert_close(&values, &[0.0, 0.0, 1.0]);

    let mut values = vec![1.0, 3.0, 5.0];
    BasisType::LinearBoundary.hierarchize(&storage, &mut values).unwrap();
    assert_close(&values, &[1.0, 3.0, 3.0]);
}

#[test]
fn check_linear_surplus()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[2], None).unwrap();
    let f = |x: f64| x * (1.0 - x);
    let mut values: Vec<f64> = storage.coordinates().map(|x| f(x[0])).collect();
    BasisType::Linear.hierarchize(&storage, &mut values).unwrap();
    assert_close(&values, &[0.25, 0.0625, 0.0625]);
}

#[test]
fn check_modlinear_reproduces_linear_functions()
{
    let mut storage = GridStorage::new(1);
    crate::generators::regular(&mut storage, &[4], None).unwrap();
    let coordinates: Vec<f64> = storage.coordinates().map(|x| x[0]).collect();
    let mut values: Vec<f64> = coordinates.iter().map(|x| 1.0 + x).collect();
    BasisType::ModLinear.hierarchize(&storage, &mut values).unwrap();
    for (seq, point) in storage.iter().enumerate()
    {
        let expected = match (point.level()[0], point.index()[0])
        {
            (1, 1) => 1.5,
            (2, 1) => -0.25,
            (2, 3) => 0.25,
            _ => 0.0,
        };
        assert!((values[seq] - expected).abs() < 1e-12, "surplus of {:?} is {}", point, values[seq]);
    }
    BasisType::ModLinear.dehierarchize(&storage, &mut values).unwrap();
    let nodal: Vec<f64> = coordinates.iter().map(|x| 1.0 + x).collect();
    assert_close(&values, &nodal);
}

#[test]
fn check_size_mismatch_is_reported()
{
    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[2, 2], None).unwrap();
    let mut values = vec![0.0; storage.len() + 1];
    assert_eq!(BasisType::Linear.hierarchize(&storage, &mut values), Err(SGError::SizeMismatch { expected: 5, actual: 6 }));
    let source = vec![0.0; 5];
    let mut result = vec![0.0; 4];
    assert!(BasisType::Linear.hierarchize_into(&storage, &source, &mut result).is_err());
}

#[test]
fn check_boundary_basis_requires_boundary_points()
{
    let mut storage = GridStorage::new(2);
    crate::generators::regular(&mut storage, &[2, 2], None).unwrap();
    let mut values = vec![1.0; storage.len()];
    assert!(matches!(BasisType::LinearBoundary.hierarchize(&storage, &mut values), Err(SGError::InconsistentStorage(_))));
}

#[cfg(test)]
mod tests
{
    use proptest::prelude::*;

    use super::*;
    use crate::generators;

    fn round_trip(storage: &GridStorage, basis: BasisType, values: &[f64]) -> Result<(), TestCaseError>
    {
        let mut alpha = vec![0.0; values.len()];
        basis.hierarchize_into(storage, values, &mut alpha).unwrap();
        let mut nodal = vec![0.0; values.len()];
        basis.dehierarchize_into(storage, &alpha, &mut nodal).unwrap();
        for (a, b) in nodal.iter().zip(values)
        {
            prop_assert!((a - b).abs() < 1e-9);
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn linear_round_trip(values in proptest::collection::vec(-10.0f64..10.0, 17))
        {
            let mut storage = GridStorage::new(2);
            generators::regular(&mut storage, &[3, 3], None).unwrap();
            round_trip(&storage, BasisType::Linear, &values)?;
            round_trip(&storage, BasisType::ModLinear, &values)?;
        }

        #[test]
        fn boundary_round_trip(values in proptest::collection::vec(-10.0f64..10.0, 49))
        {
            let mut storage = GridStorage::new(2);
            generators::regular_with_boundaries(&mut storage, &[3, 3], None).unwrap();
            round_trip(&storage, BasisType::LinearBoundary, &values)?;
        }

        #[test]
        fn full_grid_round_trip(values in proptest::collection::vec(-1.0f64..1.0, 27))
        {
            let mut storage = GridStorage::new(3);
            generators::full(&mut storage, 2).unwrap();
            round_trip(&storage, BasisType::Linear, &values)?;
            round_trip(&storage, BasisType::ModLinear, &values)?;
        }
    }
}
