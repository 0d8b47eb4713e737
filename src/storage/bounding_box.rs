use serde::{Deserialize, Serialize};

use crate::errors::SGError;

///
/// Axis-aligned domain the unit grid is mapped onto. Only used when exporting
/// point coordinates and when persisting a storage, structural navigation never
/// touches it.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox
{
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl BoundingBox
{
    pub fn new(lower: &[f64], upper: &[f64]) -> Result<Self, SGError>
    {
        if lower.len() != upper.len()
        {
            return Err(SGError::DimensionMismatch { expected: lower.len(), actual: upper.len() });
        }
        Ok(Self { lower: lower.to_vec(), upper: upper.to_vec() })
    }

    /// The unit hypercube.
    pub fn with_dim(dim: usize) -> Self
    {
        Self { lower: vec![0.0; dim], upper: vec![1.0; dim] }
    }

    #[inline]
    pub fn dim(&self) -> usize
    {
        self.lower.len()
    }

    #[inline]
    pub fn width(&self, dim: usize) -> f64
    {
        self.upper[dim] - self.lower[dim]
    }

    pub fn volume(&self) -> f64
    {
        (0..self.dim()).map(|d| self.width(d)).product()
    }

    pub fn is_unit_cube(&self) -> bool
    {
        self.lower.iter().all(|&l| l == 0.0) && self.upper.iter().all(|&u| u == 1.0)
    }

    #[inline]
    pub fn to_real_coordinate(&self, unit: &[f64]) -> Vec<f64>
    {
        unit.iter().enumerate().map(|(d, &x)| self.lower[d] + x * self.width(d)).collect()
    }

    #[inline]
    pub fn to_unit_coordinate(&self, real: &[f64]) -> Vec<f64>
    {
        real.iter().enumerate().map(|(d, &x)| (x - self.lower[d]) / self.width(d)).collect()
    }
}

#[test]
fn check_coordinate_mapping()
{
    let bbox = BoundingBox::new(&[-1.0, 2.0], &[1.0, 6.0]).unwrap();
    assert_eq!(bbox.volume(), 8.0);
    assert_eq!(bbox.to_real_coordinate(&[0.5, 0.25]), vec![0.0, 3.0]);
    assert_eq!(bbox.to_unit_coordinate(&[0.0, 3.0]), vec![0.5, 0.25]);
    assert!(!bbox.is_unit_cube());
    assert!(BoundingBox::with_dim(3).is_unit_cube());
    assert!(BoundingBox::new(&[0.0], &[1.0, 2.0]).is_err());
}
