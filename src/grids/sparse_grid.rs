use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::{algorithms::{coarsening::{coarsen, CoarseningResult}, hierarchisation::{BasisType, HierarchisationOperation}, refinement::{HashRefinement, RefinementFunctor, RefinementOptions}}, errors::SGError, generators, refinement::surplus::{SurplusCoarsening, SurplusRefinement}, serialization::{self, SerializationFormat, Tokens}, storage::{BoundingBox, GridStorage}};

///
/// A grid storage together with its basis and hierarchical surpluses. `alpha`
/// is kept aligned with the sequence numbers of `storage` through refinement
/// and coarsening.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SparseGrid
{
    pub(crate) storage: GridStorage,
    pub(crate) basis: BasisType,
    pub(crate) alpha: Vec<f64>,
}

impl SparseGrid
{
    pub fn new(dim: usize, basis: BasisType) -> Self
    {
        Self { storage: GridStorage::new(dim), basis, alpha: Vec::new() }
    }

    pub fn with_bounding_box(bounding_box: BoundingBox, basis: BasisType) -> Self
    {
        Self { storage: GridStorage::with_bounding_box(bounding_box), basis, alpha: Vec::new() }
    }

    pub fn storage(&self) -> &GridStorage
    {
        &self.storage
    }

    pub fn basis(&self) -> BasisType
    {
        self.basis
    }

    pub fn alpha(&self) -> &[f64]
    {
        &self.alpha
    }

    pub fn dim(&self) -> usize
    {
        self.storage.dim()
    }

    pub fn len(&self) -> usize
    {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.storage.is_empty()
    }

    fn generated(&mut self) -> Result<(), SGError>
    {
        self.alpha = vec![0.0; self.storage.len()];
        Ok(())
    }

    ///
    /// Regular sparse grid. Boundary bases get boundary points as well.
    ///
    pub fn sparse_grid(&mut self, levels: &[usize]) -> Result<(), SGError>
    {
        if self.basis.has_boundary()
        {
            generators::regular_with_boundaries(&mut self.storage, levels, None)?;
        }
        else
        {
            generators::regular(&mut self.storage, levels, None)?;
        }
        self.generated()
    }

    pub fn full_grid(&mut self, level: usize) -> Result<(), SGError>
    {
        if self.basis.has_boundary()
        {
            generators::full_with_boundaries(&mut self.storage, level)?;
        }
        else
        {
            generators::full(&mut self.storage, level)?;
        }
        self.generated()
    }

    ///
    /// Hierarchizes nodal `values`, given in sequence order, into the surpluses.
    ///
    pub fn set_values(&mut self, values: &[f64]) -> Result<(), SGError>
    {
        let mut alpha = vec![0.0; self.storage.len()];
        self.basis.hierarchize_into(&self.storage, values, &mut alpha)?;
        self.alpha = alpha;
        Ok(())
    }

    ///
    /// Evaluates `eval_fun` at every point coordinate and hierarchizes the result.
    ///
    pub fn update_values(&mut self, eval_fun: &mut dyn FnMut(&[f64]) -> f64) -> Result<(), SGError>
    {
        let values: Vec<f64> = self.storage.coordinates().map(|x| eval_fun(&x)).collect();
        self.set_values(&values)
    }

    /// Nodal values reconstructed from the surpluses.
    pub fn nodal_values(&self) -> Result<Vec<f64>, SGError>
    {
        let mut values = vec![0.0; self.storage.len()];
        self.basis.dehierarchize_into(&self.storage, &self.alpha, &mut values)?;
        Ok(values)
    }

    /// Overwrites the surpluses without hierarchizing.
    pub fn set_alpha(&mut self, alpha: Vec<f64>) -> Result<(), SGError>
    {
        if alpha.len() != self.storage.len()
        {
            return Err(SGError::SizeMismatch { expected: self.storage.len(), actual: alpha.len() });
        }
        self.alpha = alpha;
        Ok(())
    }

    ///
    /// Refines with an arbitrary functor. New points get zero surpluses.
    /// Returns the number of new points.
    ///
    pub fn refine_with<F: RefinementFunctor + ?Sized>(&mut self, functor: &F, options: &RefinementOptions) -> Result<usize, SGError>
    {
        let created = HashRefinement::for_storage(&self.storage).refine(&mut self.storage, functor, options)?;
        self.alpha.resize(self.storage.len(), 0.0);
        Ok(created)
    }

    ///
    /// Refines the points with the largest absolute surpluses.
    ///
    pub fn refine_surplus(&mut self, refinements_num: usize, threshold: f64, options: &RefinementOptions) -> Result<usize, SGError>
    {
        let functor = SurplusRefinement::new(&self.alpha, refinements_num, threshold);
        let created = HashRefinement::for_storage(&self.storage).refine(&mut self.storage, &functor, options)?;
        self.alpha.resize(self.storage.len(), 0.0);
        Ok(created)
    }

    ///
    /// Removes leaves with small surpluses and compacts `alpha` accordingly.
    ///
    pub fn coarsen_surplus(&mut self, removements_num: usize, threshold: f64) -> Result<CoarseningResult, SGError>
    {
        let alpha = self.alpha.clone();
        let functor = SurplusCoarsening::new(&alpha, removements_num, threshold);
        coarsen(&mut self.storage, &functor, &mut self.alpha)
    }

    ///
    /// Writes the grid to `path`. The text format stores the storage followed by
    /// a basis token and one line of surpluses.
    ///
    pub fn save(&self, path: &str, format: SerializationFormat) -> Result<(), SGError>
    {
        let buffer = self.to_bytes(format)?;
        let mut file = std::io::BufWriter::new(std::fs::File::create(path).map_err(|_| SGError::FileIOError)?);
        file.write_all(&buffer).map_err(|_| SGError::FileIOError)?;
        file.flush().map_err(|_| SGError::FileIOError)?;
        log::debug!("saved grid with {} points to {}", self.len(), path);
        Ok(())
    }

    pub fn to_bytes(&self, format: SerializationFormat) -> Result<Vec<u8>, SGError>
    {
        match format
        {
            SerializationFormat::Text =>
            {
                let mut text = serialization::write_text(&self.storage);
                text.push_str(self.basis.name());
                text.push('\n');
                let alpha: Vec<String> = self.alpha.iter().map(|a| a.to_string()).collect();
                text.push_str(&alpha.join(" "));
                text.push('\n');
                Ok(text.into_bytes())
            }
            _ => serialization::serialize(self, format),
        }
    }

    pub fn read<Reader: std::io::Read>(mut reader: Reader, format: SerializationFormat) -> Result<Self, SGError>
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|_| SGError::FileIOError)?;
        Self::read_buffer(&bytes, format)
    }

    pub fn read_buffer(buffer: &[u8], format: SerializationFormat) -> Result<Self, SGError>
    {
        let grid: SparseGrid = match format
        {
            SerializationFormat::Text =>
            {
                let text = std::str::from_utf8(buffer).map_err(|e| SGError::ParseError(e.to_string()))?;
                let mut tokens = Tokens::new(text);
                let storage = serialization::parse_storage(&mut tokens)?;
                let basis: BasisType = tokens.next("basis")?;
                if tokens.remaining() < storage.len()
                {
                    return Err(SGError::SizeMismatch { expected: storage.len(), actual: tokens.remaining() });
                }
                let mut alpha = Vec::with_capacity(storage.len());
                for _ in 0..storage.len()
                {
                    alpha.push(tokens.next::<f64>("surplus")?);
                }
                tokens.finish()?;
                SparseGrid { storage, basis, alpha }
            }
            _ => serialization::deserialize(buffer, format)?,
        };
        if grid.alpha.len() != grid.storage.len()
        {
            return Err(SGError::SizeMismatch { expected: grid.storage.len(), actual: grid.alpha.len() });
        }
        Ok(grid)
    }
}

#[cfg(test)]
fn parabola(x: &[f64]) -> f64
{
    x.iter().map(|&xi| 4.0 * xi * (1.0 - xi)).product()
}

#[test]
fn check_values_round_trip()
{
    let mut grid = SparseGrid::new(2, BasisType::Linear);
    grid.sparse_grid(&[4, 4]).unwrap();
    let values: Vec<f64> = grid.storage().coordinates().map(|x| parabola(&x)).collect();
    grid.set_values(&values).unwrap();
    assert_eq!(grid.alpha()[0], 1.0);
    let nodal = grid.nodal_values().unwrap();
    for (a, b) in nodal.iter().zip(values.iter())
    {
        assert!((a - b).abs() < 1e-12);
    }
    assert_eq!(grid.set_values(&values[1..]), Err(SGError::SizeMismatch { expected: values.len(), actual: values.len() - 1 }));
}

#[test]
fn check_refine_and_coarsen_keep_alpha_aligned()
{
    let mut grid = SparseGrid::new(1, BasisType::Linear);
    grid.sparse_grid(&[2]).unwrap();
    grid.update_values(&mut |x: &[f64]| parabola(x)).unwrap();
    // (1,1) has surplus 1, (2,1) and (2,3) have 0.25
    let created = grid.refine_surplus(1, 0.1, &RefinementOptions::default()).unwrap();
    assert_eq!(created, 2);
    assert_eq!(grid.alpha().len(), 5);
    assert_eq!(&grid.alpha()[3..], &[0.0, 0.0]);
    let result = grid.coarsen_surplus(10, 0.1).unwrap();
    assert_eq!(result.removed, vec![3, 4]);
    assert_eq!(grid.alpha().len(), 3);
    assert_eq!(grid.len(), 3);
}

#[test]
fn check_boundary_grid_reproduces_linear_function()
{
    let mut grid = SparseGrid::new(2, BasisType::LinearBoundary);
    grid.sparse_grid(&[2, 2]).unwrap();
    assert_eq!(grid.len(), 21);
    grid.update_values(&mut |x: &[f64]| 1.0 + x[0] + 2.0 * x[1]).unwrap();
    for (seq, point) in grid.storage().iter().enumerate()
    {
        if point.is_inner_point() && point.level() != [1, 1]
        {
            assert!(grid.alpha()[seq].abs() < 1e-12, "{:?}", point);
        }
    }
}

#[test]
fn check_grid_serialization()
{
    for basis in [BasisType::Linear, BasisType::LinearBoundary, BasisType::ModLinear]
    {
        let mut grid = SparseGrid::new(2, basis);
        grid.sparse_grid(&[3, 3]).unwrap();
        grid.update_values(&mut |x: &[f64]| x[0] * x[1] + 1.0 + x[0]).unwrap();
        let nodal = grid.nodal_values().unwrap();
        for format in [SerializationFormat::Text, SerializationFormat::Bincode, SerializationFormat::BincodeLz4]
        {
            let bytes = grid.to_bytes(format).unwrap();
            let result = SparseGrid::read(bytes.as_slice(), format).unwrap();
            assert_eq!(result.storage().points(), grid.storage().points());
            assert_eq!(result.alpha(), grid.alpha());
            assert_eq!(result.basis(), basis);
            assert_eq!(result.nodal_values().unwrap(), nodal);
        }
    }
}

#[test]
fn check_text_grid_rejects_bad_payload()
{
    let mut grid = SparseGrid::new(1, BasisType::ModLinear);
    grid.sparse_grid(&[2]).unwrap();
    let text = String::from_utf8(grid.to_bytes(SerializationFormat::Text).unwrap()).unwrap();
    assert!(text.contains("\nmodlinear\n"));
    let unknown = text.replace("modlinear", "cubic");
    assert!(matches!(SparseGrid::read_buffer(unknown.as_bytes(), SerializationFormat::Text), Err(SGError::ParseError(_))));
    let truncated = text.trim_end().rsplit_once(' ').map(|(head, _)| head.to_string()).unwrap();
    assert_eq!(SparseGrid::read_buffer(truncated.as_bytes(), SerializationFormat::Text).unwrap_err(), SGError::SizeMismatch { expected: 3, actual: 2 });
}
