use crate::{errors::SGError, storage::{GridPoint, GridStorage, Node1D, MAX_LEVEL}};

fn check_empty(storage: &GridStorage, levels: &[usize]) -> Result<(), SGError>
{
    if levels.len() != storage.dim()
    {
        return Err(SGError::DimensionMismatch { expected: storage.dim(), actual: levels.len() });
    }
    if !storage.is_empty()
    {
        return Err(SGError::InconsistentStorage("grid generators require an empty storage".to_string()));
    }
    if storage.dim() == 0 || levels.iter().any(|&l| l == 0 || l > MAX_LEVEL as usize)
    {
        return Err(SGError::InvalidGridPoint);
    }
    Ok(())
}

/// Appends every point of level `1..=n` in dimension 0, the other dimensions held at `(1,1)`.
fn first_dimension(storage: &mut GridStorage, point: &mut GridPoint, n: u8) -> Result<(), SGError>
{
    for l in 1..=n
    {
        for i in (1..(1u32 << l)).step_by(2)
        {
            point.set_node(0, Node1D::new(l, i));
            storage.insert(point.clone())?;
        }
    }
    Ok(())
}

///
/// Writes `point` over sequence number `seq` the first time it is called for
/// that number and appends afterwards.
///
fn place(storage: &mut GridStorage, point: &GridPoint, seq: usize, first: &mut bool) -> Result<(), SGError>
{
    if *first
    {
        *first = false;
        storage.update(seq, point.clone())
    }
    else
    {
        storage.insert(point.clone()).map(|_| ())
    }
}

///
/// Generates a regular sparse grid without boundary points. `levels[d]` bounds the
/// level in direction `d`. For details about `t`, see pages 8-9 of Griebel and Knapek's
/// "Optimized Tensor-Product Approximation Spaces". `None` gives the classical
/// sparse grid.
///
pub fn regular(storage: &mut GridStorage, levels: &[usize], t: Option<f64>) -> Result<(), SGError>
{
    check_empty(storage, levels)?;
    let dim = storage.dim();
    let t = t.unwrap_or(0.0);
    let mut point = GridPoint::root(dim);
    first_dimension(storage, &mut point, levels[0] as u8)?;

    // extend every existing point along dimension d
    for d in 1..dim
    {
        let n = levels[d] as u32;
        let ngrids = storage.len();
        for g in 0..ngrids
        {
            let mut first = true;
            let mut point = storage[g].clone();
            let level_sum = point.level_sum() - 1;
            let level_max = point.level_max() as u32;
            let bound = (n + dim as u32 - 1) as f64 - t * n as f64;
            let mut l = 1u32;
            while (l + level_sum) as f64 - t * l.max(level_max) as f64 <= bound && l.max(level_max) <= n
            {
                for i in (1..(1u32 << l)).step_by(2)
                {
                    point.set_node(d, Node1D::new(l as u8, i));
                    place(storage, &point, g, &mut first)?;
                }
                l += 1;
            }
        }
    }
    finish(storage, false)
}

///
/// Generates a full grid of level `level` in every direction, without boundary points.
///
pub fn full(storage: &mut GridStorage, level: usize) -> Result<(), SGError>
{
    let dim = storage.dim();
    check_empty(storage, &vec![level; dim])?;
    let n = level as u8;
    let mut point = GridPoint::root(dim);
    first_dimension(storage, &mut point, n)?;
    for d in 1..dim
    {
        let ngrids = storage.len();
        for g in 0..ngrids
        {
            let mut first = true;
            let mut point = storage[g].clone();
            for l in 1..=n
            {
                for i in (1..(1u32 << l)).step_by(2)
                {
                    point.set_node(d, Node1D::new(l, i));
                    place(storage, &point, g, &mut first)?;
                }
            }
        }
    }
    finish(storage, false)
}

///
/// Generates a regular sparse grid together with its boundary points. A boundary
/// function is present exactly when the interior functions of its line are.
///
pub fn regular_with_boundaries(storage: &mut GridStorage, levels: &[usize], t: Option<f64>) -> Result<(), SGError>
{
    check_empty(storage, levels)?;
    let dim = storage.dim();
    let t = t.unwrap_or(0.0);
    let boundary_level = 1u32;
    let n = levels[0] as u32;
    let mut point = GridPoint::root(dim);

    point.set_node(0, Node1D::new(0, 0));
    storage.insert(point.clone())?;
    point.set_node(0, Node1D::RIGHT_BOUNDARY);
    storage.insert(point.clone())?;
    first_dimension(storage, &mut point, n as u8)?;

    for d in 1..dim
    {
        let ngrids = storage.len();
        let cur_dim = d as u32 + 1;
        for g in 0..ngrids
        {
            let mut point = storage[g].clone();
            let level_sum: u32 = point.level[..d].iter().map(|&l| l as u32).sum();
            let num_zero_levels = point.level[..d].iter().filter(|&&l| l == 0).count() as u32;

            // boundary functions in direction d, which add one more zero level
            let mut first = true;
            if level_sum + boundary_level + num_zero_levels < n + cur_dim || num_zero_levels == cur_dim - 1
            {
                point.set_node(d, Node1D::new(0, 0));
                place(storage, &point, g, &mut first)?;
                point.set_node(d, Node1D::RIGHT_BOUNDARY);
                place(storage, &point, g, &mut first)?;
            }
            let mut upper_bound = if num_zero_levels > 0
            {
                if n + cur_dim < boundary_level + num_zero_levels
                {
                    continue;
                }
                (n + cur_dim - num_zero_levels - boundary_level) as f64
            }
            else
            {
                (n + cur_dim - 1) as f64
            };
            upper_bound -= t * n as f64;
            let level_max = point.level[..d].iter().copied().max().unwrap_or(0) as u32;
            let n_d = levels[d] as u32;
            let mut l = 1u32;
            while (l + level_sum) as f64 - t * l.max(level_max) as f64 <= upper_bound && l.max(level_max) <= n_d
            {
                for i in (1..(1u32 << l)).step_by(2)
                {
                    point.set_node(d, Node1D::new(l as u8, i));
                    place(storage, &point, g, &mut first)?;
                }
                l += 1;
            }
        }
    }
    finish(storage, true)
}

///
/// Generates a full grid of level `level` including all boundary points.
///
pub fn full_with_boundaries(storage: &mut GridStorage, level: usize) -> Result<(), SGError>
{
    let dim = storage.dim();
    check_empty(storage, &vec![level; dim])?;
    let n = level as u8;
    let mut point = GridPoint::root(dim);
    point.set_node(0, Node1D::new(0, 0));
    storage.insert(point.clone())?;
    point.set_node(0, Node1D::RIGHT_BOUNDARY);
    storage.insert(point.clone())?;
    first_dimension(storage, &mut point, n)?;
    for d in 1..dim
    {
        let ngrids = storage.len();
        for g in 0..ngrids
        {
            let mut first = true;
            let mut point = storage[g].clone();
            for (l, i) in [(0u8, 0u32), (0, 1)]
            {
                point.set_node(d, Node1D::new(l, i));
                place(storage, &point, g, &mut first)?;
            }
            for l in 1..=n
            {
                for i in (1..(1u32 << l)).step_by(2)
                {
                    point.set_node(d, Node1D::new(l, i));
                    place(storage, &point, g, &mut first)?;
                }
            }
        }
    }
    finish(storage, true)
}

fn finish(storage: &mut GridStorage, has_boundary: bool) -> Result<(), SGError>
{
    storage.set_has_boundary(has_boundary);
    storage.recalc_leaf_property()?;
    log::debug!("generated {} grid points in {} dimensions", storage.len(), storage.dim());
    Ok(())
}

#[test]
fn check_regular_grid()
{
    let mut storage = GridStorage::new(2);
    regular(&mut storage, &[3, 3], None).unwrap();
    assert_eq!(storage.len(), 17);
    assert!(storage.check_hierarchical_consistency().is_ok());
    assert_eq!(storage.iter().filter(|p| p.is_leaf()).count(), 12);
    assert_eq!(storage[0], GridPoint::root(2));
}

#[test]
fn check_regular_grid_3d()
{
    let mut storage = GridStorage::new(3);
    regular(&mut storage, &[3, 3, 3], None).unwrap();
    assert_eq!(storage.len(), 31);
}

#[test]
fn check_full_grid()
{
    let mut storage = GridStorage::new(2);
    full(&mut storage, 2).unwrap();
    assert_eq!(storage.len(), 9);
    assert_eq!(storage.iter().filter(|p| p.is_leaf()).count(), 4);
}

#[test]
fn check_regular_grid_with_boundaries()
{
    let mut storage = GridStorage::new(1);
    regular_with_boundaries(&mut storage, &[2], None).unwrap();
    assert_eq!(storage.len(), 5);
    assert!(storage.has_boundary());

    let mut storage = GridStorage::new(2);
    regular_with_boundaries(&mut storage, &[2, 2], None).unwrap();
    assert_eq!(storage.len(), 21);
    assert!(storage.check_level_zero_consistency().is_ok());

    let mut storage = GridStorage::new(2);
    regular_with_boundaries(&mut storage, &[3, 3], None).unwrap();
    assert_eq!(storage.len(), 49);
    assert!(storage.check_hierarchical_consistency().is_ok());
}

#[test]
fn check_full_grid_with_boundaries()
{
    let mut storage = GridStorage::new(2);
    full_with_boundaries(&mut storage, 2).unwrap();
    assert_eq!(storage.len(), 25);
    assert!(storage.check_level_zero_consistency().is_ok());
}

#[test]
fn check_generator_rejects_non_empty_storage()
{
    let mut storage = GridStorage::new(2);
    regular(&mut storage, &[2, 2], None).unwrap();
    assert!(regular(&mut storage, &[2, 2], None).is_err());
    let mut storage = GridStorage::new(2);
    assert_eq!(regular(&mut storage, &[2], None), Err(SGError::DimensionMismatch { expected: 2, actual: 1 }));
}
