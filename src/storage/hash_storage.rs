use std::ops::Index;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::errors::SGError;

use super::{bounding_box::BoundingBox, grid_point::{GridPoint, Node1D}};

///
/// Insertion-ordered set of grid points. Every point owns a dense sequence
/// number (its position in `list`), and `map` resolves a point back to that
/// number. Coefficient vectors elsewhere are aligned with these numbers.
///
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(into = "StorageSnapshot", try_from = "StorageSnapshot")]
pub struct GridStorage
{
    dim: usize,
    list: Vec<GridPoint>,
    map: FxHashMap<GridPoint, usize>,
    has_boundary: bool,
    bounding_box: BoundingBox,
}

/// Persisted form of a [`GridStorage`]. The map is rebuilt on load.
#[derive(Serialize, Deserialize)]
struct StorageSnapshot
{
    dim: usize,
    has_boundary: bool,
    bounding_box: BoundingBox,
    points: Vec<GridPoint>,
}

impl From<GridStorage> for StorageSnapshot
{
    fn from(storage: GridStorage) -> Self {
        Self { dim: storage.dim, has_boundary: storage.has_boundary, bounding_box: storage.bounding_box, points: storage.list }
    }
}

impl TryFrom<StorageSnapshot> for GridStorage
{
    type Error = SGError;

    fn try_from(snapshot: StorageSnapshot) -> Result<Self, Self::Error> {
        if snapshot.bounding_box.dim() != snapshot.dim
        {
            return Err(SGError::DimensionMismatch { expected: snapshot.dim, actual: snapshot.bounding_box.dim() });
        }
        let mut storage = GridStorage::with_bounding_box(snapshot.bounding_box);
        storage.has_boundary = snapshot.has_boundary;
        storage.list.reserve(snapshot.points.len());
        for point in snapshot.points
        {
            storage.insert(point)?;
        }
        Ok(storage)
    }
}

///
/// Mapping produced by [`GridStorage::delete_points`]. `kept[new] == old` for
/// every surviving point, and `old_to_new` answers the reverse question.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SequenceRemap
{
    kept: Vec<usize>,
    old_to_new: Vec<Option<usize>>,
}

impl SequenceRemap
{
    /// Keeps all `len` points in place.
    pub fn identity(len: usize) -> Self
    {
        Self { kept: (0..len).collect(), old_to_new: (0..len).map(Some).collect() }
    }

    /// Old sequence numbers of the surviving points, indexed by their new number.
    pub fn kept(&self) -> &[usize]
    {
        &self.kept
    }

    pub fn new_sequence(&self, old: usize) -> Option<usize>
    {
        self.old_to_new.get(old).copied().flatten()
    }

    pub fn old_sequence(&self, new: usize) -> Option<usize>
    {
        self.kept.get(new).copied()
    }

    pub fn removed(&self) -> impl Iterator<Item = usize> + '_
    {
        self.old_to_new.iter().enumerate().filter(|(_, new)| new.is_none()).map(|(old, _)| old)
    }

    pub fn old_len(&self) -> usize
    {
        self.old_to_new.len()
    }

    pub fn new_len(&self) -> usize
    {
        self.kept.len()
    }

    ///
    /// Compacts a vector aligned with the old numbering so that it is aligned
    /// with the new one.
    ///
    pub fn apply<T>(&self, values: &mut Vec<T>) -> Result<(), SGError>
    {
        if values.len() != self.old_len()
        {
            return Err(SGError::SizeMismatch { expected: self.old_len(), actual: values.len() });
        }
        let mut old = 0;
        values.retain(|_| {
            let keep = self.old_to_new[old].is_some();
            old += 1;
            keep
        });
        Ok(())
    }
}

///
/// Dense level/index export for batch evaluation kernels. Both matrices are
/// row-major with one row per sequence number and one column per dimension.
/// Levels are exported as `2^l` so a kernel can compute `x * 2^l - i` directly.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LevelIndexArrays
{
    pub dim: usize,
    pub levels: Vec<f64>,
    pub indices: Vec<f64>,
}

impl LevelIndexArrays
{
    #[inline]
    pub fn len(&self) -> usize
    {
        if self.dim == 0 { 0 } else { self.levels.len() / self.dim }
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.levels.is_empty()
    }

    #[inline]
    pub fn level_row(&self, seq: usize) -> &[f64]
    {
        &self.levels[seq * self.dim..(seq + 1) * self.dim]
    }

    #[inline]
    pub fn index_row(&self, seq: usize) -> &[f64]
    {
        &self.indices[seq * self.dim..(seq + 1) * self.dim]
    }
}

impl GridStorage
{
    pub fn new(dim: usize) -> Self
    {
        Self::with_bounding_box(BoundingBox::with_dim(dim))
    }

    pub fn with_bounding_box(bounding_box: BoundingBox) -> Self
    {
        Self { dim: bounding_box.dim(), list: Vec::new(), map: FxHashMap::default(), has_boundary: false, bounding_box }
    }

    #[inline]
    pub fn dim(&self) -> usize
    {
        self.dim
    }

    #[inline]
    pub fn len(&self) -> usize
    {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool
    {
        self.list.is_empty()
    }

    #[inline(always)]
    pub fn has_boundary(&self) -> bool
    {
        self.has_boundary
    }

    pub fn set_has_boundary(&mut self, has_boundary: bool)
    {
        self.has_boundary = has_boundary;
    }

    pub fn bounding_box(&self) -> &BoundingBox
    {
        &self.bounding_box
    }

    pub fn set_bounding_box(&mut self, bounding_box: BoundingBox) -> Result<(), SGError>
    {
        if bounding_box.dim() != self.dim
        {
            return Err(SGError::DimensionMismatch { expected: self.dim, actual: bounding_box.dim() });
        }
        self.bounding_box = bounding_box;
        Ok(())
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, GridPoint>
    {
        self.list.iter()
    }

    #[inline]
    pub fn points(&self) -> &[GridPoint]
    {
        &self.list
    }

    ///
    /// Appends `point` and returns its sequence number. A point that is already
    /// stored is left untouched and reported through `SGError::DuplicateKey`,
    /// which carries the existing sequence number.
    ///
    pub fn insert(&mut self, mut point: GridPoint) -> Result<usize, SGError>
    {
        if point.dim() != self.dim || point.index.len() != self.dim
        {
            return Err(SGError::DimensionMismatch { expected: self.dim, actual: point.dim() });
        }
        if !point.is_valid()
        {
            return Err(SGError::InvalidGridPoint);
        }
        if let Some(&seq) = self.map.get(&point)
        {
            return Err(SGError::DuplicateKey { seq });
        }
        point.flags.set_is_inner(!point.level.contains(&0));
        let seq = self.list.len();
        self.map.insert(point.clone(), seq);
        self.list.push(point);
        Ok(seq)
    }

    #[inline]
    pub fn find(&self, point: &GridPoint) -> Option<usize>
    {
        self.map.get(point).copied()
    }

    #[inline]
    pub fn has_key(&self, point: &GridPoint) -> bool
    {
        self.map.contains_key(point)
    }

    #[inline]
    pub fn get(&self, seq: usize) -> Result<&GridPoint, SGError>
    {
        self.list.get(seq).ok_or(SGError::OutOfRange { seq, len: self.list.len() })
    }

    #[inline]
    pub(crate) fn set_leaf(&mut self, seq: usize, is_leaf: bool)
    {
        self.list[seq].set_is_leaf(is_leaf);
    }

    ///
    /// Replaces the point stored at `seq`. Used by the generators, which grow a
    /// grid one dimension at a time by rewriting existing entries.
    ///
    pub(crate) fn update(&mut self, seq: usize, point: GridPoint) -> Result<(), SGError>
    {
        let len = self.list.len();
        if seq >= len
        {
            return Err(SGError::OutOfRange { seq, len });
        }
        match self.map.get(&point)
        {
            Some(&existing) if existing != seq => return Err(SGError::DuplicateKey { seq: existing }),
            _ => {}
        }
        self.map.remove(&self.list[seq]);
        self.map.insert(point.clone(), seq);
        self.list[seq] = point;
        Ok(())
    }

    pub fn clear(&mut self)
    {
        self.list.clear();
        self.map.clear();
    }

    fn rebuild_map(&mut self)
    {
        self.map.clear();
        self.map.reserve(self.list.len());
        for (seq, point) in self.list.iter().enumerate()
        {
            self.map.insert(point.clone(), seq);
        }
    }

    ///
    /// Fails if removing the points not marked in `keep` would leave a
    /// level-zero point without its sibling. Nothing is modified.
    ///
    fn check_level_zero_pairs_kept(&self, keep: &[bool]) -> Result<(), SGError>
    {
        for (seq, point) in self.list.iter().enumerate().filter(|(seq, _)| keep[*seq])
        {
            for d in 0..self.dim
            {
                let node = point.node(d);
                if node.level != 0
                {
                    continue;
                }
                let sibling = point.with_node(d, Node1D::new(0, 1 - node.index));
                if !self.find(&sibling).is_some_and(|s| keep[s])
                {
                    return Err(SGError::InconsistentStorage(format!(
                        "deleting would separate level-zero point {} from its sibling in dimension {}", seq, d
                    )));
                }
            }
        }
        Ok(())
    }

    ///
    /// Removes the given sequence numbers, compacts the remaining points while
    /// keeping their relative order, and recomputes the leaf flags. A removal
    /// set that splits a level-zero pair is rejected before anything changes.
    ///
    pub fn delete_points(&mut self, indices: &[usize]) -> Result<SequenceRemap, SGError>
    {
        let len = self.list.len();
        let mut removed = indices.to_vec();
        removed.sort_unstable_by(|a, b| b.cmp(a));
        removed.dedup();
        if let Some(&seq) = removed.first()
        {
            if seq >= len
            {
                return Err(SGError::OutOfRange { seq, len });
            }
        }
        let mut keep = vec![true; len];
        for &seq in &removed
        {
            keep[seq] = false;
        }
        self.check_level_zero_pairs_kept(&keep)?;
        let mut kept = Vec::with_capacity(len - removed.len());
        let mut old_to_new = vec![None; len];
        let old_list = std::mem::take(&mut self.list);
        self.list.reserve(len - removed.len());
        for (old, point) in old_list.into_iter().enumerate()
        {
            if keep[old]
            {
                old_to_new[old] = Some(kept.len());
                kept.push(old);
                self.list.push(point);
            }
        }
        self.rebuild_map();
        log::debug!("deleted {} of {} grid points", removed.len(), len);
        self.recalc_leaf_property()?;
        Ok(SequenceRemap { kept, old_to_new })
    }

    #[inline]
    pub fn has_left_child(&self, point: &GridPoint, dim: usize) -> bool
    {
        self.has_key(&point.left_child(dim))
    }

    #[inline]
    pub fn has_right_child(&self, point: &GridPoint, dim: usize) -> bool
    {
        self.has_key(&point.right_child(dim))
    }

    /// Whether any child of `point` in direction `dim` is stored.
    pub fn has_child(&self, point: &GridPoint, dim: usize) -> bool
    {
        point.node(dim).children().any(|child| self.has_key(&point.with_node(dim, child)))
    }

    /// Whether every child of `point` in direction `dim` is stored.
    pub fn has_child_pair(&self, point: &GridPoint, dim: usize) -> bool
    {
        point.node(dim).children().all(|child| self.has_key(&point.with_node(dim, child)))
    }

    /// `false` on levels zero and one, which have no single parent.
    pub fn has_parent(&self, point: &GridPoint, dim: usize) -> bool
    {
        point.parent(dim).is_some_and(|parent| self.has_key(&parent))
    }

    /// Whether both level-zero points below `point` in direction `dim` are stored.
    pub fn has_level_zero_siblings(&self, point: &GridPoint, dim: usize) -> bool
    {
        self.has_key(&point.with_node(dim, Node1D::LEFT_BOUNDARY)) && self.has_key(&point.with_node(dim, Node1D::RIGHT_BOUNDARY))
    }

    #[inline]
    pub fn is_structural_leaf(&self, point: &GridPoint) -> bool
    {
        !(0..self.dim).any(|d| self.has_child(point, d))
    }

    ///
    /// Recomputes every leaf flag from the stored point set, then verifies that
    /// level-zero points come in pairs.
    ///
    pub fn recalc_leaf_property(&mut self) -> Result<(), SGError>
    {
        let leaves: Vec<bool> = self.list.par_iter().map(|point| self.is_structural_leaf(point)).collect();
        for (point, is_leaf) in self.list.iter_mut().zip(leaves)
        {
            point.set_is_leaf(is_leaf);
        }
        self.check_level_zero_consistency()
    }

    ///
    /// If `(0,0)` is stored in some dimension, `(0,1)` must be stored with the
    /// same level/index pairs in all other dimensions, and vice versa.
    ///
    pub fn check_level_zero_consistency(&self) -> Result<(), SGError>
    {
        for point in self.list.iter()
        {
            for d in 0..self.dim
            {
                let node = point.node(d);
                if node.level != 0
                {
                    continue;
                }
                let sibling = point.with_node(d, Node1D::new(0, 1 - node.index));
                if !self.has_key(&sibling)
                {
                    return Err(SGError::InconsistentStorage(format!(
                        "level-zero point {:?}/{:?} has no sibling in dimension {}", point.level, point.index, d
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every point above level one must have its parent stored in each dimension.
    pub fn check_hierarchical_consistency(&self) -> Result<(), SGError>
    {
        for point in self.list.iter()
        {
            for d in 0..self.dim
            {
                if let Some(parent) = point.parent(d)
                {
                    if !self.has_key(&parent)
                    {
                        return Err(SGError::InconsistentStorage(format!(
                            "point {:?}/{:?} is missing its parent in dimension {}", point.level, point.index, d
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn level_index_arrays_for_eval(&self) -> LevelIndexArrays
    {
        let dim = self.dim;
        if dim == 0
        {
            return LevelIndexArrays::default();
        }
        let mut levels = vec![0.0; self.len() * dim];
        let mut indices = vec![0.0; self.len() * dim];
        levels.par_chunks_mut(dim).zip(indices.par_chunks_mut(dim)).zip(self.list.par_iter()).for_each(|((level_row, index_row), point)|
        {
            for d in 0..dim
            {
                level_row[d] = (1u64 << point.level[d]) as f64;
                index_row[d] = point.index[d] as f64;
            }
        });
        LevelIndexArrays { dim, levels, indices }
    }

    /// Row-major `2^-l` per point and dimension.
    pub fn level_array_for_integral(&self) -> Vec<f64>
    {
        self.list.iter().flat_map(|point| point.level.iter().map(|&l| 1.0 / (1u64 << l) as f64)).collect()
    }

    pub fn max_level(&self) -> u8
    {
        self.list.iter().map(|point| point.level_max()).max().unwrap_or(0)
    }

    pub fn num_inner_points(&self) -> usize
    {
        self.list.iter().filter(|point| point.is_inner_point()).count()
    }

    ///
    /// Point coordinates mapped into the bounding box, in sequence order.
    ///
    pub fn coordinates(&self) -> impl Iterator<Item = Vec<f64>> + '_
    {
        self.list.iter().map(|point| self.bounding_box.to_real_coordinate(&point.unit_coordinate()))
    }
}

impl Index<usize> for GridStorage
{
    type Output = GridPoint;

    fn index(&self, seq: usize) -> &Self::Output {
        &self.list[seq]
    }
}

#[cfg(test)]
fn boundary_line_1d() -> GridStorage
{
    let mut storage = GridStorage::new(1);
    storage.insert(GridPoint::new(&[0], &[0], false)).unwrap();
    storage.insert(GridPoint::new(&[0], &[1], false)).unwrap();
    storage.insert(GridPoint::new(&[1], &[1], true)).unwrap();
    storage
}

#[test]
fn check_insert_find_get()
{
    let mut storage = boundary_line_1d();
    assert_eq!(storage.len(), 3);
    let point = GridPoint::new(&[1], &[1], false);
    assert_eq!(storage.find(&point), Some(2));
    assert!(storage.has_key(&point));
    assert_eq!(storage.get(2).unwrap(), &point);
    assert_eq!(storage.get(3), Err(SGError::OutOfRange { seq: 3, len: 3 }));
    assert_eq!(storage.insert(point), Err(SGError::DuplicateKey { seq: 2 }));
    assert_eq!(storage.len(), 3);
    assert_eq!(storage.insert(GridPoint::new(&[2], &[2], true)), Err(SGError::InvalidGridPoint));
    assert_eq!(storage.insert(GridPoint::new(&[2, 1], &[1, 1], true)), Err(SGError::DimensionMismatch { expected: 1, actual: 2 }));
}

#[test]
fn check_recalc_leaf_property()
{
    let mut storage = boundary_line_1d();
    storage.insert(GridPoint::new(&[2], &[1], false)).unwrap();
    storage.recalc_leaf_property().unwrap();
    let leaves: Vec<bool> = storage.iter().map(|p| p.is_leaf()).collect();
    assert_eq!(leaves, vec![false, false, false, true]);
}

#[test]
fn check_level_zero_sibling_is_required()
{
    let mut storage = GridStorage::new(2);
    storage.insert(GridPoint::new(&[0, 1], &[0, 1], true)).unwrap();
    storage.insert(GridPoint::new(&[1, 1], &[1, 1], true)).unwrap();
    assert!(matches!(storage.recalc_leaf_property(), Err(SGError::InconsistentStorage(_))));
    storage.insert(GridPoint::new(&[0, 1], &[1, 1], true)).unwrap();
    assert!(storage.recalc_leaf_property().is_ok());
}

#[test]
fn check_delete_points_remap()
{
    let mut storage = boundary_line_1d();
    storage.insert(GridPoint::new(&[2], &[1], true)).unwrap();
    storage.insert(GridPoint::new(&[2], &[3], true)).unwrap();
    let mut values = vec![10.0, 11.0, 12.0, 13.0, 14.0];
    let remap = storage.delete_points(&[4, 3, 4]).unwrap();
    assert_eq!(remap.kept(), &[0, 1, 2]);
    assert_eq!(remap.removed().collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(remap.new_sequence(2), Some(2));
    assert_eq!(remap.new_sequence(3), None);
    remap.apply(&mut values).unwrap();
    assert_eq!(values, vec![10.0, 11.0, 12.0]);
    assert!(storage[2].is_leaf());
    for seq in 0..storage.len()
    {
        assert_eq!(storage.find(&storage[seq]), Some(seq));
    }
    assert!(matches!(storage.delete_points(&[7]), Err(SGError::OutOfRange { seq: 7, len: 3 })));
}

#[test]
fn check_failed_delete_leaves_storage_untouched()
{
    let mut storage = boundary_line_1d();
    let before = storage.clone();
    assert!(matches!(storage.delete_points(&[0]), Err(SGError::InconsistentStorage(_))));
    assert_eq!(storage.len(), 3);
    assert_eq!(storage.points(), before.points());
    for seq in 0..storage.len()
    {
        assert_eq!(storage.find(&storage[seq]), Some(seq));
    }
    let remap = storage.delete_points(&[1, 0]).unwrap();
    assert_eq!(remap.kept(), &[2]);
    assert_eq!(storage.len(), 1);
}

#[test]
fn check_delete_keeps_relative_order()
{
    let mut storage = boundary_line_1d();
    storage.insert(GridPoint::new(&[2], &[1], true)).unwrap();
    storage.insert(GridPoint::new(&[2], &[3], true)).unwrap();
    let remap = storage.delete_points(&[3]).unwrap();
    assert_eq!(remap.kept(), &[0, 1, 2, 4]);
    assert_eq!(storage[3], GridPoint::new(&[2], &[3], true));
    assert!(!storage[2].is_leaf());
}

#[test]
fn check_level_index_arrays()
{
    let mut storage = GridStorage::new(2);
    storage.insert(GridPoint::new(&[1, 2], &[1, 3], true)).unwrap();
    storage.insert(GridPoint::new(&[0, 3], &[1, 5], true)).unwrap();
    let arrays = storage.level_index_arrays_for_eval();
    assert_eq!(arrays.len(), 2);
    assert_eq!(arrays.level_row(0), &[2.0, 4.0]);
    assert_eq!(arrays.index_row(0), &[1.0, 3.0]);
    assert_eq!(arrays.level_row(1), &[1.0, 8.0]);
    assert_eq!(arrays.index_row(1), &[1.0, 5.0]);
    assert_eq!(storage.level_array_for_integral(), vec![0.5, 0.25, 1.0, 0.125]);
    assert_eq!(storage.max_level(), 3);
    assert_eq!(storage.num_inner_points(), 1);
}

#[cfg(test)]
mod tests
{
    use proptest::prelude::*;

    use super::*;

    fn inner_point(dim: usize, max_level: u8) -> impl Strategy<Value = GridPoint>
    {
        proptest::collection::vec((1u8..=max_level, any::<u32>()), dim).prop_map(|pairs| {
            let (level, index): (Vec<u8>, Vec<u32>) = pairs.into_iter()
                .map(|(l, raw)| (l, 2 * (raw % (1u32 << (l - 1))) + 1))
                .unzip();
            GridPoint::new(&level, &index, false)
        })
    }

    proptest! {
        #[test]
        fn find_inverts_get(points in proptest::collection::vec(inner_point(3, 4), 1..60))
        {
            let mut storage = GridStorage::new(3);
            for point in points
            {
                match storage.insert(point)
                {
                    Ok(_) | Err(SGError::DuplicateKey { .. }) => {}
                    Err(e) => panic!("unexpected error {e}"),
                }
            }
            for seq in 0..storage.len()
            {
                prop_assert_eq!(storage.find(storage.get(seq).unwrap()), Some(seq));
            }
        }

        #[test]
        fn leaf_iff_no_children(points in proptest::collection::vec(inner_point(2, 4), 1..40))
        {
            let mut storage = GridStorage::new(2);
            for point in points
            {
                let _ = storage.insert(point);
            }
            storage.recalc_leaf_property().unwrap();
            for point in storage.iter()
            {
                let has_child = (0..2).any(|d| storage.find(&point.left_child(d)).is_some() || storage.find(&point.right_child(d)).is_some());
                prop_assert_eq!(point.is_leaf(), !has_child);
            }
        }

        #[test]
        fn delete_preserves_bijection(points in proptest::collection::vec(inner_point(2, 4), 1..40), removal in proptest::collection::vec(any::<usize>(), 0..10))
        {
            let mut storage = GridStorage::new(2);
            for point in points
            {
                let _ = storage.insert(point);
            }
            let len = storage.len();
            let removal: Vec<usize> = removal.into_iter().map(|r| r % len).collect();
            let before: Vec<GridPoint> = storage.iter().cloned().collect();
            let remap = storage.delete_points(&removal).unwrap();
            prop_assert_eq!(remap.new_len(), storage.len());
            for seq in 0..storage.len()
            {
                prop_assert_eq!(storage.find(&storage[seq]), Some(seq));
                prop_assert_eq!(&before[remap.old_sequence(seq).unwrap()], &storage[seq]);
            }
        }
    }
}
