use std::hash::{Hash, Hasher};

use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};

/// Deepest level a single dimension may reach. Indices at this level still fit in a `u32`.
pub const MAX_LEVEL: u8 = 31;

#[bitfield(u8, new=false)]
#[derive(Serialize, Deserialize, PartialEq, Eq)]
pub struct GridPointFlags
{
    pub is_leaf: bool,
    pub is_inner: bool,
    #[bits(6)]
    __: u8,
}

impl GridPointFlags
{
    pub fn new(level: &[u8], is_leaf: bool) -> Self
    {
        let mut r = Self::default();
        r.set_is_leaf(is_leaf);
        r.set_is_inner(!level.contains(&0));
        r
    }
}

///
/// One dimension of a grid point, used as an immutable cursor while walking
/// the binary tree of a single dimension.
///
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node1D
{
    pub level: u8,
    pub index: u32,
}

impl Node1D
{
    pub const LEFT_BOUNDARY: Node1D = Node1D { level: 0, index: 0 };
    pub const RIGHT_BOUNDARY: Node1D = Node1D { level: 0, index: 1 };
    pub const ROOT: Node1D = Node1D { level: 1, index: 1 };

    #[inline]
    pub fn new(level: u8, index: u32) -> Self
    {
        Self { level, index }
    }

    #[inline]
    pub fn is_valid(&self) -> bool
    {
        if self.level == 0
        {
            self.index <= 1
        }
        else
        {
            self.level <= MAX_LEVEL && self.index % 2 == 1 && self.index < (1u32 << self.level)
        }
    }

    #[inline]
    pub fn is_boundary(&self) -> bool
    {
        self.level == 0
    }

    /// Level zero has the single child `(1,1)`.
    #[inline]
    pub fn left_child(self) -> Node1D
    {
        if self.level == 0
        {
            return Self::ROOT;
        }
        Node1D { level: self.level + 1, index: 2 * self.index - 1 }
    }

    /// Level zero has the single child `(1,1)`.
    #[inline]
    pub fn right_child(self) -> Node1D
    {
        if self.level == 0
        {
            return Self::ROOT;
        }
        Node1D { level: self.level + 1, index: 2 * self.index + 1 }
    }

    ///
    /// Children in left-to-right order. Level zero yields only `(1,1)`.
    ///
    pub fn children(self) -> impl Iterator<Item = Node1D>
    {
        let right = if self.level == 0 { None } else { Some(self.right_child()) };
        std::iter::once(self.left_child()).chain(right)
    }

    ///
    /// Hierarchical parent. Points on level one hang below the two boundary points
    /// rather than a single parent, so `None` is returned for levels zero and one.
    ///
    #[inline]
    pub fn parent(self) -> Option<Node1D>
    {
        if self.level <= 1
        {
            return None;
        }
        Some(Node1D { level: self.level - 1, index: (self.index >> 1) | 1 })
    }

    #[inline]
    pub fn is_leftmost(&self) -> bool
    {
        self.level > 0 && self.index == 1
    }

    #[inline]
    pub fn is_rightmost(&self) -> bool
    {
        self.level > 0 && self.index == (1u32 << self.level) - 1
    }

    #[inline]
    pub fn unit_coordinate(&self) -> f64
    {
        self.index as f64 / (1u64 << self.level) as f64
    }
}

///
/// A multi-dimensional grid point: one `(level, index)` pair per dimension plus
/// a packed set of flags. Equality and hashing only see the level/index pairs.
///
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct GridPoint
{
    pub(crate) level: Vec<u8>,
    pub(crate) index: Vec<u32>,
    pub(crate) flags: GridPointFlags,
}

impl Hash for GridPoint
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.index.hash(state);
    }
}

impl PartialEq for GridPoint
{
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level && self.index == other.index
    }
}
impl Eq for GridPoint {}

impl GridPoint
{
    pub fn new(level: &[u8], index: &[u32], is_leaf: bool) -> Self
    {
        let flags = GridPointFlags::new(level, is_leaf);
        Self { level: level.to_vec(), index: index.to_vec(), flags }
    }

    /// The point `(1,1)` in every dimension.
    pub fn root(dim: usize) -> Self
    {
        Self::new(&vec![1; dim], &vec![1; dim], true)
    }

    #[inline]
    pub fn dim(&self) -> usize
    {
        self.level.len()
    }

    #[inline]
    pub fn level(&self) -> &[u8]
    {
        &self.level
    }

    #[inline]
    pub fn index(&self) -> &[u32]
    {
        &self.index
    }

    #[inline]
    pub fn node(&self, dim: usize) -> Node1D
    {
        Node1D { level: self.level[dim], index: self.index[dim] }
    }

    #[inline]
    pub fn set_node(&mut self, dim: usize, node: Node1D)
    {
        self.level[dim] = node.level;
        self.index[dim] = node.index;
        self.flags.set_is_inner(!self.level.contains(&0));
    }

    /// Copy of this point with dimension `dim` replaced by `node`.
    #[inline]
    pub fn with_node(&self, dim: usize, node: Node1D) -> GridPoint
    {
        let mut r = self.clone();
        r.set_node(dim, node);
        r
    }

    #[inline]
    pub fn is_leaf(&self) -> bool
    {
        self.flags.is_leaf()
    }

    #[inline]
    pub fn set_is_leaf(&mut self, is_leaf: bool)
    {
        self.flags.set_is_leaf(is_leaf);
    }

    ///
    /// This is an inner point if no level is zero.
    ///
    #[inline]
    pub fn is_inner_point(&self) -> bool
    {
        self.flags.is_inner()
    }

    pub fn is_valid(&self) -> bool
    {
        self.level.len() == self.index.len() && (0..self.dim()).all(|d| self.node(d).is_valid())
    }

    pub fn level_sum(&self) -> u32
    {
        self.level.iter().map(|&l| l as u32).sum()
    }

    #[inline]
    pub fn level_max(&self) -> u8
    {
        *self.level.iter().max().unwrap_or(&0)
    }

    pub fn level_min(&self) -> u8
    {
        *self.level.iter().min().unwrap_or(&0)
    }

    pub fn left_child(&self, dim: usize) -> GridPoint
    {
        self.with_node(dim, self.node(dim).left_child())
    }

    pub fn right_child(&self, dim: usize) -> GridPoint
    {
        self.with_node(dim, self.node(dim).right_child())
    }

    ///
    /// Parent in direction `dim`. `None` on levels zero and one, whose
    /// ancestors are the boundary points.
    ///
    pub fn parent(&self, dim: usize) -> Option<GridPoint>
    {
        self.node(dim).parent().map(|node| self.with_node(dim, node))
    }

    pub fn unit_coordinate(&self) -> Vec<f64>
    {
        (0..self.dim()).map(|d| self.node(d).unit_coordinate()).collect()
    }
}

#[test]
fn check_child_arithmetic()
{
    let node = Node1D::new(2, 3);
    assert_eq!(node.left_child(), Node1D::new(3, 5));
    assert_eq!(node.right_child(), Node1D::new(3, 7));
    assert_eq!(Node1D::new(3, 5).parent(), Some(node));
    assert_eq!(Node1D::new(3, 7).parent(), Some(node));
    assert_eq!(Node1D::ROOT.parent(), None);
    let children: Vec<_> = Node1D::LEFT_BOUNDARY.children().collect();
    assert_eq!(children, vec![Node1D::ROOT]);
    let children: Vec<_> = Node1D::ROOT.children().collect();
    assert_eq!(children, vec![Node1D::new(2, 1), Node1D::new(2, 3)]);
}

#[test]
fn check_node_validity()
{
    assert!(Node1D::new(0, 0).is_valid());
    assert!(Node1D::new(0, 1).is_valid());
    assert!(!Node1D::new(0, 2).is_valid());
    assert!(Node1D::new(3, 7).is_valid());
    assert!(!Node1D::new(3, 8).is_valid());
    assert!(!Node1D::new(3, 4).is_valid());
    assert!(!Node1D::new(3, 9).is_valid());
    assert!(!Node1D::new(1, 0).is_valid());
    assert!(Node1D::new(2, 1).is_leftmost());
    assert!(Node1D::new(2, 3).is_rightmost());
    assert!(!Node1D::new(3, 3).is_rightmost());
}

#[test]
fn check_equality_ignores_flags()
{
    let a = GridPoint::new(&[2, 1], &[3, 1], true);
    let b = GridPoint::new(&[2, 1], &[3, 1], false);
    assert_eq!(a, b);
    let mut hasher_a = rustc_hash::FxHasher::default();
    let mut hasher_b = rustc_hash::FxHasher::default();
    a.hash(&mut hasher_a);
    b.hash(&mut hasher_b);
    assert_eq!(hasher_a.finish(), hasher_b.finish());
    assert_ne!(a, GridPoint::new(&[1, 2], &[1, 3], true));
}

#[test]
fn check_inner_flag_follows_levels()
{
    let mut point = GridPoint::root(2);
    assert!(point.is_inner_point());
    point.set_node(1, Node1D::RIGHT_BOUNDARY);
    assert!(!point.is_inner_point());
    assert_eq!(point.unit_coordinate(), vec![0.5, 1.0]);
    assert_eq!(point.parent(0), None);
    let child = point.left_child(0);
    assert_eq!(child.level(), &[2, 0]);
    assert_eq!(child.index(), &[1, 1]);
    assert_eq!(child.parent(0), Some(point));
}
