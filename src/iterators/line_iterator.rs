use crate::storage::{GridPoint, GridStorage, Node1D};

///
/// Probe for the points of one line: all points that share the same
/// level/index pairs outside of dimension `dim`. Recursive sweeps pass a
/// [`Node1D`] cursor by value and ask the probe for its sequence number, so no
/// traversal state has to be restored when a branch returns.
///
pub struct LineIterator<'a>
{
    storage: &'a GridStorage,
    probe: GridPoint,
    dim: usize,
}

impl<'a> LineIterator<'a>
{
    pub fn new(storage: &'a GridStorage, line: &GridPoint, dim: usize) -> Self
    {
        Self { storage, probe: line.clone(), dim }
    }

    #[inline]
    pub fn dim(&self) -> usize
    {
        self.dim
    }

    #[inline]
    pub fn storage(&self) -> &'a GridStorage
    {
        self.storage
    }

    /// Sequence number of `node` on this line, if stored.
    #[inline(always)]
    pub fn seq(&mut self, node: Node1D) -> Option<usize>
    {
        self.probe.level[self.dim] = node.level;
        self.probe.index[self.dim] = node.index;
        self.storage.find(&self.probe)
    }

    #[inline]
    pub fn left_boundary(&mut self) -> Option<usize>
    {
        self.seq(Node1D::LEFT_BOUNDARY)
    }

    #[inline]
    pub fn right_boundary(&mut self) -> Option<usize>
    {
        self.seq(Node1D::RIGHT_BOUNDARY)
    }

    #[inline]
    pub fn root(&mut self) -> Option<usize>
    {
        self.seq(Node1D::ROOT)
    }
}

/// Canonical representative of the line through `point` in direction `dim`.
#[inline]
pub fn line_key(point: &GridPoint, dim: usize) -> GridPoint
{
    point.with_node(dim, Node1D::LEFT_BOUNDARY)
}

#[test]
fn check_line_probe()
{
    let mut storage = GridStorage::new(2);
    storage.insert(GridPoint::new(&[1, 2], &[1, 3], true)).unwrap();
    storage.insert(GridPoint::new(&[2, 2], &[1, 3], true)).unwrap();
    storage.insert(GridPoint::new(&[2, 1], &[1, 1], true)).unwrap();
    let key = line_key(&storage[1], 0);
    assert_eq!(key, line_key(&storage[0], 0));
    let mut line = LineIterator::new(&storage, &key, 0);
    assert_eq!(line.root(), Some(0));
    assert_eq!(line.seq(Node1D::new(2, 1)), Some(1));
    assert_eq!(line.seq(Node1D::new(2, 3)), None);
    assert_eq!(line.left_boundary(), None);
}
