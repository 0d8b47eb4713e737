use std::{cmp::{Ordering, Reverse}, collections::BinaryHeap, hash::Hash, iter::Sum, ops::{Add, AddAssign}};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

/// Which accumulated quantity ranks a candidate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankingPolicy
{
    /// Accumulated error divided by the number of contributions.
    #[default]
    MeanError,
    /// Accumulated error.
    TotalError,
}

///
/// Error indicator accumulated for one point or subspace. The key it belongs
/// to is kept next to it, e.g. in an [`ErrorAccumulator`] or a
/// `Vec<(usize, ErrorContainer)>`.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorContainer
{
    error: f64,
    contribution_count: usize,
    admissible: bool,
}

impl Default for ErrorContainer
{
    fn default() -> Self {
        Self::empty()
    }
}

impl ErrorContainer
{
    /// A single contribution.
    pub fn new(error: f64) -> Self
    {
        Self { error, contribution_count: 1, admissible: true }
    }

    /// No contributions yet.
    pub fn empty() -> Self
    {
        Self { error: 0.0, contribution_count: 0, admissible: true }
    }

    #[inline]
    pub fn error(&self) -> f64
    {
        self.error
    }

    #[inline]
    pub fn contribution_count(&self) -> usize
    {
        self.contribution_count
    }

    #[inline]
    pub fn mean_error(&self) -> f64
    {
        if self.contribution_count == 0 { 0.0 } else { self.error / self.contribution_count as f64 }
    }

    #[inline]
    pub fn is_admissible(&self) -> bool
    {
        self.admissible
    }

    pub fn set_admissible(&mut self, admissible: bool)
    {
        self.admissible = admissible;
    }

    pub fn with_admissible(mut self, admissible: bool) -> Self
    {
        self.admissible = admissible;
        self
    }

    #[inline]
    pub fn ranking_value(&self, policy: RankingPolicy) -> f64
    {
        match policy
        {
            RankingPolicy::MeanError => self.mean_error(),
            RankingPolicy::TotalError => self.error,
        }
    }
}

impl AddAssign<f64> for ErrorContainer
{
    fn add_assign(&mut self, error: f64) {
        self.error += error;
        self.contribution_count += 1;
    }
}

impl AddAssign<ErrorContainer> for ErrorContainer
{
    fn add_assign(&mut self, other: ErrorContainer) {
        self.error += other.error;
        self.contribution_count += other.contribution_count;
        self.admissible &= other.admissible;
    }
}

impl Add<f64> for ErrorContainer
{
    type Output = ErrorContainer;

    fn add(mut self, error: f64) -> Self::Output {
        self += error;
        self
    }
}

impl Add<ErrorContainer> for ErrorContainer
{
    type Output = ErrorContainer;

    fn add(mut self, other: ErrorContainer) -> Self::Output {
        self += other;
        self
    }
}

impl Sum for ErrorContainer
{
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ErrorContainer::empty(), |acc, c| acc + c)
    }
}

///
/// Insertion-ordered map from a key (sequence number, level vector, ...) to its
/// accumulated error. Accumulators built independently, e.g. one per worker,
/// are combined with [`ErrorAccumulator::merge_all`].
///
#[derive(Clone, Debug)]
pub struct ErrorAccumulator<K: Hash + Eq>
{
    entries: IndexMap<K, ErrorContainer, FxBuildHasher>,
}

impl<K: Hash + Eq> Default for ErrorAccumulator<K>
{
    fn default() -> Self {
        Self { entries: IndexMap::with_hasher(FxBuildHasher::default()) }
    }
}

impl<K: Hash + Eq> ErrorAccumulator<K>
{
    pub fn new() -> Self
    {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, key: K, error: f64)
    {
        *self.entries.entry(key).or_default() += error;
    }

    #[inline]
    pub fn merge(&mut self, key: K, container: ErrorContainer)
    {
        *self.entries.entry(key).or_default() += container;
    }

    pub fn merge_all(&mut self, other: ErrorAccumulator<K>)
    {
        for (key, container) in other.entries
        {
            self.merge(key, container);
        }
    }

    pub fn set_admissible(&mut self, key: &K, admissible: bool)
    {
        if let Some(container) = self.entries.get_mut(key)
        {
            container.set_admissible(admissible);
        }
    }

    pub fn get(&self, key: &K) -> Option<&ErrorContainer>
    {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &ErrorContainer)>
    {
        self.entries.iter()
    }

    ///
    /// All entries ordered by descending ranking value. Ties keep insertion order.
    ///
    pub fn ranked(self, policy: RankingPolicy) -> Vec<(K, ErrorContainer)>
    {
        let mut entries: Vec<_> = self.entries.into_iter().collect();
        rank(&mut entries, policy);
        entries
    }

    pub fn into_entries(self) -> Vec<(K, ErrorContainer)>
    {
        self.entries.into_iter().collect()
    }
}

/// Stable sort by descending ranking value.
pub fn rank<K>(entries: &mut [(K, ErrorContainer)], policy: RankingPolicy)
{
    entries.sort_by(|a, b| b.1.ranking_value(policy).total_cmp(&a.1.ranking_value(policy)));
}

struct Slot<K>
{
    value: f64,
    order: usize,
    payload: K,
}

impl<K> PartialEq for Slot<K>
{
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl<K> Eq for Slot<K> {}

impl<K> PartialOrd for Slot<K>
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Slot<K>
{
    // greater is better: higher value, then earlier arrival
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value).then_with(|| other.order.cmp(&self.order))
    }
}

///
/// Keeps the `k` items with the largest values in a min-heap of at most `k`
/// slots. An item only enters when its value is strictly larger than
/// `sentinel` and, once the heap is full, than the current worst slot, so among
/// equal values the earlier item wins. The result is ordered best first.
///
pub fn select_largest<K>(items: impl IntoIterator<Item = (K, f64)>, k: usize, sentinel: f64) -> Vec<(K, f64)>
{
    if k == 0
    {
        return Vec::new();
    }
    // grows on demand, `k` may be usize::MAX
    let mut heap: BinaryHeap<Reverse<Slot<K>>> = BinaryHeap::new();
    for (order, (key, value)) in items.into_iter().enumerate()
    {
        if value.is_nan()
        {
            log::warn!("ignoring NaN score for candidate {}", order);
            continue;
        }
        if value <= sentinel
        {
            continue;
        }
        let slot = Slot { value, order, payload: key };
        if heap.len() < k
        {
            heap.push(Reverse(slot));
        }
        else if heap.peek().is_some_and(|Reverse(worst)| slot > *worst)
        {
            heap.pop();
            heap.push(Reverse(slot));
        }
    }
    let mut selected: Vec<Slot<K>> = heap.into_iter().map(|Reverse(slot)| slot).collect();
    selected.sort_by(|a, b| b.cmp(a));
    selected.into_iter().map(|slot| (slot.payload, slot.value)).collect()
}

///
/// Top-`k` admissible candidates by `policy`, best first. Inadmissible
/// candidates never occupy a slot regardless of their error.
///
pub fn select_top_k<K>(candidates: impl IntoIterator<Item = (K, ErrorContainer)>, k: usize, sentinel: f64, policy: RankingPolicy) -> Vec<(K, ErrorContainer)>
{
    let scored = candidates.into_iter()
        .filter(|(_, container)| container.is_admissible())
        .map(|(key, container)| {
            let value = container.ranking_value(policy);
            ((key, container), value)
        });
    select_largest(scored, k, sentinel).into_iter().map(|(entry, _)| entry).collect()
}

#[test]
fn check_accumulation()
{
    let mut container = ErrorContainer::empty();
    assert_eq!(container.mean_error(), 0.0);
    container += 2.0;
    container += 4.0;
    assert_eq!(container.contribution_count(), 2);
    assert_eq!(container.error(), 6.0);
    assert_eq!(container.mean_error(), 3.0);
    let merged = container + ErrorContainer::new(3.0).with_admissible(false);
    assert_eq!(merged.contribution_count(), 3);
    assert_eq!(merged.mean_error(), 3.0);
    assert!(!merged.is_admissible());
    let total: ErrorContainer = [ErrorContainer::new(1.0), ErrorContainer::new(2.0)].into_iter().sum();
    assert_eq!(total.error(), 3.0);
    assert_eq!(total.contribution_count(), 2);
}

#[test]
fn check_shard_merge()
{
    let mut left = ErrorAccumulator::new();
    left.add(vec![1u8, 2], 1.0);
    left.add(vec![2u8, 1], 4.0);
    let mut right = ErrorAccumulator::new();
    right.add(vec![1u8, 2], 3.0);
    right.add(vec![3u8, 1], 0.5);
    left.merge_all(right);
    assert_eq!(left.len(), 3);
    let entry = left.get(&vec![1, 2]).unwrap();
    assert_eq!(entry.contribution_count(), 2);
    assert_eq!(entry.error(), 4.0);
    let ranked = left.clone().ranked(RankingPolicy::TotalError);
    assert_eq!(ranked[0].0, vec![1, 2]);
    assert_eq!(ranked[1].0, vec![2, 1]);
    let ranked = left.ranked(RankingPolicy::MeanError);
    assert_eq!(ranked[0].0, vec![2, 1]);
    assert_eq!(ranked[1].0, vec![1, 2]);
}

#[test]
fn check_ranking_is_stable()
{
    let mut entries = vec![(0, ErrorContainer::new(1.0)), (1, ErrorContainer::new(2.0)), (2, ErrorContainer::new(1.0)), (3, ErrorContainer::new(2.0))];
    rank(&mut entries, RankingPolicy::MeanError);
    let order: Vec<_> = entries.iter().map(|e| e.0).collect();
    assert_eq!(order, vec![1, 3, 0, 2]);
}

#[test]
fn check_top_k_selection()
{
    let candidates = vec![
        (0, ErrorContainer::new(0.5)),
        (1, ErrorContainer::new(3.0)),
        (2, ErrorContainer::new(9.0).with_admissible(false)),
        (3, ErrorContainer::new(3.0)),
        (4, ErrorContainer::new(0.0)),
        (5, ErrorContainer::new(1.0)),
    ];
    let selected = select_top_k(candidates.clone(), 2, 0.0, RankingPolicy::MeanError);
    assert_eq!(selected.iter().map(|e| e.0).collect::<Vec<_>>(), vec![1, 3]);
    let selected = select_top_k(candidates.clone(), 3, 0.0, RankingPolicy::MeanError);
    assert_eq!(selected.iter().map(|e| e.0).collect::<Vec<_>>(), vec![1, 3, 5]);
    // the sentinel keeps the zero score out even with spare slots
    let selected = select_top_k(candidates, 10, 0.0, RankingPolicy::MeanError);
    assert_eq!(selected.iter().map(|e| e.0).collect::<Vec<_>>(), vec![1, 3, 5, 0]);
    assert!(select_largest(vec![(0, 1.0)], 0, 0.0).is_empty());
}

#[test]
fn check_ties_prefer_earlier_candidates()
{
    let items = vec![(10, 1.0), (11, 1.0), (12, 1.0)];
    let selected = select_largest(items, 2, 0.0);
    assert_eq!(selected, vec![(10, 1.0), (11, 1.0)]);
}

#[test]
fn check_unbounded_budget_keeps_all_candidates()
{
    let items = vec![(0, 2.0), (1, 0.0), (2, 5.0), (3, 2.0)];
    let selected = select_largest(items, usize::MAX, 0.0);
    assert_eq!(selected, vec![(2, 5.0), (0, 2.0), (3, 2.0)]);
    let selected = select_top_k(vec![(7, ErrorContainer::new(1.0))], usize::MAX, 0.0, RankingPolicy::MeanError);
    assert_eq!(selected.len(), 1);
}
