//! Rank arrays and the sorted-order permutation derived from them.

use std::cmp::Ordering;

use crate::value::Value;

/// For each physical row, the position its value takes in an ascending sort.
///
/// Values are sorted by `(value, physical index)`, then walked in order: a value
/// equal to its predecessor inherits the predecessor's rank, anything else takes
/// its own position. Ties therefore share the rank of the first of them and the
/// ranks after a tie skip ahead (`[3, 1, 2, 1]` ranks as `[3, 0, 2, 0]`).
/// This is a sorted position, not a dense rank: `3` ranks as 3, not 2, so
/// every rank is also a valid index into the sorted order.
pub fn compute_ranks(values: &[Value]) -> Vec<usize> {
    let mut sorted: Vec<(usize, &Value)> = values.iter().enumerate().collect();
    sorted.sort_by(|(ia, a), (ib, b)| a.total_cmp(b).then(ia.cmp(ib)));

    let mut ranks = vec![0; values.len()];
    let mut last: Option<(&Value, usize)> = None;
    for (position, (index, value)) in sorted.into_iter().enumerate() {
        let rank = match last {
            Some((prev, rank)) if prev.total_cmp(value) == Ordering::Equal => rank,
            _ => position,
        };
        ranks[index] = rank;
        last = Some((value, rank));
    }
    ranks
}

/// A column's rank array plus the permutation that reads it back in sorted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortIndex {
    ranks: Vec<usize>,
    order: Vec<usize>,
}

impl SortIndex {
    /// Invert a rank array. Rows sharing a rank keep physical order, so the
    /// same rank array always yields the same permutation.
    pub fn from_ranks(ranks: Vec<usize>) -> Self {
        let mut order: Vec<usize> = (0..ranks.len()).collect();
        order.sort_unstable_by_key(|&row| (ranks[row], row));
        Self { ranks, order }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Physical row indices in sorted order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Physical rows occupying sorted positions `[start, end)`.
    pub fn window(&self, start: usize, end: usize) -> &[usize] {
        &self.order[start..end]
    }
}
