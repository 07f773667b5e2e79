//! Fixed-capacity FIFO ring

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Keeps the `capacity` most recent items, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedRing<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    /// Empty ring holding at most `capacity` items
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Build from items in chronological order, keeping only the newest
    #[must_use]
    pub fn from_items(capacity: usize, items: impl IntoIterator<Item = T>) -> Self {
        let mut ring = Self::new(capacity);
        for item in items {
            ring.push(item);
        }
        ring
    }

    /// Append an item, returning the evicted oldest item when full
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Items currently held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ring holds nothing
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of items kept
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    /// Most recent item
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Drop every item, keeping the capacity
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> BoundedRing<T> {
    /// Up to `limit` most recent items, oldest first
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(limit);
        self.items.iter().skip(skip).cloned().collect()
    }

    /// All items, oldest first
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn evicts_oldest() {
        let mut ring = BoundedRing::new(2);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), Some(1));
        assert_eq!(ring.to_vec(), vec![2, 3]);
        assert_eq!(ring.last(), Some(&3));
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut ring = BoundedRing::new(0);
        assert_eq!(ring.push("a"), Some("a"));
        assert!(ring.is_empty());
    }

    #[test]
    fn recent_is_a_suffix() {
        let ring = BoundedRing::from_items(5, 0..5);
        assert_eq!(ring.recent(2), vec![3, 4]);
        assert_eq!(ring.recent(10), vec![0, 1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn keeps_the_newest_in_order(capacity in 1usize..20, items in proptest::collection::vec(any::<u32>(), 0..60)) {
            let ring = BoundedRing::from_items(capacity, items.iter().copied());
            let expected: Vec<u32> = items.iter().copied().skip(items.len().saturating_sub(capacity)).collect();
            prop_assert_eq!(ring.to_vec(), expected);
            prop_assert!(ring.len() <= capacity);
        }

        #[test]
        fn one_past_capacity_evicts_exactly_the_first(capacity in 1usize..50) {
            let mut ring = BoundedRing::new(capacity);
            for i in 0..capacity {
                prop_assert_eq!(ring.push(i), None);
            }
            prop_assert_eq!(ring.push(capacity), Some(0));
            let expected: Vec<usize> = (1..=capacity).collect();
            prop_assert_eq!(ring.to_vec(), expected);
        }
    }
}
