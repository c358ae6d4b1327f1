//! Stable priority queue with an injected comparator.
//!
//! Items are kept sorted on insertion. A new item is placed before the first
//! existing item it compares strictly less than, so items of equal rank stay
//! in FIFO order. Per-run event volumes are small, so the linear insertion
//! scan is not a concern.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

/// Ranking function for queue items.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// A container holding items ranked by a caller-supplied comparator.
pub struct PriorityQueue<T> {
    /// Items in ascending rank order
    items: VecDeque<T>,

    /// Ranking function
    comparator: Comparator<T>,
}

impl<T> PriorityQueue<T> {
    /// Creates an empty queue ranked by `comparator`.
    pub fn new(comparator: Comparator<T>) -> Self {
        Self {
            items: VecDeque::new(),
            comparator,
        }
    }

    /// Creates an empty queue from a plain comparison function.
    pub fn with_comparator<F>(comparator: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self::new(Arc::new(comparator))
    }

    /// Creates a queue where every item ranks equally (pure FIFO).
    pub fn fifo() -> Self {
        Self::with_comparator(|_, _| Ordering::Equal)
    }

    /// Inserts an item, keeping the queue sorted and stable.
    pub fn enqueue(&mut self, item: T) {
        let position = self
            .items
            .iter()
            .position(|existing| (self.comparator)(&item, existing) == Ordering::Less);

        match position {
            Some(index) => self.items.insert(index, item),
            None => self.items.push_back(item),
        }
    }

    /// Removes and returns the minimal item.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Returns the minimal item without removing it.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Returns true if the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterates items in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn by_rank() -> PriorityQueue<(i32, usize)> {
        PriorityQueue::with_comparator(|a: &(i32, usize), b: &(i32, usize)| a.0.cmp(&b.0))
    }

    #[test]
    fn test_dequeue_in_rank_order() {
        let mut queue = by_rank();
        queue.enqueue((3, 0));
        queue.enqueue((1, 1));
        queue.enqueue((2, 2));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front(), Some(&(1, 1)));
        assert_eq!(queue.dequeue(), Some((1, 1)));
        assert_eq!(queue.dequeue(), Some((2, 2)));
        assert_eq!(queue.dequeue(), Some((3, 0)));
        assert_eq!(queue.dequeue(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_ranks_are_fifo() {
        let mut queue = by_rank();
        queue.enqueue((5, 0));
        queue.enqueue((1, 1));
        queue.enqueue((5, 2));
        queue.enqueue((5, 3));

        let order: Vec<usize> = std::iter::from_fn(|| queue.dequeue()).map(|(_, i)| i).collect();
        assert_eq!(order, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_fifo_queue() {
        let mut queue = PriorityQueue::fifo();
        for i in 0..5 {
            queue.enqueue(i);
        }
        let order: Vec<i32> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_front_on_empty() {
        let queue: PriorityQueue<u8> = PriorityQueue::fifo();
        assert_eq!(queue.front(), None);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_clear() {
        let mut queue = by_rank();
        queue.enqueue((1, 0));
        queue.enqueue((2, 1));
        queue.clear();
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn prop_dequeue_matches_stable_sort(ranks in proptest::collection::vec(-5i32..5, 0..64)) {
            let mut queue = by_rank();
            for (i, rank) in ranks.iter().enumerate() {
                queue.enqueue((*rank, i));
            }

            let mut expected: Vec<(i32, usize)> =
                ranks.iter().copied().enumerate().map(|(i, r)| (r, i)).collect();
            expected.sort_by_key(|(rank, _)| *rank);

            let actual: Vec<(i32, usize)> = std::iter::from_fn(|| queue.dequeue()).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
