//! Min-priority queue for pending tile jobs.
//!
//! Entries are ordered by priority (lower values first), then by insertion
//! sequence (FIFO within the same priority). The sequence number is assigned
//! once at insertion and survives re-prioritization, so repeatedly updating
//! priorities never reshuffles equal-priority entries.
//!
//! The heap is explicit (array + index map) rather than `std::collections::BinaryHeap`
//! because the scheduler needs `change_priority` and `remove` on arbitrary
//! entries, both `O(log n)`.
//!
//! # Example
//!
//! ```
//! use deepzoom::queue::{PriorityQueue, Priority};
//!
//! let mut queue = PriorityQueue::new();
//! queue.insert("A", Priority::new(5.0));
//! queue.insert("B", Priority::new(1.0));
//! queue.insert("C", Priority::new(1.0));
//!
//! assert_eq!(queue.pop_min().unwrap(), "B");
//! assert_eq!(queue.pop_min().unwrap(), "C");
//! assert_eq!(queue.pop_min().unwrap(), "A");
//! assert!(queue.pop_min().is_err());
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::QueueError;

// =============================================================================
// Priority
// =============================================================================

/// Scheduling priority. Lower values are more urgent.
///
/// Wraps an `f64` with a total order so it can key the heap; NaN sorts after
/// every finite value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Priority(f64);

impl Priority {
    /// The most urgent priority.
    pub const URGENT: Priority = Priority(f64::NEG_INFINITY);

    /// Create a priority from a raw value.
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// The raw value.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for Priority {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

// =============================================================================
// Entry
// =============================================================================

/// Stable identifier of a queued entry (its insertion sequence number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

struct Node<T> {
    priority: Priority,
    seq: u64,
    item: T,
}

impl<T> Node<T> {
    #[inline]
    fn key(&self) -> (Priority, u64) {
        (self.priority, self.seq)
    }
}

// =============================================================================
// Priority Queue
// =============================================================================

/// Binary min-heap with stable tie-breaking and addressable entries.
pub struct PriorityQueue<T> {
    nodes: Vec<Node<T>>,
    /// Entry sequence -> index into `nodes`
    positions: HashMap<u64, usize>,
    next_seq: u64,
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty queue with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Insert an item, returning an id usable with [`change_priority`](Self::change_priority)
    /// and [`remove`](Self::remove).
    pub fn insert(&mut self, item: T, priority: Priority) -> EntryId {
        let seq = self.next_seq;
        self.next_seq += 1;

        let index = self.nodes.len();
        self.nodes.push(Node {
            priority,
            seq,
            item,
        });
        self.positions.insert(seq, index);
        self.sift_up(index);

        EntryId(seq)
    }

    /// The most urgent item, without removing it.
    pub fn peek_min(&self) -> Option<&T> {
        self.nodes.first().map(|node| &node.item)
    }

    /// Priority of the most urgent item.
    pub fn peek_priority(&self) -> Option<Priority> {
        self.nodes.first().map(|node| node.priority)
    }

    /// Remove and return the most urgent item.
    ///
    /// Returns [`QueueError::EmptyQueue`] if there is nothing to pop.
    pub fn pop_min(&mut self) -> Result<T, QueueError> {
        if self.nodes.is_empty() {
            return Err(QueueError::EmptyQueue);
        }
        Ok(self.remove_at(0))
    }

    /// Update the priority of a queued entry. Returns `false` if the entry
    /// is no longer queued.
    pub fn change_priority(&mut self, id: EntryId, priority: Priority) -> bool {
        let Some(&index) = self.positions.get(&id.0) else {
            return false;
        };

        let old = self.nodes[index].priority;
        self.nodes[index].priority = priority;
        match priority.cmp(&old) {
            Ordering::Less => self.sift_up(index),
            Ordering::Greater => self.sift_down(index),
            Ordering::Equal => {}
        }
        true
    }

    /// Remove an arbitrary entry.
    pub fn remove(&mut self, id: EntryId) -> Option<T> {
        let index = *self.positions.get(&id.0)?;
        Some(self.remove_at(index))
    }

    /// Borrow a queued item by id.
    pub fn get(&self, id: EntryId) -> Option<&T> {
        self.positions.get(&id.0).map(|&i| &self.nodes[i].item)
    }

    /// Current priority of a queued entry.
    pub fn priority_of(&self, id: EntryId) -> Option<Priority> {
        self.positions.get(&id.0).map(|&i| self.nodes[i].priority)
    }

    /// Whether the entry is still queued.
    pub fn contains(&self, id: EntryId) -> bool {
        self.positions.contains_key(&id.0)
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over queued items in heap (not priority) order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, Priority, &T)> {
        self.nodes
            .iter()
            .map(|node| (EntryId(node.seq), node.priority, &node.item))
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.positions.clear();
    }

    fn remove_at(&mut self, index: usize) -> T {
        let node = self.nodes.swap_remove(index);
        self.positions.remove(&node.seq);

        if index < self.nodes.len() {
            self.positions.insert(self.nodes[index].seq, index);
            // The moved node may need to travel either way.
            self.sift_up(index);
            self.sift_down(index);
        }

        node.item
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.nodes[index].key() < self.nodes[parent].key() {
                self.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;

            if left < len && self.nodes[left].key() < self.nodes[smallest].key() {
                smallest = left;
            }
            if right < len && self.nodes[right].key() < self.nodes[smallest].key() {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap(index, smallest);
            index = smallest;
        }
    }

    #[inline]
    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.nodes.swap(a, b);
        self.positions.insert(self.nodes[a].seq, a);
        self.positions.insert(self.nodes[b].seq, b);
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.nodes.len())
            .field("min_priority", &self.peek_priority())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(queue: &mut PriorityQueue<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = queue.pop_min() {
            out.push(item);
        }
        out
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut queue = PriorityQueue::new();
        queue.insert("A", Priority::new(5.0));
        queue.insert("B", Priority::new(1.0));
        queue.insert("C", Priority::new(1.0));

        assert_eq!(drain(&mut queue), vec!["B", "C", "A"]);
    }

    #[test]
    fn test_pop_empty() {
        let mut queue: PriorityQueue<u32> = PriorityQueue::new();
        assert_eq!(queue.pop_min(), Err(QueueError::EmptyQueue));
        assert!(queue.peek_min().is_none());
    }

    #[test]
    fn test_non_decreasing_order() {
        let mut queue = PriorityQueue::new();
        // Deterministic pseudo-random priorities with many duplicates
        let mut state = 17u64;
        for i in 0..500u64 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let p = (state >> 33) % 23;
            queue.insert((p, i), Priority::new(p as f64));
        }

        let out = drain(&mut queue);
        assert_eq!(out.len(), 500);
        for pair in out.windows(2) {
            let (p0, i0) = pair[0];
            let (p1, i1) = pair[1];
            assert!(p0 <= p1);
            if p0 == p1 {
                assert!(i0 < i1, "equal priorities must pop in insertion order");
            }
        }
    }

    #[test]
    fn test_peek_and_len() {
        let mut queue = PriorityQueue::new();
        assert!(queue.is_empty());

        queue.insert("low", Priority::new(9.0));
        queue.insert("high", Priority::new(0.5));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_min(), Some(&"high"));
        assert_eq!(queue.peek_priority(), Some(Priority::new(0.5)));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_change_priority() {
        let mut queue = PriorityQueue::new();
        let a = queue.insert("a", Priority::new(1.0));
        let b = queue.insert("b", Priority::new(2.0));
        let c = queue.insert("c", Priority::new(3.0));

        assert!(queue.change_priority(c, Priority::new(0.0)));
        assert!(queue.change_priority(a, Priority::new(10.0)));
        assert_eq!(queue.priority_of(b), Some(Priority::new(2.0)));

        assert_eq!(drain(&mut queue), vec!["c", "b", "a"]);
        assert!(!queue.change_priority(a, Priority::new(1.0)));
    }

    #[test]
    fn test_reprioritize_keeps_insertion_tiebreak() {
        let mut queue = PriorityQueue::new();
        let first = queue.insert("first", Priority::new(4.0));
        let second = queue.insert("second", Priority::new(4.0));

        // Move both away and back; the original order must hold
        for _ in 0..3 {
            queue.change_priority(second, Priority::new(1.0));
            queue.change_priority(first, Priority::new(1.0));
        }

        assert_eq!(drain(&mut queue), vec!["first", "second"]);
    }

    #[test]
    fn test_remove_arbitrary() {
        let mut queue = PriorityQueue::new();
        let ids: Vec<_> = (0..10)
            .map(|i| queue.insert(i, Priority::new((10 - i) as f64)))
            .collect();

        assert_eq!(queue.remove(ids[3]), Some(3));
        assert_eq!(queue.remove(ids[3]), None);
        assert!(!queue.contains(ids[3]));
        assert_eq!(queue.get(ids[4]), Some(&4));

        assert_eq!(drain(&mut queue), vec![9, 8, 7, 6, 5, 4, 2, 1, 0]);
    }

    #[test]
    fn test_clear() {
        let mut queue = PriorityQueue::new();
        let id = queue.insert(1, Priority::new(1.0));
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.contains(id));
    }

    #[test]
    fn test_priority_total_order() {
        assert!(Priority::URGENT < Priority::new(-1e300));
        assert!(Priority::new(1.0) < Priority::new(f64::NAN));
        assert_eq!(Priority::new(2.0), Priority::from(2.0));
    }
}
