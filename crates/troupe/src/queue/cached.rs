//! Deficit-round-robin queue with a skip cache.

use super::{QueueNode, RoundResult, TaskQueue, TaskResult};

/// A DRR queue whose consumer may skip nodes.
///
/// Skipped nodes move to a private cache and their deficit is refunded, so a
/// round that only skips costs nothing. At the end of a round in which at
/// least one node was consumed, the cache is flushed back to the head of the
/// primary list in its original order, so later rounds re-examine skipped
/// nodes before any newer arrivals. Each node is handed to the consumer at
/// most once per round.
pub(crate) struct CachedQueue<T: QueueNode> {
    items: TaskQueue<T>,
    deficit: usize,
    cache: TaskQueue<T>,
}

impl<T: QueueNode> CachedQueue<T> {
    pub(crate) fn new() -> Self {
        CachedQueue {
            items: TaskQueue::new(),
            deficit: 0,
            cache: TaskQueue::new(),
        }
    }

    pub(crate) fn deficit(&self) -> usize {
        self.deficit
    }

    /// Accumulated size of the uncached items. The cache is private to the
    /// consumer and never counted here.
    pub(crate) fn total_task_size(&self) -> usize {
        self.items.total_task_size()
    }

    /// Whether the queue has no uncached items.
    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn cached_task_size(&self) -> usize {
        self.cache.total_task_size()
    }

    pub(crate) fn push_back(&mut self, node: Box<T>) {
        self.items.push_back(node);
    }

    pub(crate) fn lifo_append(&mut self, node: Box<T>) {
        self.items.lifo_append(node);
    }

    pub(crate) fn stop_lifo_append(&mut self) {
        self.items.stop_lifo_append();
    }

    /// Enumerate the uncached items only.
    pub(crate) fn peek_all(&mut self, f: impl FnMut(&T)) {
        self.items.peek_all(f);
    }

    pub(crate) fn inc_deficit(&mut self, quantum: usize) {
        if !self.items.is_empty() {
            self.deficit = self.deficit.saturating_add(quantum);
        }
    }

    /// Move all cached nodes back to the head of the primary list,
    /// restoring their original FIFO order.
    pub(crate) fn flush_cache(&mut self) {
        self.items.prepend(&mut self.cache);
    }

    /// Take the first element regardless of the deficit, flushing the cache
    /// first. Used for out-of-band drains such as shutdown bouncing.
    pub(crate) fn take_front(&mut self) -> Option<Box<T>> {
        self.flush_cache();
        let node = self.items.pop_front();
        if self.items.is_empty() {
            self.deficit = 0;
        }
        node
    }

    /// Run one round: grant `quantum`, then feed nodes to `consumer` until
    /// the deficit runs dry, the primary list drains, or the consumer stops
    /// the round.
    pub(crate) fn new_round(
        &mut self,
        quantum: usize,
        mut consumer: impl FnMut(&mut T) -> TaskResult,
    ) -> RoundResult {
        if self.items.is_empty() {
            return RoundResult::default();
        }
        self.deficit = self.deficit.saturating_add(quantum);
        let mut consumed = 0;
        let mut stop_all = false;
        loop {
            let Some(task_size) = self.items.peek().map(|n| n.task_size()) else {
                break;
            };
            if task_size > self.deficit {
                break;
            }
            self.deficit -= task_size;
            let mut node = self.items.pop_front().expect("peeked node vanished");
            match consumer(&mut node) {
                TaskResult::Skip => {
                    // The deficit was not actually spent.
                    self.deficit = self.deficit.saturating_add(task_size);
                    self.cache.push_back(node);
                }
                TaskResult::Resume => consumed += 1,
                TaskResult::Stop => {
                    consumed += 1;
                    break;
                }
                TaskResult::StopAll => {
                    consumed += 1;
                    stop_all = true;
                    break;
                }
            }
        }
        if consumed > 0 {
            self.flush_cache();
        }
        if self.items.is_empty() {
            self.deficit = 0;
        }
        RoundResult { consumed, stop_all }
    }
}

impl<T: QueueNode> Default for CachedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueNode> std::fmt::Debug for CachedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedQueue")
            .field("total_task_size", &self.total_task_size())
            .field("deficit", &self.deficit())
            .field("cached_task_size", &self.cached_task_size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct TestNode {
        value: u32,
        next: Option<Box<TestNode>>,
    }

    impl TestNode {
        fn new(value: u32) -> Box<TestNode> {
            Box::new(TestNode { value, next: None })
        }
    }

    impl QueueNode for TestNode {
        fn next_slot(&mut self) -> &mut Option<Box<Self>> {
            &mut self.next
        }
    }

    fn fill(q: &mut CachedQueue<TestNode>, values: std::ops::RangeInclusive<u32>) {
        for v in values {
            q.push_back(TestNode::new(v));
        }
    }

    #[test]
    fn test_skip_moves_to_cache_and_refunds() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=3);
        let result = q.new_round(10, |_| TaskResult::Skip);
        assert_eq!(result.consumed, 0);
        assert!(q.is_empty(), "all items skipped to the cache");
        assert_eq!(q.cached_task_size(), 3);
        // Skip-only rounds do not consume deficit; the drained primary list
        // resets it outright.
        assert_eq!(q.deficit(), 0);
    }

    #[test]
    fn test_consume_flushes_cache_in_order() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=9);
        // Consume odd values, skip even ones.
        let mut seen = Vec::new();
        let result = q.new_round(100, |n| {
            seen.push(n.value);
            if n.value % 2 == 1 {
                TaskResult::Resume
            } else {
                TaskResult::Skip
            }
        });
        assert_eq!(result.consumed, 5);
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8, 9], "one visit per node");
        // The round consumed, so the cache flushed back in original order.
        assert_eq!(q.cached_task_size(), 0);
        let mut order = Vec::new();
        q.peek_all(|n| order.push(n.value));
        assert_eq!(order, vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_flush_preserves_order_before_new_arrivals() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=4);
        // Skip 1..3, consume 4.
        q.new_round(100, |n| {
            if n.value == 4 {
                TaskResult::Resume
            } else {
                TaskResult::Skip
            }
        });
        q.push_back(TestNode::new(5));
        let mut order = Vec::new();
        q.peek_all(|n| order.push(n.value));
        assert_eq!(order, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_skip_only_round_leaves_cache_private() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=2);
        q.new_round(100, |_| TaskResult::Skip);
        // Without a consumed item the cache stays put.
        let mut order = Vec::new();
        q.peek_all(|n| order.push(n.value));
        assert!(order.is_empty());
        assert_eq!(q.cached_task_size(), 2);
        // An explicit flush makes them visible again.
        q.flush_cache();
        let mut order = Vec::new();
        q.peek_all(|n| order.push(n.value));
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_take_front_bypasses_deficit_and_cache() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=2);
        q.new_round(100, |_| TaskResult::Skip);
        // Both items are cached now; take_front must still see them in order.
        assert_eq!(q.take_front().unwrap().value, 1);
        assert_eq!(q.take_front().unwrap().value, 2);
        assert!(q.take_front().is_none());
    }

    #[test]
    fn test_stop_ends_round_after_consuming() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=5);
        let result = q.new_round(100, |n| {
            if n.value == 2 {
                TaskResult::Stop
            } else {
                TaskResult::Resume
            }
        });
        assert_eq!(result.consumed, 2);
        assert!(!result.stop_all);
        let mut order = Vec::new();
        q.peek_all(|n| order.push(n.value));
        assert_eq!(order, vec![3, 4, 5]);
    }

    #[test]
    fn test_stop_all_sets_flag() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=2);
        let result = q.new_round(100, |_| TaskResult::StopAll);
        assert_eq!(result.consumed, 1);
        assert!(result.stop_all);
    }

    #[test]
    fn test_round_bounded_by_quantum() {
        let mut q = CachedQueue::new();
        fill(&mut q, 1..=10);
        let result = q.new_round(4, |_| TaskResult::Resume);
        assert_eq!(result.consumed, 4);
        assert_eq!(q.total_task_size(), 6);
    }

    #[test]
    fn test_new_round_on_empty() {
        let mut q: CachedQueue<TestNode> = CachedQueue::new();
        let result = q.new_round(5, |_| TaskResult::Resume);
        assert_eq!(result, RoundResult::default());
        assert_eq!(q.deficit(), 0);
    }
}
