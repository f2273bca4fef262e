//! Deficit-round-robin queue.

use super::{QueueNode, RoundResult, TaskQueue, TaskResult};

/// A deficit-round-robin queue.
///
/// Each round grants the queue a quantum which accumulates in its deficit
/// counter; a node can be dequeued only while the deficit covers its task
/// size. Unused deficit carries over between rounds, but an emptied queue
/// resets to zero so idle queues cannot hoard credit.
pub(crate) struct DrrQueue<T: QueueNode> {
    items: TaskQueue<T>,
    deficit: usize,
}

impl<T: QueueNode> DrrQueue<T> {
    pub(crate) fn new() -> Self {
        DrrQueue {
            items: TaskQueue::new(),
            deficit: 0,
        }
    }

    pub(crate) fn deficit(&self) -> usize {
        self.deficit
    }

    pub(crate) fn total_task_size(&self) -> usize {
        self.items.total_task_size()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
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

    pub(crate) fn peek_all(&mut self, f: impl FnMut(&T)) {
        self.items.peek_all(f);
    }

    /// Grant `quantum` additional deficit iff the queue is non-empty.
    pub(crate) fn inc_deficit(&mut self, quantum: usize) {
        if !self.items.is_empty() {
            self.deficit = self.deficit.saturating_add(quantum);
        }
    }

    /// Take the first node if the deficit covers its task size.
    ///
    /// Draining the queue resets the deficit to zero.
    pub(crate) fn next(&mut self) -> Option<Box<T>> {
        let task_size = self.items.peek()?.task_size();
        if task_size > self.deficit {
            return None;
        }
        self.deficit -= task_size;
        let node = self.items.pop_front();
        if self.items.is_empty() {
            self.deficit = 0;
        }
        node
    }

    /// Take the first node regardless of the deficit.
    pub(crate) fn take_front(&mut self) -> Option<Box<T>> {
        let node = self.items.pop_front();
        if self.items.is_empty() {
            self.deficit = 0;
        }
        node
    }

    /// Run one round: grant `quantum`, then feed nodes to `consumer` until
    /// the deficit runs dry, the queue drains, or the consumer stops the
    /// round.
    ///
    /// A plain DRR queue has no skip support: `TaskResult::Skip` consumes the
    /// node like `Resume`.
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
        while let Some(mut node) = self.next() {
            consumed += 1;
            match consumer(&mut node) {
                TaskResult::Resume | TaskResult::Skip => {}
                TaskResult::Stop => {
                    return RoundResult {
                        consumed,
                        stop_all: false,
                    }
                }
                TaskResult::StopAll => {
                    return RoundResult {
                        consumed,
                        stop_all: true,
                    }
                }
            }
        }
        RoundResult {
            consumed,
            stop_all: false,
        }
    }
}

impl<T: QueueNode> Default for DrrQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueNode> std::fmt::Debug for DrrQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrrQueue")
            .field("total_task_size", &self.total_task_size())
            .field("deficit", &self.deficit())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
