//! Fixed-shape weighted-DRR mailbox multiplexer.
//!
//! Four nested queues, visited in slot order: downstream data, upstream
//! control, high priority, regular. The stream slots are plain DRR queues
//! (no selective receive); the high-priority and regular slots carry skip
//! caches. Each round splits the outer quantum across the non-empty slots
//! proportionally to their weights, so a loaded high-priority slot receives
//! five times the share of the regular slot.

use crate::envelope::Envelope;
use crate::queue::{CachedQueue, DrrQueue, RoundResult, TaskResult};

/// Slot index every envelope routes to on the non-priority-aware fast path.
/// The slot order matches the numbering of [`Category`](crate::Category):
/// downstream data, upstream control, high priority, regular.
const SLOT_REGULAR: usize = 3;
const SLOT_COUNT: usize = 4;

/// Per-slot quantum weights. The high-priority slot gets a 5x share.
const SLOT_WEIGHTS: [usize; SLOT_COUNT] = [1, 1, 5, 1];

/// A nested mailbox queue: plain DRR for the stream slots, cached DRR where
/// selective receive must be supported.
enum SlotQueue {
    Plain(DrrQueue<Envelope>),
    Cached(CachedQueue<Envelope>),
}

impl SlotQueue {
    fn is_empty(&self) -> bool {
        match self {
            SlotQueue::Plain(q) => q.is_empty(),
            SlotQueue::Cached(q) => q.is_empty(),
        }
    }

    fn total_task_size(&self) -> usize {
        match self {
            SlotQueue::Plain(q) => q.total_task_size(),
            SlotQueue::Cached(q) => q.total_task_size(),
        }
    }

    fn push_back(&mut self, env: Box<Envelope>) {
        match self {
            SlotQueue::Plain(q) => q.push_back(env),
            SlotQueue::Cached(q) => q.push_back(env),
        }
    }

    fn lifo_append(&mut self, env: Box<Envelope>) {
        match self {
            SlotQueue::Plain(q) => q.lifo_append(env),
            SlotQueue::Cached(q) => q.lifo_append(env),
        }
    }

    fn stop_lifo_append(&mut self) {
        match self {
            SlotQueue::Plain(q) => q.stop_lifo_append(),
            SlotQueue::Cached(q) => q.stop_lifo_append(),
        }
    }

    fn inc_deficit(&mut self, quantum: usize) {
        match self {
            SlotQueue::Plain(q) => q.inc_deficit(quantum),
            SlotQueue::Cached(q) => q.inc_deficit(quantum),
        }
    }

    fn flush_cache(&mut self) {
        match self {
            // Plain DRR queues have no cache.
            SlotQueue::Plain(_) => {}
            SlotQueue::Cached(q) => q.flush_cache(),
        }
    }

    fn new_round(
        &mut self,
        quantum: usize,
        consumer: impl FnMut(&mut Envelope) -> TaskResult,
    ) -> RoundResult {
        match self {
            SlotQueue::Plain(q) => q.new_round(quantum, consumer),
            SlotQueue::Cached(q) => q.new_round(quantum, consumer),
        }
    }

    fn take_front(&mut self) -> Option<Box<Envelope>> {
        match self {
            SlotQueue::Plain(q) => q.take_front(),
            SlotQueue::Cached(q) => q.take_front(),
        }
    }

    fn peek_all(&mut self, f: impl FnMut(&Envelope)) {
        match self {
            SlotQueue::Plain(q) => q.peek_all(f),
            SlotQueue::Cached(q) => q.peek_all(f),
        }
    }
}

/// The consumer-side mailbox queue of an actor.
pub(crate) struct MultiplexedQueue {
    slots: [SlotQueue; SLOT_COUNT],
    /// When false, every category routes to the regular slot (the
    /// single-queue fast path of non-priority-aware actors).
    priority_aware: bool,
}

impl MultiplexedQueue {
    pub(crate) fn new(priority_aware: bool) -> Self {
        MultiplexedQueue {
            slots: [
                SlotQueue::Plain(DrrQueue::new()),
                SlotQueue::Plain(DrrQueue::new()),
                SlotQueue::Cached(CachedQueue::new()),
                SlotQueue::Cached(CachedQueue::new()),
            ],
            priority_aware,
        }
    }

    /// The slot an envelope is routed to, per its message-id category.
    fn slot_of(&self, env: &Envelope) -> usize {
        if self.priority_aware {
            env.mid.category() as usize
        } else {
            SLOT_REGULAR
        }
    }

    /// Accumulated size over all slots, excluding skip caches.
    pub(crate) fn total_task_size(&self) -> usize {
        self.slots.iter().map(SlotQueue::total_task_size).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.total_task_size() == 0
    }

    pub(crate) fn push_back(&mut self, env: Box<Envelope>) {
        let slot = self.slot_of(&env);
        self.slots[slot].push_back(env);
    }

    pub(crate) fn lifo_append(&mut self, env: Box<Envelope>) {
        let slot = self.slot_of(&env);
        self.slots[slot].lifo_append(env);
    }

    pub(crate) fn stop_lifo_append(&mut self) {
        for slot in &mut self.slots {
            slot.stop_lifo_append();
        }
    }

    /// Flush every slot's skip cache back to its primary list.
    pub(crate) fn flush_cache(&mut self) {
        for slot in &mut self.slots {
            slot.flush_cache();
        }
    }

    /// Run one round over all slots in order, splitting `quantum` across the
    /// non-empty slots proportionally to their weights (minimum share 1).
    ///
    /// After a nested round signals `stop_all`, the remaining slots still
    /// have their deficit advanced but their consumers are not invoked.
    pub(crate) fn new_round(
        &mut self,
        quantum: usize,
        mut consumer: impl FnMut(&mut Envelope) -> TaskResult,
    ) -> RoundResult {
        let weight_sum: usize = self
            .slots
            .iter()
            .zip(SLOT_WEIGHTS)
            .filter(|(slot, _)| !slot.is_empty())
            .map(|(_, w)| w)
            .sum();
        if weight_sum == 0 {
            return RoundResult::default();
        }
        let mut result = RoundResult::default();
        for (slot, weight) in self.slots.iter_mut().zip(SLOT_WEIGHTS) {
            if slot.is_empty() {
                continue;
            }
            let share = (quantum * weight / weight_sum).max(1);
            if result.stop_all {
                slot.inc_deficit(share);
            } else {
                result = result.merge(slot.new_round(share, &mut consumer));
            }
        }
        result
    }

    /// Take the frontmost envelope across all slots, ignoring deficits and
    /// flushing caches. Used for out-of-band drains such as shutdown
    /// bouncing.
    pub(crate) fn take_front(&mut self) -> Option<Box<Envelope>> {
        for slot in &mut self.slots {
            if let Some(env) = slot.take_front() {
                return Some(env);
            }
        }
        None
    }

    /// Enumerate all queued envelopes in slot order, skip caches excluded.
    pub(crate) fn peek_all(&mut self, mut f: impl FnMut(&Envelope)) {
        for slot in &mut self.slots {
            slot.peek_all(&mut f);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ActorId, Category, Item, MessageId};

    fn make_env(category: Category, tag: u64) -> Box<Envelope> {
        Envelope::user(None, ActorId::next(), MessageId::of(category), Box::new(tag))
    }

    fn tag_of(env: &Envelope) -> u64 {
        match &env.item {
            Item::User(payload) => *payload.downcast_ref::<u64>().unwrap(),
            other => panic!("expected user item, got {:?}", other),
        }
    }

    fn category_of(env: &Envelope) -> Category {
        env.mid.category()
    }

    #[test]
    fn test_routing_by_category() {
        let mut q = MultiplexedQueue::new(true);
        q.push_back(make_env(Category::Regular, 1));
        q.push_back(make_env(Category::HighPriority, 2));
        q.push_back(make_env(Category::DownstreamData, 3));
        q.push_back(make_env(Category::UpstreamControl, 4));
        assert_eq!(q.total_task_size(), 4);

        // peek_all visits in slot order: downstream, upstream, high, regular.
        let mut order = Vec::new();
        q.peek_all(|env| order.push(tag_of(env)));
        assert_eq!(order, vec![3, 4, 2, 1]);
    }

    #[test]
    fn test_no_priority_fast_path_routes_everything_regular() {
        let mut q = MultiplexedQueue::new(false);
        q.push_back(make_env(Category::HighPriority, 1));
        q.push_back(make_env(Category::Regular, 2));
        let mut order = Vec::new();
        q.peek_all(|env| order.push(tag_of(env)));
        // FIFO across categories: the fast path never reorders.
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_priority_dominance_five_to_one() {
        let mut q = MultiplexedQueue::new(true);
        for i in 0..30 {
            q.push_back(make_env(Category::Regular, 1000 + i));
        }
        for i in 0..30 {
            q.push_back(make_env(Category::HighPriority, 2000 + i));
        }

        let mut burst = Vec::new();
        let result = q.new_round(6, |env| {
            burst.push(category_of(env));
            TaskResult::Resume
        });
        assert_eq!(result.consumed, 6);
        assert_eq!(
            burst,
            vec![
                Category::HighPriority,
                Category::HighPriority,
                Category::HighPriority,
                Category::HighPriority,
                Category::HighPriority,
                Category::Regular,
            ],
            "quantum 6 splits 5:1 between the loaded slots"
        );
    }

    #[test]
    fn test_single_loaded_slot_gets_whole_quantum() {
        let mut q = MultiplexedQueue::new(true);
        for i in 0..10 {
            q.push_back(make_env(Category::Regular, i));
        }
        let result = q.new_round(6, |_| TaskResult::Resume);
        assert_eq!(result.consumed, 6);
    }

    #[test]
    fn test_stop_all_halts_siblings_but_advances_deficit() {
        let mut q = MultiplexedQueue::new(true);
        q.push_back(make_env(Category::HighPriority, 1));
        q.push_back(make_env(Category::Regular, 2));

        let mut seen = Vec::new();
        let result = q.new_round(6, |env| {
            seen.push(tag_of(env));
            TaskResult::StopAll
        });
        assert!(result.stop_all);
        assert_eq!(seen, vec![1], "regular slot consumer must not run");
        // The regular envelope is still queued and now carries deficit.
        assert_eq!(q.total_task_size(), 1);
        let mut next_burst = Vec::new();
        q.new_round(6, |env| {
            next_burst.push(tag_of(env));
            TaskResult::Resume
        });
        assert_eq!(next_burst, vec![2]);
    }

    #[test]
    fn test_take_front_crosses_slots_in_order() {
        let mut q = MultiplexedQueue::new(true);
        q.push_back(make_env(Category::Regular, 1));
        q.push_back(make_env(Category::HighPriority, 2));
        assert_eq!(tag_of(&q.take_front().unwrap()), 2);
        assert_eq!(tag_of(&q.take_front().unwrap()), 1);
        assert!(q.take_front().is_none());
    }

    #[test]
    fn test_skip_cache_flushes_on_consume_across_slots() {
        let mut q = MultiplexedQueue::new(true);
        q.push_back(make_env(Category::Regular, 1));
        q.push_back(make_env(Category::Regular, 2));
        // Skip-only round: both regulars end up cached.
        q.new_round(10, |_| TaskResult::Skip);
        assert!(q.is_empty());

        // A consuming round flushes the cache back in order.
        q.push_back(make_env(Category::Regular, 3));
        let mut seen = Vec::new();
        q.new_round(10, |env| {
            seen.push(tag_of(env));
            TaskResult::Resume
        });
        assert_eq!(seen, vec![3]);
        let mut replay = Vec::new();
        q.new_round(10, |env| {
            replay.push(tag_of(env));
            TaskResult::Resume
        });
        assert_eq!(replay, vec![1, 2], "skipped items replay in original order");
    }

    #[test]
    fn test_lifo_append_routes_by_slot() {
        let mut q = MultiplexedQueue::new(true);
        // Producer chain arrives newest-first.
        q.lifo_append(make_env(Category::Regular, 2));
        q.lifo_append(make_env(Category::HighPriority, 9));
        q.lifo_append(make_env(Category::Regular, 1));
        q.stop_lifo_append();

        let mut order = Vec::new();
        q.peek_all(|env| order.push(tag_of(env)));
        // High slot is visited first; the regular slot preserved FIFO.
        assert_eq!(order, vec![9, 1, 2]);
    }
}
