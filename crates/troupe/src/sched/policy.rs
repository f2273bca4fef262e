//! Worker queueing and stealing policies.
//!
//! Each worker owns two job queues: a thread-safe *exposed* queue
//! (a `crossbeam_deque::Injector`, pushed by the coordinator and stolen from
//! by peers) and a private LIFO vector for work it produced itself. Stealing
//! is rare for most workloads, so the fast path stays on the private queue;
//! the policy keeps at least one job visible in the exposed queue whenever
//! there is surplus, so peers always have something to take.

use std::sync::Arc;

use crossbeam_deque::{Injector, Steal};

use crate::actor::ActorCell;

/// A schedulable actor reference.
pub(crate) type Job = Arc<ActorCell>;

// ---------------------------------------------------------------------------
// Fork-join queues
// ---------------------------------------------------------------------------

/// The two-queue fork-join layout of one worker.
pub(crate) struct ForkJoinQueues {
    exposed: Arc<Injector<Job>>,
    private: Vec<Job>,
}

impl ForkJoinQueues {
    pub(crate) fn new(exposed: Arc<Injector<Job>>) -> Self {
        ForkJoinQueues {
            exposed,
            private: Vec::new(),
        }
    }

    /// Owner-side enqueue. Migrates the oldest private job to the exposed
    /// queue first when the exposed queue ran dry, keeping a steal target
    /// available.
    pub(crate) fn internal_enqueue(&mut self, job: Job) {
        if self.exposed.is_empty() {
            if self.private.is_empty() {
                self.exposed.push(job);
            } else {
                let oldest = self.private.remove(0);
                self.exposed.push(oldest);
                self.private.push(job);
            }
        } else {
            self.private.push(job);
        }
    }

    /// Pop the most recently produced private job (LIFO for locality).
    pub(crate) fn local_pop(&mut self) -> Option<Job> {
        self.private.pop()
    }

    /// Take one job from the exposed queue. Also the peer-facing steal
    /// entry point.
    pub(crate) fn try_external_dequeue(&self) -> Option<Job> {
        steal_from(&self.exposed)
    }

    /// Keep the worker stealable: with two or more private jobs and an empty
    /// exposed queue, migrate the oldest private job out. Called after each
    /// resume.
    pub(crate) fn assert_stealable(&mut self) {
        if self.private_len() > 1 && self.exposed.is_empty() {
            let oldest = self.private.remove(0);
            self.exposed.push(oldest);
        }
    }

    /// Surrender all private jobs to the exposed queue (worker shutdown).
    pub(crate) fn drain_private(&mut self) {
        for job in self.private.drain(..) {
            self.exposed.push(job);
        }
    }

    pub(crate) fn private_len(&self) -> usize {
        self.private.len()
    }
}

/// Resolve one `Injector::steal` including the retry loop.
pub(crate) fn steal_from(queue: &Injector<Job>) -> Option<Job> {
    loop {
        match queue.steal() {
            Steal::Success(job) => return Some(job),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

// ---------------------------------------------------------------------------
// Iterative stealing
// ---------------------------------------------------------------------------

/// Victim selection for work stealing: scan all peers once per raid. To
/// reduce steal collisions, even-id workers advance their victim cursor
/// upward and odd-id workers downward.
pub(crate) struct IterativeStealing {
    worker_id: usize,
    victim: usize,
}

impl IterativeStealing {
    pub(crate) fn new(worker_id: usize) -> Self {
        IterativeStealing {
            worker_id,
            victim: 0,
        }
    }

    /// Try once to steal from anyone. Returns the first job obtained.
    pub(crate) fn raid(&mut self, peers: &[Arc<Injector<Job>>]) -> Option<Job> {
        let n = peers.len();
        if n < 2 {
            return None;
        }
        for _ in 0..n {
            self.victim = if self.worker_id % 2 == 0 {
                (self.victim + 1) % n
            } else {
                (self.victim + n - 1) % n
            };
            if self.victim == self.worker_id {
                continue;
            }
            if let Some(job) = steal_from(&peers[self.victim]) {
                return Some(job);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
