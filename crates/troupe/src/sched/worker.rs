//! The worker thread main loop.
//!
//! Each iteration first resumes any of its pinned fibers that became ready,
//! then obtains the next job: private queue first (LIFO for locality), then
//! escalating polls of the exposed queue interleaved with steal attempts
//! from peers — aggressive (100 tries, steal every 10th), moderate (550
//! tries, steal every 5th, 50 µs sleeps), then relaxed (steal every round,
//! 10 ms sleeps). Every phase breaks out when the shutdown flag rises or a
//! pinned fiber becomes ready.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_deque::Injector;

use crate::actor::{self, ActorKind, FiberMap, ResumeOutcome, READY};
use crate::system::SystemCore;

use super::policy::{ForkJoinQueues, IterativeStealing, Job};

pub(crate) struct Worker {
    id: usize,
    core: Arc<SystemCore>,
    queues: ForkJoinQueues,
    stealing: IterativeStealing,
    /// All workers' exposed queues, index-aligned with worker ids.
    peers: Vec<Arc<Injector<Job>>>,
    /// Fibers pinned to this worker.
    fibers: FiberMap,
}

impl Worker {
    pub(crate) fn new(id: usize, core: Arc<SystemCore>, peers: Vec<Arc<Injector<Job>>>) -> Self {
        Worker {
            id,
            queues: ForkJoinQueues::new(Arc::clone(&peers[id])),
            stealing: IterativeStealing::new(id),
            peers,
            fibers: FiberMap::default(),
            core,
        }
    }

    pub(crate) fn run(&mut self) {
        tracing::debug!(worker = self.id, "worker started");
        loop {
            self.poll_fibers();
            if self.core.stopped() {
                break;
            }
            if let Some(job) = self.next_job() {
                self.run_job(job);
            }
        }
        // Surrender queued work; the coordinator terminates whatever is
        // left after the pool has joined.
        self.queues.drain_private();
        for (_, mut pinned) in self.fibers.drain() {
            pinned.fiber.force_unwind();
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    /// Resume every pinned fiber whose actor became ready again.
    fn poll_fibers(&mut self) {
        if self.fibers.is_empty() {
            return;
        }
        let ready: Vec<_> = self
            .fibers
            .values()
            .filter(|p| p.cell.exec_state.load(Ordering::SeqCst) == READY)
            .map(|p| Arc::clone(&p.cell))
            .collect();
        for cell in ready {
            actor::stackful::resume(&cell, &self.core, &mut self.fibers, self.id);
        }
    }

    fn has_ready_fiber(&self) -> bool {
        self.fibers
            .values()
            .any(|p| p.cell.exec_state.load(Ordering::SeqCst) == READY)
    }

    /// Whether a polling phase should bail out to the outer loop.
    fn interrupted(&self) -> bool {
        self.core.stopped() || self.has_ready_fiber()
    }

    fn run_job(&mut self, job: Job) {
        let quantum = self.core.config.resume_quantum;
        let outcome = actor::resume(
            &job,
            &self.core,
            quantum,
            Some((&mut self.fibers, self.id)),
        );
        match outcome {
            ResumeOutcome::Done | ResumeOutcome::AwaitingMessage => {}
            ResumeOutcome::ResumeLater => {
                // Pinned fibers are picked up by poll_fibers instead of the
                // shared queues.
                if !(job.kind == ActorKind::Stackful && job.is_pinned()) {
                    self.queues.internal_enqueue(job);
                }
            }
        }
        self.queues.assert_stealable();
    }

    /// The three-phase polling ladder. Returns `None` when interrupted by
    /// shutdown or a ready fiber.
    fn next_job(&mut self) -> Option<Job> {
        if let Some(job) = self.queues.local_pop() {
            return Some(job);
        }
        if let Some(job) = self.aggressive_poll() {
            return Some(job);
        }
        if self.interrupted() {
            return None;
        }
        if let Some(job) = self.moderate_poll() {
            return Some(job);
        }
        if self.interrupted() {
            return None;
        }
        self.relaxed_poll()
    }

    fn aggressive_poll(&mut self) -> Option<Job> {
        for i in 1..101u32 {
            if let Some(job) = self.queues.try_external_dequeue() {
                return Some(job);
            }
            if i % 10 == 0 {
                if let Some(job) = self.stealing.raid(&self.peers) {
                    return Some(job);
                }
            }
            if self.interrupted() {
                return None;
            }
            std::thread::yield_now();
        }
        None
    }

    fn moderate_poll(&mut self) -> Option<Job> {
        for i in 1..550u32 {
            if let Some(job) = self.queues.try_external_dequeue() {
                return Some(job);
            }
            if i % 5 == 0 {
                if let Some(job) = self.stealing.raid(&self.peers) {
                    return Some(job);
                }
            }
            if self.interrupted() {
                return None;
            }
            std::thread::sleep(Duration::from_micros(50));
        }
        None
    }

    fn relaxed_poll(&mut self) -> Option<Job> {
        loop {
            if let Some(job) = self.queues.try_external_dequeue() {
                return Some(job);
            }
            if let Some(job) = self.stealing.raid(&self.peers) {
                return Some(job);
            }
            if self.interrupted() {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
