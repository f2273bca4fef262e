//! The coordinator: worker pool, actor table, and shutdown.
//!
//! The coordinator owns every actor through the id-keyed table (handles are
//! id + weak reference pairs), counts live non-hidden actors for
//! `await_all_actors_done`, and hands new jobs to workers round-robin.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_deque::Injector;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::actor::{cleanup, ActorCell};
use crate::envelope::{ActorId, ExitReason};
use crate::system::SystemCore;

use super::policy::Job;
use super::worker::Worker;

pub(crate) struct Coordinator {
    /// One exposed queue per worker, index-aligned with worker ids.
    exposed: Vec<Arc<Injector<Job>>>,
    next_worker: AtomicUsize,
    stopped: AtomicBool,
    /// The arena: every live actor, keyed by id.
    table: RwLock<FxHashMap<ActorId, Arc<ActorCell>>>,
    /// Count of live non-hidden actors.
    live: Mutex<usize>,
    live_cv: Condvar,
    pool: Mutex<Vec<JoinHandle<()>>>,
    detached: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    pub(crate) fn new(workers: usize) -> Self {
        Coordinator {
            exposed: (0..workers).map(|_| Arc::new(Injector::new())).collect(),
            next_worker: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            table: RwLock::new(FxHashMap::default()),
            live: Mutex::new(0),
            live_cv: Condvar::new(),
            pool: Mutex::new(Vec::new()),
            detached: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker threads. Called once, right after the system core
    /// is constructed.
    pub(crate) fn start_workers(&self, core: &Arc<SystemCore>) {
        let mut pool = self.pool.lock();
        for id in 0..self.exposed.len() {
            let core = Arc::clone(core);
            let peers = self.exposed.clone();
            let handle = std::thread::Builder::new()
                .name(format!("troupe-worker-{id}"))
                .spawn(move || Worker::new(id, core, peers).run())
                .expect("failed to spawn worker thread");
            pool.push(handle);
        }
        tracing::debug!(workers = self.exposed.len(), "scheduler started");
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.exposed.len()
    }

    /// Hand a ready actor to a worker, round-robin.
    pub(crate) fn schedule(&self, job: Job) {
        if self.stopped() {
            return;
        }
        let idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.exposed.len();
        self.exposed[idx].push(job);
    }

    /// Track a thread running a detached actor so shutdown can join it.
    pub(crate) fn adopt_detached(&self, handle: JoinHandle<()>) {
        self.detached.lock().push(handle);
    }

    pub(crate) fn register(&self, cell: &Arc<ActorCell>) {
        self.table.write().insert(cell.id, Arc::clone(cell));
        if !cell.hidden {
            *self.live.lock() += 1;
        }
    }

    /// Release an actor. Idempotent: only the call that actually removes
    /// the table entry decrements the live count.
    pub(crate) fn deregister(&self, cell: &ActorCell) {
        if self.table.write().remove(&cell.id).is_none() {
            return;
        }
        if !cell.hidden {
            let mut live = self.live.lock();
            *live -= 1;
            if *live == 0 {
                self.live_cv.notify_all();
            }
        }
    }

    pub(crate) fn find(&self, id: ActorId) -> Option<Arc<ActorCell>> {
        self.table.read().get(&id).cloned()
    }

    /// Block until every non-hidden actor has terminated.
    pub(crate) fn await_all_actors_done(&self) {
        let mut live = self.live.lock();
        while *live > 0 {
            self.live_cv.wait(&mut live);
        }
    }

    /// Stop the pool: signal the workers, join them, force-terminate
    /// whatever is still registered (bouncing pending requests), join
    /// detached threads. A worker that panicked is fatal.
    pub(crate) fn shutdown(&self, core: &Arc<SystemCore>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("coordinator shutting down");
        for handle in self.pool.lock().drain(..) {
            handle
                .join()
                .expect("worker thread panicked during shutdown");
        }
        let remaining: Vec<_> = self.table.read().values().cloned().collect();
        for cell in remaining {
            let mut body = cell.body.lock();
            let mut pending = 0usize;
            body.queue.peek_all(|_| pending += 1);
            tracing::debug!(actor = %cell.id, pending, "force-terminating straggler");
            cleanup(&cell, &mut body, ExitReason::Shutdown, core);
        }
        for handle in self.detached.lock().drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("coordinator stopped");
    }
}
