//! Actor cells, the execution state machine, and the enqueue/resume
//! protocol.
//!
//! An actor is one [`ActorCell`], split along the producer/consumer
//! boundary:
//!
//! - The **header** is thread-safe: the inbox, the atomic execution state,
//!   and the link/monitor table. Any thread may enqueue, link, or monitor.
//! - The **body** (behind a mutex) is touched only by the worker currently
//!   running the actor: the multiplexed mailbox queue, the flavor state
//!   (behavior stack or fiber bookkeeping), and the exit hooks. The
//!   execution state machine admits at most one running worker, so the body
//!   mutex is uncontended in steady state.
//!
//! ## Execution states
//!
//! `Ready` (queued or running), `Blocked` (parked), `AboutToBlock` (parking
//! in progress), `Done` (terminated). The `AboutToBlock` intermediate closes
//! the race between the consumer's emptiness check and a concurrent enqueue:
//! the consumer announces its intent, re-checks the mailbox, blocks the
//! inbox, and only then commits to `Blocked`; a producer that unblocks the
//! inbox flips `Blocked -> Ready` (and schedules) or `AboutToBlock -> Ready`
//! (and lets the consumer notice on its own).

pub(crate) mod event_based;
pub(crate) mod stackful;
pub(crate) mod thread;

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::envelope::{ActorId, Envelope, ExitReason, Item};
use crate::mailbox::{Inbox, MultiplexedQueue, PushResult};
use crate::queue::TaskQueue;
use crate::system::SystemCore;

pub(crate) use event_based::EventState;
pub(crate) use stackful::{FiberMap, StackfulState};

// ---------------------------------------------------------------------------
// Execution states
// ---------------------------------------------------------------------------

pub(crate) const READY: u8 = 0;
pub(crate) const BLOCKED: u8 = 1;
pub(crate) const ABOUT_TO_BLOCK: u8 = 2;
pub(crate) const DONE: u8 = 3;

/// Sentinel for "not pinned to any worker".
pub(crate) const NO_WORKER: usize = usize::MAX;

/// Outcome of driving an actor through one resume burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResumeOutcome {
    /// The actor terminated; its scheduler reference can be released.
    Done,
    /// The actor parked itself; a producer will reschedule it.
    AwaitingMessage,
    /// The quantum expired with work pending; requeue.
    ResumeLater,
}

/// Which resume implementation drives the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActorKind {
    EventBased,
    Stackful,
    /// A converted external thread; never scheduled by the pool.
    Thread,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Condvar pair used to wake detached actors and converted threads.
pub(crate) struct ThreadSignal {
    pub(crate) lock: Mutex<()>,
    pub(crate) cv: Condvar,
}

impl ThreadSignal {
    fn new() -> Self {
        ThreadSignal {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        let _guard = self.lock.lock();
        self.cv.notify_all();
    }
}

/// Thread-safe relationship table of an actor.
pub(crate) struct LinkState {
    /// Bidirectionally linked peers.
    pub(crate) links: HashSet<ActorId>,
    /// Monitors held by this actor: monitor ref -> watched peer.
    pub(crate) monitors: FxHashMap<u64, ActorId>,
    /// Monitors held on this actor: monitor ref -> watching peer.
    pub(crate) monitored_by: FxHashMap<u64, ActorId>,
    /// When set, exit signals from linked peers arrive as user-visible
    /// messages instead of terminating this actor.
    pub(crate) trap_exit: bool,
    /// Set during cleanup, before the inbox closes; read by producers that
    /// need a bounce reason.
    pub(crate) exit_reason: Option<ExitReason>,
}

impl LinkState {
    fn new(trap_exit: bool) -> Self {
        LinkState {
            links: HashSet::new(),
            monitors: FxHashMap::default(),
            monitored_by: FxHashMap::default(),
            trap_exit,
            exit_reason: None,
        }
    }
}

/// Flavor-specific consumer state.
pub(crate) enum Flavor {
    EventBased(EventState),
    Stackful(StackfulState),
    Thread,
}

/// Consumer-only state of an actor.
pub(crate) struct ActorBody {
    pub(crate) queue: MultiplexedQueue,
    pub(crate) flavor: Flavor,
    pub(crate) exit_reason: Option<ExitReason>,
    pub(crate) exit_hooks: Vec<Box<dyn FnOnce(&ExitReason) + Send>>,
    pub(crate) started: bool,
}

/// One actor: shared header plus mutex-guarded body.
pub(crate) struct ActorCell {
    pub(crate) id: ActorId,
    pub(crate) kind: ActorKind,
    /// Hidden actors are not counted by `await_all_actors_done`.
    pub(crate) hidden: bool,
    /// Detached actors run on their own OS thread and are woken through the
    /// signal instead of the scheduler.
    pub(crate) detached: bool,
    pub(crate) exec_state: AtomicU8,
    pub(crate) inbox: Inbox,
    /// Worker owning this actor's fiber; `NO_WORKER` while unpinned.
    pub(crate) home_worker: AtomicUsize,
    pub(crate) links: Mutex<LinkState>,
    pub(crate) body: Mutex<ActorBody>,
    pub(crate) signal: ThreadSignal,
    pub(crate) system: Weak<SystemCore>,
}

impl ActorCell {
    pub(crate) fn new(
        kind: ActorKind,
        flavor: Flavor,
        system: Weak<SystemCore>,
        priority_aware: bool,
        hidden: bool,
        detached: bool,
        lazy_init: bool,
    ) -> Arc<ActorCell> {
        let cell = Arc::new(ActorCell {
            id: ActorId::next(),
            kind,
            hidden,
            detached,
            exec_state: AtomicU8::new(if lazy_init { BLOCKED } else { READY }),
            inbox: Inbox::new(),
            home_worker: AtomicUsize::new(NO_WORKER),
            links: Mutex::new(LinkState::new(kind == ActorKind::Thread)),
            body: Mutex::new(ActorBody {
                queue: MultiplexedQueue::new(priority_aware),
                flavor,
                exit_reason: None,
                exit_hooks: Vec::new(),
                started: false,
            }),
            signal: ThreadSignal::new(),
            system,
        });
        if lazy_init {
            // A lazily initialized actor waits parked until its first
            // message, whose producer observes the unblock and schedules it.
            let blocked = cell.inbox.try_block();
            debug_assert!(blocked);
        }
        cell
    }

    /// Whether this actor's fiber is pinned to a worker.
    pub(crate) fn is_pinned(&self) -> bool {
        self.home_worker.load(Ordering::SeqCst) != NO_WORKER
    }

    /// Hand the actor to its scheduler after a successful
    /// `Blocked -> Ready` transition.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let Some(core) = self.system.upgrade() else {
            return;
        };
        if self.detached || self.kind == ActorKind::Thread {
            self.signal.notify();
            return;
        }
        if self.kind == ActorKind::Stackful && self.is_pinned() {
            // The home worker polls pinned fibers; the state change alone
            // wakes it.
            return;
        }
        core.coordinator.schedule(Arc::clone(self));
    }

    /// Producer-side wakeup after unblocking the inbox. The caller is the
    /// unique waker for this park/unpark cycle.
    pub(crate) fn wake(self: &Arc<Self>) {
        loop {
            match self.exec_state.load(Ordering::SeqCst) {
                BLOCKED => {
                    if self
                        .exec_state
                        .compare_exchange(BLOCKED, READY, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        self.schedule();
                        return;
                    }
                }
                ABOUT_TO_BLOCK => {
                    if self
                        .exec_state
                        .compare_exchange(
                            ABOUT_TO_BLOCK,
                            READY,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        // The consumer is mid-park and will notice on its
                        // own.
                        return;
                    }
                }
                _ => return,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Enqueue
// ---------------------------------------------------------------------------

/// Deliver an envelope to an actor, waking it if it was parked. Envelopes
/// hitting a closed inbox are bounced.
pub(crate) fn deliver(cell: &Arc<ActorCell>, env: Box<Envelope>) {
    match cell.inbox.push_back(env) {
        PushResult::Success => {}
        PushResult::UnblockedReader => cell.wake(),
        PushResult::Closed(env) => {
            if let Some(core) = cell.system.upgrade() {
                let reason = cell
                    .links
                    .lock()
                    .exit_reason
                    .clone()
                    .unwrap_or(ExitReason::Normal);
                core.bounce(env, &reason);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Park protocol
// ---------------------------------------------------------------------------

/// Attempt to park the actor on an empty mailbox.
///
/// Returns `true` if the actor committed to `Blocked`; `false` if new data
/// raced in (the actor stays `Ready` and must keep processing).
pub(crate) fn try_park(cell: &ActorCell, queue: &mut MultiplexedQueue) -> bool {
    cell.exec_state.store(ABOUT_TO_BLOCK, Ordering::SeqCst);
    fence(Ordering::SeqCst);
    if cell.inbox.fetch_more(queue) > 0 || !queue.is_empty() {
        let _ = cell.exec_state.compare_exchange(
            ABOUT_TO_BLOCK,
            READY,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        return false;
    }
    if !cell.inbox.try_block() {
        // A producer slipped in between the emptiness check and the block.
        let _ = cell.exec_state.compare_exchange(
            ABOUT_TO_BLOCK,
            READY,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        return false;
    }
    cell.exec_state
        .compare_exchange(ABOUT_TO_BLOCK, BLOCKED, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// Terminate an actor: record the reason, fire exit hooks, bounce the
/// mailbox, notify monitors and linked peers, and release the scheduler
/// reference. Idempotent.
pub(crate) fn cleanup(
    cell: &Arc<ActorCell>,
    body: &mut ActorBody,
    reason: ExitReason,
    core: &Arc<SystemCore>,
) {
    if body.exit_reason.is_some() {
        return;
    }
    body.exit_reason = Some(reason.clone());
    cell.links.lock().exit_reason = Some(reason.clone());
    cell.exec_state.store(DONE, Ordering::SeqCst);
    tracing::debug!(actor = %cell.id, %reason, "actor terminated");

    for hook in body.exit_hooks.drain(..) {
        // A panicking exit hook must not unwind through the scheduler.
        let _ = catch_unwind(AssertUnwindSafe(|| hook(&reason)));
    }

    // Drain everything still pending and bounce unanswered requests in
    // arrival order: the local queue first, then whatever was still sitting
    // in the inbox.
    let mut undelivered = TaskQueue::new();
    while let Some(env) = body.queue.take_front() {
        undelivered.push_back(env);
    }
    let mut late = cell.inbox.close();
    undelivered.append(&mut late);
    while let Some(env) = undelivered.pop_front() {
        core.bounce(env, &reason);
    }

    let (monitors, monitored_by, links) = {
        let mut state = cell.links.lock();
        (
            std::mem::take(&mut state.monitors),
            std::mem::take(&mut state.monitored_by),
            std::mem::take(&mut state.links),
        )
    };

    // Drop our own monitors on peers.
    for (mref, target) in monitors {
        if let Some(peer) = core.find(target) {
            peer.links.lock().monitored_by.remove(&mref);
        }
    }

    // Down notifications first, exit signals second, so a peer that both
    // monitors and links to this actor sees the down message before the
    // exit message.
    for (mref, watcher) in monitored_by {
        if let Some(peer) = core.find(watcher) {
            peer.links.lock().monitors.remove(&mref);
            deliver(
                &peer,
                Envelope::system(
                    Some(cell.id),
                    watcher,
                    Item::Down {
                        monitor: mref,
                        source: cell.id,
                        reason: reason.clone(),
                    },
                ),
            );
        }
    }
    for linked in links {
        if let Some(peer) = core.find(linked) {
            peer.links.lock().links.remove(&cell.id);
            deliver(
                &peer,
                Envelope::system(
                    Some(cell.id),
                    linked,
                    Item::Exit {
                        source: cell.id,
                        reason: reason.clone(),
                    },
                ),
            );
        }
    }

    core.deregister(cell);
    if cell.detached || cell.kind == ActorKind::Thread {
        // Unblock a thread waiting on its signal so it can observe the
        // termination.
        cell.signal.notify();
    }
}

// ---------------------------------------------------------------------------
// Links and monitors
// ---------------------------------------------------------------------------

/// Create a bidirectional link. Idempotent. Linking against a terminated
/// peer delivers the exit signal immediately.
pub(crate) fn link_cells(a: &Arc<ActorCell>, b: &Arc<ActorCell>) {
    if a.id == b.id {
        return;
    }
    // Lock in id order so concurrent link/unlink calls cannot deadlock.
    let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
    let mut first_state = first.links.lock();
    let mut second_state = second.links.lock();
    let first_exit = first_state.exit_reason.clone();
    let second_exit = second_state.exit_reason.clone();
    match (first_exit, second_exit) {
        (None, None) => {
            first_state.links.insert(second.id);
            second_state.links.insert(first.id);
        }
        (dead_first, dead_second) => {
            drop(second_state);
            drop(first_state);
            // One side already terminated; notify the survivor immediately.
            if let Some(reason) = dead_first {
                exit_signal(second, first.id, reason);
            } else if let Some(reason) = dead_second {
                exit_signal(first, second.id, reason);
            }
        }
    }
}

pub(crate) fn exit_signal(peer: &Arc<ActorCell>, source: ActorId, reason: ExitReason) {
    deliver(
        peer,
        Envelope::system(Some(source), peer.id, Item::Exit { source, reason }),
    );
}

/// Allocate a fresh monitor reference.
pub(crate) fn next_monitor_ref() -> u64 {
    static MONITOR_REF: AtomicU64 = AtomicU64::new(1);
    MONITOR_REF.fetch_add(1, Ordering::Relaxed)
}

/// Remove a bidirectional link. Idempotent.
pub(crate) fn unlink_cells(a: &Arc<ActorCell>, b: &Arc<ActorCell>) {
    if a.id == b.id {
        return;
    }
    let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
    let mut first_state = first.links.lock();
    let mut second_state = second.links.lock();
    first_state.links.remove(&second.id);
    second_state.links.remove(&first.id);
}

/// Install a monitor of `watcher` on `target` and return its reference.
/// Monitoring a terminated peer delivers the down notification immediately.
pub(crate) fn monitor_cell(watcher: &Arc<ActorCell>, target: &Arc<ActorCell>) -> u64 {
    let mref = next_monitor_ref();
    {
        let mut target_state = target.links.lock();
        if let Some(reason) = target_state.exit_reason.clone() {
            drop(target_state);
            deliver(
                watcher,
                Envelope::system(
                    Some(target.id),
                    watcher.id,
                    Item::Down {
                        monitor: mref,
                        source: target.id,
                        reason,
                    },
                ),
            );
            return mref;
        }
        target_state.monitored_by.insert(mref, watcher.id);
    }
    watcher.links.lock().monitors.insert(mref, target.id);
    mref
}

/// Remove a monitor previously installed with [`monitor_cell`].
pub(crate) fn demonitor_cell(watcher: &Arc<ActorCell>, core: &SystemCore, mref: u64) {
    let target = watcher.links.lock().monitors.remove(&mref);
    if let Some(target_id) = target {
        if let Some(target) = core.find(target_id) {
            target.links.lock().monitored_by.remove(&mref);
        }
    }
}

// ---------------------------------------------------------------------------
// Resume dispatch
// ---------------------------------------------------------------------------

/// Drive one actor through a bounded quantum of work.
pub(crate) fn resume(
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    quantum: usize,
    fibers: Option<(&mut FiberMap, usize)>,
) -> ResumeOutcome {
    match cell.kind {
        ActorKind::EventBased => event_based::resume(cell, core, quantum),
        ActorKind::Stackful => {
            let (fibers, worker_id) =
                fibers.expect("stackful actor resumed without a fiber table");
            stackful::resume(cell, core, fibers, worker_id)
        }
        ActorKind::Thread => {
            debug_assert!(false, "converted threads are never scheduled");
            ResumeOutcome::AwaitingMessage
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
