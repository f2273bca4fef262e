//! Stackful coroutine actors and the blocking receive protocol.
//!
//! A stackful actor runs its entry function on a private coroutine stack and
//! may issue blocking [`BlockingContext::receive`] calls from arbitrary call
//! depth. When the mailbox is empty the coroutine yields `Blocked` back to
//! the worker, which completes the `AboutToBlock -> Blocked` transition and
//! parks the actor until a producer wakes it.
//!
//! Coroutines cannot move between threads, so a fiber is pinned to the
//! worker that created it: woken fibers are not re-queued but picked up by
//! the home worker's polling loop. Detached stackful actors and converted
//! external threads run the same context in thread mode, where "yield
//! blocked" becomes a condvar wait.
//!
//! Receives may be issued from any call depth. Skipped messages stay in the
//! mailbox skip caches, so they survive unwinding exits and are restored, in
//! their original order, by the next match.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::Duration;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use rustc_hash::FxHashMap;

use crate::envelope::{
    ActorId, Category, DownMsg, Envelope, ExitMsg, ExitReason, Item, MessageId, Payload,
};
use crate::error::SpawnError;
use crate::queue::TaskResult;
use crate::system::{ActorRef, SpawnOptions, SystemCore};

use super::event_based::Behavior;
use super::{
    cleanup, demonitor_cell, link_cells, monitor_cell, unlink_cells, ActorCell, Flavor,
    ResumeOutcome, ABOUT_TO_BLOCK, BLOCKED, READY,
};

/// Entry function of a stackful actor.
pub type BlockingEntry = Box<dyn FnOnce(&mut BlockingContext<'_>) + Send + 'static>;

/// Whether user-space context switching is available on this target. When it
/// is not, stackful actors cannot be spawned on the pool; detached ones
/// still work because they run on a plain OS thread.
pub(crate) fn context_switching_available() -> bool {
    cfg!(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "arm",
        target_arch = "riscv64",
        target_arch = "loongarch64",
    ))
}

/// Private unwind payload used by `quit` and kill handling inside stackful
/// actors. Caught by the fiber trampoline, never user-visible.
pub(crate) struct StackfulExit(pub(crate) ExitReason);

/// Flavor state of a stackful actor: the entry function waiting for a worker
/// to build the fiber around it.
pub(crate) struct StackfulState {
    pub(crate) entry: Option<BlockingEntry>,
}

/// What a suspended fiber reported back to its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FiberYield {
    /// Cooperative yield; the actor is still runnable.
    Ready,
    /// The mailbox was empty; commit the park.
    Blocked,
}

// ---------------------------------------------------------------------------
// Fiber
// ---------------------------------------------------------------------------

/// A stackful coroutine bound to one actor. `!Send`: it stays on the worker
/// thread that created it.
pub(crate) struct Fiber {
    coro: Coroutine<(), FiberYield, ()>,
}

impl Fiber {
    fn new(
        cell: Arc<ActorCell>,
        core: Arc<SystemCore>,
        entry: BlockingEntry,
        stack_size: usize,
    ) -> Fiber {
        let stack = DefaultStack::new(stack_size).expect("failed to allocate coroutine stack");
        let coro = Coroutine::with_stack(stack, move |yielder: &Yielder<(), FiberYield>, _input: ()| {
            let mut ctx = BlockingContext {
                cell: Arc::clone(&cell),
                core: Arc::clone(&core),
                yielder: Some(yielder),
                converted: false,
                timeout_gen: 0,
                last_sender: None,
                last_mid: MessageId::of(Category::Regular),
            };
            let result = catch_unwind(AssertUnwindSafe(|| entry(&mut ctx)));
            let reason = match result {
                Ok(()) => ExitReason::Normal,
                Err(payload) => match payload.downcast::<StackfulExit>() {
                    Ok(exit) => exit.0,
                    Err(payload) => {
                        if core.stopped() {
                            // A forced unwind during shutdown must keep
                            // unwinding; the coordinator cleans up the cell.
                            std::panic::resume_unwind(payload);
                        }
                        ExitReason::UnhandledPanic
                    }
                },
            };
            let mut body = cell.body.lock();
            cleanup(&cell, &mut body, reason, &core);
        });
        Fiber { coro }
    }

    /// Enter the fiber until it yields or completes. `None` means the entry
    /// function returned and cleanup already ran.
    fn resume_once(&mut self) -> Option<FiberYield> {
        match self.coro.resume(()) {
            CoroutineResult::Yield(state) => Some(state),
            CoroutineResult::Return(()) => None,
        }
    }

    /// Unwind a suspended fiber's stack. Used when a worker exits with
    /// fibers still parked.
    pub(crate) fn force_unwind(&mut self) {
        if !self.coro.done() {
            self.coro.force_unwind();
        }
    }
}

/// A fiber together with the actor it belongs to, pinned to one worker.
pub(crate) struct PinnedFiber {
    pub(crate) cell: Arc<ActorCell>,
    pub(crate) fiber: Fiber,
}

/// Worker-local table of pinned fibers.
pub(crate) type FiberMap = FxHashMap<ActorId, PinnedFiber>;

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

/// Drive a stackful actor: build its fiber on first contact (pinning it to
/// this worker), then switch into it and interpret the yield value.
pub(crate) fn resume(
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    fibers: &mut FiberMap,
    worker_id: usize,
) -> ResumeOutcome {
    if !fibers.contains_key(&cell.id) {
        let entry = {
            let mut body = cell.body.lock();
            if body.exit_reason.is_some() {
                return ResumeOutcome::Done;
            }
            match &mut body.flavor {
                Flavor::Stackful(state) => state.entry.take(),
                _ => unreachable!("stackful resume on non-stackful flavor"),
            }
        };
        let Some(entry) = entry else {
            // The fiber lives on another worker; nothing to do here.
            return ResumeOutcome::AwaitingMessage;
        };
        cell.home_worker.store(worker_id, Ordering::SeqCst);
        let fiber = Fiber::new(
            Arc::clone(cell),
            Arc::clone(core),
            entry,
            core.config.coroutine_stack_size,
        );
        fibers.insert(
            cell.id,
            PinnedFiber {
                cell: Arc::clone(cell),
                fiber,
            },
        );
    }

    loop {
        let pinned = fibers.get_mut(&cell.id).expect("pinned fiber vanished");
        match pinned.fiber.resume_once() {
            None => {
                fibers.remove(&cell.id);
                return ResumeOutcome::Done;
            }
            Some(FiberYield::Ready) => return ResumeOutcome::ResumeLater,
            Some(FiberYield::Blocked) => {
                match cell.exec_state.compare_exchange(
                    ABOUT_TO_BLOCK,
                    BLOCKED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => return ResumeOutcome::AwaitingMessage,
                    // A producer flipped us back to ready; run again.
                    Err(_) => continue,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BlockingContext
// ---------------------------------------------------------------------------

/// Verdict of a receive matcher for one message.
pub enum Match<R> {
    /// The message matched; end the receive with this result.
    Handled(R),
    /// Hand the message back; it waits in the mailbox skip cache and is
    /// re-examined after the next match.
    Skip(Payload),
}

/// Capabilities of a stackful actor (or a converted external thread),
/// including blocking receives.
pub struct BlockingContext<'y> {
    cell: Arc<ActorCell>,
    core: Arc<SystemCore>,
    /// Present while running inside a fiber; `None` in thread mode.
    yielder: Option<&'y Yielder<(), FiberYield>>,
    /// Converted external threads own their cell and clean it up on drop.
    converted: bool,
    timeout_gen: u64,
    last_sender: Option<ActorId>,
    last_mid: MessageId,
}

impl BlockingContext<'static> {
    /// Thread-mode context for detached actors and converted threads.
    pub(crate) fn thread_mode(
        cell: Arc<ActorCell>,
        core: Arc<SystemCore>,
        converted: bool,
    ) -> Self {
        BlockingContext {
            cell,
            core,
            yielder: None,
            converted,
            timeout_gen: 0,
            last_sender: None,
            last_mid: MessageId::of(Category::Regular),
        }
    }
}

impl<'y> BlockingContext<'y> {
    /// Handle to the actor itself.
    pub fn self_ref(&self) -> ActorRef {
        ActorRef {
            id: self.cell.id,
            cell: Arc::downgrade(&self.cell),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.cell.id
    }

    /// Sender of the most recently received message, if any.
    pub fn sender_id(&self) -> Option<ActorId> {
        self.last_sender
    }

    pub fn send(&self, target: &ActorRef, payload: Payload) {
        self.send_with(target, Category::Regular, payload);
    }

    pub fn send_with(&self, target: &ActorRef, category: Category, payload: Payload) {
        self.core
            .send_payload(Some(self.cell.id), target, MessageId::of(category), payload);
    }

    /// Send a request expecting a reply; a terminated recipient produces a
    /// [`Bounced`](crate::Bounced) error reply.
    pub fn request(&self, target: &ActorRef, payload: Payload) {
        self.core.send_payload(
            Some(self.cell.id),
            target,
            MessageId::request(Category::Regular),
            payload,
        );
    }

    /// Reply to the sender of the most recently received message.
    pub fn reply(&self, payload: Payload) {
        let Some(sender) = self.last_sender else {
            return;
        };
        let Some(cell) = self.core.find(sender) else {
            return;
        };
        let target = ActorRef {
            id: sender,
            cell: Arc::downgrade(&cell),
        };
        let mid = if self.last_mid.is_request() {
            self.last_mid.response()
        } else {
            MessageId::of(Category::Regular)
        };
        self.core
            .send_payload(Some(self.cell.id), &target, mid, payload);
    }

    pub fn delayed_send(&self, target: &ActorRef, delay: Duration, payload: Payload) {
        self.core
            .delayed_send(Some(self.cell.id), target, delay, payload);
    }

    pub fn trap_exit(&self, enabled: bool) {
        self.cell.links.lock().trap_exit = enabled;
    }

    pub fn link(&self, target: &ActorRef) {
        if let Some(target_cell) = target.cell.upgrade() {
            link_cells(&self.cell, &target_cell);
        } else {
            super::exit_signal(&self.cell, target.id, ExitReason::Normal);
        }
    }

    pub fn unlink(&self, target: &ActorRef) {
        if let Some(target_cell) = target.cell.upgrade() {
            unlink_cells(&self.cell, &target_cell);
        }
    }

    pub fn monitor(&self, target: &ActorRef) -> u64 {
        match target.cell.upgrade() {
            Some(target_cell) => monitor_cell(&self.cell, &target_cell),
            None => {
                let mref = super::next_monitor_ref();
                super::deliver(
                    &self.cell,
                    Envelope::system(
                        Some(target.id),
                        self.cell.id,
                        Item::Down {
                            monitor: mref,
                            source: target.id,
                            reason: ExitReason::Normal,
                        },
                    ),
                );
                mref
            }
        }
    }

    pub fn demonitor(&self, monitor: u64) {
        demonitor_cell(&self.cell, &self.core, monitor);
    }

    /// Register a hook to run during this actor's cleanup.
    pub fn on_exit(&self, hook: impl FnOnce(&ExitReason) + Send + 'static) {
        self.cell.body.lock().exit_hooks.push(Box::new(hook));
    }

    pub fn spawn(&self, behavior: Box<dyn Behavior>) -> ActorRef {
        self.core.spawn_event(SpawnOptions::default(), behavior)
    }

    pub fn spawn_with(&self, options: SpawnOptions, behavior: Box<dyn Behavior>) -> ActorRef {
        self.core.spawn_event(options, behavior)
    }

    pub fn spawn_blocking(&self, entry: BlockingEntry) -> Result<ActorRef, SpawnError> {
        self.core.spawn_stackful(SpawnOptions::default(), entry)
    }

    /// Yield the rest of this timeslice to other actors.
    pub fn yield_now(&self) {
        match self.yielder {
            Some(yielder) => yielder.suspend(FiberYield::Ready),
            None => std::thread::yield_now(),
        }
    }

    /// Terminate this actor with `reason`.
    pub fn quit(&self, reason: ExitReason) -> ! {
        std::panic::panic_any(StackfulExit(reason));
    }

    /// Blocking receive: feed mailbox messages to `matcher` in effective
    /// mailbox order until one matches. Skipped messages wait in the mailbox
    /// skip caches and are restored, in their original order, by the next
    /// match. Receives may be issued from any call depth; each call runs the
    /// skip protocol to completion before returning.
    pub fn receive<R>(&mut self, mut matcher: impl FnMut(Payload) -> Match<R>) -> R {
        loop {
            match self.receive_step(&mut matcher, None) {
                Step::Done(result) => return result,
                Step::TimedOut => unreachable!("untimed receive cannot time out"),
                Step::Terminated(reason) => self.quit(reason),
                Step::Idle => {
                    if !self.wait_for_message() {
                        let reason = self.recorded_exit_reason();
                        self.quit(reason);
                    }
                }
            }
        }
    }

    /// Like [`receive`](Self::receive), but gives up after `timeout` and
    /// returns `None`. The timeout is delivered as a generation-tagged
    /// mailbox message, so a stale timeout from an earlier receive is
    /// ignored.
    pub fn receive_timeout<R>(
        &mut self,
        timeout: Duration,
        mut matcher: impl FnMut(Payload) -> Match<R>,
    ) -> Option<R> {
        self.timeout_gen += 1;
        let generation = self.timeout_gen;
        self.core
            .clock
            .schedule_item(timeout, &self.cell, Item::Timeout { generation });
        loop {
            match self.receive_step(&mut matcher, Some(generation)) {
                Step::Done(result) => {
                    // Invalidate the armed timeout.
                    self.timeout_gen += 1;
                    return Some(result);
                }
                Step::TimedOut => return None,
                Step::Terminated(reason) => self.quit(reason),
                Step::Idle => {
                    if !self.wait_for_message() {
                        let reason = self.recorded_exit_reason();
                        self.quit(reason);
                    }
                }
            }
        }
    }

    /// Receive the next message of any kind. Returns `None` once the actor
    /// is terminated. Intended for converted external threads.
    pub fn recv(&mut self) -> Option<Payload> {
        self.recv_inner(None)
    }

    /// Like [`recv`](Self::recv) with a timeout; `None` on timeout or
    /// termination.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Payload> {
        self.timeout_gen += 1;
        let generation = self.timeout_gen;
        self.core
            .clock
            .schedule_item(timeout, &self.cell, Item::Timeout { generation });
        self.recv_inner(Some(generation))
    }

    fn recv_inner(&mut self, armed: Option<u64>) -> Option<Payload> {
        loop {
            match self.receive_step(&mut |payload| Match::Handled(payload), armed) {
                Step::Done(payload) => {
                    if armed.is_some() {
                        self.timeout_gen += 1;
                    }
                    return Some(payload);
                }
                Step::TimedOut => return None,
                Step::Terminated(reason) => {
                    if self.converted {
                        self.terminate_now(reason);
                        return None;
                    }
                    self.quit(reason);
                }
                Step::Idle => {
                    if !self.wait_for_message() {
                        if self.converted {
                            return None;
                        }
                        let reason = self.recorded_exit_reason();
                        self.quit(reason);
                    }
                }
            }
        }
    }

    /// Run one round of the cached-DRR skip protocol over the mailbox.
    ///
    /// A matching message stops the round and flushes the skip caches, so
    /// previously skipped messages are re-examined, in their original order,
    /// by the next receive. System messages are interpreted in place.
    fn receive_step<R>(
        &mut self,
        matcher: &mut impl FnMut(Payload) -> Match<R>,
        armed: Option<u64>,
    ) -> Step<R> {
        let mut body = self.cell.body.lock();
        if let Some(reason) = body.exit_reason.clone() {
            return Step::Terminated(reason);
        }
        self.cell.inbox.fetch_more(&mut body.queue);
        let quantum = body.queue.total_task_size();
        if quantum == 0 {
            return Step::Idle;
        }
        let trap_exit = self.cell.links.lock().trap_exit;

        let mut matched: Option<(R, Option<ActorId>, MessageId)> = None;
        let mut fatal: Option<ExitReason> = None;
        let mut timed_out = false;
        let mut deliver_user = |env: &mut Envelope, payload: Payload| match matcher(payload) {
            Match::Handled(result) => {
                matched = Some((result, env.sender, env.mid));
                TaskResult::Stop
            }
            Match::Skip(payload) => {
                env.item = Item::User(payload);
                TaskResult::Skip
            }
        };
        body.queue.new_round(quantum, |env| match env.item.take() {
            Item::User(payload) => deliver_user(env, payload),
            Item::Exit { source, reason } => {
                if trap_exit {
                    deliver_user(env, Box::new(ExitMsg { source, reason }))
                } else if reason.is_normal() {
                    TaskResult::Resume
                } else {
                    fatal = Some(reason);
                    TaskResult::Stop
                }
            }
            Item::Down {
                monitor,
                source,
                reason,
            } => deliver_user(
                env,
                Box::new(DownMsg {
                    monitor,
                    source,
                    reason,
                }),
            ),
            Item::Kill { reason } => {
                fatal = Some(reason);
                TaskResult::Stop
            }
            Item::Timeout { generation } => {
                if armed == Some(generation) {
                    timed_out = true;
                    TaskResult::Stop
                } else {
                    // Stale timeout from an earlier receive.
                    TaskResult::Resume
                }
            }
            Item::Taken => TaskResult::Resume,
        });
        drop(body);

        if let Some(reason) = fatal {
            return Step::Terminated(reason);
        }
        if let Some((result, sender, mid)) = matched {
            self.last_sender = sender;
            self.last_mid = mid;
            return Step::Done(result);
        }
        if timed_out {
            return Step::TimedOut;
        }
        Step::Idle
    }

    fn recorded_exit_reason(&self) -> ExitReason {
        self.cell
            .links
            .lock()
            .exit_reason
            .clone()
            .unwrap_or(ExitReason::Shutdown)
    }

    /// Park until the mailbox becomes non-empty. Returns `false` when the
    /// actor terminated instead.
    fn wait_for_message(&mut self) -> bool {
        loop {
            {
                let mut body = self.cell.body.lock();
                if body.exit_reason.is_some() {
                    return false;
                }
                self.cell.inbox.fetch_more(&mut body.queue);
                if !body.queue.is_empty() {
                    return true;
                }
            }
            if self.cell.inbox.is_closed() {
                return false;
            }
            self.cell.exec_state.store(ABOUT_TO_BLOCK, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            if self.cell.inbox.has_data() {
                // A producer slipped in; keep running.
                self.cell.exec_state.store(READY, Ordering::SeqCst);
                continue;
            }
            if !self.cell.inbox.try_block() {
                self.cell.exec_state.store(READY, Ordering::SeqCst);
                continue;
            }
            match self.yielder {
                Some(yielder) => {
                    // The worker completes the park and re-enters us once a
                    // producer flips the state back to ready.
                    yielder.suspend(FiberYield::Blocked);
                }
                None => {
                    if self
                        .cell
                        .exec_state
                        .compare_exchange(
                            ABOUT_TO_BLOCK,
                            BLOCKED,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_err()
                    {
                        // A producer raced the park; its push unblocked the
                        // inbox already.
                        continue;
                    }
                    self.cell
                        .inbox
                        .synchronized_await(&self.cell.signal.lock, &self.cell.signal.cv);
                }
            }
        }
    }

    fn terminate_now(&self, reason: ExitReason) {
        let mut body = self.cell.body.lock();
        cleanup(&self.cell, &mut body, reason, &self.core);
    }
}

enum Step<R> {
    /// A message matched.
    Done(R),
    /// The armed receive timeout fired.
    TimedOut,
    /// The actor is terminating (kill, fatal exit signal, or cleanup ran).
    Terminated(ExitReason),
    /// Nothing consumable; park and retry.
    Idle,
}

impl Drop for BlockingContext<'_> {
    fn drop(&mut self) {
        if self.converted {
            self.terminate_now(ExitReason::Normal);
        }
    }
}

// ---------------------------------------------------------------------------
// Detached entry
// ---------------------------------------------------------------------------

/// Thread main for a detached stackful actor: no fiber, blocking waits go
/// through the cell's condvar.
pub(crate) fn run_detached(cell: Arc<ActorCell>, core: Arc<SystemCore>, entry: BlockingEntry) {
    let mut ctx = BlockingContext::thread_mode(Arc::clone(&cell), Arc::clone(&core), false);
    let result = catch_unwind(AssertUnwindSafe(|| entry(&mut ctx)));
    let reason = match result {
        Ok(()) => ExitReason::Normal,
        Err(payload) => match payload.downcast::<StackfulExit>() {
            Ok(exit) => exit.0,
            Err(_) => ExitReason::UnhandledPanic,
        },
    };
    let mut body = cell.body.lock();
    cleanup(&cell, &mut body, reason, &core);
}
