//! Event-based (stackless) actors.
//!
//! An event-based actor is driven purely through `resume`: it holds a LIFO
//! stack of behaviors and dispatches each mailbox envelope to the topmost
//! one. Unmatched messages are skipped into the mailbox cache and
//! re-examined after the next behavior change. Timeouts arrive as ordinary
//! mailbox messages tagged with a generation counter; any behavior-stack
//! mutation or consumed user message bumps the generation, so stale timeout
//! messages are dropped without side effect.
//!
//! Blocking `receive` does not exist for this flavor: [`Context`]
//! deliberately has no receive operation, so the mistake cannot compile.
//! Use [`Context::push_behavior`] instead.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::{
    ActorId, Category, DownMsg, Envelope, ExitMsg, ExitReason, Item, MessageId, Payload,
};
use crate::error::SpawnError;
use crate::queue::TaskResult;
use crate::system::{ActorRef, SpawnOptions, SystemCore};

use super::stackful::BlockingEntry;
use super::{
    cleanup, demonitor_cell, link_cells, monitor_cell, try_park, unlink_cells, ActorBody,
    ActorCell, Flavor, ResumeOutcome,
};

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// Verdict of one behavior invocation.
pub enum Handled {
    /// The message was consumed.
    Consumed,
    /// The message did not match; hand it back so it can wait in the skip
    /// cache for a later behavior.
    Skipped(Payload),
    /// Terminate the actor with the given reason.
    Terminated(ExitReason),
}

/// A message handler installed on an event-based actor.
///
/// Handlers are partial: returning [`Handled::Skipped`] parks the message
/// until the behavior stack changes. Termination is an explicit return
/// value, never an unwinding mechanism; a panic that does escape a handler
/// terminates the actor with [`ExitReason::UnhandledPanic`].
pub trait Behavior: Send {
    /// Invoked once before the first message is dispatched.
    fn on_start(&mut self, _ctx: &mut Context<'_>) -> Handled {
        Handled::Consumed
    }

    /// Invoked for each incoming message.
    fn handle(&mut self, ctx: &mut Context<'_>, msg: Payload) -> Handled;

    /// Invoked when this behavior's timeout elapses with no matching
    /// message.
    fn on_timeout(&mut self, _ctx: &mut Context<'_>) -> Handled {
        Handled::Consumed
    }
}

/// Wrap a closure as a [`Behavior`].
pub fn behavior_fn<F>(f: F) -> Box<dyn Behavior>
where
    F: FnMut(&mut Context<'_>, Payload) -> Handled + Send + 'static,
{
    struct FnBehavior<F>(F);
    impl<F> Behavior for FnBehavior<F>
    where
        F: FnMut(&mut Context<'_>, Payload) -> Handled + Send + 'static,
    {
        fn handle(&mut self, ctx: &mut Context<'_>, msg: Payload) -> Handled {
            (self.0)(ctx, msg)
        }
    }
    Box::new(FnBehavior(f))
}

/// One frame of the behavior stack.
pub(crate) struct BehaviorFrame {
    behavior: Box<dyn Behavior>,
    timeout: Option<Duration>,
}

/// Flavor state of an event-based actor.
pub(crate) struct EventState {
    stack: Vec<BehaviorFrame>,
    /// Generation of the currently armed timeout. Bumped on every stack
    /// change and every consumed user message.
    active_timeout: u64,
    pending_timeout: bool,
}

impl EventState {
    pub(crate) fn new(initial: Box<dyn Behavior>) -> Self {
        EventState {
            stack: vec![BehaviorFrame {
                behavior: initial,
                timeout: None,
            }],
            active_timeout: 0,
            pending_timeout: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

enum StackOp {
    Push(BehaviorFrame),
    Pop,
    Quit(ExitReason),
    OnExit(Box<dyn FnOnce(&ExitReason) + Send>),
}

/// Capabilities of the actor currently being resumed, threaded explicitly
/// through every behavior invocation.
///
/// Behavior-stack mutations requested through the context are applied after
/// the current invocation returns, so the message being dispatched is always
/// handled by the behavior that was topmost when it was dequeued.
pub struct Context<'a> {
    cell: &'a Arc<ActorCell>,
    core: &'a Arc<SystemCore>,
    ops: Vec<StackOp>,
    stack_changed: bool,
    current_sender: Option<ActorId>,
    current_mid: MessageId,
}

impl<'a> Context<'a> {
    fn new(cell: &'a Arc<ActorCell>, core: &'a Arc<SystemCore>) -> Self {
        Context {
            cell,
            core,
            ops: Vec::new(),
            stack_changed: false,
            current_sender: None,
            current_mid: MessageId::of(Category::Regular),
        }
    }

    /// Handle to the actor itself.
    pub fn self_ref(&self) -> ActorRef {
        ActorRef {
            id: self.cell.id,
            cell: Arc::downgrade(self.cell),
        }
    }

    pub fn actor_id(&self) -> ActorId {
        self.cell.id
    }

    /// Sender of the message currently being dispatched, if any.
    pub fn sender(&self) -> Option<ActorRef> {
        let id = self.current_sender?;
        let cell = self.core.find(id)?;
        Some(ActorRef {
            id,
            cell: Arc::downgrade(&cell),
        })
    }

    pub fn sender_id(&self) -> Option<ActorId> {
        self.current_sender
    }

    /// Send a regular message.
    pub fn send(&self, target: &ActorRef, payload: Payload) {
        self.send_with(target, Category::Regular, payload);
    }

    /// Send a message into a specific mailbox slot.
    pub fn send_with(&self, target: &ActorRef, category: Category, payload: Payload) {
        self.core
            .send_payload(Some(self.cell.id), target, MessageId::of(category), payload);
    }

    /// Send a request expecting a reply. If the recipient terminates before
    /// answering, a [`Bounced`](crate::Bounced) error reply arrives instead.
    pub fn request(&self, target: &ActorRef, payload: Payload) {
        self.core.send_payload(
            Some(self.cell.id),
            target,
            MessageId::request(Category::Regular),
            payload,
        );
    }

    /// Reply to the sender of the message currently being dispatched.
    pub fn reply(&self, payload: Payload) {
        let Some(sender) = self.current_sender else {
            return;
        };
        let Some(cell) = self.core.find(sender) else {
            return;
        };
        let target = ActorRef {
            id: sender,
            cell: Arc::downgrade(&cell),
        };
        let mid = if self.current_mid.is_request() {
            self.current_mid.response()
        } else {
            MessageId::of(Category::Regular)
        };
        self.core
            .send_payload(Some(self.cell.id), &target, mid, payload);
    }

    /// Deliver `payload` to `target` after `delay`.
    pub fn delayed_send(&self, target: &ActorRef, delay: Duration, payload: Payload) {
        self.core
            .delayed_send(Some(self.cell.id), target, delay, payload);
    }

    /// Push a new behavior onto the stack. Applied after the current
    /// invocation returns; pending skipped messages are re-examined.
    pub fn push_behavior(&mut self, behavior: Box<dyn Behavior>) {
        self.ops.push(StackOp::Push(BehaviorFrame {
            behavior,
            timeout: None,
        }));
    }

    /// Push a behavior paired with a timeout. If no message is consumed
    /// within `timeout`, the behavior's `on_timeout` hook fires.
    pub fn push_behavior_timed(&mut self, behavior: Box<dyn Behavior>, timeout: Duration) {
        self.ops.push(StackOp::Push(BehaviorFrame {
            behavior,
            timeout: Some(timeout),
        }));
    }

    /// Pop the topmost behavior. The actor terminates normally once its
    /// stack is empty.
    pub fn pop_behavior(&mut self) {
        self.ops.push(StackOp::Pop);
    }

    /// Terminate the actor after the current invocation returns.
    pub fn quit(&mut self, reason: ExitReason) {
        self.ops.push(StackOp::Quit(reason));
    }

    /// Register a hook to run during this actor's cleanup.
    pub fn on_exit(&mut self, hook: impl FnOnce(&ExitReason) + Send + 'static) {
        self.ops.push(StackOp::OnExit(Box::new(hook)));
    }

    /// Toggle delivery of exit signals as user-visible [`ExitMsg`] payloads.
    pub fn trap_exit(&self, enabled: bool) {
        self.cell.links.lock().trap_exit = enabled;
    }

    /// Link to another actor. Exit signals propagate both ways.
    pub fn link(&self, target: &ActorRef) {
        if let Some(target) = target.cell.upgrade() {
            link_cells(self.cell, &target);
        } else {
            // The peer is already gone; deliver the exit signal right away.
            super::exit_signal(self.cell, target.id, ExitReason::Normal);
        }
    }

    pub fn unlink(&self, target: &ActorRef) {
        if let Some(target) = target.cell.upgrade() {
            unlink_cells(self.cell, &target);
        }
    }

    /// Monitor another actor; returns the monitor reference carried by the
    /// eventual [`DownMsg`].
    pub fn monitor(&self, target: &ActorRef) -> u64 {
        match target.cell.upgrade() {
            Some(target) => monitor_cell(self.cell, &target),
            None => {
                let mref = super::next_monitor_ref();
                super::deliver(
                    self.cell,
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
        demonitor_cell(self.cell, self.core, monitor);
    }

    /// Spawn an event-based actor with default options.
    pub fn spawn(&self, behavior: Box<dyn Behavior>) -> ActorRef {
        self.core.spawn_event(SpawnOptions::default(), behavior)
    }

    pub fn spawn_with(&self, options: SpawnOptions, behavior: Box<dyn Behavior>) -> ActorRef {
        self.core.spawn_event(options, behavior)
    }

    /// Spawn a stackful actor that may issue blocking receives.
    pub fn spawn_blocking(&self, entry: BlockingEntry) -> Result<ActorRef, SpawnError> {
        self.core.spawn_stackful(SpawnOptions::default(), entry)
    }

    fn take_stack_changed(&mut self) -> bool {
        std::mem::take(&mut self.stack_changed)
    }
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

/// Drive an event-based actor through one bounded burst.
pub(crate) fn resume(
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    quantum: usize,
) -> ResumeOutcome {
    let mut body_guard = cell.body.lock();
    let body = &mut *body_guard;
    if body.exit_reason.is_some() {
        return ResumeOutcome::Done;
    }

    let mut ctx = Context::new(cell, core);

    if !body.started {
        body.started = true;
        let mut pending_exit = None;
        {
            let ActorBody {
                flavor, exit_hooks, ..
            } = body;
            let Flavor::EventBased(state) = flavor else {
                unreachable!("event resume on non-event flavor");
            };
            run_on_start(state, exit_hooks, &mut ctx, cell, core, &mut pending_exit);
        }
        if ctx.take_stack_changed() {
            body.queue.flush_cache();
        }
        if let Some(reason) = pending_exit {
            cleanup(cell, body, reason, core);
            return ResumeOutcome::Done;
        }
    }

    let mut processed = 0;
    loop {
        let stack_empty = matches!(&body.flavor, Flavor::EventBased(s) if s.stack.is_empty());
        if stack_empty {
            cleanup(cell, body, ExitReason::Normal, core);
            return ResumeOutcome::Done;
        }

        cell.inbox.fetch_more(&mut body.queue);
        if body.queue.is_empty() {
            if try_park(cell, &mut body.queue) {
                return ResumeOutcome::AwaitingMessage;
            }
            continue;
        }
        if processed >= quantum {
            return ResumeOutcome::ResumeLater;
        }

        let budget = quantum - processed;
        let mut pending_exit: Option<ExitReason> = None;
        let round = {
            let ActorBody {
                queue,
                flavor,
                exit_hooks,
                ..
            } = body;
            let Flavor::EventBased(state) = flavor else {
                unreachable!("event resume on non-event flavor");
            };
            queue.new_round(budget, |env| {
                consume_one(env, state, exit_hooks, &mut ctx, cell, core, &mut pending_exit)
            })
        };
        processed += round.consumed;
        if ctx.take_stack_changed() {
            // Skipped messages get a fresh look from the new behavior.
            body.queue.flush_cache();
        }
        if let Some(reason) = pending_exit {
            cleanup(cell, body, reason, core);
            return ResumeOutcome::Done;
        }
    }
}

fn run_on_start(
    state: &mut EventState,
    exit_hooks: &mut Vec<Box<dyn FnOnce(&ExitReason) + Send>>,
    ctx: &mut Context<'_>,
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    pending_exit: &mut Option<ExitReason>,
) {
    let result = {
        let frame = state.stack.last_mut().expect("fresh actor without behavior");
        catch_unwind(AssertUnwindSafe(|| frame.behavior.on_start(ctx)))
    };
    match result {
        Err(_) => *pending_exit = Some(ExitReason::UnhandledPanic),
        Ok(Handled::Terminated(reason)) => {
            apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
            if pending_exit.is_none() {
                *pending_exit = Some(reason);
            }
        }
        Ok(Handled::Consumed) | Ok(Handled::Skipped(_)) => {
            apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
        }
    }
}

/// Dispatch one envelope per the resume protocol.
fn consume_one(
    env: &mut Envelope,
    state: &mut EventState,
    exit_hooks: &mut Vec<Box<dyn FnOnce(&ExitReason) + Send>>,
    ctx: &mut Context<'_>,
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    pending_exit: &mut Option<ExitReason>,
) -> TaskResult {
    // A quit or an emptied stack earlier in this round: leave the rest for
    // cleanup to bounce.
    if pending_exit.is_some() || state.stack.is_empty() {
        return TaskResult::Skip;
    }
    match env.item.take() {
        Item::Taken => TaskResult::Resume,
        Item::Kill { reason } => {
            *pending_exit = Some(reason);
            TaskResult::StopAll
        }
        Item::Exit { source, reason } => {
            if cell.links.lock().trap_exit {
                let payload: Payload = Box::new(ExitMsg { source, reason });
                dispatch_user(env, payload, state, exit_hooks, ctx, cell, core, pending_exit)
            } else if reason.is_normal() {
                // Dropped in-mailbox without reaching user code.
                TaskResult::Resume
            } else {
                *pending_exit = Some(reason);
                TaskResult::StopAll
            }
        }
        Item::Down {
            monitor,
            source,
            reason,
        } => {
            let payload: Payload = Box::new(DownMsg {
                monitor,
                source,
                reason,
            });
            dispatch_user(env, payload, state, exit_hooks, ctx, cell, core, pending_exit)
        }
        Item::Timeout { generation } => {
            if generation != state.active_timeout || !state.pending_timeout {
                // Expired generation: drop without side effect.
                return TaskResult::Resume;
            }
            state.pending_timeout = false;
            let result = {
                let frame = state.stack.last_mut().expect("timeout with empty stack");
                catch_unwind(AssertUnwindSafe(|| frame.behavior.on_timeout(ctx)))
            };
            match result {
                Err(_) => {
                    *pending_exit = Some(ExitReason::UnhandledPanic);
                    TaskResult::StopAll
                }
                Ok(Handled::Terminated(reason)) => {
                    apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
                    if pending_exit.is_none() {
                        *pending_exit = Some(reason);
                    }
                    TaskResult::StopAll
                }
                Ok(Handled::Consumed) | Ok(Handled::Skipped(_)) => {
                    // The timeout fires once; only a consumed message (or a
                    // behavior change) re-requests it.
                    apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
                    if pending_exit.is_some() {
                        TaskResult::StopAll
                    } else {
                        TaskResult::Resume
                    }
                }
            }
        }
        Item::User(payload) => {
            dispatch_user(env, payload, state, exit_hooks, ctx, cell, core, pending_exit)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_user(
    env: &mut Envelope,
    payload: Payload,
    state: &mut EventState,
    exit_hooks: &mut Vec<Box<dyn FnOnce(&ExitReason) + Send>>,
    ctx: &mut Context<'_>,
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    pending_exit: &mut Option<ExitReason>,
) -> TaskResult {
    ctx.current_sender = env.sender;
    ctx.current_mid = env.mid;
    // Invalidate any armed timeout while user code runs; restored below if
    // the message turns out not to match.
    state.active_timeout = state.active_timeout.wrapping_add(1);
    let result = {
        let frame = state.stack.last_mut().expect("dispatch with empty stack");
        catch_unwind(AssertUnwindSafe(|| frame.behavior.handle(ctx, payload)))
    };
    match result {
        Err(_) => {
            *pending_exit = Some(ExitReason::UnhandledPanic);
            TaskResult::StopAll
        }
        Ok(Handled::Consumed) => {
            apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
            rearm_timeout(state, cell, core);
            if pending_exit.is_some() {
                TaskResult::StopAll
            } else {
                TaskResult::Resume
            }
        }
        Ok(Handled::Terminated(reason)) => {
            apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
            if pending_exit.is_none() {
                *pending_exit = Some(reason);
            }
            TaskResult::StopAll
        }
        Ok(Handled::Skipped(payload)) => {
            env.item = Item::User(payload);
            // No match: the armed timeout stays valid.
            state.active_timeout = state.active_timeout.wrapping_sub(1);
            apply_ops(state, exit_hooks, ctx, cell, core, pending_exit);
            TaskResult::Skip
        }
    }
}

fn apply_ops(
    state: &mut EventState,
    exit_hooks: &mut Vec<Box<dyn FnOnce(&ExitReason) + Send>>,
    ctx: &mut Context<'_>,
    cell: &Arc<ActorCell>,
    core: &Arc<SystemCore>,
    pending_exit: &mut Option<ExitReason>,
) {
    let ops = std::mem::take(&mut ctx.ops);
    for op in ops {
        match op {
            StackOp::Push(frame) => {
                ctx.stack_changed = true;
                let timeout = frame.timeout;
                state.stack.push(frame);
                invalidate_timeout(state);
                if let Some(delay) = timeout {
                    arm_timeout(state, cell, core, delay);
                }
            }
            StackOp::Pop => {
                ctx.stack_changed = true;
                state.stack.pop();
                invalidate_timeout(state);
                if let Some(delay) = state.stack.last().and_then(|f| f.timeout) {
                    arm_timeout(state, cell, core, delay);
                }
            }
            StackOp::Quit(reason) => {
                if pending_exit.is_none() {
                    *pending_exit = Some(reason);
                }
            }
            StackOp::OnExit(hook) => exit_hooks.push(hook),
        }
    }
}

fn invalidate_timeout(state: &mut EventState) {
    state.active_timeout = state.active_timeout.wrapping_add(1);
    state.pending_timeout = false;
}

/// Arm a fresh timeout for the current generation.
fn arm_timeout(state: &mut EventState, cell: &Arc<ActorCell>, core: &Arc<SystemCore>, delay: Duration) {
    state.active_timeout = state.active_timeout.wrapping_add(1);
    state.pending_timeout = true;
    core.clock.schedule_item(
        delay,
        cell,
        Item::Timeout {
            generation: state.active_timeout,
        },
    );
}

/// Re-arm the timeout of the topmost frame, if it has one. Called after a
/// consumed message so a still-installed timed behavior restarts its clock.
fn rearm_timeout(state: &mut EventState, cell: &Arc<ActorCell>, core: &Arc<SystemCore>) {
    if let Some(delay) = state.stack.last().and_then(|f| f.timeout) {
        arm_timeout(state, cell, core, delay);
    }
}
