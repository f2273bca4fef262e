//! The actor system: construction, spawning, and the public send surface.
//!
//! A [`System`] value is the explicit home of everything that would
//! otherwise be process-global state: the coordinator with its worker pool,
//! the actor table, and the clock thread. Actor handles ([`ActorRef`]) are
//! id + weak-reference pairs; the coordinator's table holds the owning
//! references, so a terminated actor is indistinguishable from a
//! never-existing one as soon as its table entry is gone.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::actor::event_based::Behavior;
use crate::actor::stackful::{self, BlockingContext, BlockingEntry};
use crate::actor::{
    self, cleanup, deliver, link_cells, monitor_cell, unlink_cells, ActorCell, ActorKind,
    EventState, Flavor, StackfulState,
};
use crate::config::SystemConfig;
use crate::envelope::{
    ActorId, Bounced, Category, Envelope, ExitReason, Item, MessageId, Payload,
};
use crate::error::{SendError, SpawnError};
use crate::sched::{Clock, Coordinator};

// ---------------------------------------------------------------------------
// ActorRef
// ---------------------------------------------------------------------------

/// A handle to an actor: its id plus a weak reference to its cell.
///
/// Holding a handle never keeps a terminated actor alive. Sends to a dead
/// handle are dropped silently; requests come back as
/// [`Bounced`](crate::Bounced) error replies.
#[derive(Clone)]
pub struct ActorRef {
    pub(crate) id: ActorId,
    pub(crate) cell: Weak<ActorCell>,
}

impl ActorRef {
    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Best-effort liveness check.
    pub fn is_alive(&self) -> bool {
        match self.cell.upgrade() {
            Some(cell) => cell.links.lock().exit_reason.is_none(),
            None => false,
        }
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ActorRef {}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorRef({})", self.id)
    }
}

// ---------------------------------------------------------------------------
// SpawnOptions
// ---------------------------------------------------------------------------

/// Configuration of a single spawn.
#[derive(Clone, Default)]
pub struct SpawnOptions {
    pub(crate) detached: bool,
    pub(crate) lazy_init: bool,
    pub(crate) priority_aware: bool,
    pub(crate) hidden: bool,
    pub(crate) monitored_by: Vec<ActorRef>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run on a dedicated OS thread outside the pool.
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    /// Start parked; the actor is not activated until its first message.
    pub fn lazy_init(mut self) -> Self {
        self.lazy_init = true;
        self
    }

    /// Use the four-slot multiplexed mailbox. Without this, every category
    /// routes to the regular slot and nothing overtakes.
    pub fn priority_aware(mut self) -> Self {
        self.priority_aware = true;
        self
    }

    /// Exclude from `await_all_actors_done`.
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Deliver a down-notification to `watcher` when the new actor
    /// terminates.
    pub fn monitored_by(mut self, watcher: ActorRef) -> Self {
        self.monitored_by.push(watcher);
        self
    }
}

impl fmt::Debug for SpawnOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnOptions")
            .field("detached", &self.detached)
            .field("lazy_init", &self.lazy_init)
            .field("priority_aware", &self.priority_aware)
            .field("hidden", &self.hidden)
            .field("monitored_by", &self.monitored_by.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SystemCore
// ---------------------------------------------------------------------------

/// Shared internals of a system, reference-counted between the public
/// handle, the workers, and the actor cells (weakly).
pub(crate) struct SystemCore {
    pub(crate) config: SystemConfig,
    pub(crate) coordinator: Coordinator,
    pub(crate) clock: Clock,
}

impl SystemCore {
    pub(crate) fn stopped(&self) -> bool {
        self.coordinator.stopped()
    }

    pub(crate) fn find(&self, id: ActorId) -> Option<Arc<ActorCell>> {
        self.coordinator.find(id)
    }

    pub(crate) fn deregister(&self, cell: &ActorCell) {
        self.coordinator.deregister(cell);
    }

    /// Deliver a payload, or bounce it if the recipient is already gone.
    pub(crate) fn send_payload(
        &self,
        sender: Option<ActorId>,
        target: &ActorRef,
        mid: MessageId,
        payload: Payload,
    ) {
        match target.cell.upgrade() {
            Some(cell) => deliver(&cell, Envelope::user(sender, target.id, mid, payload)),
            None => {
                // The recipient's cell is gone entirely; only requests get
                // an answer.
                if mid.is_request() {
                    if let Some(sender_id) = sender {
                        if let Some(sender_cell) = self.find(sender_id) {
                            deliver(
                                &sender_cell,
                                Envelope::user(
                                    Some(target.id),
                                    sender_id,
                                    mid.response(),
                                    Box::new(Bounced {
                                        reason: ExitReason::Normal,
                                    }),
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn delayed_send(
        &self,
        sender: Option<ActorId>,
        target: &ActorRef,
        delay: Duration,
        payload: Payload,
    ) {
        if let Some(cell) = target.cell.upgrade() {
            let env = Envelope::user(sender, target.id, MessageId::of(Category::Regular), payload);
            self.clock.schedule_envelope(delay, &cell, env);
        }
    }

    /// Synthesize an error reply for an undeliverable request. Anything
    /// that is not a request is dropped.
    pub(crate) fn bounce(&self, env: Box<Envelope>, reason: &ExitReason) {
        if !env.mid.is_request() {
            return;
        }
        let Some(sender) = env.sender else {
            return;
        };
        let Some(sender_cell) = self.find(sender) else {
            return;
        };
        let reply = Envelope::user(
            Some(env.recipient),
            sender,
            env.mid.response(),
            Box::new(Bounced {
                reason: reason.clone(),
            }),
        );
        deliver(&sender_cell, reply);
    }

    pub(crate) fn spawn_event(
        self: &Arc<Self>,
        options: SpawnOptions,
        behavior: Box<dyn Behavior>,
    ) -> ActorRef {
        let cell = ActorCell::new(
            ActorKind::EventBased,
            Flavor::EventBased(EventState::new(behavior)),
            Arc::downgrade(self),
            options.priority_aware,
            options.hidden,
            options.detached,
            options.lazy_init,
        );
        let actor_ref = ActorRef {
            id: cell.id,
            cell: Arc::downgrade(&cell),
        };
        if self.stopped() {
            let mut body = cell.body.lock();
            cleanup(&cell, &mut body, ExitReason::Shutdown, self);
            return actor_ref;
        }
        self.install_monitors(&options, &cell);
        self.coordinator.register(&cell);
        tracing::trace!(actor = %cell.id, "spawned event-based actor");
        if options.detached {
            let core = Arc::clone(self);
            let thread_cell = Arc::clone(&cell);
            let handle = std::thread::Builder::new()
                .name(format!("troupe-actor-{}", cell.id))
                .spawn(move || actor::thread::run_detached_event(thread_cell, core))
                .expect("failed to spawn detached actor thread");
            self.coordinator.adopt_detached(handle);
        } else if !options.lazy_init {
            self.coordinator.schedule(Arc::clone(&cell));
        }
        actor_ref
    }

    pub(crate) fn spawn_stackful(
        self: &Arc<Self>,
        options: SpawnOptions,
        entry: BlockingEntry,
    ) -> Result<ActorRef, SpawnError> {
        if self.stopped() {
            return Err(SpawnError::SystemStopped);
        }
        // Pool-scheduled stackful actors need real fibers; detached ones run
        // on a plain OS thread and work everywhere.
        if !options.detached && !stackful::context_switching_available() {
            return Err(SpawnError::ContextSwitchingUnavailable);
        }
        let (fiber_entry, thread_entry) = if options.detached {
            (None, Some(entry))
        } else {
            (Some(entry), None)
        };
        let cell = ActorCell::new(
            ActorKind::Stackful,
            Flavor::Stackful(StackfulState { entry: fiber_entry }),
            Arc::downgrade(self),
            options.priority_aware,
            options.hidden,
            options.detached,
            options.lazy_init,
        );
        let actor_ref = ActorRef {
            id: cell.id,
            cell: Arc::downgrade(&cell),
        };
        self.install_monitors(&options, &cell);
        self.coordinator.register(&cell);
        tracing::trace!(actor = %cell.id, detached = options.detached, "spawned stackful actor");
        if let Some(entry) = thread_entry {
            let core = Arc::clone(self);
            let thread_cell = Arc::clone(&cell);
            let handle = std::thread::Builder::new()
                .name(format!("troupe-actor-{}", cell.id))
                .spawn(move || stackful::run_detached(thread_cell, core, entry))
                .expect("failed to spawn detached actor thread");
            self.coordinator.adopt_detached(handle);
        } else if !options.lazy_init {
            self.coordinator.schedule(Arc::clone(&cell));
        }
        Ok(actor_ref)
    }

    fn install_monitors(self: &Arc<Self>, options: &SpawnOptions, cell: &Arc<ActorCell>) {
        for watcher in &options.monitored_by {
            if let Some(watcher_cell) = watcher.cell.upgrade() {
                monitor_cell(&watcher_cell, cell);
            }
        }
    }

    pub(crate) fn quit(&self, target: &ActorRef, reason: ExitReason) {
        if let Some(cell) = target.cell.upgrade() {
            deliver(&cell, Envelope::system(None, target.id, Item::Kill { reason }));
        }
    }
}

// ---------------------------------------------------------------------------
// System
// ---------------------------------------------------------------------------

/// A running actor system. Dropping it shuts the pool down.
pub struct System {
    core: Arc<SystemCore>,
}

impl System {
    pub fn new(config: SystemConfig) -> System {
        let workers = config.effective_workers();
        let core = Arc::new(SystemCore {
            coordinator: Coordinator::new(workers),
            clock: Clock::start(),
            config,
        });
        core.coordinator.start_workers(&core);
        tracing::debug!(workers, "actor system started");
        System { core }
    }

    /// Spawn an event-based actor with default options.
    pub fn spawn(&self, behavior: Box<dyn Behavior>) -> ActorRef {
        self.core.spawn_event(SpawnOptions::default(), behavior)
    }

    pub fn spawn_with(&self, options: SpawnOptions, behavior: Box<dyn Behavior>) -> ActorRef {
        self.core.spawn_event(options, behavior)
    }

    /// Spawn a stackful actor that may issue blocking receives.
    pub fn spawn_blocking(
        &self,
        entry: impl FnOnce(&mut BlockingContext<'_>) + Send + 'static,
    ) -> Result<ActorRef, SpawnError> {
        self.core
            .spawn_stackful(SpawnOptions::default(), Box::new(entry))
    }

    pub fn spawn_blocking_with(
        &self,
        options: SpawnOptions,
        entry: impl FnOnce(&mut BlockingContext<'_>) + Send + 'static,
    ) -> Result<ActorRef, SpawnError> {
        self.core.spawn_stackful(options, Box::new(entry))
    }

    /// Acquire a converted actor identity for the calling thread, enabling
    /// request/reply traffic with actors from outside the pool.
    pub fn thread_context(&self) -> BlockingContext<'static> {
        actor::thread::converted_context(&self.core)
    }

    /// Send a regular message from no particular sender.
    pub fn send(&self, target: &ActorRef, payload: Payload) {
        self.send_with(target, Category::Regular, payload);
    }

    pub fn send_with(&self, target: &ActorRef, category: Category, payload: Payload) {
        self.core
            .send_payload(None, target, MessageId::of(category), payload);
    }

    /// Acknowledged send: reports whether the recipient was still alive at
    /// delivery time. Best-effort, as the recipient may terminate right
    /// after the check.
    pub fn try_send(&self, target: &ActorRef, payload: Payload) -> Result<(), SendError> {
        let Some(cell) = target.cell.upgrade() else {
            return Err(SendError::RecipientTerminated);
        };
        if cell.links.lock().exit_reason.is_some() {
            return Err(SendError::RecipientTerminated);
        }
        self.core
            .send_payload(None, target, MessageId::of(Category::Regular), payload);
        Ok(())
    }

    /// Deliver `payload` to `target` after `delay`.
    pub fn delayed_send(&self, target: &ActorRef, delay: Duration, payload: Payload) {
        self.core.delayed_send(None, target, delay, payload);
    }

    /// Force-terminate an actor. The kill bypasses `trap_exit`.
    pub fn quit(&self, target: &ActorRef, reason: ExitReason) {
        self.core.quit(target, reason);
    }

    /// Link two actors from outside.
    pub fn link(&self, a: &ActorRef, b: &ActorRef) {
        if let (Some(a), Some(b)) = (a.cell.upgrade(), b.cell.upgrade()) {
            link_cells(&a, &b);
        }
    }

    pub fn unlink(&self, a: &ActorRef, b: &ActorRef) {
        if let (Some(a), Some(b)) = (a.cell.upgrade(), b.cell.upgrade()) {
            unlink_cells(&a, &b);
        }
    }

    /// Block until every non-hidden actor has terminated.
    pub fn await_all_actors_done(&self) {
        self.core.coordinator.await_all_actors_done();
    }

    /// Stop the scheduler: join workers, terminate stragglers (bouncing
    /// their pending requests), stop the clock. Idempotent.
    pub fn shutdown(&self) {
        self.core.coordinator.shutdown(&self.core);
        self.core.clock.stop();
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("workers", &self.core.coordinator.num_workers())
            .field("stopped", &self.core.stopped())
            .finish()
    }
}
