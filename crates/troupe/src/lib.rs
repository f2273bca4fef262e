//! Troupe actor framework.
//!
//! Lightweight actors multiplexed M:N across a bounded pool of OS worker
//! threads. Messages are delivered FIFO per sender/receiver pair through a
//! deficit-round-robin multiplexed mailbox, so high-priority traffic can
//! overtake regular traffic without reordering either stream. Idle workers
//! steal from busy peers; parked actors cost nothing until a message wakes
//! them.
//!
//! ## Actor flavors
//!
//! - **Event-based** (the default): a stack of [`Behavior`]s driven by the
//!   scheduler. Handlers never block; waiting for a different message shape
//!   is expressed by pushing a behavior ([`Context::push_behavior`]),
//!   optionally with a timeout. Unmatched messages wait in a skip cache
//!   without being reordered.
//! - **Stackful**: the actor runs on its own coroutine stack and may call
//!   [`BlockingContext::receive`] anywhere, including nested inside a
//!   handler. Fibers are pinned to the worker that created them.
//! - **Detached**: either flavor can instead own a dedicated OS thread
//!   ([`SpawnOptions::detached`]).
//!
//! ## A minimal ping/pong
//!
//! ```
//! use troupe::{behavior_fn, Handled, System, SystemConfig};
//!
//! let system = System::new(SystemConfig::default());
//! let pong = system.spawn(behavior_fn(|ctx, msg| {
//!     if msg.downcast_ref::<&str>() == Some(&"ping") {
//!         ctx.reply(Box::new("pong"));
//!     }
//!     Handled::Consumed
//! }));
//! system.send(&pong, Box::new("ping"));
//! system.quit(&pong, troupe::ExitReason::Normal);
//! system.await_all_actors_done();
//! system.shutdown();
//! ```

mod actor;
mod config;
mod envelope;
mod error;
mod mailbox;
mod queue;
mod sched;
mod system;

pub use actor::event_based::{behavior_fn, Behavior, Context, Handled};
pub use actor::stackful::{BlockingContext, BlockingEntry, Match};
pub use config::{SystemConfig, DEFAULT_RESUME_QUANTUM, DEFAULT_STACK_SIZE};
pub use envelope::{ActorId, Bounced, Category, DownMsg, ExitMsg, ExitReason, MessageId, Payload};
pub use error::{SendError, SpawnError};
pub use system::{ActorRef, SpawnOptions, System};
