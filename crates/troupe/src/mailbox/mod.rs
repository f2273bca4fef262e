//! Per-actor mailboxes.
//!
//! A mailbox is split along the producer/consumer boundary:
//!
//! - [`Inbox`] is the producer-facing half: a lock-free MPSC stack with the
//!   open/blocked/closed state machine that couples enqueue to reader
//!   wakeup. It lives in the actor's shared header.
//! - [`MultiplexedQueue`] is the consumer-facing half: the four-slot
//!   weighted-DRR queue the resume loop drains. It lives in the actor body
//!   and is only ever touched by the worker currently running the actor.
//!
//! [`Inbox::fetch_more`] moves pending envelopes from the producer side to
//! the consumer side, restoring FIFO order per producer.

mod inbox;
mod multiplexed;

pub(crate) use inbox::{Inbox, PushResult};
pub(crate) use multiplexed::MultiplexedQueue;
