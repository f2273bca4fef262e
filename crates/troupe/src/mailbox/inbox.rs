//! Multi-producer single-consumer inbox with a blocking state machine.
//!
//! Producers push onto a lock-free LIFO stack; the consumer drains the stack
//! and converts it to FIFO order via the task queue's `lifo_append` protocol.
//! The open/blocked/closed state is encoded in the stack word itself as
//! tagged values, so enqueue and reader wakeup are coupled by a single CAS:
//!
//! - `0` — open and empty,
//! - `1` — blocked (the consumer parked on an empty inbox),
//! - `2` — closed (terminal),
//! - anything else — pointer to the most recently pushed envelope.
//!
//! A producer whose CAS flips `blocked` to a node pointer is the unique waker
//! for that park/unpark cycle and observes [`PushResult::UnblockedReader`]
//! exactly once.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::envelope::Envelope;
use crate::queue::{QueueNode, TaskQueue};

use super::MultiplexedQueue;

const OPEN_EMPTY: usize = 0;
const BLOCKED: usize = 1;
const CLOSED: usize = 2;

/// Outcome of a producer-side push.
#[derive(Debug)]
pub(crate) enum PushResult {
    /// Enqueued; the reader was not parked.
    Success,
    /// Enqueued into a blocked inbox; the caller must wake the reader.
    UnblockedReader,
    /// The inbox is closed; the envelope is handed back for bouncing.
    Closed(Box<Envelope>),
}

/// The producer-facing half of a mailbox.
pub(crate) struct Inbox {
    stack: AtomicUsize,
}

// Raw envelope pointers are only ever owned by the stack word; the tagged
// pointer protocol keeps every node uniquely owned.
unsafe impl Send for Inbox {}
unsafe impl Sync for Inbox {}

impl Inbox {
    pub(crate) fn new() -> Self {
        Inbox {
            stack: AtomicUsize::new(OPEN_EMPTY),
        }
    }

    /// Push an envelope. Safe to call from any thread.
    pub(crate) fn push_back(&self, env: Box<Envelope>) -> PushResult {
        let node = Box::into_raw(env);
        let mut current = self.stack.load(Ordering::SeqCst);
        loop {
            match current {
                CLOSED => {
                    // Safety: node came from Box::into_raw above and was
                    // never published.
                    return PushResult::Closed(unsafe { Box::from_raw(node) });
                }
                BLOCKED => {
                    // Safety: node is unpublished; we may freely mutate it.
                    unsafe {
                        *(*node).next_slot() = None;
                    }
                    match self.stack.compare_exchange_weak(
                        BLOCKED,
                        node as usize,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return PushResult::UnblockedReader,
                        Err(actual) => current = actual,
                    }
                }
                prev => {
                    // Safety: node is unpublished. On CAS success the stack
                    // word transfers ownership of `prev` into our link.
                    unsafe {
                        *(*node).next_slot() = if prev == OPEN_EMPTY {
                            None
                        } else {
                            Some(Box::from_raw(prev as *mut Envelope))
                        };
                    }
                    match self.stack.compare_exchange_weak(
                        prev,
                        node as usize,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return PushResult::Success,
                        Err(actual) => {
                            // Relinquish the speculative link without
                            // dropping the node it points at.
                            unsafe {
                                let _ = (*node).next_slot().take().map(Box::into_raw);
                            }
                            current = actual;
                        }
                    }
                }
            }
        }
    }

    /// Whether undelivered envelopes are pending.
    pub(crate) fn has_data(&self) -> bool {
        self.stack.load(Ordering::SeqCst) > CLOSED
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.stack.load(Ordering::SeqCst) == CLOSED
    }

    pub(crate) fn is_blocked(&self) -> bool {
        self.stack.load(Ordering::SeqCst) == BLOCKED
    }

    /// Consumer only: transition to blocked iff the inbox is empty.
    pub(crate) fn try_block(&self) -> bool {
        self.stack
            .compare_exchange(OPEN_EMPTY, BLOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Consumer only: after a successful [`try_block`](Self::try_block),
    /// sleep until the next push (or a close) unblocks the inbox. The waker
    /// must notify `cv` while holding `lock`.
    pub(crate) fn synchronized_await(&self, lock: &Mutex<()>, cv: &Condvar) {
        let mut guard = lock.lock();
        while self.is_blocked() {
            cv.wait(&mut guard);
        }
    }

    /// Consumer only: drain all pending envelopes into the mailbox queue,
    /// restoring FIFO order. Returns the number of envelopes moved.
    pub(crate) fn fetch_more(&self, queue: &mut MultiplexedQueue) -> usize {
        let Some(head) = self.take_stack() else {
            return 0;
        };
        let mut count = 0;
        walk_chain(head, |env| {
            queue.lifo_append(env);
            count += 1;
        });
        queue.stop_lifo_append();
        count
    }

    /// Consumer only: close the inbox and return any pending envelopes in
    /// FIFO order so the caller can bounce them. Closed is terminal.
    pub(crate) fn close(&self) -> TaskQueue<Envelope> {
        let prev = self.stack.swap(CLOSED, Ordering::SeqCst);
        let mut pending = TaskQueue::new();
        if prev > CLOSED {
            walk_chain(prev as *mut Envelope, |env| pending.lifo_append(env));
            pending.stop_lifo_append();
        }
        pending
    }

    /// Atomically detach the pending LIFO chain, leaving the inbox open and
    /// empty. Returns `None` when there is nothing to take.
    fn take_stack(&self) -> Option<*mut Envelope> {
        let mut current = self.stack.load(Ordering::SeqCst);
        loop {
            if current <= CLOSED {
                return None;
            }
            match self.stack.compare_exchange_weak(
                current,
                OPEN_EMPTY,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(current as *mut Envelope),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Walk a detached LIFO chain newest-first, transferring ownership of each
/// envelope to `f`.
fn walk_chain(mut head: *mut Envelope, mut f: impl FnMut(Box<Envelope>)) {
    while !head.is_null() {
        // Safety: the chain was detached from the stack word, so each node
        // is exclusively ours.
        let mut env = unsafe { Box::from_raw(head) };
        let next = env.next_slot().take();
        head = next.map_or(ptr::null_mut(), Box::into_raw);
        f(env);
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        let prev = self.stack.swap(CLOSED, Ordering::SeqCst);
        if prev > CLOSED {
            walk_chain(prev as *mut Envelope, drop);
        }
    }
}

impl std::fmt::Debug for Inbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.is_closed() {
            "closed"
        } else if self.is_blocked() {
            "blocked"
        } else if self.has_data() {
            "pending"
        } else {
            "empty"
        };
        f.debug_struct("Inbox").field("state", &state).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
