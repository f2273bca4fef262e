//! The clock thread backing `delayed_send` and timeout messages.
//!
//! Delayed deliveries are kept in a min-heap keyed by due time; the thread
//! sleeps until the next deadline or the arrival of a new request on its
//! channel. Targets are held weakly, so a pending delivery never keeps a
//! terminated actor alive; firing into a closed inbox follows the normal
//! bounce path.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::actor::{deliver, ActorCell};
use crate::envelope::{Envelope, Item};

enum ClockCmd {
    Schedule(Delayed),
    Stop,
}

struct Delayed {
    due: Instant,
    /// Tie-breaker preserving submission order for equal deadlines.
    seq: u64,
    target: Weak<ActorCell>,
    env: Box<Envelope>,
}

// Order inverted so the BinaryHeap pops the earliest deadline first.
impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

pub(crate) struct Clock {
    tx: Sender<ClockCmd>,
    thread: Mutex<Option<JoinHandle<()>>>,
    seq: std::sync::atomic::AtomicU64,
}

impl Clock {
    pub(crate) fn start() -> Clock {
        let (tx, rx) = unbounded::<ClockCmd>();
        let handle = std::thread::Builder::new()
            .name("troupe-clock".into())
            .spawn(move || {
                let mut heap: BinaryHeap<Delayed> = BinaryHeap::new();
                loop {
                    // Fire everything that is due.
                    let now = Instant::now();
                    while heap.peek().is_some_and(|d| d.due <= now) {
                        let delayed = heap.pop().expect("peeked entry vanished");
                        if let Some(cell) = delayed.target.upgrade() {
                            deliver(&cell, delayed.env);
                        }
                    }
                    let cmd = match heap.peek() {
                        None => match rx.recv() {
                            Ok(cmd) => cmd,
                            Err(_) => break,
                        },
                        Some(next) => {
                            let wait = next.due.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(wait) {
                                Ok(cmd) => cmd,
                                Err(RecvTimeoutError::Timeout) => continue,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    };
                    match cmd {
                        ClockCmd::Schedule(delayed) => heap.push(delayed),
                        ClockCmd::Stop => break,
                    }
                }
            })
            .expect("failed to spawn clock thread");
        Clock {
            tx,
            thread: Mutex::new(Some(handle)),
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Deliver `env` to `target` after `delay`.
    pub(crate) fn schedule_envelope(
        &self,
        delay: Duration,
        target: &Arc<ActorCell>,
        env: Box<Envelope>,
    ) {
        let delayed = Delayed {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            target: Arc::downgrade(target),
            env,
        };
        // A send error means the clock already stopped; the delivery is
        // dropped like any other post-shutdown message.
        let _ = self.tx.send(ClockCmd::Schedule(delayed));
    }

    /// Deliver a system item (typically a timeout) to `target` after
    /// `delay`.
    pub(crate) fn schedule_item(&self, delay: Duration, target: &Arc<ActorCell>, item: Item) {
        let env = Envelope::system(None, target.id, item);
        self.schedule_envelope(delay, target, env);
    }

    pub(crate) fn stop(&self) {
        let _ = self.tx.send(ClockCmd::Stop);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
