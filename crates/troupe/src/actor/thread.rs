//! Thread-backed execution: detached actors and converted external threads.
//!
//! A detached actor owns an OS thread instead of sharing the pool; it is
//! woken through its cell's condvar rather than the scheduler. An external
//! thread can acquire a converted actor identity (a hidden cell plus a
//! [`BlockingContext`]) so it can exchange request/reply traffic with real
//! actors.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::actor::stackful::BlockingContext;
use crate::actor::{event_based, ActorCell, ActorKind, Flavor, ResumeOutcome, BLOCKED, DONE};
use crate::envelope::ExitReason;
use crate::system::SystemCore;

/// Thread main for a detached event-based actor: resume whenever runnable,
/// sleep on the cell's condvar while parked.
pub(crate) fn run_detached_event(cell: Arc<ActorCell>, core: Arc<SystemCore>) {
    let quantum = core.config.resume_quantum;
    loop {
        {
            let mut slot = cell.signal.lock.lock();
            while cell.exec_state.load(Ordering::SeqCst) == BLOCKED {
                cell.signal.cv.wait(&mut slot);
            }
        }
        if cell.exec_state.load(Ordering::SeqCst) == DONE {
            break;
        }
        match event_based::resume(&cell, &core, quantum) {
            ResumeOutcome::Done => break,
            ResumeOutcome::AwaitingMessage | ResumeOutcome::ResumeLater => {}
        }
    }
}

/// Give the calling thread a converted actor identity. The cell is hidden
/// (not counted by `await_all_actors_done`) and cleaned up when the context
/// drops.
pub(crate) fn converted_context(core: &Arc<SystemCore>) -> BlockingContext<'static> {
    let cell = ActorCell::new(
        ActorKind::Thread,
        Flavor::Thread,
        Arc::downgrade(core),
        false,
        true,
        false,
        false,
    );
    if core.stopped() {
        let mut body = cell.body.lock();
        super::cleanup(&cell, &mut body, ExitReason::Shutdown, core);
        drop(body);
    } else {
        core.coordinator.register(&cell);
    }
    BlockingContext::thread_mode(cell, Arc::clone(core), true)
}
