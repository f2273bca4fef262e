//! End-to-end scenarios for the actor runtime: message ordering, priority
//! dominance, selective receive, timeouts, request bouncing, links and
//! monitors, and shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use troupe::{
    behavior_fn, ActorRef, Behavior, BlockingContext, Bounced, Category, Context, DownMsg,
    ExitMsg, ExitReason, Handled, Match, Payload, SpawnOptions, System, SystemConfig,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn system(workers: usize) -> System {
    // Honors RUST_LOG when debugging a failing scenario.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    System::new(SystemConfig {
        workers,
        ..SystemConfig::default()
    })
}

fn as_str(msg: &Payload) -> Option<&'static str> {
    msg.downcast_ref::<&'static str>().copied()
}

// ---------------------------------------------------------------------------
// Scenario A: single ping
// ---------------------------------------------------------------------------

#[test]
fn test_single_ping_pong() {
    struct Pong;
    impl Behavior for Pong {
        fn handle(&mut self, ctx: &mut Context<'_>, msg: Payload) -> Handled {
            if as_str(&msg) == Some("ping") {
                ctx.reply(Box::new("pong"));
                Handled::Consumed
            } else {
                Handled::Skipped(msg)
            }
        }
    }

    struct Ping {
        pong: ActorRef,
        done: Sender<()>,
    }
    impl Behavior for Ping {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            ctx.request(&self.pong, Box::new("ping"));
            Handled::Consumed
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            if as_str(&msg) == Some("pong") {
                self.done.send(()).unwrap();
                Handled::Terminated(ExitReason::Normal)
            } else {
                Handled::Skipped(msg)
            }
        }
    }

    let system = system(2);
    let (done_tx, done_rx) = channel();
    let pong = system.spawn(Box::new(Pong));
    system.spawn(Box::new(Ping {
        pong: pong.clone(),
        done: done_tx,
    }));

    done_rx.recv_timeout(RECV_TIMEOUT).expect("ping never got its pong");
    system.quit(&pong, ExitReason::Normal);
    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Scenario B: 1000 producers, one collector
// ---------------------------------------------------------------------------

#[test]
fn test_thousand_producers_sum() {
    struct Collector {
        sum: u64,
        received: u32,
        done: Sender<u64>,
    }
    impl Behavior for Collector {
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            match msg.downcast::<u64>() {
                Ok(value) => {
                    self.sum += *value;
                    self.received += 1;
                    if self.received == 1000 {
                        self.done.send(self.sum).unwrap();
                        Handled::Terminated(ExitReason::Normal)
                    } else {
                        Handled::Consumed
                    }
                }
                Err(other) => Handled::Skipped(other),
            }
        }
    }

    struct Producer {
        target: ActorRef,
        value: u64,
    }
    impl Behavior for Producer {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            ctx.send(&self.target, Box::new(self.value));
            Handled::Terminated(ExitReason::Normal)
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            Handled::Skipped(msg)
        }
    }

    let system = system(4);
    let (done_tx, done_rx) = channel();
    let collector = system.spawn(Box::new(Collector {
        sum: 0,
        received: 0,
        done: done_tx,
    }));
    for value in 0..1000 {
        system.spawn(Box::new(Producer {
            target: collector.clone(),
            value,
        }));
    }

    let sum = done_rx.recv_timeout(RECV_TIMEOUT).expect("collector incomplete");
    assert_eq!(sum, 499_500);
    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Scenario C: priority dominance
// ---------------------------------------------------------------------------

#[test]
fn test_high_priority_dominates() {
    // The gate behavior holds all traffic in the skip cache until "go"
    // arrives, so the collector below it observes a fully loaded mailbox.
    struct Gate {
        collect: Sender<&'static str>,
    }
    impl Behavior for Gate {
        fn handle(&mut self, ctx: &mut Context<'_>, msg: Payload) -> Handled {
            if as_str(&msg) == Some("go") {
                let collect = self.collect.clone();
                let mut seen = 0u32;
                ctx.push_behavior(behavior_fn(move |_ctx, msg| {
                    let tag = as_str(&msg).expect("collector got a non-tag message");
                    collect.send(tag).unwrap();
                    seen += 1;
                    if seen == 60 {
                        Handled::Terminated(ExitReason::Normal)
                    } else {
                        Handled::Consumed
                    }
                }));
                Handled::Consumed
            } else {
                Handled::Skipped(msg)
            }
        }
    }

    let system = system(2);
    let (tag_tx, tag_rx) = channel();
    let actor = system.spawn_with(
        SpawnOptions::new().priority_aware(),
        Box::new(Gate { collect: tag_tx }),
    );

    for _ in 0..30 {
        system.send(&actor, Box::new("r"));
    }
    for _ in 0..30 {
        system.send_with(&actor, Category::HighPriority, Box::new("h"));
    }
    system.send(&actor, Box::new("go"));

    let order: Vec<&str> = (0..60)
        .map(|_| tag_rx.recv_timeout(RECV_TIMEOUT).expect("missing message"))
        .collect();

    // High-priority traffic gets a 5x share: with 30 messages in each slot,
    // all of the high-priority ones are through within the first 36
    // deliveries, and the very first delivery is high-priority.
    assert_eq!(order[0], "h");
    let last_high = order.iter().rposition(|t| *t == "h").unwrap();
    assert!(
        last_high < 36,
        "high-priority messages should finish within 36 deliveries, last at {last_high}"
    );
    assert_eq!(order.iter().filter(|t| **t == "h").count(), 30);
    assert_eq!(order.iter().filter(|t| **t == "r").count(), 30);

    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Scenario D: skip and resume across a behavior change
// ---------------------------------------------------------------------------

#[test]
fn test_skip_and_resume_preserves_order() {
    struct Evens {
        order: Sender<i32>,
        seen: u32,
    }
    impl Behavior for Evens {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            let order = self.order.clone();
            let mut odds = 0u32;
            ctx.push_behavior(behavior_fn(move |ctx, msg| match msg.downcast::<i32>() {
                Ok(n) if *n % 2 == 1 => {
                    order.send(*n).unwrap();
                    odds += 1;
                    if odds == 5 {
                        ctx.pop_behavior();
                    }
                    Handled::Consumed
                }
                Ok(n) => Handled::Skipped(n),
                Err(other) => Handled::Skipped(other),
            }));
            Handled::Consumed
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            match msg.downcast::<i32>() {
                Ok(n) if *n % 2 == 0 => {
                    self.order.send(*n).unwrap();
                    self.seen += 1;
                    if self.seen == 4 {
                        Handled::Terminated(ExitReason::Normal)
                    } else {
                        Handled::Consumed
                    }
                }
                Ok(n) => Handled::Skipped(n),
                Err(other) => Handled::Skipped(other),
            }
        }
    }

    let system = system(2);
    let (order_tx, order_rx) = channel();
    let actor = system.spawn(Box::new(Evens {
        order: order_tx,
        seen: 0,
    }));
    for n in 1..=9 {
        system.send(&actor, Box::new(n as i32));
    }

    let order: Vec<i32> = (0..9)
        .map(|_| order_rx.recv_timeout(RECV_TIMEOUT).expect("missing value"))
        .collect();
    // The odd handler consumes 1,3,5,7,9 while caching 2,4,6,8 in order;
    // after the behavior pops, the cached evens replay in order.
    assert_eq!(order, vec![1, 3, 5, 7, 9, 2, 4, 6, 8]);

    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Scenario E: timeout precedence
// ---------------------------------------------------------------------------

#[test]
fn test_behavior_timeout_fires_once_and_rearms_on_message() {
    struct Idle {
        events: Sender<&'static str>,
    }
    impl Behavior for Idle {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            let events = self.events.clone();
            struct Waiting {
                events: Sender<&'static str>,
            }
            impl Behavior for Waiting {
                fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
                    match msg.downcast::<i32>() {
                        Ok(_) => {
                            self.events.send("int").unwrap();
                            Handled::Consumed
                        }
                        Err(other) => Handled::Skipped(other),
                    }
                }
                fn on_timeout(&mut self, _ctx: &mut Context<'_>) -> Handled {
                    self.events.send("timeout").unwrap();
                    Handled::Consumed
                }
            }
            ctx.push_behavior_timed(Box::new(Waiting { events }), Duration::from_millis(50));
            Handled::Consumed
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            Handled::Skipped(msg)
        }
    }

    let system = system(2);
    let (events_tx, events_rx) = channel();
    let actor = system.spawn(Box::new(Idle { events: events_tx }));

    // No message for well over 50 ms: the timeout fires exactly once.
    assert_eq!(events_rx.recv_timeout(RECV_TIMEOUT).unwrap(), "timeout");
    assert!(
        events_rx.recv_timeout(Duration::from_millis(150)).is_err(),
        "timeout must not refire without traffic"
    );

    // A consumed message re-requests the timeout.
    system.send(&actor, Box::new(7i32));
    assert_eq!(events_rx.recv_timeout(RECV_TIMEOUT).unwrap(), "int");
    assert_eq!(
        events_rx.recv_timeout(RECV_TIMEOUT).unwrap(),
        "timeout",
        "consuming a message restarts the timeout clock"
    );

    system.quit(&actor, ExitReason::Normal);
    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Scenario F: close and bounce
// ---------------------------------------------------------------------------

#[test]
fn test_request_bounced_with_exit_reason() {
    let system = system(2);
    let mut ctx = system.thread_context();

    // The target never matches anything, so the request stays pending.
    let target = system.spawn(behavior_fn(|_ctx, msg| Handled::Skipped(msg)));
    ctx.request(&target, Box::new("job"));
    system.quit(&target, ExitReason::Custom(7));

    let reply = ctx.recv().expect("expected a bounce reply");
    let bounced = reply.downcast::<Bounced>().expect("expected Bounced");
    assert_eq!(bounced.reason, ExitReason::Custom(7));

    system.await_all_actors_done();
    drop(ctx);
    system.shutdown();
}

// ---------------------------------------------------------------------------
// P1: FIFO per sender/receiver pair
// ---------------------------------------------------------------------------

#[test]
fn test_fifo_per_sender() {
    struct Checker {
        expected: i64,
        done: Sender<()>,
    }
    impl Behavior for Checker {
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            match msg.downcast::<i64>() {
                Ok(n) => {
                    assert_eq!(*n, self.expected, "messages arrived out of order");
                    self.expected += 1;
                    if self.expected == 500 {
                        self.done.send(()).unwrap();
                        Handled::Terminated(ExitReason::Normal)
                    } else {
                        Handled::Consumed
                    }
                }
                Err(other) => Handled::Skipped(other),
            }
        }
    }

    struct Burst {
        target: ActorRef,
    }
    impl Behavior for Burst {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            for n in 0..500i64 {
                ctx.send(&self.target, Box::new(n));
            }
            Handled::Terminated(ExitReason::Normal)
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            Handled::Skipped(msg)
        }
    }

    let system = system(4);
    let (done_tx, done_rx) = channel();
    let checker = system.spawn(Box::new(Checker {
        expected: 0,
        done: done_tx,
    }));
    system.spawn(Box::new(Burst { target: checker }));

    done_rx.recv_timeout(RECV_TIMEOUT).expect("sequence incomplete");
    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Stackful actors
// ---------------------------------------------------------------------------

#[test]
fn test_stackful_echo() {
    let system = system(2);
    let echo = system
        .spawn_blocking(|ctx: &mut BlockingContext<'_>| {
            loop {
                let msg = ctx.receive(|p| Match::Handled(p));
                if as_str(&msg) == Some("stop") {
                    break;
                }
                ctx.reply(msg);
            }
        })
        .expect("spawn_blocking failed");

    let mut tctx = system.thread_context();
    tctx.request(&echo, Box::new("hello"));
    let reply = tctx.recv().expect("no echo reply");
    assert_eq!(as_str(&reply), Some("hello"));

    tctx.send(&echo, Box::new("stop"));
    system.await_all_actors_done();
    drop(tctx);
    system.shutdown();
}

#[test]
fn test_stackful_selective_receive_restores_order() {
    let system = system(2);
    let (order_tx, order_rx) = channel::<String>();

    let tx = order_tx.clone();
    let actor = system
        .spawn_blocking(move |ctx: &mut BlockingContext<'_>| {
            // Pick the integer out of the middle of the stream first.
            let n = ctx.receive(|p| match p.downcast::<i32>() {
                Ok(n) => Match::Handled(*n),
                Err(other) => Match::Skip(other),
            });
            tx.send(format!("int:{n}")).unwrap();
            // The skipped strings must replay in their original order.
            for _ in 0..2 {
                let s = ctx.receive(|p| match p.downcast::<&'static str>() {
                    Ok(s) => Match::Handled(*s),
                    Err(other) => Match::Skip(other),
                });
                tx.send(format!("str:{s}")).unwrap();
            }
        })
        .expect("spawn_blocking failed");

    system.send(&actor, Box::new("a"));
    system.send(&actor, Box::new(42i32));
    system.send(&actor, Box::new("b"));

    let order: Vec<String> = (0..3)
        .map(|_| order_rx.recv_timeout(RECV_TIMEOUT).expect("missing event"))
        .collect();
    assert_eq!(order, vec!["int:42", "str:a", "str:b"]);

    system.await_all_actors_done();
    system.shutdown();
}

#[test]
fn test_stackful_receive_timeout() {
    let system = system(2);
    let (done_tx, done_rx) = channel();

    system
        .spawn_blocking(move |ctx: &mut BlockingContext<'_>| {
            let got: Option<i32> = ctx.receive_timeout(Duration::from_millis(50), |p| {
                match p.downcast::<i32>() {
                    Ok(n) => Match::Handled(*n),
                    Err(other) => Match::Skip(other),
                }
            });
            done_tx.send(got).unwrap();
        })
        .expect("spawn_blocking failed");

    let got = done_rx.recv_timeout(RECV_TIMEOUT).expect("actor stuck");
    assert_eq!(got, None, "receive should give up after the timeout");

    system.await_all_actors_done();
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Links, monitors, trap_exit
// ---------------------------------------------------------------------------

#[test]
fn test_link_propagates_crash() {
    let system = system(2);
    let mut tctx = system.thread_context();

    let linked = system.spawn_with(
        SpawnOptions::new().monitored_by(tctx.self_ref()),
        behavior_fn(|_ctx, msg| Handled::Skipped(msg)),
    );
    let crasher = system.spawn(behavior_fn(|_ctx, msg| Handled::Skipped(msg)));
    system.link(&crasher, &linked);

    system.quit(&crasher, ExitReason::Custom(9));

    let down = tctx
        .recv()
        .expect("no down notification")
        .downcast::<DownMsg>()
        .expect("expected DownMsg");
    assert_eq!(down.source, linked.id());
    assert_eq!(
        down.reason,
        ExitReason::Custom(9),
        "a non-trapping linked actor terminates with the peer's reason"
    );

    system.await_all_actors_done();
    drop(tctx);
    system.shutdown();
}

#[test]
fn test_trap_exit_converts_exit_to_message() {
    struct Trapper {
        peer: ActorRef,
        events: Sender<ExitReason>,
    }
    impl Behavior for Trapper {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            ctx.trap_exit(true);
            ctx.link(&self.peer);
            Handled::Consumed
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            match msg.downcast::<ExitMsg>() {
                Ok(exit) => {
                    self.events.send(exit.reason.clone()).unwrap();
                    Handled::Terminated(ExitReason::Normal)
                }
                Err(other) => Handled::Skipped(other),
            }
        }
    }

    let system = system(2);
    let (events_tx, events_rx) = channel();
    let peer = system.spawn(behavior_fn(|_ctx, msg| Handled::Skipped(msg)));
    system.spawn(Box::new(Trapper {
        peer: peer.clone(),
        events: events_tx,
    }));

    // Give the trapper a moment to install the link before the crash.
    std::thread::sleep(Duration::from_millis(50));
    system.quit(&peer, ExitReason::Custom(3));

    let reason = events_rx.recv_timeout(RECV_TIMEOUT).expect("no exit message");
    assert_eq!(reason, ExitReason::Custom(3));

    system.await_all_actors_done();
    system.shutdown();
}

#[test]
fn test_monitor_and_link_deliver_down_then_exit() {
    struct Watcher {
        peer: ActorRef,
        events: Sender<&'static str>,
    }
    impl Behavior for Watcher {
        fn on_start(&mut self, ctx: &mut Context<'_>) -> Handled {
            ctx.trap_exit(true);
            ctx.monitor(&self.peer);
            ctx.link(&self.peer);
            ctx.send(&self.peer, Box::new("armed"));
            Handled::Consumed
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            if msg.downcast_ref::<DownMsg>().is_some() {
                self.events.send("down").unwrap();
                Handled::Consumed
            } else if msg.downcast_ref::<ExitMsg>().is_some() {
                self.events.send("exit").unwrap();
                Handled::Terminated(ExitReason::Normal)
            } else {
                Handled::Skipped(msg)
            }
        }
    }

    // The peer quits as soon as it sees "armed", so the watcher's monitor
    // and link are in place before the termination.
    let system = system(2);
    let (events_tx, events_rx) = channel();
    let peer = system.spawn(behavior_fn(|ctx, msg| {
        if as_str(&msg) == Some("armed") {
            ctx.quit(ExitReason::Custom(5));
            Handled::Consumed
        } else {
            Handled::Skipped(msg)
        }
    }));
    system.spawn(Box::new(Watcher {
        peer,
        events: events_tx,
    }));

    assert_eq!(events_rx.recv_timeout(RECV_TIMEOUT).unwrap(), "down");
    assert_eq!(events_rx.recv_timeout(RECV_TIMEOUT).unwrap(), "exit");

    system.await_all_actors_done();
    system.shutdown();
}

#[test]
fn test_panic_becomes_unhandled_panic_reason() {
    let system = system(2);
    let mut tctx = system.thread_context();

    let victim = system.spawn_with(
        SpawnOptions::new().monitored_by(tctx.self_ref()),
        behavior_fn(|_ctx, _msg| panic!("boom")),
    );
    system.send(&victim, Box::new("trigger"));

    let down = tctx
        .recv()
        .expect("no down notification")
        .downcast::<DownMsg>()
        .expect("expected DownMsg");
    assert_eq!(down.reason, ExitReason::UnhandledPanic);

    system.await_all_actors_done();
    drop(tctx);
    system.shutdown();
}

// ---------------------------------------------------------------------------
// Spawn options
// ---------------------------------------------------------------------------

#[test]
fn test_lazy_init_waits_for_first_message() {
    struct Lazy {
        started: Arc<AtomicU64>,
        done: Sender<()>,
    }
    impl Behavior for Lazy {
        fn on_start(&mut self, _ctx: &mut Context<'_>) -> Handled {
            self.started.store(1, Ordering::SeqCst);
            Handled::Consumed
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, _msg: Payload) -> Handled {
            self.done.send(()).unwrap();
            Handled::Terminated(ExitReason::Normal)
        }
    }

    let system = system(2);
    let started = Arc::new(AtomicU64::new(0));
    let (done_tx, done_rx) = channel();
    let actor = system.spawn_with(
        SpawnOptions::new().lazy_init(),
        Box::new(Lazy {
            started: Arc::clone(&started),
            done: done_tx,
        }),
    );

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        started.load(Ordering::SeqCst),
        0,
        "lazy actor must not start before its first message"
    );

    system.send(&actor, Box::new("wake"));
    done_rx.recv_timeout(RECV_TIMEOUT).expect("lazy actor never woke");
    assert_eq!(started.load(Ordering::SeqCst), 1);

    system.await_all_actors_done();
    system.shutdown();
}

#[test]
fn test_detached_actor_replies() {
    let system = system(2);
    let echo = system.spawn_with(
        SpawnOptions::new().detached(),
        behavior_fn(|ctx, msg| {
            ctx.reply(msg);
            Handled::Consumed
        }),
    );

    let mut tctx = system.thread_context();
    tctx.request(&echo, Box::new("over-there"));
    let reply = tctx.recv().expect("no reply from detached actor");
    assert_eq!(as_str(&reply), Some("over-there"));

    system.quit(&echo, ExitReason::Normal);
    system.await_all_actors_done();
    drop(tctx);
    system.shutdown();
}

#[test]
fn test_detached_stackful_actor() {
    let system = system(2);
    let (done_tx, done_rx) = channel();
    let actor = system
        .spawn_blocking_with(SpawnOptions::new().detached(), move |ctx| {
            let n = ctx.receive(|p| match p.downcast::<i32>() {
                Ok(n) => Match::Handled(*n),
                Err(other) => Match::Skip(other),
            });
            done_tx.send(n).unwrap();
        })
        .expect("detached stackful spawn failed");

    system.send(&actor, Box::new(11i32));
    assert_eq!(done_rx.recv_timeout(RECV_TIMEOUT).unwrap(), 11);

    system.await_all_actors_done();
    system.shutdown();
}

#[test]
fn test_hidden_actor_not_counted() {
    let system = system(2);
    // A hidden actor that never terminates on its own.
    let hidden = system.spawn_with(
        SpawnOptions::new().hidden(),
        behavior_fn(|_ctx, msg| Handled::Skipped(msg)),
    );
    let visible = system.spawn(behavior_fn(|ctx, _msg| {
        ctx.quit(ExitReason::Normal);
        Handled::Consumed
    }));
    system.send(&visible, Box::new("finish"));

    // Returns even though the hidden actor is still alive.
    system.await_all_actors_done();
    assert!(hidden.is_alive());
    system.shutdown();
    assert!(!hidden.is_alive());
}

// ---------------------------------------------------------------------------
// Delayed sends and distribution
// ---------------------------------------------------------------------------

#[test]
fn test_delayed_send_arrives_after_delay() {
    let system = system(2);
    let (done_tx, done_rx) = channel();
    let actor = system.spawn(behavior_fn(move |_ctx, _msg| {
        done_tx.send(Instant::now()).unwrap();
        Handled::Terminated(ExitReason::Normal)
    }));

    let sent_at = Instant::now();
    system.delayed_send(&actor, Duration::from_millis(80), Box::new("later"));

    let delivered_at = done_rx.recv_timeout(RECV_TIMEOUT).expect("never delivered");
    assert!(
        delivered_at.duration_since(sent_at) >= Duration::from_millis(80),
        "delayed send arrived early"
    );

    system.await_all_actors_done();
    system.shutdown();
}

#[test]
fn test_work_spreads_across_workers() {
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct Recorder {
        threads: Arc<Mutex<HashSet<std::thread::ThreadId>>>,
    }
    impl Behavior for Recorder {
        fn on_start(&mut self, _ctx: &mut Context<'_>) -> Handled {
            self.threads.lock().unwrap().insert(std::thread::current().id());
            Handled::Terminated(ExitReason::Normal)
        }
        fn handle(&mut self, _ctx: &mut Context<'_>, msg: Payload) -> Handled {
            Handled::Skipped(msg)
        }
    }

    let system = system(4);
    let threads = Arc::new(Mutex::new(HashSet::new()));
    for _ in 0..200 {
        system.spawn(Box::new(Recorder {
            threads: Arc::clone(&threads),
        }));
    }
    system.await_all_actors_done();

    // Work stealing is best-effort; with 200 actors over 4 workers at least
    // two threads should have run something.
    assert!(threads.lock().unwrap().len() >= 2);
    system.shutdown();
}
