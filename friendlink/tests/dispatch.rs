mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use common::{Counter, ME, Recorder, wait_for};
use friendlink::callback::FriendAdded;
use friendlink::{
    CallbackPayload, CallbackRegistry, Dispatcher, LoopbackClient, NativeClient, Pipe,
    RawCallback, Registration, Sink, StopOutcome, WorkerState,
};

struct Rig {
    native: Arc<LoopbackClient>,
    registry: Arc<CallbackRegistry>,
    dispatcher: Arc<Dispatcher>,
    pipe: Pipe,
}

fn rig(stop_timeout: Duration) -> Rig {
    let native = Arc::new(LoopbackClient::new(ME));
    let pipe = native.create_pipe().unwrap();
    let registry = CallbackRegistry::new();
    let dispatcher = Dispatcher::new(native.clone(), Arc::clone(&registry))
        .with_stop_timeout(stop_timeout);
    Rig {
        native,
        registry,
        dispatcher: Arc::new(dispatcher),
        pipe,
    }
}

#[test]
fn records_are_dispatched_in_pipe_order_and_released() {
    let rig = rig(Duration::from_secs(2));
    let recorder = Arc::new(Recorder::default());
    let _reg = rig.registry.register_sink(9000, recorder.clone()).unwrap();
    for n in 0..100u8 {
        rig.native.push_to(rig.pipe, RawCallback::new(9000, vec![n]));
    }

    assert!(rig.dispatcher.start(rig.pipe).unwrap());
    assert!(wait_for(|| recorder.len() == 100));
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::Joined);

    let order: Vec<u8> = recorder.seen().into_iter().map(|p| p[0]).collect();
    assert_eq!(order, (0..100).collect::<Vec<u8>>());
    assert_eq!(rig.native.polled(), 100);
    assert_eq!(rig.native.released(), 100);
}

#[test]
fn concurrent_starts_create_one_worker() {
    let rig = rig(Duration::from_secs(2));
    let started: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| rig.dispatcher.start(rig.pipe).unwrap()))
            .collect();
        handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum()
    });
    assert_eq!(started, 1);
    assert_eq!(rig.dispatcher.worker_count(), 1);
    assert!(rig.dispatcher.is_running(rig.pipe));
}

#[test]
fn stop_is_idempotent() {
    let rig = rig(Duration::from_secs(2));
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::NotRunning);
    rig.dispatcher.start(rig.pipe).unwrap();
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::Joined);
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::NotRunning);
    assert_eq!(rig.dispatcher.state(rig.pipe), WorkerState::Unstarted);
}

#[test]
fn nothing_is_dispatched_after_stop_returns() {
    let rig = rig(Duration::from_secs(2));
    let counter = Arc::new(Counter::default());
    let _reg = rig.registry.register_sink(9000, counter.clone()).unwrap();

    rig.dispatcher.start(rig.pipe).unwrap();
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::Joined);
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));
    thread::sleep(Duration::from_millis(30));

    assert_eq!(counter.count(), 0);
    assert_eq!(rig.native.pending(rig.pipe), 1);
}

#[test]
fn pipe_can_be_restarted_after_stop() {
    let rig = rig(Duration::from_secs(2));
    let counter = Arc::new(Counter::default());
    let _reg = rig.registry.register_sink(9000, counter.clone()).unwrap();

    rig.dispatcher.start(rig.pipe).unwrap();
    rig.dispatcher.stop(rig.pipe);
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));
    assert!(rig.dispatcher.start(rig.pipe).unwrap());
    assert!(wait_for(|| counter.count() == 1));
}

/// Sink that blocks until released, signalling when it was entered.
struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Sink for Gate {
    fn run(&self, _raw: &[u8]) -> friendlink::Result<()> {
        self.entered.lock().unwrap().send(()).unwrap();
        let _ = self.release.lock().unwrap().recv();
        Ok(())
    }
}

#[test]
fn stuck_worker_is_abandoned_within_the_bound() {
    let rig = rig(Duration::from_millis(50));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let counter = Arc::new(Counter::default());
    let _gate = rig.registry.register_sink(9000, gate).unwrap();
    let _counter = rig.registry.register_sink(9001, counter.clone()).unwrap();
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));
    rig.native.push_to(rig.pipe, RawCallback::new(9001, Vec::new()));

    rig.dispatcher.start(rig.pipe).unwrap();
    entered_rx.recv_timeout(common::WAIT).unwrap();

    let begun = Instant::now();
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::Abandoned);
    assert!(begun.elapsed() < Duration::from_secs(1));
    assert_eq!(rig.dispatcher.state(rig.pipe), WorkerState::Stopping);
    assert!(!rig.dispatcher.is_running(rig.pipe));

    release_tx.send(()).unwrap();
    assert!(wait_for(|| rig.native.released() == 1));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(counter.count(), 0, "abandoned worker dispatched after stop");
    assert_eq!(rig.native.pending(rig.pipe), 1);
    assert!(wait_for(|| rig.dispatcher.state(rig.pipe) == WorkerState::Unstarted));
}

fn gated(rig: &Rig) -> (Registration, Receiver<()>, Sender<()>) {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let reg = rig.registry.register_sink(9000, gate).unwrap();
    (reg, entered_rx, release_tx)
}

#[test]
fn restart_refused_while_abandoned_worker_is_in_its_sink() {
    let rig = rig(Duration::from_millis(50));
    let (_gate, entered, release) = gated(&rig);
    let counter = Arc::new(Counter::default());
    let _counter = rig.registry.register_sink(9001, counter.clone()).unwrap();
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));

    rig.dispatcher.start(rig.pipe).unwrap();
    entered.recv_timeout(common::WAIT).unwrap();
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::Abandoned);

    rig.native.push_to(rig.pipe, RawCallback::new(9001, Vec::new()));
    assert!(!rig.dispatcher.start(rig.pipe).unwrap());
    assert_eq!(rig.dispatcher.worker_count(), 0);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(counter.count(), 0, "second record dispatched before the first was released");
    assert_eq!(rig.native.polled(), 1);

    release.send(()).unwrap();
    assert!(wait_for(|| rig.native.released() == 1));
    assert!(wait_for(|| rig.dispatcher.state(rig.pipe) == WorkerState::Unstarted));
    assert!(rig.dispatcher.start(rig.pipe).unwrap());
    assert!(wait_for(|| counter.count() == 1));
    assert!(wait_for(|| rig.native.released() == 2));
    assert_eq!(rig.native.polled(), 2);
}

#[test]
fn restart_waits_for_abandoned_worker_to_leave() {
    let rig = rig(Duration::from_millis(300));
    let (_gate, entered, release) = gated(&rig);
    let counter = Arc::new(Counter::default());
    let _counter = rig.registry.register_sink(9001, counter.clone()).unwrap();
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));
    rig.native.push_to(rig.pipe, RawCallback::new(9001, Vec::new()));

    rig.dispatcher.start(rig.pipe).unwrap();
    entered.recv_timeout(common::WAIT).unwrap();
    assert_eq!(rig.dispatcher.stop(rig.pipe), StopOutcome::Abandoned);

    let opener = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        release.send(()).unwrap();
    });
    assert!(rig.dispatcher.start(rig.pipe).unwrap());
    assert!(rig.native.released() >= 1, "restarted before the first record was released");
    opener.join().unwrap();

    assert!(wait_for(|| counter.count() == 1));
    assert!(wait_for(|| rig.native.released() == 2));
    assert_eq!(rig.native.polled(), 2);
}

struct Boom;

impl Sink for Boom {
    fn run(&self, _raw: &[u8]) -> friendlink::Result<()> {
        panic!("boom");
    }
}

#[test]
fn panicking_sink_does_not_end_the_loop() {
    let rig = rig(Duration::from_secs(2));
    let errors = rig.dispatcher.errors();
    let counter = Arc::new(Counter::default());
    let _boom = rig.registry.register_sink(9000, Arc::new(Boom)).unwrap();
    let _counter = rig.registry.register_sink(9001, counter.clone()).unwrap();
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));
    rig.native.push_to(rig.pipe, RawCallback::new(9001, Vec::new()));

    rig.dispatcher.start(rig.pipe).unwrap();
    assert!(wait_for(|| counter.count() == 1));

    let err = errors.recv_timeout(common::WAIT).unwrap();
    assert_eq!(err.pipe, rig.pipe);
    assert_eq!(err.id, 9000);
    assert!(err.reason.contains("boom"), "{}", err.reason);
    assert!(wait_for(|| rig.native.released() == 2));
}

#[test]
fn decode_failure_is_published_and_skipped() {
    let rig = rig(Duration::from_secs(2));
    let errors = rig.dispatcher.errors();
    let added = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&added);
    let _reg = rig
        .registry
        .register::<FriendAdded>(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let good = FriendAdded {
        result: 1,
        user: ME,
    };
    rig.native
        .push_to(rig.pipe, RawCallback::new(FriendAdded::ID, vec![1, 2, 3]));
    rig.native
        .push_to(rig.pipe, RawCallback::new(FriendAdded::ID, good.encode()));

    rig.dispatcher.start(rig.pipe).unwrap();
    assert!(wait_for(|| added.load(Ordering::SeqCst) == 1));

    let err = errors.recv_timeout(common::WAIT).unwrap();
    assert_eq!(err.id, FriendAdded::ID);
    assert!(err.reason.contains("expected 12-byte payload, got 3"), "{}", err.reason);
}

/// Sink that stops its own dispatcher.
struct SelfStop {
    dispatcher: OnceLock<Weak<Dispatcher>>,
    pipe: Pipe,
    outcome: Mutex<Sender<StopOutcome>>,
}

impl Sink for SelfStop {
    fn run(&self, _raw: &[u8]) -> friendlink::Result<()> {
        if let Some(dispatcher) = self.dispatcher.get().and_then(Weak::upgrade) {
            let outcome = dispatcher.stop(self.pipe);
            self.outcome.lock().unwrap().send(outcome).unwrap();
        }
        Ok(())
    }
}

#[test]
fn stop_from_the_worker_does_not_wait_on_itself() {
    let rig = rig(Duration::from_secs(2));
    let (tx, rx) = mpsc::channel();
    let sink = Arc::new(SelfStop {
        dispatcher: OnceLock::new(),
        pipe: rig.pipe,
        outcome: Mutex::new(tx),
    });
    sink.dispatcher
        .set(Arc::downgrade(&rig.dispatcher))
        .unwrap();
    let _reg = rig.registry.register_sink(9000, sink).unwrap();
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));
    rig.native.push_to(rig.pipe, RawCallback::new(9000, Vec::new()));

    rig.dispatcher.start(rig.pipe).unwrap();
    assert_eq!(rx.recv_timeout(common::WAIT).unwrap(), StopOutcome::Deferred);
    assert!(wait_for(|| rig.native.released() == 1));
    thread::sleep(Duration::from_millis(30));
    assert!(rx.try_recv().is_err());
    assert_eq!(rig.native.pending(rig.pipe), 1);
    assert_eq!(rig.dispatcher.worker_count(), 0);
}

#[test]
fn each_pipe_gets_its_own_worker() {
    let rig = rig(Duration::from_secs(2));
    let second = rig.native.create_pipe().unwrap();
    let counter = Arc::new(Counter::default());
    let _reg = rig.registry.register_sink(9000, counter.clone()).unwrap();
    for pipe in [rig.pipe, second] {
        for _ in 0..5 {
            rig.native.push_to(pipe, RawCallback::new(9000, Vec::new()));
        }
        rig.dispatcher.start(pipe).unwrap();
    }

    assert!(wait_for(|| counter.count() == 10));
    assert_eq!(rig.dispatcher.worker_count(), 2);
    rig.dispatcher.stop_all();
    assert_eq!(rig.dispatcher.worker_count(), 0);
}
