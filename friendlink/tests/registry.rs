mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::Counter;
use friendlink::callback::FriendAdded;
use friendlink::{CallbackPayload, CallbackRegistry, Error, RawCallback, Sink, UserId};
use proptest::prelude::*;

fn record(id: i32) -> RawCallback {
    RawCallback::new(id, vec![0; 4])
}

#[test]
fn registered_sink_runs_once() {
    let registry = CallbackRegistry::new();
    let counter = Arc::new(Counter::default());
    let _reg = registry.register_sink(900, counter.clone()).unwrap();

    assert_eq!(registry.dispatch(&record(900)), Ok(true));
    assert_eq!(counter.count(), 1);
}

#[test]
fn unregistered_id_is_a_no_op() {
    let registry = CallbackRegistry::new();
    let counter = Arc::new(Counter::default());
    let _reg = registry.register_sink(900, counter.clone()).unwrap();

    assert_eq!(registry.dispatch(&record(901)), Ok(false));
    assert_eq!(counter.count(), 0);
}

#[test]
fn dropped_registration_unregisters() {
    let registry = CallbackRegistry::new();
    let counter = Arc::new(Counter::default());
    let reg = registry.register_sink(900, counter.clone()).unwrap();
    drop(reg);

    assert!(!registry.is_registered(900));
    assert_eq!(registry.dispatch(&record(900)), Ok(false));
    assert_eq!(counter.count(), 0);
}

#[test]
fn occupied_id_is_rejected() {
    let registry = CallbackRegistry::new();
    let _first = registry.register_sink(900, Arc::new(Counter::default())).unwrap();
    let second = registry.register_sink(900, Arc::new(Counter::default()));
    assert!(matches!(second, Err(Error::AlreadyRegistered(900))));
    assert_eq!(registry.len(), 1);
}

#[test]
fn stale_unregister_keeps_the_newer_sink() {
    let registry = CallbackRegistry::new();
    let old: Arc<dyn Sink> = Arc::new(Counter::default());
    let first = registry.register_sink(900, Arc::clone(&old)).unwrap();
    assert!(first.unregister());

    let newer = Arc::new(Counter::default());
    let _second = registry.register_sink(900, newer.clone()).unwrap();

    assert!(!registry.unregister(900, &old));
    assert_eq!(registry.dispatch(&record(900)), Ok(true));
    assert_eq!(newer.count(), 1);
}

#[test]
fn typed_handler_receives_decoded_payload() {
    let registry = CallbackRegistry::new();
    let (tx, rx) = std::sync::mpsc::channel();
    let _reg = registry
        .register::<FriendAdded>(move |p| tx.send(p).unwrap())
        .unwrap();

    let payload = FriendAdded {
        result: 1,
        user: UserId(42),
    };
    let raw = RawCallback::new(FriendAdded::ID, payload.encode());
    assert_eq!(registry.dispatch(&raw), Ok(true));
    assert_eq!(rx.try_recv().unwrap(), payload);
}

#[test]
fn short_payload_is_a_decode_error() {
    let registry = CallbackRegistry::new();
    let _reg = registry.register::<FriendAdded>(|_| {}).unwrap();

    let err = registry
        .dispatch(&RawCallback::new(FriendAdded::ID, vec![0; 3]))
        .unwrap_err();
    assert_eq!(
        err,
        Error::Decode {
            id: FriendAdded::ID,
            expected: 12,
            actual: 3,
        }
    );
}

/// Registers a follow-up sink from inside its own run.
struct Chain {
    registry: std::sync::Weak<CallbackRegistry>,
    held: std::sync::Mutex<Vec<friendlink::Registration>>,
}

impl Sink for Chain {
    fn run(&self, _raw: &[u8]) -> friendlink::Result<()> {
        let registry = self.registry.upgrade().unwrap();
        let reg = registry.register_sink(901, Arc::new(Counter::default()))?;
        self.held.lock().unwrap().push(reg);
        Ok(())
    }
}

#[test]
fn sink_may_register_while_running() {
    let registry = CallbackRegistry::new();
    let chain = Arc::new(Chain {
        registry: Arc::downgrade(&registry),
        held: std::sync::Mutex::new(Vec::new()),
    });
    let _reg = registry.register_sink(900, chain.clone()).unwrap();

    assert_eq!(registry.dispatch(&record(900)), Ok(true));
    assert!(registry.is_registered(901));
}

proptest! {
    /// Property: dispatch reaches exactly the sink registered for the id, once.
    #[test]
    fn dispatch_reaches_only_the_registered_sink(
        ids in prop::collection::hash_set(-50i32..50, 0..12),
        probe in -50i32..50,
    ) {
        let registry = CallbackRegistry::new();
        let counters: HashMap<i32, Arc<Counter>> =
            ids.iter().map(|id| (*id, Arc::new(Counter::default()))).collect();
        let _regs: Vec<_> = counters
            .iter()
            .map(|(id, c)| registry.register_sink(*id, c.clone()).unwrap())
            .collect();

        let hit = registry.dispatch(&record(probe)).unwrap();
        prop_assert_eq!(hit, ids.contains(&probe));
        for (id, counter) in &counters {
            prop_assert_eq!(counter.count(), usize::from(*id == probe));
        }
    }

    /// Property: after registering and unregistering, dispatch is a no-op.
    #[test]
    fn register_then_unregister_is_a_no_op(ids in prop::collection::hash_set(any::<i32>(), 1..12)) {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(Counter::default());
        for id in &ids {
            let reg = registry.register_sink(*id, counter.clone()).unwrap();
            prop_assert!(reg.unregister());
        }
        prop_assert!(registry.is_empty());
        for id in &ids {
            prop_assert_eq!(registry.dispatch(&record(*id)).unwrap(), false);
        }
        prop_assert_eq!(counter.count(), 0);
    }

    /// Property: an unregister naming a sink that is no longer registered never evicts.
    #[test]
    fn stale_unregister_never_evicts(id in any::<i32>(), rounds in 1usize..6) {
        let registry = CallbackRegistry::new();
        let mut stale: Vec<Arc<dyn Sink>> = Vec::new();
        for _ in 0..rounds {
            let sink: Arc<dyn Sink> = Arc::new(Counter::default());
            let reg = registry.register_sink(id, Arc::clone(&sink)).unwrap();
            drop(reg);
            stale.push(sink);
        }
        let live = registry.register_sink(id, Arc::new(Counter::default())).unwrap();
        for sink in &stale {
            prop_assert!(!registry.unregister(id, sink));
        }
        prop_assert!(registry.is_registered(id));
        drop(live);
        prop_assert!(!registry.is_registered(id));
    }
}
