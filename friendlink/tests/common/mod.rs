//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use friendlink::{Client, LoopbackClient, PersonaState, Sink, UserId};

pub const ME: UserId = UserId(76_561_198_000_000_001);
pub const ALYX: UserId = UserId(76_561_198_000_000_002);
pub const BARNEY: UserId = UserId(76_561_198_000_000_003);
pub const ELI: UserId = UserId(76_561_198_000_000_004);
pub const STRANGER: UserId = UserId(76_561_198_000_000_099);

pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `cond` until it holds or [`WAIT`] elapses.
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Loopback with the local user and two friends, alyx online and barney offline.
pub fn loopback() -> Arc<LoopbackClient> {
    let native = Arc::new(LoopbackClient::new(ME).with_persona("gordon", PersonaState::Online));
    native.insert_friend(ALYX, "alyx", PersonaState::Online);
    native.insert_friend(BARNEY, "barney", PersonaState::Offline);
    native
}

pub fn client(native: &Arc<LoopbackClient>) -> Client {
    Client::builder()
        .history_capacity(3)
        .stop_timeout(Duration::from_millis(500))
        .build(native.clone())
        .unwrap()
}

/// Sink counting its invocations.
#[derive(Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Sink for Counter {
    fn run(&self, _raw: &[u8]) -> friendlink::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink keeping every payload it receives, in order.
#[derive(Default)]
pub struct Recorder(Mutex<Vec<Vec<u8>>>);

impl Recorder {
    pub fn seen(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl Sink for Recorder {
    fn run(&self, raw: &[u8]) -> friendlink::Result<()> {
        self.0.lock().unwrap().push(raw.to_vec());
        Ok(())
    }
}
