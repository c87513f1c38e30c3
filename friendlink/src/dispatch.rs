//! Per-pipe dispatch workers.
//!
//! Each started pipe gets one dedicated thread that drains the pipe in order:
//! poll one record, route it through the [`CallbackRegistry`], release it,
//! and sleep briefly when nothing is pending. Decode failures and panicking
//! sinks are contained, logged and published on the error stream; they never
//! end the loop.
//!
//! A worker that was stopped without being joined (abandoned after the stop
//! timeout, or stopped from inside its own sink) stays on record until it
//! leaves its loop. No new worker is started for that pipe before then.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::callback::{CallbackId, CallbackRegistry};
use crate::error::{Error, Result};
use crate::native::{NativeClient, RawCallback};
use crate::stream::{EventHub, Subscription};
use crate::types::Pipe;

/// Idle sleep between polls of an empty pipe.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on how long [`Dispatcher::stop`] waits for a worker.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(2500);

/// Lifecycle of the worker draining one pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// No worker was started for the pipe (or it was stopped and removed).
    Unstarted,
    /// The worker is polling.
    Running,
    /// A stop was requested; the worker finishes its current record.
    Stopping,
    /// The worker has left its loop.
    Stopped,
}

/// How a [`Dispatcher::stop`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopOutcome {
    /// The pipe had no worker.
    NotRunning,
    /// The worker left its loop within the timeout and was joined.
    Joined,
    /// Called from the worker itself; it leaves after the current record.
    Deferred,
    /// The worker did not finish within the timeout and was detached. It
    /// dispatches nothing further and exits once its current sink returns.
    Abandoned,
}

/// A record that could not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    /// Pipe the record came from.
    pub pipe: Pipe,
    /// Discriminator of the record.
    pub id: CallbackId,
    /// What went wrong (decode error or sink panic message).
    pub reason: String,
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    exited: Condvar,
}

impl WorkerShared {
    fn is_running(&self) -> bool {
        *self.state.lock() == WorkerState::Running
    }
}

/// Marks the worker stopped on every exit path, unwinding included.
struct ExitGuard(Arc<WorkerShared>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        *self.0.state.lock() = WorkerState::Stopped;
        self.0.exited.notify_all();
    }
}

struct Worker {
    shared: Arc<WorkerShared>,
    handle: JoinHandle<()>,
}

/// A stopped worker that may still be inside a sink.
struct Detached {
    shared: Arc<WorkerShared>,
    thread: ThreadId,
}

/// Owns one dispatch worker per pipe.
pub struct Dispatcher {
    native: Arc<dyn NativeClient>,
    registry: Arc<CallbackRegistry>,
    poll_interval: Duration,
    stop_timeout: Duration,
    workers: Mutex<HashMap<Pipe, Worker>>,
    detached: Mutex<HashMap<Pipe, Detached>>,
    errors: EventHub<DispatchError>,
}

impl Dispatcher {
    /// Create a dispatcher feeding `registry` from `native`.
    #[must_use]
    pub fn new(native: Arc<dyn NativeClient>, registry: Arc<CallbackRegistry>) -> Self {
        Self {
            native,
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            workers: Mutex::new(HashMap::new()),
            detached: Mutex::new(HashMap::new()),
            errors: EventHub::new(),
        }
    }

    /// Set the idle sleep between polls of an empty pipe.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the bound on how long [`stop`](Self::stop) waits.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The registry records are routed through.
    #[must_use]
    pub const fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Start draining `pipe`. Returns `false` if a worker already exists.
    ///
    /// If an earlier worker for `pipe` was stopped but is still finishing a
    /// record, this waits up to the stop timeout for it to leave; if it does
    /// not, nothing is started and `false` is returned.
    ///
    /// # Errors
    ///
    /// [`Error::Init`] if the worker thread cannot be spawned.
    pub fn start(&self, pipe: Pipe) -> Result<bool> {
        self.await_detached(pipe);
        let mut workers = self.workers.lock();
        if workers.contains_key(&pipe) {
            return Ok(false);
        }
        {
            let mut detached = self.detached.lock();
            if let Some(old) = detached.get(&pipe) {
                if *old.shared.state.lock() != WorkerState::Stopped {
                    tracing::warn!(%pipe, "previous dispatch worker still running, not starting");
                    return Ok(false);
                }
                detached.remove(&pipe);
            }
        }
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState::Running),
            exited: Condvar::new(),
        });
        let worker_loop = WorkerLoop {
            pipe,
            native: Arc::clone(&self.native),
            registry: Arc::clone(&self.registry),
            poll_interval: self.poll_interval,
            errors: self.errors.clone(),
            shared: Arc::clone(&shared),
        };
        let handle = thread::Builder::new()
            .name(format!("friendlink-dispatch-{}", pipe.0))
            .spawn(move || worker_loop.run())
            .map_err(|e| Error::Init(format!("spawn dispatch thread: {e}")))?;
        workers.insert(pipe, Worker { shared, handle });
        drop(workers);
        tracing::debug!(%pipe, "dispatch worker started");
        Ok(true)
    }

    /// Stop the worker for `pipe`, waiting at most the stop timeout.
    ///
    /// The pipe's slot is freed whatever the outcome, and no record is
    /// dispatched for `pipe` once this returns (except by a sink that was
    /// already running when an [`Abandoned`](StopOutcome::Abandoned) worker
    /// was detached).
    pub fn stop(&self, pipe: Pipe) -> StopOutcome {
        let worker = {
            let mut workers = self.workers.lock();
            let Some(worker) = workers.remove(&pipe) else {
                return StopOutcome::NotRunning;
            };
            // Recorded before the slot is visible as free to `start`.
            self.detached.lock().insert(
                pipe,
                Detached {
                    shared: Arc::clone(&worker.shared),
                    thread: worker.handle.thread().id(),
                },
            );
            worker
        };
        {
            let mut state = worker.shared.state.lock();
            if *state == WorkerState::Running {
                *state = WorkerState::Stopping;
            }
        }
        if worker.handle.thread().id() == thread::current().id() {
            tracing::debug!(%pipe, "stop requested from its own dispatch worker");
            return StopOutcome::Deferred;
        }

        let deadline = Instant::now() + self.stop_timeout;
        let stopped = {
            let mut state = worker.shared.state.lock();
            while *state != WorkerState::Stopped {
                if worker.shared.exited.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            *state == WorkerState::Stopped
        };

        if stopped {
            self.forget_detached(pipe, &worker.shared);
            if worker.handle.join().is_err() {
                tracing::error!(%pipe, "dispatch worker panicked outside a sink");
            }
            tracing::debug!(%pipe, "dispatch worker stopped");
            StopOutcome::Joined
        } else {
            tracing::warn!(
                %pipe,
                timeout = ?self.stop_timeout,
                "dispatch worker did not stop in time, abandoning it"
            );
            StopOutcome::Abandoned
        }
    }

    /// Stop every worker.
    pub fn stop_all(&self) {
        let pipes: Vec<Pipe> = self.workers.lock().keys().copied().collect();
        for pipe in pipes {
            self.stop(pipe);
        }
    }

    /// Current state of the worker for `pipe`.
    ///
    /// A stopped worker that has not left its loop yet reports
    /// [`Stopping`](WorkerState::Stopping).
    #[must_use]
    pub fn state(&self, pipe: Pipe) -> WorkerState {
        if let Some(worker) = self.workers.lock().get(&pipe) {
            return *worker.shared.state.lock();
        }
        self.detached
            .lock()
            .get(&pipe)
            .map(|d| *d.shared.state.lock())
            .filter(|s| *s != WorkerState::Stopped)
            .unwrap_or(WorkerState::Unstarted)
    }

    /// Whether `pipe` has a polling worker.
    #[must_use]
    pub fn is_running(&self, pipe: Pipe) -> bool {
        self.state(pipe) == WorkerState::Running
    }

    /// Number of pipes with a worker.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Wait, bounded by the stop timeout, for a detached worker on `pipe` to
    /// leave its loop. Returns at once when called from that worker.
    fn await_detached(&self, pipe: Pipe) {
        let Some((shared, owner)) = self
            .detached
            .lock()
            .get(&pipe)
            .map(|d| (Arc::clone(&d.shared), d.thread))
        else {
            return;
        };
        if owner == thread::current().id() {
            return;
        }
        let deadline = Instant::now() + self.stop_timeout;
        let mut state = shared.state.lock();
        while *state != WorkerState::Stopped {
            if shared.exited.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
    }

    fn forget_detached(&self, pipe: Pipe, shared: &Arc<WorkerShared>) {
        let mut detached = self.detached.lock();
        if detached
            .get(&pipe)
            .is_some_and(|d| Arc::ptr_eq(&d.shared, shared))
        {
            detached.remove(&pipe);
        }
    }

    /// Stream of records that failed to decode or whose sink panicked.
    #[must_use]
    pub fn errors(&self) -> Subscription<DispatchError> {
        self.errors.subscribe()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pipes: Vec<Pipe> = self.workers.lock().keys().copied().collect();
        pipes.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("pipes", &pipes)
            .field("poll_interval", &self.poll_interval)
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

struct WorkerLoop {
    pipe: Pipe,
    native: Arc<dyn NativeClient>,
    registry: Arc<CallbackRegistry>,
    poll_interval: Duration,
    errors: EventHub<DispatchError>,
    shared: Arc<WorkerShared>,
}

impl WorkerLoop {
    fn run(self) {
        let _exit = ExitGuard(Arc::clone(&self.shared));
        while self.shared.is_running() {
            let Some(record) = self.native.poll(self.pipe) else {
                thread::sleep(self.poll_interval);
                continue;
            };
            // A stop may land between poll and dispatch: release without running it.
            if self.shared.is_running() {
                self.dispatch(&record);
            }
            self.native.release(self.pipe);
        }
    }

    fn dispatch(&self, record: &RawCallback) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.registry.dispatch(record)));
        let reason = match outcome {
            Ok(Ok(true)) => {
                tracing::trace!(pipe = %self.pipe, id = record.id, "callback dispatched");
                return;
            }
            Ok(Ok(false)) => {
                tracing::trace!(pipe = %self.pipe, id = record.id, "no sink for callback");
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("sink panicked: {}", panic_message(payload.as_ref())),
        };
        tracing::error!(pipe = %self.pipe, id = record.id, %reason, "callback dispatch failed");
        self.errors.publish(&DispatchError {
            pipe: self.pipe,
            id: record.id,
            reason,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
