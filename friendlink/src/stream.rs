//! Channel-based notification streams.
//!
//! Every observable component owns an [`EventHub`]; callers get a
//! [`Subscription<T>`] that yields events through an internal channel.
//! Implements [`Iterator`] for idiomatic consumption. The subscription is
//! removed from its hub when it is closed or dropped.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak, mpsc};
use std::time::Duration;

use parking_lot::Mutex;

type Filter<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

struct Listener<T> {
    token: u64,
    filter: Option<Filter<T>>,
    tx: mpsc::Sender<T>,
}

struct HubInner<T> {
    listeners: Mutex<Vec<Listener<T>>>,
    next_token: AtomicU64,
}

impl<T> HubInner<T> {
    fn remove(&self, token: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| l.token != token);
        listeners.len() != before
    }

    fn contains(&self, token: u64) -> bool {
        self.listeners.lock().iter().any(|l| l.token == token)
    }
}

/// Fan-out point for one kind of event.
pub(crate) struct EventHub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T: Clone + Send + 'static> EventHub<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                listeners: Mutex::new(Vec::new()),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    /// Receive every event published on this hub.
    pub(crate) fn subscribe(&self) -> Subscription<T> {
        self.attach(None)
    }

    /// Receive only events for which `filter` returns `true`.
    pub(crate) fn subscribe_filtered(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Subscription<T> {
        self.attach(Some(Box::new(filter)))
    }

    fn attach(&self, filter: Option<Filter<T>>) -> Subscription<T> {
        let (tx, rx) = mpsc::channel();
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push(Listener { token, filter, tx });
        Subscription {
            rx,
            token,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every matching listener. Listeners whose receiving
    /// side is gone are dropped.
    pub(crate) fn publish(&self, event: &T) {
        self.inner.listeners.lock().retain(|l| {
            if l.filter.as_ref().is_some_and(|f| !f(event)) {
                return true;
            }
            l.tx.send(event.clone()).is_ok()
        });
    }

    /// Number of live listeners.
    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("listeners", &self.inner.listeners.lock().len())
            .finish()
    }
}

/// A live subscription to a stream of domain events.
///
/// Yields events of type `T` via [`recv`](Self::recv),
/// [`try_recv`](Self::try_recv), [`recv_timeout`](Self::recv_timeout), or
/// [`Iterator`] consumption. Events already queued stay readable after
/// [`close`](Self::close).
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    token: u64,
    hub: Weak<HubInner<T>>,
}

impl<T> Subscription<T> {
    /// Block until the next event, or `None` if the stream ended.
    #[must_use]
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking receive. Returns `None` if no event is ready.
    #[must_use]
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain every event that is already queued.
    #[must_use]
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    /// Stop receiving new events. Safe to call multiple times.
    pub fn close(&self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.token);
        }
    }

    /// Whether the subscription no longer receives new events.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.hub.upgrade().is_none_or(|hub| !hub.contains(self.token))
    }
}

impl<T> Iterator for Subscription<T> {
    type Item = T;
    fn next(&mut self) -> Option<T> {
        self.rx.recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_listener_only_sees_matches() {
        let hub = EventHub::<u32>::new();
        let evens = hub.subscribe_filtered(|n| n % 2 == 0);
        let all = hub.subscribe();
        for n in 1..=4 {
            hub.publish(&n);
        }
        assert_eq!(evens.drain(), vec![2, 4]);
        assert_eq!(all.drain(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = EventHub::<u32>::new();
        let sub = hub.subscribe();
        assert_eq!(hub.listener_count(), 1);
        drop(sub);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn closed_subscription_keeps_queued_events() {
        let hub = EventHub::<u32>::new();
        let sub = hub.subscribe();
        hub.publish(&7);
        sub.close();
        hub.publish(&8);
        assert!(sub.is_closed());
        assert_eq!(sub.try_recv(), Some(7));
        assert_eq!(sub.recv(), None);
    }
}
