//! Discriminator → sink table with scoped registrations.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::callback::{Callback, CallbackId, CallbackPayload, Sink};
use crate::error::{Error, Result};
use crate::native::RawCallback;

/// Maps each [`CallbackId`] to at most one [`Sink`].
///
/// Owned by a [`Client`](crate::Client) and shared with its dispatch workers.
/// Registering an occupied id is rejected; unregistering only removes the
/// exact sink instance that was registered.
#[derive(Default)]
pub struct CallbackRegistry {
    sinks: RwLock<HashMap<CallbackId, Arc<dyn Sink>>>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `handler` for payload type `T` under `T::ID`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRegistered`] when `T::ID` already has a sink.
    pub fn register<T: CallbackPayload>(
        self: &Arc<Self>,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> Result<Registration> {
        self.register_sink(T::ID, Arc::new(Callback::<T>::new(handler)))
    }

    /// Register an already erased sink under `id`.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRegistered`] when `id` already has a sink.
    pub fn register_sink(
        self: &Arc<Self>,
        id: CallbackId,
        sink: Arc<dyn Sink>,
    ) -> Result<Registration> {
        {
            let mut sinks = self.sinks.write();
            if sinks.contains_key(&id) {
                return Err(Error::AlreadyRegistered(id));
            }
            sinks.insert(id, Arc::clone(&sink));
        }
        tracing::debug!(id, "callback registered");
        Ok(Registration {
            registry: Arc::downgrade(self),
            id,
            sink: Some(sink),
        })
    }

    /// Remove the sink for `id` if it is `sink` itself. Returns whether it was removed.
    pub fn unregister(&self, id: CallbackId, sink: &Arc<dyn Sink>) -> bool {
        let mut sinks = self.sinks.write();
        match sinks.get(&id) {
            Some(current) if Arc::ptr_eq(current, sink) => {
                sinks.remove(&id);
                drop(sinks);
                tracing::debug!(id, "callback unregistered");
                true
            }
            _ => false,
        }
    }

    /// Route `record` to the sink registered for its id.
    ///
    /// Returns `Ok(false)` when no sink is registered, which is not an error.
    /// The sink runs on the calling thread without the table lock held.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] when the payload does not fit the sink's type.
    pub fn dispatch(&self, record: &RawCallback) -> Result<bool> {
        let sink = self.sinks.read().get(&record.id).cloned();
        let Some(sink) = sink else {
            return Ok(false);
        };
        sink.run(&record.payload)?;
        Ok(true)
    }

    /// Whether a sink is registered for `id`.
    #[must_use]
    pub fn is_registered(&self, id: CallbackId) -> bool {
        self.sinks.read().contains_key(&id)
    }

    /// Number of registered sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Whether no sink is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<CallbackId> = self.sinks.read().keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("CallbackRegistry").field("ids", &ids).finish()
    }
}

/// Scoped registration. Unregisters its sink when dropped.
///
/// A registration that was superseded (its sink removed and another one
/// registered under the same id) leaves the newer sink in place.
#[must_use = "dropping a Registration unregisters its sink"]
pub struct Registration {
    registry: Weak<CallbackRegistry>,
    id: CallbackId,
    sink: Option<Arc<dyn Sink>>,
}

impl Registration {
    /// The id this registration holds.
    #[must_use]
    pub const fn id(&self) -> CallbackId {
        self.id
    }

    /// The registered sink.
    #[must_use]
    pub fn sink(&self) -> Option<&Arc<dyn Sink>> {
        self.sink.as_ref()
    }

    /// Unregister now. Returns whether the sink was still registered.
    pub fn unregister(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        let Some(sink) = self.sink.take() else {
            return false;
        };
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unregister(self.id, &sink))
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("active", &self.sink.is_some())
            .finish()
    }
}
