//! friendlink client: the primary entry point for the SDK.

mod router;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::apps::Apps;
use crate::callback::{CallbackRegistry, Registration};
use crate::dispatch::{
    DEFAULT_POLL_INTERVAL, DEFAULT_STOP_TIMEOUT, DispatchError, Dispatcher, StopOutcome,
};
use crate::error::{Error, Result};
use crate::friends::{Friends, send_chat};
use crate::message::{DEFAULT_HISTORY_CAPACITY, Direction, MessageEvent, MessageScope};
use crate::native::{NativeClient, Session};
use crate::stream::{EventHub, Subscription};
use crate::types::{ChatEntryType, Pipe, UserId};
use crate::user::LocalUser;

/// Install a `tracing` fmt subscriber. Call at most once.
///
/// `RUST_LOG` takes precedence over `level`; without either the filter is `info`.
///
/// # Errors
///
/// [`Error::InvalidArgument`] for an unparsable filter or when a global
/// subscriber is already installed.
pub fn init_logger(level: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .map_err(|e| Error::InvalidArgument(format!("log filter: {e}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| Error::InvalidArgument(format!("logger already initialized: {e}")))
}

/// Domain state shared with the router sinks.
pub(crate) struct Domain {
    pub(crate) native: Arc<dyn NativeClient>,
    pub(crate) local_user: LocalUser,
    pub(crate) friends: Friends,
    pub(crate) apps: Apps,
    pub(crate) messages: EventHub<MessageEvent>,
}

/// A client bound to one native pipe.
///
/// Created with [`Client::builder`]. Callbacks are drained on a background
/// worker and turned into notifications on the [`LocalUser`], [`Friends`] and
/// [`Apps`] streams. Dropping the client stops the worker, unregisters the
/// callbacks and releases the pipe, in that order.
pub struct Client {
    dispatcher: Dispatcher,
    registrations: Vec<Registration>,
    domain: Arc<Domain>,
    session: Session,
}

impl Client {
    /// Create a new [`ClientBuilder`].
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The pipe this client drains.
    #[must_use]
    pub const fn pipe(&self) -> Pipe {
        self.session.pipe()
    }

    /// The signed-in user.
    #[must_use]
    pub fn local_user(&self) -> &LocalUser {
        &self.domain.local_user
    }

    /// The friend list.
    #[must_use]
    pub fn friends(&self) -> &Friends {
        &self.domain.friends
    }

    /// The application list.
    #[must_use]
    pub fn apps(&self) -> &Apps {
        &self.domain.apps
    }

    /// Every message event, all scopes and directions.
    #[must_use]
    pub fn messages(&self) -> Subscription<MessageEvent> {
        self.domain.messages.subscribe()
    }

    /// Message events of one scope, optionally narrowed to one direction.
    #[must_use]
    pub fn messages_in(
        &self,
        scope: MessageScope,
        direction: Option<Direction>,
    ) -> Subscription<MessageEvent> {
        self.domain.messages.subscribe_filtered(move |e| {
            e.scope == scope && direction.is_none_or(|d| d == e.direction)
        })
    }

    /// Records that failed to decode or whose sink panicked.
    #[must_use]
    pub fn dispatch_errors(&self) -> Subscription<DispatchError> {
        self.dispatcher.errors()
    }

    /// Send a chat entry to `to`, friend or not.
    ///
    /// # Errors
    ///
    /// [`Error::Native`] if the native client refuses.
    pub fn send_message(&self, to: UserId, text: &str, kind: ChatEntryType) -> Result<()> {
        send_chat(self.domain.native.as_ref(), to, text, kind)
    }

    /// The registry the client's sinks live in. Extra sinks may be registered
    /// for ids the client does not consume.
    #[must_use]
    pub const fn registry(&self) -> &Arc<CallbackRegistry> {
        self.dispatcher.registry()
    }

    /// Whether the dispatch worker is polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running(self.pipe())
    }

    /// Stop the dispatch worker and release the pipe.
    pub fn shutdown(self) -> StopOutcome {
        let outcome = self.dispatcher.stop(self.pipe());
        tracing::info!(pipe = %self.pipe(), ?outcome, "client shut down");
        outcome
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("session", &self.session)
            .field("user", &self.domain.local_user.id())
            .field("friends", &self.domain.friends.len())
            .field("apps", &self.domain.apps.len())
            .field("sinks", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    history_capacity: usize,
    poll_interval: Duration,
    stop_timeout: Duration,
    refresh_on_start: bool,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            refresh_on_start: true,
        }
    }
}

impl ClientBuilder {
    /// Messages kept per friend (default: 100).
    #[must_use]
    pub const fn history_capacity(mut self, n: usize) -> Self {
        self.history_capacity = n;
        self
    }

    /// Idle sleep between polls of an empty pipe (default: 1 ms).
    #[must_use]
    pub const fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    /// Bound on how long shutdown waits for the worker (default: 2.5 s).
    #[must_use]
    pub const fn stop_timeout(mut self, d: Duration) -> Self {
        self.stop_timeout = d;
        self
    }

    /// Load the friend and app lists before the worker starts (default: on).
    #[must_use]
    pub const fn refresh_on_start(mut self, yes: bool) -> Self {
        self.refresh_on_start = yes;
        self
    }

    /// Open a pipe, install the domain sinks and start draining callbacks.
    ///
    /// # Errors
    ///
    /// [`Error::Init`] if the pipe, the user connection or the local identity
    /// is unavailable, or the worker cannot be spawned.
    pub fn build(self, native: Arc<dyn NativeClient>) -> Result<Client> {
        let session = Session::open(Arc::clone(&native))?;
        let user_id = native
            .local_user_id()
            .ok_or_else(|| Error::Init("no signed-in user".into()))?;

        let domain = Arc::new(Domain {
            native: Arc::clone(&native),
            local_user: LocalUser::new(user_id, Arc::clone(&native)),
            friends: Friends::new(Arc::clone(&native), self.history_capacity),
            apps: Apps::new(Arc::clone(&native)),
            messages: EventHub::new(),
        });
        let registry = CallbackRegistry::new();
        let registrations = router::install(&registry, &domain)?;

        if self.refresh_on_start {
            domain.friends.refresh(false);
            domain.apps.refresh(false);
        }

        let dispatcher = Dispatcher::new(native, registry)
            .with_poll_interval(self.poll_interval)
            .with_stop_timeout(self.stop_timeout);
        dispatcher.start(session.pipe())?;
        tracing::info!(
            pipe = %session.pipe(),
            user = %user_id,
            friends = domain.friends.len(),
            apps = domain.apps.len(),
            "client ready"
        );

        Ok(Client {
            dispatcher,
            registrations,
            domain,
            session,
        })
    }
}
