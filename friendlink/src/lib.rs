#![doc = include_str!("../README.md")]

pub mod apps;
pub mod callback;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod friends;
#[cfg(feature = "loopback")]
pub mod loopback;
pub mod message;
pub mod native;
pub mod stream;
pub mod types;
pub mod user;

mod collection;

// Re-export core public API at crate root.
pub use apps::{App, AppChange, AppEvent, AppFacet, Apps};
pub use callback::{
    Callback, CallbackId, CallbackPayload, CallbackRegistry, Registration, Sink,
};
pub use client::{Client, ClientBuilder, init_logger};
pub use dispatch::{DispatchError, Dispatcher, StopOutcome, WorkerState};
pub use error::{Error, Result};
pub use friends::{Friend, FriendChange, FriendEvent, FriendFacet, Friends};
#[cfg(feature = "loopback")]
pub use loopback::LoopbackClient;
pub use message::{Direction, Message, MessageEvent, MessageScope};
pub use native::{ChatEntry, NativeClient, RawCallback};
pub use stream::Subscription;
pub use types::{
    AppId, AppState, ChatEntryType, PersonaChange, PersonaState, Pipe, UserHandle, UserId,
};
pub use user::{LocalUser, UserChange, UserEvent};
