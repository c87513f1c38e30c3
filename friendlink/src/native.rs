//! Boundary with the native client: the [`NativeClient`] trait, raw callback
//! records, and an RAII session that releases the pipe and user on drop.

use std::fmt;
use std::sync::Arc;

use crate::callback::CallbackId;
use crate::error::{Error, Result};
use crate::types::{AppId, AppState, ChatEntryType, PersonaState, Pipe, UserHandle, UserId};

/// One pending record pulled off a pipe: discriminator plus raw payload bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct RawCallback {
    /// Discriminator selecting the payload type.
    pub id: CallbackId,
    /// Payload bytes in the layout of the payload type registered for `id`.
    pub payload: Vec<u8>,
}

impl RawCallback {
    /// Build a record from an id and its payload bytes.
    #[must_use]
    pub const fn new(id: CallbackId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

impl fmt::Debug for RawCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawCallback")
            .field("id", &self.id)
            .field("len", &self.payload.len())
            .finish()
    }
}

/// A chat entry as stored by the native client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Entry kind reported by the native client.
    pub kind: ChatEntryType,
    /// Raw entry bytes (UTF-8, possibly NUL padded).
    pub data: Vec<u8>,
}

/// The native client SDK, consumed not reimplemented.
///
/// Queries are synchronous and may fail; failures surface as `None` or
/// `false`. Implementations must be callable from any thread.
pub trait NativeClient: Send + Sync {
    /// Open a communication pipe.
    fn create_pipe(&self) -> Option<Pipe>;
    /// Connect the globally signed-in user over `pipe`.
    fn connect_global_user(&self, pipe: Pipe) -> Option<UserHandle>;
    /// Release a user connection made with [`connect_global_user`](Self::connect_global_user).
    fn release_user(&self, pipe: Pipe, user: UserHandle);
    /// Close a pipe made with [`create_pipe`](Self::create_pipe).
    fn release_pipe(&self, pipe: Pipe);

    /// Non-blocking: take the next pending record, if any.
    fn poll(&self, pipe: Pipe) -> Option<RawCallback>;
    /// Free the resources backing the last record returned by [`poll`](Self::poll).
    fn release(&self, pipe: Pipe);

    /// Account id of the signed-in user.
    fn local_user_id(&self) -> Option<UserId>;
    /// Display name of the signed-in user.
    fn persona_name(&self) -> Option<String>;
    /// Change the display name of the signed-in user.
    fn set_persona_name(&self, name: &str) -> bool;
    /// Presence of the signed-in user.
    fn persona_state(&self) -> PersonaState;
    /// Change the presence of the signed-in user.
    fn set_persona_state(&self, state: PersonaState) -> bool;

    /// Number of immediate friends.
    fn friend_count(&self) -> usize;
    /// Friend at `index` in the native enumeration order.
    fn friend_by_index(&self, index: usize) -> Option<UserId>;
    /// Display name of a friend.
    fn friend_persona_name(&self, id: UserId) -> Option<String>;
    /// Presence of a friend.
    fn friend_persona_state(&self, id: UserId) -> PersonaState;
    /// Nickname given to a friend, `None` when unset.
    fn friend_nickname(&self, id: UserId) -> Option<String>;
    /// Set or clear the nickname of a friend.
    fn set_friend_nickname(&self, id: UserId, nickname: Option<&str>) -> bool;

    /// Read chat entry `chat_id` of the conversation with `friend`.
    fn chat_message(&self, friend: UserId, chat_id: u32) -> Option<ChatEntry>;
    /// Send a chat entry to `to`.
    fn send_message(&self, to: UserId, kind: ChatEntryType, data: &[u8]) -> bool;

    /// Authoritative enumeration of known applications with their states.
    fn installed_apps(&self) -> Vec<(AppId, AppState)>;
    /// Configuration value `key` of an application.
    fn app_data(&self, app: AppId, key: &str) -> Option<String>;
    /// Whether an application is installed.
    fn is_app_installed(&self, app: AppId) -> bool;
    /// Launch an application.
    fn launch_app(&self, app: AppId) -> bool;
}

/// RAII wrapper for an open pipe and its user connection. Releases both on drop.
pub(crate) struct Session {
    native: Arc<dyn NativeClient>,
    pipe: Pipe,
    user: UserHandle,
}

impl Session {
    /// Open a pipe and connect the global user. Any failure is an [`Error::Init`].
    pub(crate) fn open(native: Arc<dyn NativeClient>) -> Result<Self> {
        let pipe = native
            .create_pipe()
            .ok_or_else(|| Error::Init("failed to create pipe".into()))?;
        let Some(user) = native.connect_global_user(pipe) else {
            native.release_pipe(pipe);
            return Err(Error::Init("failed to connect to global user".into()));
        };
        Ok(Self { native, pipe, user })
    }

    #[inline]
    pub(crate) const fn pipe(&self) -> Pipe {
        self.pipe
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.native.release_user(self.pipe, self.user);
        self.native.release_pipe(self.pipe);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pipe", &self.pipe)
            .field("user", &self.user)
            .finish()
    }
}
