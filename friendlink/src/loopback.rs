//! An in-memory [`NativeClient`] for tests, demos and the CLI.
//!
//! State changes made through the simulation helpers update the loopback's
//! own tables and enqueue the callback record the native client would emit,
//! so a [`Client`](crate::Client) built on top observes them through its
//! dispatch worker exactly as it would in production.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::{
    AppEventStateChange, CallbackPayload, FriendAdded, FriendChatMsg, FriendProfileInfoResponse,
    PersonaStateChange,
};
use crate::native::{ChatEntry, NativeClient, RawCallback};
use crate::types::{
    AppId, AppState, ChatEntryType, PersonaChange, PersonaState, Pipe, UserHandle, UserId,
};

const RESULT_OK: u32 = 1;

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct PipeQueue {
    pending: VecDeque<RawCallback>,
    in_flight: bool,
}

#[derive(Debug, Clone)]
struct Persona {
    name: Option<String>,
    nickname: Option<String>,
    state: PersonaState,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: None,
            nickname: None,
            state: PersonaState::Offline,
        }
    }
}

#[derive(Default)]
struct State {
    next_pipe: i32,
    next_user: i32,
    primary: Option<Pipe>,
    pipes: HashMap<Pipe, PipeQueue>,
    backlog: VecDeque<RawCallback>,
    refuse_pipe: bool,
    refuse_user: bool,
    refuse_actions: bool,
    local: Option<UserId>,
    persona: Persona,
    friends: Vec<UserId>,
    people: HashMap<UserId, Persona>,
    chats: HashMap<UserId, Vec<ChatEntry>>,
    apps: Vec<(AppId, AppState)>,
    app_data: HashMap<(AppId, String), String>,
    launched: Vec<AppId>,
    polled: u64,
    released: u64,
}

impl State {
    fn enqueue(&mut self, record: RawCallback) {
        match self.primary.and_then(|p| self.pipes.get_mut(&p)) {
            Some(queue) => queue.pending.push_back(record),
            None => self.backlog.push_back(record),
        }
    }

    fn emit<T: CallbackPayload>(&mut self, payload: &T) {
        self.enqueue(RawCallback::new(T::ID, payload.encode()));
    }

    fn store_chat(&mut self, conversation: UserId, kind: ChatEntryType, text: &str) -> u32 {
        let entries = self.chats.entry(conversation).or_default();
        entries.push(ChatEntry {
            kind,
            data: text.as_bytes().to_vec(),
        });
        u32::try_from(entries.len() - 1).unwrap_or(u32::MAX)
    }

    /// The local user, unless outbound actions are refused.
    fn acting_user(&self) -> Option<UserId> {
        if self.refuse_actions { None } else { self.local }
    }

    fn is_installed(&self, app: AppId) -> bool {
        self.apps
            .iter()
            .find(|(a, _)| *a == app)
            .is_some_and(|(_, s)| !s.is_empty() && !s.contains(AppState::UNINSTALLED))
    }

    fn set_app(&mut self, id: AppId, state: AppState) -> AppState {
        if let Some(slot) = self.apps.iter_mut().find(|(a, _)| *a == id) {
            std::mem::replace(&mut slot.1, state)
        } else {
            self.apps.push((id, state));
            AppState::empty()
        }
    }
}

/// In-memory native client.
///
/// Records emitted before any pipe exists are handed to the first pipe
/// created; afterwards they go to that first pipe unless sent with
/// [`push_to`](Self::push_to).
#[derive(Default)]
pub struct LoopbackClient {
    state: Mutex<State>,
    enumerate_hook: Mutex<Option<Hook>>,
}

impl LoopbackClient {
    /// A loopback with `local` signed in and online.
    #[must_use]
    pub fn new(local: UserId) -> Self {
        let client = Self::default();
        {
            let mut state = client.state.lock();
            state.local = Some(local);
            state.persona.state = PersonaState::Online;
        }
        client
    }

    /// A loopback with nobody signed in.
    #[must_use]
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// Set the local user's display name and presence without emitting anything.
    #[must_use]
    pub fn with_persona(self, name: &str, presence: PersonaState) -> Self {
        {
            let mut state = self.state.lock();
            state.persona.name = Some(name.to_owned());
            state.persona.state = presence;
        }
        self
    }

    /// Set the local user's presence without emitting anything.
    #[must_use]
    pub fn with_presence(self, presence: PersonaState) -> Self {
        self.state.lock().persona.state = presence;
        self
    }

    /// Make `create_pipe` fail.
    pub fn refuse_pipes(&self, refuse: bool) {
        self.state.lock().refuse_pipe = refuse;
    }

    /// Make `connect_global_user` fail.
    pub fn refuse_user(&self, refuse: bool) {
        self.state.lock().refuse_user = refuse;
    }

    /// Make every outbound action (send, rename, nickname, presence) fail.
    pub fn refuse_actions(&self, refuse: bool) {
        self.state.lock().refuse_actions = refuse;
    }

    /// Run `hook` at the start of every friend enumeration, outside any lock.
    pub fn on_enumerate(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.enumerate_hook.lock() = Some(Arc::new(hook));
    }

    /// Put `id` on the friend list without emitting anything.
    pub fn insert_friend(&self, id: UserId, name: &str, presence: PersonaState) {
        let mut state = self.state.lock();
        if !state.friends.contains(&id) {
            state.friends.push(id);
        }
        let person = state.people.entry(id).or_default();
        person.name = Some(name.to_owned());
        person.state = presence;
    }

    /// Befriend `id` and emit a friend-added record.
    pub fn add_friend(&self, id: UserId, name: &str) {
        self.insert_friend(id, name, PersonaState::Offline);
        self.state.lock().emit(&FriendAdded {
            result: RESULT_OK,
            user: id,
        });
    }

    /// Drop `id` from the friend list. The native client emits nothing for
    /// this; a refresh picks it up.
    pub fn remove_friend(&self, id: UserId) {
        self.state.lock().friends.retain(|f| *f != id);
    }

    /// Change a user's presence and emit a persona state change.
    pub fn set_friend_state(&self, id: UserId, presence: PersonaState) {
        let mut state = self.state.lock();
        let person = state.people.entry(id).or_default();
        let was_online = person.state.is_online();
        person.state = presence;
        let mut change = PersonaChange::STATUS;
        match (was_online, presence.is_online()) {
            (false, true) => change |= PersonaChange::COME_ONLINE,
            (true, false) => change |= PersonaChange::GONE_OFFLINE,
            _ => {}
        }
        state.emit(&PersonaStateChange { user: id, change });
    }

    /// Change a user's display name and emit a persona state change.
    pub fn set_friend_name(&self, id: UserId, name: &str) {
        let mut state = self.state.lock();
        state.people.entry(id).or_default().name = Some(name.to_owned());
        state.emit(&PersonaStateChange {
            user: id,
            change: PersonaChange::NAME,
        });
    }

    /// Emit a profile-info response for `id`.
    pub fn profile_loaded(&self, id: UserId) {
        self.state.lock().emit(&FriendProfileInfoResponse {
            user: id,
            result: RESULT_OK,
        });
    }

    /// Store an entry written by `from` and emit a chat record for it.
    pub fn deliver_chat(&self, from: UserId, kind: ChatEntryType, text: &str) {
        let mut state = self.state.lock();
        let chat_id = state.store_chat(from, kind, text);
        state.emit(&FriendChatMsg {
            friend: from,
            sender: from,
            entry_type: kind as u32,
            chat_id,
        });
    }

    /// Register an application without emitting anything.
    pub fn insert_app(&self, id: AppId, app_state: AppState) {
        self.state.lock().set_app(id, app_state);
    }

    /// Set configuration value `key` of an application.
    pub fn set_app_data(&self, id: AppId, key: &str, value: &str) {
        self.state
            .lock()
            .app_data
            .insert((id, key.to_owned()), value.to_owned());
    }

    /// Change an application's state and emit a state change record.
    pub fn set_app_state(&self, id: AppId, app_state: AppState) {
        let mut state = self.state.lock();
        let old_state = state.set_app(id, app_state);
        state.emit(&AppEventStateChange {
            app: id,
            old_state,
            new_state: app_state,
            result: RESULT_OK,
        });
    }

    /// Forget an application. Emits nothing.
    pub fn remove_app(&self, id: AppId) {
        self.state.lock().apps.retain(|(a, _)| *a != id);
    }

    /// Enqueue a raw record on the first pipe.
    pub fn push(&self, record: RawCallback) {
        self.state.lock().enqueue(record);
    }

    /// Enqueue a raw record on `pipe`. Returns `false` for an unknown pipe.
    pub fn push_to(&self, pipe: Pipe, record: RawCallback) -> bool {
        self.state
            .lock()
            .pipes
            .get_mut(&pipe)
            .map(|q| q.pending.push_back(record))
            .is_some()
    }

    /// Records waiting on `pipe`.
    #[must_use]
    pub fn pending(&self, pipe: Pipe) -> usize {
        self.state.lock().pipes.get(&pipe).map_or(0, |q| q.pending.len())
    }

    /// Whether `pipe` is open.
    #[must_use]
    pub fn is_open(&self, pipe: Pipe) -> bool {
        self.state.lock().pipes.contains_key(&pipe)
    }

    /// Records handed out by `poll` so far.
    #[must_use]
    pub fn polled(&self) -> u64 {
        self.state.lock().polled
    }

    /// Records released so far.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.state.lock().released
    }

    /// Applications launched so far, in order.
    #[must_use]
    pub fn launched(&self) -> Vec<AppId> {
        self.state.lock().launched.clone()
    }

    /// Texts of the entries stored in the conversation with `friend`.
    #[must_use]
    pub fn conversation(&self, friend: UserId) -> Vec<String> {
        self.state.lock().chats.get(&friend).map_or_else(Vec::new, |entries| {
            entries
                .iter()
                .map(|e| String::from_utf8_lossy(&e.data).into_owned())
                .collect()
        })
    }
}

impl NativeClient for LoopbackClient {
    fn create_pipe(&self) -> Option<Pipe> {
        let mut state = self.state.lock();
        if state.refuse_pipe {
            return None;
        }
        state.next_pipe += 1;
        let pipe = Pipe(state.next_pipe);
        let mut queue = PipeQueue::default();
        if state.primary.is_none() {
            state.primary = Some(pipe);
            queue.pending = std::mem::take(&mut state.backlog);
        }
        state.pipes.insert(pipe, queue);
        Some(pipe)
    }

    fn connect_global_user(&self, pipe: Pipe) -> Option<UserHandle> {
        let mut state = self.state.lock();
        if state.refuse_user || !state.pipes.contains_key(&pipe) {
            return None;
        }
        state.next_user += 1;
        Some(UserHandle(state.next_user))
    }

    fn release_user(&self, _pipe: Pipe, _user: UserHandle) {}

    fn release_pipe(&self, pipe: Pipe) {
        let mut state = self.state.lock();
        state.pipes.remove(&pipe);
        if state.primary == Some(pipe) {
            state.primary = None;
        }
    }

    fn poll(&self, pipe: Pipe) -> Option<RawCallback> {
        let mut state = self.state.lock();
        let queue = state.pipes.get_mut(&pipe)?;
        let record = queue.pending.pop_front()?;
        queue.in_flight = true;
        state.polled += 1;
        Some(record)
    }

    fn release(&self, pipe: Pipe) {
        let mut state = self.state.lock();
        let in_flight = state
            .pipes
            .get_mut(&pipe)
            .is_some_and(|q| std::mem::take(&mut q.in_flight));
        if in_flight {
            state.released += 1;
        } else {
            tracing::warn!(%pipe, "release without a polled record");
        }
    }

    fn local_user_id(&self) -> Option<UserId> {
        self.state.lock().local
    }

    fn persona_name(&self) -> Option<String> {
        self.state.lock().persona.name.clone()
    }

    fn set_persona_name(&self, name: &str) -> bool {
        let mut state = self.state.lock();
        let Some(local) = state.acting_user() else {
            return false;
        };
        state.persona.name = Some(name.to_owned());
        state.emit(&PersonaStateChange {
            user: local,
            change: PersonaChange::NAME,
        });
        true
    }

    fn persona_state(&self) -> PersonaState {
        self.state.lock().persona.state
    }

    fn set_persona_state(&self, presence: PersonaState) -> bool {
        let mut state = self.state.lock();
        let Some(local) = state.acting_user() else {
            return false;
        };
        state.persona.state = presence;
        state.emit(&PersonaStateChange {
            user: local,
            change: PersonaChange::STATUS,
        });
        true
    }

    fn friend_count(&self) -> usize {
        let hook = self.enumerate_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        self.state.lock().friends.len()
    }

    fn friend_by_index(&self, index: usize) -> Option<UserId> {
        self.state.lock().friends.get(index).copied()
    }

    fn friend_persona_name(&self, id: UserId) -> Option<String> {
        self.state.lock().people.get(&id).and_then(|p| p.name.clone())
    }

    fn friend_persona_state(&self, id: UserId) -> PersonaState {
        self.state
            .lock()
            .people
            .get(&id)
            .map_or(PersonaState::Offline, |p| p.state)
    }

    fn friend_nickname(&self, id: UserId) -> Option<String> {
        self.state
            .lock()
            .people
            .get(&id)
            .and_then(|p| p.nickname.clone())
    }

    fn set_friend_nickname(&self, id: UserId, nickname: Option<&str>) -> bool {
        let mut state = self.state.lock();
        if state.refuse_actions || !state.friends.contains(&id) {
            return false;
        }
        state.people.entry(id).or_default().nickname = nickname.map(str::to_owned);
        true
    }

    fn chat_message(&self, friend: UserId, chat_id: u32) -> Option<ChatEntry> {
        let index = usize::try_from(chat_id).ok()?;
        self.state.lock().chats.get(&friend)?.get(index).cloned()
    }

    fn send_message(&self, to: UserId, kind: ChatEntryType, data: &[u8]) -> bool {
        let mut state = self.state.lock();
        let Some(local) = state.acting_user() else {
            return false;
        };
        let chat_id = state.store_chat(to, kind, &String::from_utf8_lossy(data));
        state.emit(&FriendChatMsg {
            friend: to,
            sender: local,
            entry_type: kind as u32,
            chat_id,
        });
        true
    }

    fn installed_apps(&self) -> Vec<(AppId, AppState)> {
        self.state.lock().apps.clone()
    }

    fn app_data(&self, app: AppId, key: &str) -> Option<String> {
        self.state
            .lock()
            .app_data
            .get(&(app, key.to_owned()))
            .cloned()
    }

    fn is_app_installed(&self, app: AppId) -> bool {
        self.state.lock().is_installed(app)
    }

    fn launch_app(&self, app: AppId) -> bool {
        let mut state = self.state.lock();
        if state.refuse_actions || !state.is_installed(app) {
            return false;
        }
        state.launched.push(app);
        true
    }
}

impl fmt::Debug for LoopbackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackClient")
            .field("local", &state.local)
            .field("pipes", &state.pipes.len())
            .field("friends", &state.friends.len())
            .field("apps", &state.apps.len())
            .finish_non_exhaustive()
    }
}
