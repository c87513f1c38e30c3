//! Friends of the signed-in user and the observable friend list.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::collection::{RefreshGuard, name_matches};
use crate::error::{Result, check};
use crate::message::{History, Message, MessageEvent, MessageScope};
use crate::native::NativeClient;
use crate::stream::{EventHub, Subscription};
use crate::types::{ChatEntryType, PersonaState, UserId};

/// Observable aspect of a friend, used to narrow subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FriendFacet {
    /// Joining or leaving the friend list.
    Membership,
    /// Display name.
    Name,
    /// Nickname.
    Nickname,
    /// Presence.
    State,
    /// Signed in or not.
    Online,
    /// Chat messages.
    Messages,
}

/// A change to a friend or to the friend list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendChange {
    /// The friend joined the list.
    Added,
    /// The friend left the list.
    Removed,
    /// The display name changed.
    Name(Option<String>),
    /// The nickname was set or cleared.
    Nickname(Option<String>),
    /// The presence changed.
    State(PersonaState),
    /// The friend signed in or out.
    Online(bool),
    /// A message was exchanged with the friend.
    Message(MessageEvent),
}

impl FriendChange {
    /// The facet this change belongs to.
    #[must_use]
    pub const fn facet(&self) -> FriendFacet {
        match self {
            Self::Added | Self::Removed => FriendFacet::Membership,
            Self::Name(_) => FriendFacet::Name,
            Self::Nickname(_) => FriendFacet::Nickname,
            Self::State(_) => FriendFacet::State,
            Self::Online(_) => FriendFacet::Online,
            Self::Message(_) => FriendFacet::Messages,
        }
    }
}

/// Notification published by [`Friend`] and [`Friends`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEvent {
    /// The friend concerned.
    pub id: UserId,
    /// What changed.
    pub change: FriendChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FriendFacets {
    name: Option<String>,
    nickname: Option<String>,
    state: PersonaState,
}

impl FriendFacets {
    fn read(native: &dyn NativeClient, id: UserId) -> Self {
        Self {
            name: native.friend_persona_name(id),
            nickname: native.friend_nickname(id),
            state: native.friend_persona_state(id),
        }
    }

    fn diff(&self, fresh: &Self) -> Vec<FriendChange> {
        let mut changes = Vec::new();
        if self.name != fresh.name {
            changes.push(FriendChange::Name(fresh.name.clone()));
        }
        if self.nickname != fresh.nickname {
            changes.push(FriendChange::Nickname(fresh.nickname.clone()));
        }
        if self.state != fresh.state {
            changes.push(FriendChange::State(fresh.state));
        }
        if self.state.is_online() != fresh.state.is_online() {
            changes.push(FriendChange::Online(fresh.state.is_online()));
        }
        changes
    }
}

/// Send a chat entry through the native client.
pub(crate) fn send_chat(
    native: &dyn NativeClient,
    to: UserId,
    text: &str,
    kind: ChatEntryType,
) -> Result<()> {
    if kind == ChatEntryType::Emote {
        tracing::warn!(%to, "emote entries are no longer delivered by the native client");
    }
    check(native.send_message(to, kind, text.as_bytes()), "send message")
}

/// One friend. Identity is the [`UserId`]; everything else is a cached facet
/// refreshed from the native client when it reports a change.
pub struct Friend {
    id: UserId,
    native: Arc<dyn NativeClient>,
    facets: RwLock<FriendFacets>,
    history: Mutex<History>,
    events: EventHub<FriendEvent>,
}

impl Friend {
    fn new(
        id: UserId,
        native: Arc<dyn NativeClient>,
        history_capacity: usize,
        events: EventHub<FriendEvent>,
    ) -> Self {
        let facets = FriendFacets::read(native.as_ref(), id);
        Self {
            id,
            native,
            facets: RwLock::new(facets),
            history: Mutex::new(History::new(history_capacity)),
            events,
        }
    }

    /// Account id.
    #[must_use]
    pub const fn id(&self) -> UserId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.facets.read().name.clone()
    }

    /// Nickname given by the local user.
    #[must_use]
    pub fn nickname(&self) -> Option<String> {
        self.facets.read().nickname.clone()
    }

    /// Presence.
    #[must_use]
    pub fn state(&self) -> PersonaState {
        self.facets.read().state
    }

    /// Presence label.
    #[must_use]
    pub fn state_text(&self) -> &'static str {
        self.state().text()
    }

    /// Whether the friend is signed in.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Messages exchanged with this friend, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().to_vec()
    }

    /// Number of messages kept.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Set or clear (`None`) the nickname.
    ///
    /// # Errors
    ///
    /// [`Error::Native`](crate::Error::Native) if the native client refuses.
    pub fn set_nickname(&self, nickname: Option<&str>) -> Result<()> {
        check(
            self.native.set_friend_nickname(self.id, nickname),
            "set friend nickname",
        )?;
        self.apply(|facets| facets.nickname = nickname.map(str::to_owned));
        Ok(())
    }

    /// Send a chat entry to this friend.
    ///
    /// # Errors
    ///
    /// [`Error::Native`](crate::Error::Native) if the native client refuses.
    pub fn send_message(&self, text: &str, kind: ChatEntryType) -> Result<()> {
        send_chat(self.native.as_ref(), self.id, text, kind)
    }

    /// Subscribe to every change of this friend.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<FriendEvent> {
        let id = self.id;
        self.events.subscribe_filtered(move |e| e.id == id)
    }

    /// Subscribe to one facet of this friend.
    #[must_use]
    pub fn subscribe_facet(&self, facet: FriendFacet) -> Subscription<FriendEvent> {
        let id = self.id;
        self.events
            .subscribe_filtered(move |e| e.id == id && e.change.facet() == facet)
    }

    /// Re-read the facets, publishing only those that changed.
    pub(crate) fn refresh_facets(&self) -> usize {
        let fresh = FriendFacets::read(self.native.as_ref(), self.id);
        self.apply(|facets| *facets = fresh)
    }

    pub(crate) fn record_message(&self, message: Message) {
        self.history.lock().push(message);
    }

    pub(crate) fn publish_message(&self, event: MessageEvent) {
        self.publish(FriendChange::Message(event));
    }

    fn apply(&self, update: impl FnOnce(&mut FriendFacets)) -> usize {
        let mut facets = self.facets.write();
        let mut next = facets.clone();
        update(&mut next);
        let changes = facets.diff(&next);
        *facets = next;
        for change in &changes {
            self.publish(change.clone());
        }
        changes.len()
    }

    fn publish(&self, change: FriendChange) {
        self.events.publish(&FriendEvent {
            id: self.id,
            change,
        });
    }
}

impl PartialEq for Friend {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Friend {}

impl fmt::Debug for Friend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let facets = self.facets.read();
        f.debug_struct("Friend")
            .field("id", &self.id)
            .field("name", &facets.name)
            .field("state", &facets.state)
            .finish_non_exhaustive()
    }
}

/// The observable friend list.
///
/// Readers get lock-free snapshots; writers are serialized. Membership changes
/// publish [`FriendChange::Added`] and [`FriendChange::Removed`] after the new
/// snapshot is in place.
pub struct Friends {
    native: Arc<dyn NativeClient>,
    list: ArcSwap<Vec<Arc<Friend>>>,
    writer: Mutex<()>,
    updating: AtomicBool,
    history_capacity: usize,
    events: EventHub<FriendEvent>,
}

impl Friends {
    pub(crate) fn new(native: Arc<dyn NativeClient>, history_capacity: usize) -> Self {
        Self {
            native,
            list: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
            updating: AtomicBool::new(false),
            history_capacity,
            events: EventHub::new(),
        }
    }

    /// Current friends in native enumeration order.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<Friend>>> {
        self.list.load_full()
    }

    /// Number of friends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.load().len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.load().is_empty()
    }

    /// Look up a friend by id.
    #[must_use]
    pub fn get(&self, id: UserId) -> Option<Arc<Friend>> {
        self.list.load().iter().find(|f| f.id == id).cloned()
    }

    /// Whether `id` is a friend.
    #[must_use]
    pub fn contains(&self, id: UserId) -> bool {
        self.list.load().iter().any(|f| f.id == id)
    }

    /// First friend whose display name is `name`.
    #[must_use]
    pub fn by_name(&self, name: &str, case_sensitive: bool) -> Option<Arc<Friend>> {
        self.list
            .load()
            .iter()
            .find(|f| f.name().is_some_and(|n| name_matches(&n, name, case_sensitive, false)))
            .cloned()
    }

    /// Every friend whose display name is `name`.
    #[must_use]
    pub fn all_by_name(&self, name: &str, case_sensitive: bool) -> Vec<Arc<Friend>> {
        self.filter(|f| f.name().is_some_and(|n| name_matches(&n, name, case_sensitive, false)))
    }

    /// Friends whose display name contains `search`.
    #[must_use]
    pub fn by_partial_name(&self, search: &str, case_sensitive: bool) -> Vec<Arc<Friend>> {
        self.filter(|f| f.name().is_some_and(|n| name_matches(&n, search, case_sensitive, true)))
    }

    /// First friend whose nickname is `nickname`.
    #[must_use]
    pub fn by_nickname(&self, nickname: &str, case_sensitive: bool) -> Option<Arc<Friend>> {
        self.list
            .load()
            .iter()
            .find(|f| {
                f.nickname()
                    .is_some_and(|n| name_matches(&n, nickname, case_sensitive, false))
            })
            .cloned()
    }

    /// Every friend whose nickname is `nickname`.
    #[must_use]
    pub fn all_by_nickname(&self, nickname: &str, case_sensitive: bool) -> Vec<Arc<Friend>> {
        self.filter(|f| {
            f.nickname()
                .is_some_and(|n| name_matches(&n, nickname, case_sensitive, false))
        })
    }

    /// Friends whose nickname contains `search`.
    #[must_use]
    pub fn by_partial_nickname(&self, search: &str, case_sensitive: bool) -> Vec<Arc<Friend>> {
        self.filter(|f| {
            f.nickname()
                .is_some_and(|n| name_matches(&n, search, case_sensitive, true))
        })
    }

    /// Friends that are signed in.
    #[must_use]
    pub fn online(&self) -> Vec<Arc<Friend>> {
        self.filter(|f| f.is_online())
    }

    /// Friends whose presence is one of `states`.
    #[must_use]
    pub fn by_state(&self, states: &[PersonaState]) -> Vec<Arc<Friend>> {
        self.filter(|f| states.contains(&f.state()))
    }

    fn filter(&self, keep: impl Fn(&Friend) -> bool) -> Vec<Arc<Friend>> {
        self.list.load().iter().filter(|f| keep(f)).cloned().collect()
    }

    /// Add `id` to the list. Returns `false` if it was already there.
    pub fn add(&self, id: UserId) -> bool {
        if self.contains(id) {
            return false;
        }
        let friend = Arc::new(self.make(id));
        {
            let _writer = self.writer.lock();
            let current = self.list.load_full();
            if current.iter().any(|f| f.id == id) {
                return false;
            }
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(friend);
            self.list.store(Arc::new(next));
            self.publish(id, FriendChange::Added);
        }
        tracing::debug!(%id, "friend added");
        true
    }

    /// Resynchronize with the native friend enumeration.
    ///
    /// Friends still present keep their identity and history; their facets
    /// are re-read. Returns `false` when another refresh was already running
    /// and this one was dropped; `force` runs it regardless.
    pub fn refresh(&self, force: bool) -> bool {
        let Some(_guard) = RefreshGuard::acquire(&self.updating, force) else {
            tracing::debug!("friend refresh already running, dropped");
            return false;
        };
        let count = self.native.friend_count();
        let mut seen = HashSet::with_capacity(count);
        let ids: Vec<UserId> = (0..count)
            .filter_map(|index| self.native.friend_by_index(index))
            .filter(|id| seen.insert(*id))
            .collect();

        let retained = {
            let _writer = self.writer.lock();
            let current = self.list.load_full();
            let known: HashMap<UserId, &Arc<Friend>> =
                current.iter().map(|f| (f.id, f)).collect();

            let mut next = Vec::with_capacity(ids.len());
            let mut added = Vec::new();
            let mut retained = Vec::new();
            for id in &ids {
                if let Some(friend) = known.get(id) {
                    retained.push(Arc::clone(friend));
                    next.push(Arc::clone(friend));
                } else {
                    added.push(*id);
                    next.push(Arc::new(self.make(*id)));
                }
            }
            let removed: Vec<UserId> = current
                .iter()
                .map(|f| f.id)
                .filter(|id| !seen.contains(id))
                .collect();

            self.list.store(Arc::new(next));
            for id in &removed {
                self.publish(*id, FriendChange::Removed);
            }
            for id in &added {
                self.publish(*id, FriendChange::Added);
            }
            tracing::debug!(
                friends = ids.len(),
                added = added.len(),
                removed = removed.len(),
                "friend list refreshed"
            );
            retained
        };

        for friend in retained {
            friend.refresh_facets();
        }
        true
    }

    /// Refresh the facets of friend `id`. Returns `false` for a non-friend.
    pub(crate) fn refresh_friend(&self, id: UserId) -> bool {
        self.get(id).is_some_and(|f| {
            f.refresh_facets();
            true
        })
    }

    /// Subscribe to every change of every friend, membership included.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<FriendEvent> {
        self.events.subscribe()
    }

    /// Subscribe to every change of friend `id`, including its membership.
    #[must_use]
    pub fn subscribe_friend(&self, id: UserId) -> Subscription<FriendEvent> {
        self.events.subscribe_filtered(move |e| e.id == id)
    }

    /// Subscribe to one facet of friend `id`.
    #[must_use]
    pub fn subscribe_facet(&self, id: UserId, facet: FriendFacet) -> Subscription<FriendEvent> {
        self.events
            .subscribe_filtered(move |e| e.id == id && e.change.facet() == facet)
    }

    /// Subscribe to one facet across all friends.
    #[must_use]
    pub fn subscribe_all(&self, facet: FriendFacet) -> Subscription<FriendEvent> {
        self.events.subscribe_filtered(move |e| e.change.facet() == facet)
    }

    /// Record a message exchanged with `counterpart` and publish it under
    /// `scopes`. Returns `false`, touching nothing, for a non-friend.
    pub(crate) fn record_message(
        &self,
        counterpart: UserId,
        event: &MessageEvent,
        scopes: &[MessageScope],
        publish_generic: impl Fn(&MessageEvent),
    ) -> bool {
        let friend = self.get(counterpart);
        if let Some(friend) = &friend {
            friend.record_message(event.message.clone());
        }
        for scope in scopes {
            let scoped = MessageEvent {
                scope: *scope,
                ..event.clone()
            };
            publish_generic(&scoped);
            if let Some(friend) = &friend {
                friend.publish_message(scoped);
            }
        }
        friend.is_some()
    }

    fn make(&self, id: UserId) -> Friend {
        Friend::new(
            id,
            Arc::clone(&self.native),
            self.history_capacity,
            self.events.clone(),
        )
    }

    fn publish(&self, id: UserId, change: FriendChange) {
        self.events.publish(&FriendEvent { id, change });
    }
}

impl fmt::Debug for Friends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Friends")
            .field("len", &self.len())
            .field("history_capacity", &self.history_capacity)
            .finish_non_exhaustive()
    }
}
