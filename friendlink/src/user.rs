//! The signed-in user.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, check};
use crate::native::NativeClient;
use crate::stream::{EventHub, Subscription};
use crate::types::{PersonaState, UserId};

/// A change to the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserChange {
    /// The display name changed.
    Name(Option<String>),
    /// The presence changed.
    State(PersonaState),
}

/// Notification published by [`LocalUser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    /// The local user's id.
    pub id: UserId,
    /// What changed.
    pub change: UserChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UserFacets {
    name: Option<String>,
    state: PersonaState,
}

impl UserFacets {
    fn read(native: &dyn NativeClient) -> Self {
        Self {
            name: native.persona_name(),
            state: native.persona_state(),
        }
    }

    fn diff(&self, fresh: &Self) -> Vec<UserChange> {
        let mut changes = Vec::new();
        if self.name != fresh.name {
            changes.push(UserChange::Name(fresh.name.clone()));
        }
        if self.state != fresh.state {
            changes.push(UserChange::State(fresh.state));
        }
        changes
    }
}

/// The signed-in user: cached name and presence, kept current by persona
/// state change callbacks.
pub struct LocalUser {
    id: UserId,
    native: Arc<dyn NativeClient>,
    facets: RwLock<UserFacets>,
    events: EventHub<UserEvent>,
}

impl LocalUser {
    pub(crate) fn new(id: UserId, native: Arc<dyn NativeClient>) -> Self {
        let facets = UserFacets::read(native.as_ref());
        Self {
            id,
            native,
            facets: RwLock::new(facets),
            events: EventHub::new(),
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

    /// Presence.
    #[must_use]
    pub fn state(&self) -> PersonaState {
        self.facets.read().state
    }

    /// Presence label, e.g. `"Looking To Play"`.
    #[must_use]
    pub fn state_text(&self) -> &'static str {
        self.state().text()
    }

    /// Change the display name.
    ///
    /// # Errors
    ///
    /// [`Error::Native`](crate::Error::Native) if the native client refuses.
    pub fn set_name(&self, name: &str) -> Result<()> {
        check(self.native.set_persona_name(name), "set persona name")?;
        self.apply(|facets| facets.name = Some(name.to_owned()));
        Ok(())
    }

    /// Change the presence. Setting the current presence does nothing.
    ///
    /// # Errors
    ///
    /// [`Error::Native`](crate::Error::Native) if the native client refuses.
    pub fn set_state(&self, state: PersonaState) -> Result<()> {
        if self.state() == state {
            return Ok(());
        }
        check(self.native.set_persona_state(state), "set persona state")?;
        self.apply(|facets| facets.state = state);
        Ok(())
    }

    /// Subscribe to name and presence changes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<UserEvent> {
        self.events.subscribe()
    }

    /// Re-read the facets from the native client, publishing what changed.
    pub(crate) fn refresh_facets(&self) -> usize {
        let fresh = UserFacets::read(self.native.as_ref());
        self.apply(|facets| *facets = fresh)
    }

    fn apply(&self, update: impl FnOnce(&mut UserFacets)) -> usize {
        let mut facets = self.facets.write();
        let mut next = facets.clone();
        update(&mut next);
        let changes = facets.diff(&next);
        *facets = next;
        for change in &changes {
            self.events.publish(&UserEvent {
                id: self.id,
                change: change.clone(),
            });
        }
        changes.len()
    }
}

impl fmt::Debug for LocalUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let facets = self.facets.read();
        f.debug_struct("LocalUser")
            .field("id", &self.id)
            .field("name", &facets.name)
            .field("state", &facets.state)
            .finish_non_exhaustive()
    }
}
