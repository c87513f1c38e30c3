//! Sinks that turn native callbacks into domain notifications.

use std::sync::{Arc, Weak};

use crate::callback::{
    AppEventStateChange, CallbackPayload, CallbackRegistry, FriendAdded, FriendChatMsg,
    FriendProfileInfoResponse, PersonaStateChange, Registration,
};
use crate::client::Domain;
use crate::error::Result;
use crate::message::{Direction, Message, MessageEvent, MessageScope};
use crate::types::ChatEntryType;

/// Register one sink per consumed callback id.
pub(super) fn install(
    registry: &Arc<CallbackRegistry>,
    domain: &Arc<Domain>,
) -> Result<Vec<Registration>> {
    Ok(vec![
        registry.register(route(domain, Domain::on_persona_state_change))?,
        registry.register(route(domain, Domain::on_profile_info))?,
        registry.register(route(domain, Domain::on_friend_added))?,
        registry.register(route(domain, Domain::on_chat_message))?,
        registry.register(route(domain, Domain::on_app_state_change))?,
    ])
}

/// Bind a handler to the domain without keeping it alive.
fn route<T: CallbackPayload>(
    domain: &Arc<Domain>,
    handler: fn(&Domain, T),
) -> impl Fn(T) + Send + Sync + 'static {
    let domain: Weak<Domain> = Arc::downgrade(domain);
    move |payload| {
        if let Some(domain) = domain.upgrade() {
            handler(&domain, payload);
        }
    }
}

impl Domain {
    fn on_persona_state_change(&self, p: PersonaStateChange) {
        tracing::debug!(user = %p.user, change = ?p.change, "persona state change");
        if p.user == self.local_user.id() {
            self.local_user.refresh_facets();
        } else if !self.friends.refresh_friend(p.user) {
            tracing::trace!(user = %p.user, "persona change for a non-friend");
        }
    }

    fn on_profile_info(&self, p: FriendProfileInfoResponse) {
        tracing::debug!(user = %p.user, result = p.result, "profile info response");
        self.friends.refresh_friend(p.user);
    }

    fn on_friend_added(&self, p: FriendAdded) {
        tracing::debug!(user = %p.user, result = p.result, "friend added callback");
        self.friends.add(p.user);
    }

    fn on_app_state_change(&self, p: AppEventStateChange) {
        tracing::debug!(
            app = %p.app,
            old = ?p.old_state,
            new = ?p.new_state,
            "app state change"
        );
        self.apps.apply_state(p.app, p.new_state);
    }

    fn on_chat_message(&self, p: FriendChatMsg) {
        let local = self.local_user.id();
        let direction = if p.sender == local {
            Direction::Sent
        } else {
            Direction::Received
        };
        let (sender, receiver) = match direction {
            Direction::Sent => (local, p.friend),
            Direction::Received => (p.sender, local),
        };
        let fallback = p.entry_type().unwrap_or(ChatEntryType::Invalid);
        let entry = self.native.chat_message(p.friend, p.chat_id);
        let message = Message::from_entry(sender, receiver, fallback, entry);

        let mut scopes = vec![MessageScope::Any];
        scopes.extend(MessageScope::specific(message.kind));
        let event = MessageEvent {
            scope: MessageScope::Any,
            direction,
            message,
        };
        let counterpart = event.counterpart();
        let known = self
            .friends
            .record_message(counterpart, &event, &scopes, |e| self.messages.publish(e));
        if !known {
            tracing::debug!(user = %counterpart, "message with a non-friend, history untouched");
        }
    }
}
