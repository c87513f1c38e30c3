//! Chat messages, message notifications and the bounded per-friend history.

use std::collections::VecDeque;

use crate::native::ChatEntry;
use crate::types::{ChatEntryType, UserId};

/// Number of messages kept per friend unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// One chat entry between the local user and someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Author of the entry.
    pub sender: UserId,
    /// Recipient of the entry.
    pub receiver: UserId,
    /// Entry kind.
    pub kind: ChatEntryType,
    /// Entry text.
    pub content: String,
}

impl Message {
    /// Build a message from the entry read back from the native client.
    ///
    /// Without an entry the message keeps `fallback` as its kind and has no text.
    pub(crate) fn from_entry(
        sender: UserId,
        receiver: UserId,
        fallback: ChatEntryType,
        entry: Option<ChatEntry>,
    ) -> Self {
        let (kind, content) = entry.map_or_else(
            || (fallback, String::new()),
            |e| (e.kind, decode_text(&e.data)),
        );
        Self {
            sender,
            receiver,
            kind,
            content,
        }
    }
}

/// Entry bytes are UTF-8 with optional NUL padding.
fn decode_text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).replace('\0', "")
}

/// Whether a message was written by the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The local user wrote it.
    Sent,
    /// Someone else wrote it.
    Received,
}

/// Which message stream an event belongs to.
///
/// Every message is published once as [`Any`](Self::Any) and then, for chat
/// and typing entries, once more under its specific scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageScope {
    /// Every message, whatever its kind.
    Any,
    /// Text messages only.
    Chat,
    /// Typing notifications only.
    Typing,
}

impl MessageScope {
    /// The specific scope of an entry kind, if it has one.
    #[must_use]
    pub const fn specific(kind: ChatEntryType) -> Option<Self> {
        match kind {
            ChatEntryType::ChatMsg => Some(Self::Chat),
            ChatEntryType::Typing => Some(Self::Typing),
            _ => None,
        }
    }
}

/// A message notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Stream the event was published on.
    pub scope: MessageScope,
    /// Sent by or received by the local user.
    pub direction: Direction,
    /// The message itself.
    pub message: Message,
}

impl MessageEvent {
    /// The user on the other side of the conversation.
    #[must_use]
    pub const fn counterpart(&self) -> UserId {
        match self.direction {
            Direction::Sent => self.message.receiver,
            Direction::Received => self.message.sender,
        }
    }
}

/// FIFO-bounded message history: the oldest entries go first.
#[derive(Debug, Clone)]
pub(crate) struct History {
    capacity: usize,
    entries: VecDeque<Message>,
}

impl History {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.entries.push_back(message);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub(crate) fn to_vec(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u64) -> Message {
        Message {
            sender: UserId(n),
            receiver: UserId(0),
            kind: ChatEntryType::ChatMsg,
            content: n.to_string(),
        }
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = History::new(3);
        for n in 1..=5 {
            history.push(msg(n));
        }
        let kept: Vec<String> = history.to_vec().into_iter().map(|m| m.content).collect();
        assert_eq!(kept, ["3", "4", "5"]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut history = History::new(0);
        history.push(msg(1));
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn entry_text_drops_nul_padding() {
        let entry = ChatEntry {
            kind: ChatEntryType::ChatMsg,
            data: b"hi there\0\0".to_vec(),
        };
        let m = Message::from_entry(UserId(1), UserId(2), ChatEntryType::Invalid, Some(entry));
        assert_eq!(m.content, "hi there");
        assert_eq!(m.kind, ChatEntryType::ChatMsg);
    }

    #[test]
    fn missing_entry_keeps_payload_kind() {
        let m = Message::from_entry(UserId(1), UserId(2), ChatEntryType::Typing, None);
        assert_eq!(m.kind, ChatEntryType::Typing);
        assert!(m.content.is_empty());
    }
}
