//! Payload layouts for the callbacks the domain layer consumes.

use crate::callback::{CallbackId, CallbackPayload};
use crate::error::{Error, Result};
use crate::types::{AppId, AppState, ChatEntryType, PersonaChange, UserId};

const FRIENDS_CALLBACKS: CallbackId = 300;
const CLIENT_FRIENDS_CALLBACKS: CallbackId = 800;
const CLIENT_APP_MANAGER_CALLBACKS: CallbackId = 1300;

/// Little-endian cursor over a payload whose length has already been checked.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn exact<T: CallbackPayload>(raw: &'a [u8]) -> Result<Self> {
        if raw.len() == T::SIZE {
            Ok(Self { buf: raw })
        } else {
            Err(Error::Decode {
                id: T::ID,
                expected: T::SIZE,
                actual: raw.len(),
            })
        }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let (head, rest) = self.buf.split_at(N);
        self.buf = rest;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

/// A user's name, presence or relationship changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonaStateChange {
    /// User whose persona changed (may be the local user).
    pub user: UserId,
    /// Which parts changed.
    pub change: PersonaChange,
}

impl CallbackPayload for PersonaStateChange {
    const ID: CallbackId = FRIENDS_CALLBACKS + 4;
    const SIZE: usize = 12;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::exact::<Self>(raw)?;
        Ok(Self {
            user: UserId(r.u64()),
            change: PersonaChange::from_bits_retain(r.u32()),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.user.0.to_le_bytes());
        out.extend_from_slice(&self.change.bits().to_le_bytes());
        out
    }
}

/// A chat entry was sent or received.
///
/// The entry text is not part of the payload; it is read back from the native
/// client with `chat_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendChatMsg {
    /// The conversation partner the entry is stored under (the receiver).
    pub friend: UserId,
    /// Who wrote the entry.
    pub sender: UserId,
    /// Raw entry kind; see [`entry_type`](Self::entry_type).
    pub entry_type: u32,
    /// Index of the entry in the conversation.
    pub chat_id: u32,
}

impl FriendChatMsg {
    /// Entry kind, `None` for values the SDK does not know.
    #[must_use]
    pub fn entry_type(&self) -> Option<ChatEntryType> {
        i32::try_from(self.entry_type)
            .ok()
            .and_then(ChatEntryType::from_ffi)
    }
}

impl CallbackPayload for FriendChatMsg {
    const ID: CallbackId = CLIENT_FRIENDS_CALLBACKS + 5;
    const SIZE: usize = 24;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::exact::<Self>(raw)?;
        Ok(Self {
            friend: UserId(r.u64()),
            sender: UserId(r.u64()),
            entry_type: r.u32(),
            chat_id: r.u32(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.friend.0.to_le_bytes());
        out.extend_from_slice(&self.sender.0.to_le_bytes());
        out.extend_from_slice(&self.entry_type.to_le_bytes());
        out.extend_from_slice(&self.chat_id.to_le_bytes());
        out
    }
}

/// A user was added to the friends list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendAdded {
    /// Native result code, `1` on success.
    pub result: u32,
    /// The new friend.
    pub user: UserId,
}

impl CallbackPayload for FriendAdded {
    const ID: CallbackId = CLIENT_FRIENDS_CALLBACKS + 21;
    const SIZE: usize = 12;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::exact::<Self>(raw)?;
        Ok(Self {
            result: r.u32(),
            user: UserId(r.u64()),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.result.to_le_bytes());
        out.extend_from_slice(&self.user.0.to_le_bytes());
        out
    }
}

/// Profile details of a friend became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendProfileInfoResponse {
    /// Friend the profile belongs to.
    pub user: UserId,
    /// Native result code, `1` on success.
    pub result: u32,
}

impl CallbackPayload for FriendProfileInfoResponse {
    const ID: CallbackId = CLIENT_FRIENDS_CALLBACKS + 22;
    const SIZE: usize = 12;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::exact::<Self>(raw)?;
        Ok(Self {
            user: UserId(r.u64()),
            result: r.u32(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.user.0.to_le_bytes());
        out.extend_from_slice(&self.result.to_le_bytes());
        out
    }
}

/// The installation state of an application changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppEventStateChange {
    /// Application whose state changed.
    pub app: AppId,
    /// State before the change.
    pub old_state: AppState,
    /// State after the change.
    pub new_state: AppState,
    /// Native result code.
    pub result: u32,
}

impl CallbackPayload for AppEventStateChange {
    const ID: CallbackId = CLIENT_APP_MANAGER_CALLBACKS + 3;
    const SIZE: usize = 16;

    fn decode(raw: &[u8]) -> Result<Self> {
        let mut r = Reader::exact::<Self>(raw)?;
        Ok(Self {
            app: AppId(r.u32()),
            old_state: AppState::from_bits_retain(r.u32()),
            new_state: AppState::from_bits_retain(r.u32()),
            result: r.u32(),
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.app.0.to_le_bytes());
        out.extend_from_slice(&self.old_state.bits().to_le_bytes());
        out.extend_from_slice(&self.new_state.bits().to_le_bytes());
        out.extend_from_slice(&self.result.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_payload_reads_fields_in_order() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&7u64.to_le_bytes());
        raw.extend_from_slice(&9u64.to_le_bytes());
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.extend_from_slice(&41u32.to_le_bytes());

        let msg = FriendChatMsg::decode(&raw).unwrap();
        assert_eq!(msg.friend, UserId(7));
        assert_eq!(msg.sender, UserId(9));
        assert_eq!(msg.entry_type(), Some(ChatEntryType::Typing));
        assert_eq!(msg.chat_id, 41);
    }

    #[test]
    fn wrong_length_is_a_decode_error() {
        let err = PersonaStateChange::decode(&[0u8; 11]).unwrap_err();
        assert_eq!(
            err,
            Error::Decode {
                id: PersonaStateChange::ID,
                expected: 12,
                actual: 11,
            }
        );
        assert!(AppEventStateChange::decode(&[0u8; 17]).is_err());
    }

    #[test]
    fn unknown_persona_change_bits_are_kept() {
        let change = PersonaStateChange {
            user: UserId(1),
            change: PersonaChange::from_bits_retain((1 << 30) | 1),
        };
        let back = PersonaStateChange::decode(&change.encode()).unwrap();
        assert!(back.change.contains(PersonaChange::NAME));
        assert_eq!(back.change.bits(), (1 << 30) | 1);
    }

    #[test]
    fn unknown_entry_type_maps_to_none() {
        let msg = FriendChatMsg {
            friend: UserId(1),
            sender: UserId(2),
            entry_type: 99,
            chat_id: 0,
        };
        assert_eq!(msg.entry_type(), None);
    }
}
