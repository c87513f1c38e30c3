//! SDK types: identifiers, enumerations and flag sets shared with the native client.

use std::fmt;

/// Opaque handle to one native communication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pipe(pub i32);

impl fmt::Display for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{}", self.0)
    }
}

/// Opaque handle to the user connection made over a [`Pipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserHandle(pub i32);

/// 64-bit account identifier of a user (local user or friend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 32-bit application identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(pub u32);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! ffi_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vm:meta])* $variant:ident = $val:expr),* $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $name { $($(#[$vm])* $variant = $val),* }

        impl $name {
            /// Convert from the native `i32`. Returns `None` for unknown values.
            #[must_use]
            pub fn from_ffi(v: i32) -> Option<Self> {
                match v { $($val => Some(Self::$variant),)* _ => None }
            }
        }
    };
}

ffi_enum! {
    /// Online presence of a user.
    pub enum PersonaState {
        /// Not signed in.
        Offline = 0,
        /// Signed in and available.
        Online = 1,
        /// Do not disturb.
        Busy = 2,
        /// Idle for a while.
        Away = 3,
        /// Idle for a long while.
        Snooze = 4,
        /// Signed in, looking to trade.
        LookingToTrade = 5,
        /// Signed in, looking to play.
        LookingToPlay = 6,
    }
}

impl PersonaState {
    /// Human-readable label.
    #[must_use]
    pub const fn text(self) -> &'static str {
        match self {
            Self::Offline => "Offline",
            Self::Online => "Online",
            Self::Busy => "Busy",
            Self::Away => "Away",
            Self::Snooze => "Snooze",
            Self::LookingToTrade => "Looking To Trade",
            Self::LookingToPlay => "Looking To Play",
        }
    }

    /// Label for a raw native value, `"Unknown"` when it maps to no state.
    #[must_use]
    pub fn text_of(raw: i32) -> &'static str {
        Self::from_ffi(raw).map_or("Unknown", Self::text)
    }

    /// Whether this state counts as signed in.
    #[must_use]
    pub fn is_online(self) -> bool {
        self != Self::Offline
    }
}

impl fmt::Display for PersonaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

ffi_enum! {
    /// Kind of a chat entry.
    pub enum ChatEntryType {
        /// Not a valid entry.
        Invalid = 0,
        /// Normal text message.
        ChatMsg = 1,
        /// The other side started typing.
        Typing = 2,
        /// Game invite.
        InviteGame = 3,
        /// `/me` style emote. No longer delivered by the native client.
        Emote = 4,
        /// Lobby game is starting.
        LobbyGameStart = 5,
        /// The other side closed the conversation window.
        LeftConversation = 6,
    }
}

bitflags::bitflags! {
    /// Installation state of an application, as a set of flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AppState: u32 {
        const UNINSTALLED = 1;
        const UPDATE_REQUIRED = 1 << 1;
        const FULLY_INSTALLED = 1 << 2;
        const ENCRYPTED = 1 << 3;
        const LOCKED = 1 << 4;
        const FILES_MISSING = 1 << 5;
        const APP_RUNNING = 1 << 6;
        const FILES_CORRUPT = 1 << 7;
        const UPDATE_RUNNING = 1 << 8;
        const UPDATE_PAUSED = 1 << 9;
        const UPDATE_STARTED = 1 << 10;
        const UNINSTALLING = 1 << 11;
        const BACKUP_RUNNING = 1 << 12;
        const RECONFIGURING = 1 << 16;
        const VALIDATING = 1 << 17;
        const ADDING_FILES = 1 << 18;
        const PREALLOCATING = 1 << 19;
        const DOWNLOADING = 1 << 20;
        const STAGING = 1 << 21;
        const COMMITTING = 1 << 22;
        const UPDATE_STOPPING = 1 << 23;
    }
}

bitflags::bitflags! {
    /// What changed in a persona state change notification.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PersonaChange: u32 {
        const NAME = 1;
        const STATUS = 1 << 1;
        const COME_ONLINE = 1 << 2;
        const GONE_OFFLINE = 1 << 3;
        const GAME_PLAYED = 1 << 4;
        const GAME_SERVER = 1 << 5;
        const AVATAR = 1 << 6;
        const JOINED_SOURCE = 1 << 7;
        const LEFT_SOURCE = 1 << 8;
        const RELATIONSHIP_CHANGED = 1 << 9;
        const NAME_FIRST_SET = 1 << 10;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persona_state_text_falls_back_to_unknown() {
        assert_eq!(PersonaState::text_of(6), "Looking To Play");
        assert_eq!(PersonaState::text_of(42), "Unknown");
    }

    #[test]
    fn only_offline_is_not_online() {
        assert!(!PersonaState::Offline.is_online());
        assert!(PersonaState::Snooze.is_online());
    }
}
