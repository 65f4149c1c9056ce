//! Identity and operation-name types.
//!
//! Backends hand out identifiers in wildly different shapes (a service
//! player id, a room name, a lobby id with a suffix). We keep them all as
//! strings, but wrap each one in its own newtype so an `AccountId` can't be
//! passed where a `StationId` is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity newtypes
// ---------------------------------------------------------------------------

/// Generates a string newtype with the conversions every identity needs.
///
/// `#[serde(transparent)]` keeps the JSON form a bare string.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the backend handed out an empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Unwraps into the owned string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// Backend-assigned user identifier.
    AccountId
}

string_id! {
    /// Display name of a participant.
    NickName
}

string_id! {
    /// Identifier of the lobby, room, or session currently occupied.
    StationId
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which half of the contract an operation belongs to.
///
/// "Lobby" and "Room" are the same capability from the facade's point of
/// view. They differ only in which completion event reports the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Lobby,
    Room,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lobby => f.write_str("Lobby"),
            Self::Room => f.write_str("Room"),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// The name carried by a lobby/room completion event.
///
/// A handler that forwards `CreateRoom` to its lobby implementation must
/// still report `CreateRoom`. Handlers build the name from the scope they
/// were invoked with ([`Operation::create`] and friends) so attribution
/// can't drift during delegation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CreateLobby,
    ConnectLobby,
    DisconnectLobby,
    SearchLobby,
    CreateRoom,
    ConnectRoom,
    DisconnectRoom,
    SearchRoom,
}

impl Operation {
    /// Every operation, lobby half first.
    pub const ALL: [Operation; 8] = [
        Self::CreateLobby,
        Self::ConnectLobby,
        Self::DisconnectLobby,
        Self::SearchLobby,
        Self::CreateRoom,
        Self::ConnectRoom,
        Self::DisconnectRoom,
        Self::SearchRoom,
    ];

    /// The create operation for `scope`.
    pub const fn create(scope: Scope) -> Self {
        match scope {
            Scope::Lobby => Self::CreateLobby,
            Scope::Room => Self::CreateRoom,
        }
    }

    /// The connect (join) operation for `scope`.
    pub const fn connect(scope: Scope) -> Self {
        match scope {
            Scope::Lobby => Self::ConnectLobby,
            Scope::Room => Self::ConnectRoom,
        }
    }

    /// The disconnect (leave) operation for `scope`.
    pub const fn disconnect(scope: Scope) -> Self {
        match scope {
            Scope::Lobby => Self::DisconnectLobby,
            Scope::Room => Self::DisconnectRoom,
        }
    }

    /// The search operation for `scope`.
    pub const fn search(scope: Scope) -> Self {
        match scope {
            Scope::Lobby => Self::SearchLobby,
            Scope::Room => Self::SearchRoom,
        }
    }

    /// Which completion event reports this operation.
    pub const fn scope(self) -> Scope {
        match self {
            Self::CreateLobby
            | Self::ConnectLobby
            | Self::DisconnectLobby
            | Self::SearchLobby => Scope::Lobby,
            Self::CreateRoom
            | Self::ConnectRoom
            | Self::DisconnectRoom
            | Self::SearchRoom => Scope::Room,
        }
    }

    /// The wire name, e.g. `"CreateRoom"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateLobby => "CreateLobby",
            Self::ConnectLobby => "ConnectLobby",
            Self::DisconnectLobby => "DisconnectLobby",
            Self::SearchLobby => "SearchLobby",
            Self::CreateRoom => "CreateRoom",
            Self::ConnectRoom => "ConnectRoom",
            Self::DisconnectRoom => "DisconnectRoom",
            Self::SearchRoom => "SearchRoom",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownOperation(s.to_owned()))
    }
}
