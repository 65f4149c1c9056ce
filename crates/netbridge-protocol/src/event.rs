//! The normalized event set.
//!
//! Backends raise these; the facade updates its own state from them and
//! republishes them 1:1. Events are fire-and-forget: nobody replies.

use crate::{AccountId, NickName, Operation, Scope};

/// Result of one lobby/room operation invocation.
///
/// `message` is free text. On success it usually carries the station id;
/// on failure it is the backend's own error text, unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub operation: Operation,
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn succeeded(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            operation,
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            operation,
            success: false,
            message: message.into(),
        }
    }
}

/// Everything a backend can tell the facade.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// A payload arrived (or looped back, for the dummy backend).
    DataReceived(Vec<u8>),

    /// A participant joined the current station.
    PlayerConnected { id: AccountId, name: NickName },

    /// A participant left the current station.
    PlayerDisconnected { id: AccountId, name: NickName },

    /// Network presence changed.
    ConnectionStatusChanged(bool),

    /// This participant gained or lost the host role.
    HostStatusChanged(bool),

    /// A lobby operation finished.
    LobbyOperationCompleted(OperationOutcome),

    /// A room operation finished.
    RoomOperationCompleted(OperationOutcome),
}

impl NetworkEvent {
    /// Wraps an outcome in the completion event matching its scope.
    ///
    /// Handlers should always go through here rather than picking the
    /// variant by hand.
    pub fn completed(outcome: OperationOutcome) -> Self {
        match outcome.operation.scope() {
            Scope::Lobby => Self::LobbyOperationCompleted(outcome),
            Scope::Room => Self::RoomOperationCompleted(outcome),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataReceived(_) => "DataReceived",
            Self::PlayerConnected { .. } => "PlayerConnected",
            Self::PlayerDisconnected { .. } => "PlayerDisconnected",
            Self::ConnectionStatusChanged(_) => "ConnectionStatusChanged",
            Self::HostStatusChanged(_) => "HostStatusChanged",
            Self::LobbyOperationCompleted(_) => "LobbyOperationCompleted",
            Self::RoomOperationCompleted(_) => "RoomOperationCompleted",
        }
    }

    /// The outcome, if this is a completion event.
    pub fn outcome(&self) -> Option<&OperationOutcome> {
        match self {
            Self::LobbyOperationCompleted(o) | Self::RoomOperationCompleted(o) => Some(o),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_routes_room_operation_to_room_event() {
        let event =
            NetworkEvent::completed(OperationOutcome::succeeded(Operation::CreateRoom, "R_1"));
        assert!(matches!(event, NetworkEvent::RoomOperationCompleted(ref o) if o.success));
    }

    #[test]
    fn test_completed_routes_lobby_operation_to_lobby_event() {
        let event = NetworkEvent::completed(OperationOutcome::failed(
            Operation::ConnectLobby,
            "Not connected.",
        ));
        assert!(matches!(event, NetworkEvent::LobbyOperationCompleted(ref o) if !o.success));
    }

    #[test]
    fn test_outcome_only_for_completion_events() {
        assert!(NetworkEvent::HostStatusChanged(true).outcome().is_none());
        let event = NetworkEvent::completed(OperationOutcome::succeeded(
            Operation::DisconnectRoom,
            "",
        ));
        assert_eq!(event.outcome().unwrap().operation, Operation::DisconnectRoom);
    }
}
