//! Error types for the backend layer.

use std::time::Duration;

/// Errors a [`BackendHandler`](crate::BackendHandler) operation can end with.
///
/// None of these are faults: every one is reported to the caller as a
/// plain `Err`, and lobby/room operations additionally emit a failed
/// completion event carrying the same text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// `Initialize` hasn't completed on this handler.
    #[error("backend not initialized")]
    NotInitialized,

    /// The operation needs network presence and there is none.
    #[error("not connected")]
    NotConnected,

    /// The operation needs a lobby/room and we aren't in one.
    #[error("not in a lobby or room")]
    NotInStation,

    /// The backend said no (auth failure, room full, name collision).
    ///
    /// The text is the backend's own message, passed through unmodified.
    #[error("{0}")]
    Rejected(String),

    /// Unicast to an id that doesn't resolve to a participant.
    #[error("target {0} not found")]
    TargetNotFound(String),

    /// A bounded wait for a backend state transition ran out.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The handler is being torn down.
    #[error("handler is shutting down")]
    ShuttingDown,
}
