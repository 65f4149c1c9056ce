//! Error types for the session layer.

use netbridge_backend::BackendError;

use crate::FacadeState;

/// Errors returned by [`SessionFacade`](crate::SessionFacade) operations.
///
/// None of these are faults: every one is a normal "that didn't work"
/// result the application is expected to branch on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No backend handler is active. Nothing was sent to any backend.
    #[error("no backend handler is active")]
    HandlerMissing,

    /// The facade is tearing its handler down.
    #[error("the session is shutting down")]
    ShuttingDown,

    /// A later operation of the same kind, or a handler swap, overtook this
    /// one. Its result no longer describes the facade's state.
    #[error("operation was superseded by a newer one")]
    Superseded,

    /// The operation needs a connected session and there isn't one.
    #[error("not connected")]
    NotConnected,

    /// The operation isn't allowed in the facade's current state.
    #[error("{operation} is not allowed while {from}")]
    InvalidTransition {
        from: FacadeState,
        operation: &'static str,
    },

    /// The backend refused or failed. Its text is passed through unchanged.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
