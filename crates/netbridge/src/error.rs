//! Unified error type for the Netbridge crates.

use netbridge_backend::BackendError;
use netbridge_protocol::ProtocolError;
use netbridge_session::SessionError;

/// Wraps every crate-specific error so `?` works across layers.
#[derive(Debug, thiserror::Error)]
pub enum NetbridgeError {
    /// Facade-level failure (no handler, superseded, wrong state).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Failure reported by a backend handler, message verbatim.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Operation names or settings that failed to parse.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
