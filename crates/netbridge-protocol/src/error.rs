//! Error types for the protocol layer.

/// Errors that can occur while parsing or encoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// An operation name that isn't one of the eight lobby/room operations.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Settings could not be encoded to JSON.
    #[error("settings encode failed: {0}")]
    Encode(serde_json::Error),

    /// Settings could not be decoded from JSON.
    ///
    /// Common causes: malformed JSON, a missing common field, or a
    /// non-numeric `max_players`.
    #[error("settings decode failed: {0}")]
    Decode(serde_json::Error),
}
