//! Error types for the protocol layer.
//!
//! Each crate in Parley defines its own error enum. A `ProtocolError`
//! always means the bytes were fine as far as the socket is concerned but
//! could not be turned into (or out of) a record.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The record could not be decoded: malformed JSON, an unknown
    /// `command`, missing required fields, or wrong field types.
    ///
    /// On the server this ends the session.
    #[cfg(feature = "json")]
    #[error("malformed frame: {0}")]
    Decode(serde_json::Error),

    /// The record decoded but breaks a protocol rule, such as a reply that
    /// carries no correlation ID.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
