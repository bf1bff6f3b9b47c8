//! Unified error type for the Parley server.

use parley_protocol::ProtocolError;
use parley_session::SessionError;
use parley_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// `#[from]` on each variant lets `?` lift sub-crate errors straight into
/// this one.
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    /// Bind, accept, send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame couldn't be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session command was refused.
    #[error(transparent)]
    Session(#[from] SessionError),
}
