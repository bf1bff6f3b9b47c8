//! Error types for the client.

use parley_protocol::{FailureKind, ProtocolError, RequestId, Response};
use parley_transport::TransportError;

/// Errors returned by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No response arrived within the request timeout. The connection is
    /// still usable.
    #[error("request {0} timed out")]
    RequestTimeout(RequestId),

    /// The transport went away while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The other side answered with `failure`.
    #[error("request rejected: {message}")]
    Rejected {
        kind: Option<FailureKind>,
        message: String,
    },

    /// The operation needs a logged-in client.
    #[error("not logged in")]
    NotLoggedIn,

    /// `send`/`quit` without an active chat.
    #[error("no active chat")]
    NoChat,

    /// Server commands are unavailable while chatting directly.
    #[error("already chatting with {0}")]
    ChatActive(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    /// The failure kind, if this is a rejection that carried one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Rejected { kind, .. } => *kind,
            _ => None,
        }
    }
}

/// Turns a `failure` response into [`ClientError::Rejected`].
pub(crate) fn accepted(response: Response) -> Result<Response, ClientError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Rejected {
            kind: response.error,
            message: response.message.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_failure_becomes_rejected() {
        let err = accepted(Response::failure(FailureKind::NoPartner, "no partner"))
            .unwrap_err();

        assert_eq!(err.kind(), Some(FailureKind::NoPartner));
        assert_eq!(err.to_string(), "request rejected: no partner");
    }

    #[test]
    fn test_accepted_success_passes_through() {
        let response = accepted(Response::users(vec!["bob".into()])).unwrap();
        assert_eq!(response.users, Some(vec!["bob".to_string()]));
    }
}
