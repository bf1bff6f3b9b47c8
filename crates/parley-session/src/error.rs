//! Error types for the session layer.

use parley_protocol::FailureKind;

/// Business-rule failures of session commands.
///
/// None of these end the connection: the dispatcher turns each one into a
/// `failure` response via [`SessionError::kind`] and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The credential store rejected the username/secret pair.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Registration hit a username that is already taken.
    #[error("account {0} already exists")]
    AccountExists(String),

    /// The identity already has a live session, or this connection is
    /// already bound to an identity.
    #[error("user {0} is already logged in")]
    AlreadyLoggedIn(String),

    /// The per-request credentials don't match this session.
    #[error("authorization required")]
    NotAuthorized,

    /// The rendezvous target never reciprocated, left, or doesn't exist.
    #[error("user {0} not available")]
    TargetUnavailable(String),

    /// `message`/`quit` without a partner.
    #[error("no partner")]
    NoPartner,

    /// `connect` while already paired.
    #[error("already paired with {0}")]
    AlreadyPaired(String),
}

impl SessionError {
    /// The wire-level failure kind for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidCredentials => FailureKind::InvalidCredentials,
            Self::AccountExists(_) => FailureKind::AccountExists,
            Self::AlreadyLoggedIn(_) => FailureKind::AlreadyLoggedIn,
            Self::NotAuthorized => FailureKind::NotAuthorized,
            Self::TargetUnavailable(_) => FailureKind::TargetUnavailable,
            Self::NoPartner => FailureKind::NoPartner,
            Self::AlreadyPaired(_) => FailureKind::AlreadyPaired,
        }
    }
}
