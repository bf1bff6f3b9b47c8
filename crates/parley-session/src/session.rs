//! Session types: the server's record of one client connection.
//!
//! A session owns the things only its connection task ever touches:
//! - WHO is on the other end (identity, once logged in)
//! - WHERE they connected from (address and observed port)
//! - HOW to push records to them (the outbound handle)
//!
//! Anything another session can observe (availability, partner, a pending
//! rendezvous) lives in the shared [`Directory`] instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_protocol::{Credentials, PeerCommand};
use tokio::sync::mpsc;

use crate::{CredentialStore, Directory, SessionError};

/// The handle used to push unsolicited records to a connected client.
///
/// The connection's writer task owns the receiving half. Sending never
/// blocks, which matters: pushes are produced while holding the directory
/// lock.
pub type Outbound = mpsc::UnboundedSender<PeerCommand>;

// ---------------------------------------------------------------------------
// RendezvousConfig
// ---------------------------------------------------------------------------

/// Tunables for the rendezvous handshake.
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// How long a `connect` waits for the target to reciprocate before
    /// failing with `TargetUnavailable`.
    ///
    /// Default: 60 seconds.
    pub connect_timeout: Duration,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Where a session is in its lifecycle.
///
/// ```text
///   Unauthenticated ──(login)──→ Authenticated ──(advertise)──→ Advertised
///                                      │                            │
///                                      └────(connect matched)───────┤
///                                                                   ▼
///                                      Authenticated ←──(quit)─── Paired
/// ```
///
/// A session leaving `Paired` through `quit` keeps its advertised flag, so
/// it drops back to `Advertised` if it had advertised before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Advertised,
    Paired,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client connection as seen by the server.
///
/// Dropping a session that logged in removes its directory entry, clears
/// the partner's back-reference and notifies the partner. The connection
/// task just lets the session fall out of scope, whatever the reason it
/// stopped.
pub struct Session {
    pub(crate) directory: Arc<Directory>,
    pub(crate) identity: Option<String>,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) outbound: Outbound,
}

impl Session {
    pub fn new(
        directory: Arc<Directory>,
        peer_addr: SocketAddr,
        outbound: Outbound,
    ) -> Self {
        Self {
            directory,
            identity: None,
            peer_addr,
            outbound,
        }
    }

    /// The username bound by `login`, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> SessionState {
        match &self.identity {
            None => SessionState::Unauthenticated,
            Some(name) => self
                .directory
                .state_of(name)
                .unwrap_or(SessionState::Unauthenticated),
        }
    }

    pub(crate) fn require_identity(&self) -> Result<&str, SessionError> {
        self.identity.as_deref().ok_or(SessionError::NotAuthorized)
    }

    /// Binds this session to an identity and publishes it in the directory.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyLoggedIn`] if this connection is already
    ///   logged in, or the username has a live session elsewhere.
    /// - [`SessionError::InvalidCredentials`] if the store rejects the pair.
    pub async fn login<S: CredentialStore>(
        &mut self,
        store: &S,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        if let Some(current) = &self.identity {
            return Err(SessionError::AlreadyLoggedIn(current.clone()));
        }
        // Checked before the store so a duplicate login doesn't get to
        // probe passwords.
        if self.directory.contains(&credentials.username) {
            return Err(SessionError::AlreadyLoggedIn(
                credentials.username.clone(),
            ));
        }
        if !store
            .validate(&credentials.username, &credentials.password)
            .await
        {
            return Err(SessionError::InvalidCredentials);
        }

        self.directory.insert(
            &credentials.username,
            self.peer_addr,
            self.outbound.clone(),
        )?;
        self.identity = Some(credentials.username.clone());

        tracing::info!(
            username = %credentials.username,
            addr = %self.peer_addr,
            "logged in"
        );
        Ok(())
    }

    /// Checks the credentials attached to a post-login request.
    ///
    /// They must validate, and they must name the identity this connection
    /// logged in as. Anything else is [`SessionError::NotAuthorized`].
    pub async fn authorize<S: CredentialStore>(
        &self,
        store: &S,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        match &self.identity {
            Some(me) if *me == credentials.username => {}
            _ => return Err(SessionError::NotAuthorized),
        }
        if store
            .validate(&credentials.username, &credentials.password)
            .await
        {
            Ok(())
        } else {
            Err(SessionError::NotAuthorized)
        }
    }

    /// Marks this session as available and returns who else is.
    ///
    /// `port`, if given, replaces the port peers will be told to use when
    /// this session opens a direct chat.
    pub fn advertise(
        &self,
        port: Option<u16>,
    ) -> Result<Vec<String>, SessionError> {
        let me = self.require_identity()?;
        let users = self.directory.advertise(me, port)?;
        tracing::debug!(username = %me, available = users.len(), "advertised");
        Ok(users)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(name) = self.identity.take() {
            self.directory.remove(&name);
        }
    }
}
