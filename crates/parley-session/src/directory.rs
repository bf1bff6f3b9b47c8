//! The directory: every logged-in session, by username.
//!
//! This is the only state sessions share. Each entry carries what other
//! sessions are allowed to see or change: the advertised flag, the current
//! partner, and a pending rendezvous.
//!
//! # Concurrency note
//!
//! One `std::sync::Mutex` guards the whole map. Critical sections are a few
//! map operations and never await, so a blocking lock is fine here. It also
//! lets [`Session`](crate::Session) clean up synchronously from `Drop`.
//! Pairing two sessions always happens inside a single critical section,
//! which is what keeps partner references symmetric.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_protocol::PeerCommand;
use tokio::sync::oneshot;

use crate::{Outbound, RendezvousConfig, SessionError, SessionState};

/// What a waiting session learns when its target reciprocates.
#[derive(Debug)]
pub(crate) struct Matched {
    /// The opener's advertised port.
    pub(crate) port: u16,
}

/// A `connect` that is waiting for its target to reciprocate.
#[derive(Debug)]
pub(crate) struct PendingConnect {
    pub(crate) target: String,
    pub(crate) signal: oneshot::Sender<Matched>,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) address: IpAddr,
    pub(crate) port: u16,
    pub(crate) advertised: bool,
    pub(crate) partner: Option<String>,
    pub(crate) pending: Option<PendingConnect>,
    pub(crate) outbound: Outbound,
}

impl Entry {
    fn new(addr: SocketAddr, outbound: Outbound) -> Self {
        Self {
            address: addr.ip(),
            port: addr.port(),
            advertised: false,
            partner: None,
            pending: None,
            outbound,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        if self.partner.is_some() {
            SessionState::Paired
        } else if self.advertised {
            SessionState::Advertised
        } else {
            SessionState::Authenticated
        }
    }
}

/// Registry of live sessions.
///
/// At most one entry exists per username. Entries are created by
/// [`Session::login`](crate::Session::login) and removed when the owning
/// session drops.
#[derive(Debug)]
pub struct Directory {
    entries: Mutex<HashMap<String, Entry>>,
    config: RendezvousConfig,
}

impl Directory {
    pub fn new(config: RendezvousConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RendezvousConfig {
        &self.config
    }

    /// Locks the map. A panic in another critical section leaves the map
    /// consistent (every mutation is a single assignment), so poisoning is
    /// ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.lock().contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All logged-in usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn state_of(&self, username: &str) -> Option<SessionState> {
        self.lock().get(username).map(Entry::state)
    }

    pub fn partner_of(&self, username: &str) -> Option<String> {
        self.lock().get(username).and_then(|e| e.partner.clone())
    }

    /// The target of `username`'s pending `connect`, if it is waiting.
    pub fn pending_target_of(&self, username: &str) -> Option<String> {
        self.lock()
            .get(username)
            .and_then(|e| e.pending.as_ref().map(|p| p.target.clone()))
    }

    pub(crate) fn insert(
        &self,
        username: &str,
        addr: SocketAddr,
        outbound: Outbound,
    ) -> Result<(), SessionError> {
        let mut entries = self.lock();
        // A concurrent login for the same name may have won since the
        // caller's first check.
        if entries.contains_key(username) {
            return Err(SessionError::AlreadyLoggedIn(username.to_string()));
        }
        entries.insert(username.to_string(), Entry::new(addr, outbound));
        Ok(())
    }

    pub(crate) fn advertise(
        &self,
        username: &str,
        port: Option<u16>,
    ) -> Result<Vec<String>, SessionError> {
        let mut entries = self.lock();
        let own = entries
            .get_mut(username)
            .ok_or(SessionError::NotAuthorized)?;
        own.advertised = true;
        if let Some(port) = port {
            own.port = port;
        }

        let mut users: Vec<String> = entries
            .iter()
            .filter(|(name, entry)| {
                name.as_str() != username
                    && entry.state() == SessionState::Advertised
            })
            .map(|(name, _)| name.clone())
            .collect();
        users.sort();
        Ok(users)
    }

    /// Drops `username` from the directory.
    ///
    /// The partner (if any) loses its back-reference and gets a notice.
    /// Sessions waiting to rendezvous with `username` are woken so they
    /// fail now instead of at their deadline.
    pub(crate) fn remove(&self, username: &str) {
        let mut entries = self.lock();
        let Some(entry) = entries.remove(username) else {
            return;
        };

        if let Some(partner) = entry.partner {
            if let Some(other) = entries.get_mut(&partner) {
                if other.partner.as_deref() == Some(username) {
                    other.partner = None;
                    let notice = PeerCommand::notice(format!(
                        "{username} has disconnected"
                    ));
                    if other.outbound.send(notice).is_err() {
                        tracing::debug!(
                            %partner,
                            "partner gone before disconnect notice"
                        );
                    }
                }
            }
        }

        for other in entries.values_mut() {
            if other
                .pending
                .as_ref()
                .is_some_and(|p| p.target == username)
            {
                // Dropping the sender wakes the waiter with an error.
                other.pending = None;
            }
        }

        tracing::info!(%username, "left directory");
    }
}
