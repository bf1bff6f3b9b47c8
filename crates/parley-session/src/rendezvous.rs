//! The rendezvous handshake.
//!
//! Two sessions become partners only when each has asked to `connect` to
//! the other. Whichever request arrives second finds the first one waiting
//! and completes the match for both, inside one critical section:
//!
//! ```text
//!   alice: connect(bob) ──→ pending{bob} ──→ waits ...........┐
//!                                                             │ Matched{port}
//!   bob:   connect(alice) ──→ sees alice waiting on bob ──────┘
//!              │
//!              ▼
//!   bob = opener   { address: own, port: own, is_client: true }
//!   alice = listener { address: "", port: bob's, is_client: false }
//! ```
//!
//! The waiter's deadline comes from [`RendezvousConfig`](crate::RendezvousConfig).

use parley_protocol::Rendezvous;
use tokio::sync::oneshot;

use crate::directory::{Matched, PendingConnect};
use crate::{Session, SessionError};

impl Session {
    /// Requests a chat with `target` and waits until both sides agree.
    ///
    /// `port`, if given, replaces the port this session advertises for the
    /// direct connection.
    ///
    /// # Errors
    /// - [`SessionError::TargetUnavailable`] if `target` is this session,
    ///   isn't logged in, leaves while we wait, or never reciprocates
    ///   within the connect timeout.
    /// - [`SessionError::AlreadyPaired`] if this session has a partner.
    pub async fn connect(
        &self,
        target: &str,
        port: Option<u16>,
    ) -> Result<Rendezvous, SessionError> {
        let me = self.require_identity()?.to_string();

        let signal = match self.try_match(&me, target, port)? {
            Attempt::Opened(rendezvous) => return Ok(rendezvous),
            Attempt::Waiting(signal) => signal,
        };

        tracing::debug!(username = %me, %target, "waiting for rendezvous");
        let deadline = self.directory.config().connect_timeout;
        let mut signal = signal;
        if let Ok(Ok(matched)) =
            tokio::time::timeout(deadline, &mut signal).await
        {
            return Ok(self.listen(&me, target, matched));
        }

        // Timed out, or the target left. Settle under the lock: an opener
        // may have matched us right at the deadline, and that pairing has
        // already been recorded on both sides.
        let mut entries = self.directory.lock();
        if let Ok(matched) = signal.try_recv() {
            drop(entries);
            return Ok(self.listen(&me, target, matched));
        }
        if let Some(own) = entries.get_mut(&me) {
            if own.pending.as_ref().is_some_and(|p| p.target == target) {
                own.pending = None;
            }
        }
        drop(entries);

        tracing::info!(username = %me, %target, "rendezvous failed");
        Err(SessionError::TargetUnavailable(target.to_string()))
    }

    /// Either completes a match with a target that is already waiting for
    /// us, or registers our own pending request.
    fn try_match(
        &self,
        me: &str,
        target: &str,
        port: Option<u16>,
    ) -> Result<Attempt, SessionError> {
        let unavailable = || SessionError::TargetUnavailable(target.to_string());
        if target == me {
            return Err(unavailable());
        }

        let mut entries = self.directory.lock();
        if !entries.contains_key(target) {
            return Err(unavailable());
        }

        let own = entries.get_mut(me).ok_or(SessionError::NotAuthorized)?;
        if let Some(partner) = &own.partner {
            return Err(SessionError::AlreadyPaired(partner.clone()));
        }
        if let Some(port) = port {
            own.port = port;
        }
        let own_port = own.port;
        let own_address = own.address.to_string();

        let waiting_for_us = entries.get_mut(target).and_then(|other| {
            let reciprocal = other.partner.is_none()
                && other.pending.as_ref().is_some_and(|p| p.target == me);
            if reciprocal { other.pending.take() } else { None }
        });

        if let Some(pending) = waiting_for_us {
            // Fails only if the waiter's connection is already being torn
            // down; fall through and wait like any first caller.
            if pending.signal.send(Matched { port: own_port }).is_ok() {
                if let Some(other) = entries.get_mut(target) {
                    other.partner = Some(me.to_string());
                }
                if let Some(own) = entries.get_mut(me) {
                    own.partner = Some(target.to_string());
                }
                tracing::info!(opener = %me, listener = %target, "paired");
                return Ok(Attempt::Opened(Rendezvous {
                    username: me.to_string(),
                    address: own_address,
                    port: own_port,
                    is_client: true,
                }));
            }
        }

        let (tx, rx) = oneshot::channel();
        if let Some(own) = entries.get_mut(me) {
            own.pending = Some(PendingConnect {
                target: target.to_string(),
                signal: tx,
            });
        }
        Ok(Attempt::Waiting(rx))
    }

    fn listen(&self, me: &str, target: &str, matched: Matched) -> Rendezvous {
        tracing::debug!(username = %me, opener = %target, "rendezvous matched");
        Rendezvous {
            username: me.to_string(),
            address: String::new(),
            port: matched.port,
            is_client: false,
        }
    }
}

enum Attempt {
    Opened(Rendezvous),
    Waiting(oneshot::Receiver<Matched>),
}
