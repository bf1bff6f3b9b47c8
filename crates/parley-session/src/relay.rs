//! Chat traffic through the server, for pairs that don't go direct.

use parley_protocol::PeerCommand;

use crate::{Session, SessionError};

impl Session {
    /// Forwards `text` to this session's partner, attributed to us.
    ///
    /// Delivery is best effort: if the partner's connection is already
    /// going away the message is dropped, but the sender still gets
    /// success. Only "no partner" is an error.
    pub fn relay(&self, text: &str) -> Result<(), SessionError> {
        let me = self.require_identity()?;
        let outbound = {
            let entries = self.directory.lock();
            let partner = entries
                .get(me)
                .and_then(|e| e.partner.as_ref())
                .ok_or(SessionError::NoPartner)?;
            entries.get(partner).map(|e| e.outbound.clone())
        };

        if let Some(outbound) = outbound {
            if outbound.send(PeerCommand::chat(me, text)).is_err() {
                tracing::debug!(username = %me, "partner closed before relay");
            }
        }
        Ok(())
    }

    /// Ends the current chat.
    ///
    /// Both sides lose their partner reference in one step, and the former
    /// partner gets a system notice.
    pub fn quit(&self) -> Result<(), SessionError> {
        let me = self.require_identity()?;
        let (partner, outbound) = {
            let mut entries = self.directory.lock();
            let partner = entries
                .get_mut(me)
                .and_then(|e| e.partner.take())
                .ok_or(SessionError::NoPartner)?;
            let outbound = entries.get_mut(&partner).map(|other| {
                if other.partner.as_deref() == Some(me) {
                    other.partner = None;
                }
                other.outbound.clone()
            });
            (partner, outbound)
        };

        if let Some(outbound) = outbound {
            let notice = PeerCommand::notice(format!("{me} has left the chat"));
            if outbound.send(notice).is_err() {
                tracing::debug!(%partner, "partner closed before quit notice");
            }
        }
        tracing::info!(username = %me, %partner, "chat ended");
        Ok(())
    }
}
